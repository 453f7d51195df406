//! Relay daemon binary.
//!
//! See `relayd::cli` for flags and signal handling.

fn main() -> anyhow::Result<()> {
    relayd::cli::main()
}
