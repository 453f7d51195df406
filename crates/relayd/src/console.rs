//! Administrative console.
//!
//! Reads commands line by line and answers them from storage. The console
//! runs on its own thread and only ever calls the read-only `Storage`
//! queries; the live connection state belongs to the dispatch loop.
//!
//! Commands:
//! - `help` - list commands
//! - `users` - every known user with their last login
//! - `connected` - currently registered clients
//! - `loghist [name]` - login history, optionally for one name
//! - `exit` - stop the server

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use relay_core::{AccountName, DomainError, Storage, StorageError};
use thiserror::Error;
use tracing::debug;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const PROMPT: &str = "> ";

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Help,
    Users,
    Connected,
    LogHistory(Option<AccountName>),
    Exit,
}

impl ConsoleCommand {
    /// Parses one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, ConsoleError> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Ok(None);
        };
        let argument = words.next();

        let parsed = match (command, argument) {
            ("help", None) => Self::Help,
            ("users", None) => Self::Users,
            ("connected", None) => Self::Connected,
            ("loghist", None) => Self::LogHistory(None),
            ("loghist", Some(name)) => Self::LogHistory(Some(AccountName::parse(name)?)),
            ("exit", None) => Self::Exit,
            _ => return Err(ConsoleError::UnknownCommand(line.trim().to_string())),
        };

        if words.next().is_some() {
            return Err(ConsoleError::UnknownCommand(line.trim().to_string()));
        }
        Ok(Some(parsed))
    }
}

/// How the console stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleFlow {
    /// Operator asked the server to stop.
    Exit,
    /// Input reached end of file. The server keeps running.
    InputClosed,
}

/// Console errors.
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("invalid account name: {0}")]
    InvalidName(#[from] DomainError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("console I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Writes the command list.
pub fn print_help(out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "Supported commands:")?;
    writeln!(out, "  help            show this list")?;
    writeln!(out, "  users           known users and their last login")?;
    writeln!(out, "  connected       currently connected users")?;
    writeln!(out, "  loghist [name]  login history, for one user or everyone")?;
    writeln!(out, "  exit            stop the server")
}

fn timestamp(time: &DateTime<Utc>) -> String {
    time.format(TIME_FORMAT).to_string()
}

/// Operator console over a shared storage handle.
pub struct Console {
    storage: Arc<dyn Storage>,
}

impl Console {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Runs one command, writing its output.
    pub fn execute(
        &self,
        command: &ConsoleCommand,
        out: &mut impl Write,
    ) -> Result<Option<ConsoleFlow>, ConsoleError> {
        match command {
            ConsoleCommand::Help => print_help(out)?,
            ConsoleCommand::Users => {
                let users = self.storage.users_list()?;
                if users.is_empty() {
                    writeln!(out, "No known users")?;
                }
                for user in users {
                    writeln!(out, "{} last login {}", user.name, timestamp(&user.last_login))?;
                }
            }
            ConsoleCommand::Connected => {
                let active = self.storage.active_users_list()?;
                if active.is_empty() {
                    writeln!(out, "No connected users")?;
                }
                for session in active {
                    writeln!(
                        out,
                        "{} connected from {}:{} since {}",
                        session.name,
                        session.ip,
                        session.port,
                        timestamp(&session.connected_since)
                    )?;
                }
            }
            ConsoleCommand::LogHistory(name) => {
                let history = self.storage.login_history(name.as_ref())?;
                if history.is_empty() {
                    writeln!(out, "No login history")?;
                }
                for record in history {
                    writeln!(
                        out,
                        "{} logged in at {} from {}:{}",
                        record.name,
                        timestamp(&record.login_time),
                        record.ip,
                        record.port
                    )?;
                }
            }
            ConsoleCommand::Exit => {
                writeln!(out, "Stopping server")?;
                return Ok(Some(ConsoleFlow::Exit));
            }
        }
        Ok(None)
    }

    /// Reads commands until `exit` or end of input.
    ///
    /// Bad commands and storage failures are reported to `out` and the
    /// console keeps reading. Only I/O errors on the console itself end it.
    pub fn run(&self, input: impl BufRead, mut out: impl Write) -> Result<ConsoleFlow, ConsoleError> {
        print_help(&mut out)?;

        let mut lines = input.lines();
        loop {
            write!(out, "{PROMPT}")?;
            out.flush()?;

            let Some(line) = lines.next() else {
                debug!("Console input closed");
                return Ok(ConsoleFlow::InputClosed);
            };
            let line = line?;

            let result = ConsoleCommand::parse(&line).and_then(|command| match command {
                Some(command) => self.execute(&command, &mut out),
                None => Ok(None),
            });

            match result {
                Ok(Some(flow)) => return Ok(flow),
                Ok(None) => {}
                Err(ConsoleError::UnknownCommand(_)) => writeln!(out, "unknown command")?,
                Err(ConsoleError::Io(e)) => return Err(ConsoleError::Io(e)),
                Err(e) => writeln!(out, "{e}")?,
            }
        }
    }
}
