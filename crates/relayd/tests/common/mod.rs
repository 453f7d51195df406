//! Shared harness for the relay integration tests.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use relay_core::{AccountName, MemoryStorage, Storage};
use relay_protocol::{
    decode_server_message, encode_line, ClientRequest, ServerMessage, ServerResponse,
    MAX_FRAME_BYTES,
};
use relayd::server::{RelayServer, ServerOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Accept wait used by test servers, short so tests stay quick
pub const TEST_ACCEPT_TIMEOUT: Duration = Duration::from_millis(20);

/// Upper bound for any single expected reply
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to listen before concluding nothing will arrive
pub const QUIET_PERIOD: Duration = Duration::from_millis(200);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Test Server
// ============================================================================

/// Relay server on an ephemeral loopback port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub storage: Arc<MemoryStorage>,
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with_max_frame(MAX_FRAME_BYTES).await
    }

    pub async fn spawn_with_max_frame(max_frame_bytes: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
        let addr = listener.local_addr().expect("local addr");
        let storage = Arc::new(MemoryStorage::new());
        let cancel_token = CancellationToken::new();

        let server = RelayServer::from_listener(
            listener,
            storage.clone(),
            ServerOptions {
                accept_timeout: TEST_ACCEPT_TIMEOUT,
                max_frame_bytes,
            },
            cancel_token.clone(),
        );

        let handle = tokio::spawn(async move {
            let _ = server.run().await;
        });

        Self {
            addr,
            storage,
            cancel_token,
            handle,
        }
    }

    pub async fn connect(&self) -> TestClient {
        let stream = TcpStream::connect(self.addr).await.expect("connect to server");
        TestClient::new(stream)
    }

    /// Connects and registers `name`, asserting success.
    pub async fn register(&self, name: &str) -> TestClient {
        let mut client = self.connect().await;
        let response = client.presence(name).await;
        assert!(response.is_ok(), "registration of {name} failed: {response:?}");
        client
    }

    /// Names with an active session, sorted.
    pub fn active_names(&self) -> Vec<String> {
        self.storage
            .active_users_list()
            .unwrap()
            .into_iter()
            .map(|session| session.name.to_string())
            .collect()
    }

    /// Polls until `condition` holds or fails the test.
    pub async fn wait_until(&self, what: &str, condition: impl Fn(&MemoryStorage) -> bool) {
        let start = Instant::now();
        while start.elapsed() < RECV_TIMEOUT {
            if condition(self.storage.as_ref()) {
                return;
            }
            sleep(POLL_INTERVAL).await;
        }
        panic!("Timed out waiting for: {what}");
    }

    /// Cancels the server and waits for the loop to finish.
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        timeout(RECV_TIMEOUT, self.handle)
            .await
            .expect("server stops after cancel")
            .expect("server task completes");
    }
}

// ============================================================================
// Test Client
// ============================================================================

/// Client connection with protocol helpers.
pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

pub fn name(s: &str) -> AccountName {
    AccountName::parse(s).unwrap()
}

impl TestClient {
    fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    pub async fn send(&mut self, request: &ClientRequest) {
        let line = encode_line(request).unwrap();
        self.send_raw(&line).await;
    }

    pub async fn send_raw(&mut self, data: &[u8]) {
        self.writer.write_all(data).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Receives one message or fails the test.
    pub async fn recv(&mut self) -> ServerMessage {
        self.recv_timeout(RECV_TIMEOUT)
            .await
            .expect("expected a message from the server")
    }

    /// Receives one message, or `None` if nothing arrives in time.
    pub async fn recv_timeout(&mut self, duration: Duration) -> Option<ServerMessage> {
        let mut line = String::new();
        match timeout(duration, self.reader.read_line(&mut line)).await {
            Ok(Ok(0)) => panic!("connection closed while waiting for a message"),
            Ok(Ok(_)) => Some(decode_server_message(line.trim_end().as_bytes()).unwrap()),
            Ok(Err(e)) => panic!("read failed: {e}"),
            Err(_) => None,
        }
    }

    /// Receives a status response or fails the test.
    pub async fn recv_response(&mut self) -> ServerResponse {
        match self.recv().await {
            ServerMessage::Response(response) => response,
            other => panic!("Expected a response, got {other:?}"),
        }
    }

    pub async fn presence(&mut self, account: &str) -> ServerResponse {
        self.send(&ClientRequest::presence(1.0, name(account))).await;
        self.recv_response().await
    }

    /// Asserts the server closes the connection without sending more data.
    pub async fn expect_closed(&mut self) {
        let mut line = String::new();
        match timeout(RECV_TIMEOUT, self.reader.read_line(&mut line)).await {
            Ok(Ok(0)) | Ok(Err(_)) => {}
            Ok(Ok(_)) => panic!("expected close, got {line:?}"),
            Err(_) => panic!("connection still open"),
        }
    }

    /// Discards anything still arriving until the server closes the
    /// connection. The server may reset instead of closing cleanly when it
    /// drops a client with unread input, so read errors count as closed.
    pub async fn drain_until_closed(&mut self) {
        let start = Instant::now();
        let mut line = String::new();
        while start.elapsed() < RECV_TIMEOUT {
            line.clear();
            match timeout(RECV_TIMEOUT, self.reader.read_line(&mut line)).await {
                Ok(Ok(0)) | Ok(Err(_)) => return,
                Ok(Ok(_)) => continue,
                Err(_) => break,
            }
        }
        panic!("connection still open");
    }

    /// Asserts nothing arrives for a short while.
    pub async fn expect_silence(&mut self) {
        if let Some(message) = self.recv_timeout(QUIET_PERIOD).await {
            panic!("expected silence, got {message:?}");
        }
    }
}
