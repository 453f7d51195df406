//! Robustness tests: awkward framing, hostile input, connection churn.
//!
//! The server must keep serving well-behaved clients whatever the others do.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

mod common;

use std::time::Duration;

use common::{name, TestServer};
use relay_core::Storage;
use relay_protocol::{
    ClientRequest, ServerMessage, ServerResponse, ERROR_ALREADY_REGISTERED, ERROR_MALFORMED,
};
use tokio::time::sleep;

#[tokio::test]
async fn test_empty_lines_ignored() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client.send_raw(b"\n\r\n   \n").await;
    client.expect_silence().await;
    assert_eq!(client.presence("alice").await, ServerResponse::ok());

    server.shutdown().await;
}

#[tokio::test]
async fn test_request_split_across_writes() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client.send_raw(b"{\"action\":\"presence\",").await;
    sleep(Duration::from_millis(50)).await;
    client.send_raw(b"\"time\":1,\"user\":{\"account_name\":").await;
    sleep(Duration::from_millis(50)).await;
    client.send_raw(b"\"alice\"}}\n").await;

    assert_eq!(client.recv_response().await, ServerResponse::ok());
    assert_eq!(server.active_names(), vec!["alice"]);

    server.shutdown().await;
}

#[tokio::test]
async fn test_several_requests_in_one_write() {
    let server = TestServer::spawn().await;
    let mut alice = server.register("alice").await;
    let mut bob = server.connect().await;

    bob.send_raw(
        b"{\"action\":\"presence\",\"time\":1,\"user\":{\"account_name\":\"bob\"}}\n\
          {\"action\":\"message\",\"time\":2,\"from\":\"bob\",\"to\":\"alice\",\"mess_text\":\"hi\"}\n",
    )
    .await;

    assert_eq!(bob.recv_response().await, ServerResponse::ok());
    match alice.recv().await {
        ServerMessage::Relayed(ClientRequest::Message(message)) => {
            assert_eq!(message.sender, name("bob"));
            assert_eq!(message.text, "hi");
        }
        other => panic!("Expected relayed message, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_invalid_account_name_is_malformed() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client
        .send_raw(b"{\"action\":\"presence\",\"time\":1,\"user\":{\"account_name\":\"\"}}\n")
        .await;
    assert_eq!(
        client.recv_response().await,
        ServerResponse::bad_request(ERROR_MALFORMED)
    );
    assert!(server.active_names().is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let server = TestServer::spawn_with_max_frame(1024).await;
    let mut hog = server.connect().await;
    let mut alice = server.register("alice").await;

    hog.send_raw(&vec![b'x'; 4096]).await;
    hog.drain_until_closed().await;

    // Others are unaffected
    assert_eq!(
        alice.presence("alice").await,
        ServerResponse::bad_request(ERROR_ALREADY_REGISTERED)
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_rapid_connect_disconnect() {
    let server = TestServer::spawn().await;

    for _ in 0..20 {
        let client = server.connect().await;
        drop(client);
    }

    let mut client = server.connect().await;
    assert_eq!(client.presence("survivor").await, ServerResponse::ok());

    server.shutdown().await;
}

#[tokio::test]
async fn test_many_concurrent_clients() {
    let server = TestServer::spawn().await;

    let mut clients = Vec::new();
    for i in 0..25 {
        clients.push(server.register(&format!("user{i:02}")).await);
    }
    assert_eq!(server.active_names().len(), 25);

    // Everyone messages the next user in a ring
    for (i, client) in clients.iter_mut().enumerate() {
        let to = format!("user{:02}", (i + 1) % 25);
        client
            .send(&ClientRequest::message(
                1.0,
                name(&format!("user{i:02}")),
                name(&to),
                format!("ping {i}"),
            ))
            .await;
    }

    for (i, client) in clients.iter_mut().enumerate() {
        let from = (i + 24) % 25;
        match client.recv().await {
            ServerMessage::Relayed(ClientRequest::Message(message)) => {
                assert_eq!(message.text, format!("ping {from}"));
            }
            other => panic!("Expected relayed message, got {other:?}"),
        }
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_registered_client_disconnect_mid_frame() {
    let server = TestServer::spawn().await;
    let mut alice = server.register("alice").await;

    alice.send_raw(b"{\"action\":\"message\",\"ti").await;
    drop(alice);

    server
        .wait_until("alice dropped", |s| s.active_users_list().unwrap().is_empty())
        .await;

    server.shutdown().await;
}
