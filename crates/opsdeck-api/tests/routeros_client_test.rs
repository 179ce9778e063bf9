// Integration tests for the RouterOS client against an in-process fake router.
#![allow(clippy::unwrap_used)]

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use opsdeck_api::routeros::{RouterOsConnector, SentenceCodec};
use opsdeck_api::{ApiRequest, Connection, ConnectionParams, Connector, Error, TransportConfig};

// ── Fake router ─────────────────────────────────────────────────────

const PASSWORD: &str = "s3cret";

fn reply(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| (*w).to_owned()).collect()
}

/// Accepts connections forever, answering a handful of commands.
/// Every command word received is reported on the returned channel.
async fn spawn_router() -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let seen_tx = seen_tx.clone();
            tokio::spawn(async move {
                let mut framed = Framed::new(stream, SentenceCodec);
                while let Some(Ok(sentence)) = framed.next().await {
                    let command = sentence.first().cloned().unwrap_or_default();
                    let _ = seen_tx.send(command.clone());
                    let sentences = match command.as_str() {
                        "/login" => {
                            let ok = sentence.iter().any(|w| *w == format!("=password={PASSWORD}"));
                            if ok {
                                vec![reply(&["!done"])]
                            } else {
                                vec![
                                    reply(&["!trap", "=message=invalid user name or password (6)"]),
                                    reply(&["!done"]),
                                ]
                            }
                        }
                        "/system/identity/print" => {
                            vec![reply(&["!re", "=name=edge-router"]), reply(&["!done"])]
                        }
                        "/interface/print" => vec![
                            reply(&["!re", "=name=ether1", "=rx-byte=1000", "=tx-byte=2000"]),
                            reply(&["!re", "=name=ether2", "=rx-byte=5", "=tx-byte=6"]),
                            reply(&["!done"]),
                        ],
                        "/ip/address/add" => vec![reply(&["!done", "=ret=*1A"])],
                        "/quit" => {
                            let _ = framed
                                .send(reply(&["!fatal", "session terminated on request"]))
                                .await;
                            return;
                        }
                        _ => vec![
                            reply(&["!trap", "=message=no such command"]),
                            reply(&["!done"]),
                        ],
                    };
                    for s in sentences {
                        if framed.send(s).await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    });

    (addr, seen_rx)
}

fn params(addr: SocketAddr, password: &str) -> ConnectionParams {
    ConnectionParams {
        host: addr.ip().to_string(),
        port: addr.port(),
        username: "admin".into(),
        secret: SecretString::from(password.to_owned()),
        transport: TransportConfig::default(),
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_login_and_print_rows() {
    let (addr, _seen) = spawn_router().await;
    let conn = RouterOsConnector.open(&params(addr, PASSWORD)).await.unwrap();

    let rows = conn
        .call(ApiRequest::get("/interface/print").param(".proplist", "name,rx-byte,tx-byte"))
        .await
        .unwrap();

    assert_eq!(
        rows,
        json!([
            { "name": "ether1", "rx-byte": "1000", "tx-byte": "2000" },
            { "name": "ether2", "rx-byte": "5", "tx-byte": "6" },
        ])
    );
}

#[tokio::test]
async fn test_wrong_password_is_authentication_error() {
    let (addr, _seen) = spawn_router().await;
    let err = RouterOsConnector.open(&params(addr, "nope")).await.unwrap_err();
    assert!(matches!(err, Error::Authentication { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_trap_leaves_connection_usable() {
    let (addr, _seen) = spawn_router().await;
    let conn = RouterOsConnector.open(&params(addr, PASSWORD)).await.unwrap();

    let err = conn.call(ApiRequest::get("/bogus")).await.unwrap_err();
    assert!(matches!(err, Error::Trap { ref message } if message == "no such command"));

    conn.probe().await.unwrap();
}

#[tokio::test]
async fn test_done_attributes_returned_when_no_rows() {
    let (addr, _seen) = spawn_router().await;
    let conn = RouterOsConnector.open(&params(addr, PASSWORD)).await.unwrap();

    let ret = conn
        .call(ApiRequest::get("/ip/address/add").param("address", "10.0.0.1/24"))
        .await
        .unwrap();
    assert_eq!(ret, json!([{ "ret": "*1A" }]));
}

#[tokio::test]
async fn test_close_sends_quit_and_disables_connection() {
    let (addr, mut seen) = spawn_router().await;
    let conn = RouterOsConnector.open(&params(addr, PASSWORD)).await.unwrap();

    conn.close().await;

    assert_eq!(seen.recv().await.as_deref(), Some("/login"));
    assert_eq!(seen.recv().await.as_deref(), Some("/quit"));

    let err = conn.probe().await.unwrap_err();
    assert!(err.is_connection_lost(), "got {err:?}");
}

#[tokio::test]
async fn test_connect_refused_is_io_error() {
    // Bind then drop to get a port nothing listens on.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let err = RouterOsConnector.open(&params(addr, PASSWORD)).await.unwrap_err();
    assert!(matches!(err, Error::Io(_)), "got {err:?}");
}
