//! In-process stand-in for a language server, speaking framed JSON over
//! duplex pipes.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::duplex;
use tokio::sync::{mpsc, oneshot};

use crate::lsp::codec::{read_message_from, write_message_to};
use crate::lsp::transport::Transport;

const WAIT: Duration = Duration::from_secs(5);

/// How the fake answers `initialize`.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Handshake {
    /// Empty capabilities and a server name.
    Reply,
    /// A JSON-RPC error.
    Fail,
    /// No reply at all.
    Ignore,
}

/// Replies to requests on its own:
/// - `initialize`: per [`Handshake`]
/// - `test/echo`: the request params
/// - `test/fail`: a JSON-RPC error
/// - `test/silent`: no reply at all
/// - anything else: `null`
pub(crate) struct FakeServer {
    received: mpsc::UnboundedReceiver<Value>,
    outgoing: mpsc::UnboundedSender<Value>,
    hang_up: Option<oneshot::Sender<()>>,
}

pub(crate) fn connect() -> (Transport, FakeServer) {
    connect_with(Handshake::Reply)
}

pub(crate) fn connect_with(handshake: Handshake) -> (Transport, FakeServer) {
    let (client_out, mut server_in) = duplex(64 * 1024);
    let (mut server_out, client_in) = duplex(64 * 1024);
    let (received_tx, received) = mpsc::unbounded_channel();
    let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Value>();
    let (hang_up, mut hung_up) = oneshot::channel::<()>();

    // Closing `server_out` is what the client sees as the server going away.
    tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                biased;
                _ = &mut hung_up => break,
                message = outgoing_rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            if write_message_to(&mut server_out, &message.to_string())
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let replies = outgoing.clone();
    tokio::spawn(async move {
        while let Ok(Some(body)) = read_message_from(&mut server_in).await {
            let Ok(message) = serde_json::from_str::<Value>(&body) else {
                break;
            };
            if let (Some(id), Some(method)) = (
                message.get("id"),
                message.get("method").and_then(Value::as_str),
            ) {
                let reply = match (method, handshake) {
                    ("initialize", Handshake::Reply) => Some(json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": {"capabilities": {}, "serverInfo": {"name": "fake-vls"}}
                    })),
                    ("initialize", Handshake::Fail) => Some(json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32603, "message": "cannot start"}
                    })),
                    ("initialize", Handshake::Ignore) => None,
                    ("test/echo", _) => Some(json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": message.get("params").cloned().unwrap_or(Value::Null)
                    })),
                    ("test/fail", _) => Some(json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32000, "message": "boom"}
                    })),
                    ("test/silent", _) => None,
                    _ => Some(json!({"jsonrpc": "2.0", "id": id, "result": null})),
                };
                if let Some(reply) = reply {
                    let _ = replies.send(reply);
                }
            }
            if received_tx.send(message).is_err() {
                break;
            }
        }
    });

    (
        Transport::from_streams(client_in, client_out),
        FakeServer {
            received,
            outgoing,
            hang_up: Some(hang_up),
        },
    )
}

impl FakeServer {
    /// Next message the client sent, or `None` once the client hung up.
    pub(crate) async fn next_message(&mut self) -> Option<Value> {
        tokio::time::timeout(WAIT, self.received.recv())
            .await
            .ok()
            .flatten()
    }

    /// Skip ahead to the next message with this method.
    pub(crate) async fn expect_method(&mut self, method: &str) -> Value {
        loop {
            let message = self
                .next_message()
                .await
                .unwrap_or_else(|| panic!("client never sent {method}"));
            if message["method"] == method {
                return message;
            }
        }
    }

    /// Skip ahead to the client's reply to our request `id`.
    pub(crate) async fn expect_response(&mut self, id: Value) -> Value {
        loop {
            let message = self
                .next_message()
                .await
                .unwrap_or_else(|| panic!("client never answered {id}"));
            if message.get("method").is_none() && message["id"] == id {
                return message;
            }
        }
    }

    /// Push a message to the client.
    pub(crate) fn send(&self, message: Value) {
        self.outgoing.send(message).expect("fake server writer gone");
    }

    /// Stop writing to the client, as a crashed server would. Messages from
    /// the client are still collected.
    pub(crate) fn hang_up(&mut self) {
        if let Some(hang_up) = self.hang_up.take() {
            let _ = hang_up.send(());
        }
    }

    /// Everything still queued up to the point the client hangs up.
    pub(crate) async fn drain(mut self) -> Vec<Value> {
        let mut messages = Vec::new();
        while let Some(message) = self.next_message().await {
            messages.push(message);
        }
        messages
    }
}

pub(crate) fn methods(messages: &[Value]) -> Vec<&str> {
    messages
        .iter()
        .filter_map(|message| message["method"].as_str())
        .collect()
}
