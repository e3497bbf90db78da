//! Wire seam between the connection manager and the physical socket.
//!
//! The manager only ever sees a [`WireSession`] channel pair, so tests can
//! swap the WebSocket stack for an in-memory duplex.

use futures::{SinkExt, StreamExt, future::BoxFuture};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::error::TransportError;

/// Commands the manager can issue to the socket writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireCommand {
    /// A serialized text frame.
    Frame(String),
    /// A keep-alive ping.
    Ping,
    /// Close the connection gracefully.
    Close,
}

/// Duplex channel pair representing one established connection.
///
/// The inbound receiver yields raw text frames; it closes when the peer closes
/// the connection or the socket errors out.
pub struct WireSession {
    /// Sender feeding the socket writer.
    pub outbound: mpsc::UnboundedSender<WireCommand>,
    /// Receiver of raw inbound text frames.
    pub inbound: mpsc::UnboundedReceiver<String>,
}

/// Abstraction over the physical socket.
pub trait Connector: Send + Sync {
    /// Establish one connection and hand back its channel pair.
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<WireSession, TransportError>>;
}

/// Production connector backed by `tokio-tungstenite`.
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<WireSession, TransportError>> {
        let url = url.to_owned();
        Box::pin(async move {
            let (socket, _response) = connect_async(&url)
                .await
                .map_err(|err| TransportError::Handshake(err.to_string()))?;
            let (mut sink, mut stream) = socket.split();
            let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<WireCommand>();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();

            // Writer task drains manager commands into the socket.
            tokio::spawn(async move {
                while let Some(command) = outbound_rx.recv().await {
                    let message = match command {
                        WireCommand::Frame(text) => Message::Text(text.into()),
                        WireCommand::Ping => Message::Ping(Vec::new().into()),
                        WireCommand::Close => {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                    };
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
            });

            // Reader task forwards text frames and stops on close or error.
            // Pings are answered by tungstenite itself during the read.
            tokio::spawn(async move {
                while let Some(message) = stream.next().await {
                    match message {
                        Ok(Message::Text(text)) => {
                            if inbound_tx.send(text.to_string()).is_err() {
                                break;
                            }
                        }
                        Ok(Message::Close(_)) => {
                            debug!("server closed the connection");
                            break;
                        }
                        Ok(_) => {}
                        Err(err) => {
                            warn!(error = %err, "websocket receive error");
                            break;
                        }
                    }
                }
            });

            Ok(WireSession {
                outbound: outbound_tx,
                inbound: inbound_rx,
            })
        })
    }
}
