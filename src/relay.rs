//! Relay transport
//!
//! Connects to the first reachable relay from an ordered failover list,
//! registers the local endpoint ID, and exchanges negotiation envelopes
//! over the resulting WebSocket link. The traits let the in-memory relay
//! in [`crate::mock`] stand in for a real relay in tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::types::{Delivery, Envelope, WireProtocol};

/// Errors from relay transport operations
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("no reachable relay among {0} configured address(es)")]
    NoReachableRelay(usize),
    #[error("relay transport is closed")]
    TransportClosed,
    #[error("relay send failed: {0}")]
    SendFailed(String),
}

/// Produces one live link to a relay for a session
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(&self, config: &ClientConfig) -> Result<Arc<dyn RelayLink>, RelayError>;
}

/// A live, bidirectional relay connection.
///
/// `recv` yields only negotiation deliveries; registration acknowledgements
/// and unrelated control messages are skipped inside the link. Once selected
/// the link is fixed for the session; there is no silent re-failover.
#[async_trait]
pub trait RelayLink: Send + Sync {
    fn local_id(&self) -> &str;

    async fn send(&self, target: &str, payload: &str) -> Result<(), RelayError>;

    /// Next inbound delivery; `None` once the link is closed. `close()`
    /// unblocks a pending `recv` promptly.
    async fn recv(&self) -> Option<Delivery>;

    /// Idempotent
    async fn close(&self);
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// WebSocket relay connector with ordered failover
pub struct WsConnector;

#[async_trait]
impl RelayConnector for WsConnector {
    async fn connect(&self, config: &ClientConfig) -> Result<Arc<dyn RelayLink>, RelayError> {
        let per_address = Duration::from_millis(config.connect_timeout_ms);
        for address in &config.relays {
            match tokio::time::timeout(per_address, connect_async(address.as_str())).await {
                Err(_) => warn!(%address, "relay connect timed out, trying next"),
                Ok(Err(e)) => warn!(%address, error = %e, "relay connect failed, trying next"),
                Ok(Ok((stream, _response))) => {
                    let link = WsLink::new(stream, config, address.clone());
                    match link.register().await {
                        Ok(()) => {
                            info!(%address, id = %config.local_id, "connected to relay");
                            return Ok(Arc::new(link));
                        }
                        Err(e) => {
                            warn!(%address, error = %e, "relay registration failed, trying next")
                        }
                    }
                }
            }
        }
        Err(RelayError::NoReachableRelay(config.relays.len()))
    }
}

/// Live WebSocket link to the selected relay
pub struct WsLink {
    local_id: String,
    remote_id: String,
    wire: WireProtocol,
    poll_interval: Duration,
    address: String,
    writer: Mutex<WsWriter>,
    reader: Mutex<WsReader>,
    closed_tx: watch::Sender<bool>,
}

impl WsLink {
    fn new(stream: WsStream, config: &ClientConfig, address: String) -> Self {
        let (writer, reader) = stream.split();
        let (closed_tx, _) = watch::channel(false);
        Self {
            local_id: config.local_id.clone(),
            remote_id: config.remote_id.clone(),
            wire: config.wire,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            address,
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            closed_tx,
        }
    }

    /// The relay address this link ended up on
    pub fn address(&self) -> &str {
        &self.address
    }

    fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    fn mark_closed(&self) {
        let _ = self.closed_tx.send(true);
    }

    async fn send_frame(&self, text: String) -> Result<(), RelayError> {
        if self.is_closed() {
            return Err(RelayError::TransportClosed);
        }
        let mut writer = self.writer.lock().await;
        writer.send(Message::Text(text.into())).await.map_err(|e| {
            self.mark_closed();
            RelayError::SendFailed(e.to_string())
        })
    }

    /// Registration envelope; under the ID-map convention this doubles as
    /// the poll request and is re-sent every cycle
    async fn register(&self) -> Result<(), RelayError> {
        let frame = match self.wire {
            WireProtocol::ActionEnvelope => serde_json::to_string(&Envelope::Register {
                id: self.local_id.clone(),
            })
            .map_err(|e| RelayError::SendFailed(e.to_string()))?,
            WireProtocol::IdMap => {
                serde_json::json!({ "id": self.local_id }).to_string()
            }
        };
        self.send_frame(frame).await
    }

    async fn recv_envelope(&self, closed: &mut watch::Receiver<bool>) -> Option<Delivery> {
        let mut reader = self.reader.lock().await;
        loop {
            tokio::select! {
                _ = closed.changed() => return None,
                frame = reader.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Envelope>(text.as_str()) {
                            Ok(Envelope::Receive { from, data }) => {
                                return Some(Delivery { from, payload: data })
                            }
                            Ok(other) => {
                                debug!(action = other.action(), "ignoring relay control message")
                            }
                            Err(_) => debug!("ignoring unrecognized relay frame"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        self.mark_closed();
                        return None;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "relay read failed");
                        self.mark_closed();
                        return None;
                    }
                },
            }
        }
    }

    /// Poll loop for ID-map relays: re-register, then watch responses for a
    /// map keyed by the remote endpoint's ID
    async fn recv_poll(&self, closed: &mut watch::Receiver<bool>) -> Option<Delivery> {
        let mut reader = self.reader.lock().await;
        loop {
            if self.register().await.is_err() {
                return None;
            }
            let deadline = tokio::time::sleep(self.poll_interval);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    _ = closed.changed() => return None,
                    _ = &mut deadline => break,
                    frame = reader.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(delivery) = self.match_poll_response(text.as_str()) {
                                return Some(delivery);
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            self.mark_closed();
                            return None;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "relay read failed");
                            self.mark_closed();
                            return None;
                        }
                    },
                }
            }
        }
    }

    fn match_poll_response(&self, text: &str) -> Option<Delivery> {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => {
                debug!("ignoring unrecognized relay frame");
                return None;
            }
        };
        let entry = value.get(&self.remote_id)?;
        let payload = match entry {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Some(Delivery {
            from: self.remote_id.clone(),
            payload,
        })
    }
}

#[async_trait]
impl RelayLink for WsLink {
    fn local_id(&self) -> &str {
        &self.local_id
    }

    async fn send(&self, target: &str, payload: &str) -> Result<(), RelayError> {
        let frame = match self.wire {
            WireProtocol::ActionEnvelope => serde_json::to_string(&Envelope::Send {
                from: self.local_id.clone(),
                target: target.to_string(),
                data: payload.to_string(),
            })
            .map_err(|e| RelayError::SendFailed(e.to_string()))?,
            WireProtocol::IdMap => {
                // structured payloads embed as objects, text-safe ones as strings
                let value = match serde_json::from_str::<serde_json::Value>(payload) {
                    Ok(v @ serde_json::Value::Object(_)) => v,
                    _ => serde_json::Value::String(payload.to_string()),
                };
                let mut map = serde_json::Map::new();
                map.insert(target.to_string(), value);
                serde_json::Value::Object(map).to_string()
            }
        };
        self.send_frame(frame).await
    }

    async fn recv(&self) -> Option<Delivery> {
        let mut closed = self.closed_tx.subscribe();
        if *closed.borrow() {
            return None;
        }
        match self.wire {
            WireProtocol::ActionEnvelope => self.recv_envelope(&mut closed).await,
            WireProtocol::IdMap => self.recv_poll(&mut closed).await,
        }
    }

    async fn close(&self) {
        if self.is_closed() {
            return;
        }
        self.mark_closed();
        let mut writer = self.writer.lock().await;
        let _ = writer.send(Message::Close(None)).await;
    }
}
