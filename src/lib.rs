//! Peer-to-peer connection bootstrapping over untrusted signaling relays
//!
//! Two endpoints, each with a stable ID, exchange session descriptions
//! through an intermediary relay until the external peer-connection engine
//! can carry application data directly. This crate covers the signaling
//! side of that handshake:
//!
//! - **Relay transport**: failover across an ordered relay address list,
//!   endpoint registration, envelope send/receive (two wire conventions)
//! - **Payload codec**: plain JSON or deflate+base64 negotiation payloads
//! - **Negotiation**: the offer/answer state machine with per-message
//!   protocol-violation containment
//! - **Dispatch loop**: routes inbound relay deliveries to the right
//!   negotiation step
//! - **Session facade**: [`PeerClient`] with connect / call / send / close
//!
//! ICE, DTLS and media transport live behind the [`engine::PeerEngine`]
//! trait; [`rtc::RtcEngine`] implements it over the `webrtc` crate, and
//! [`mock`] provides in-memory stand-ins for both relay and engine.
//!
//! # Example
//!
//! ```rust,no_run
//! use peerlink::{ClientConfig, PeerClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = ClientConfig::new("me", "you");
//!     config.relays = vec!["wss://relay.example.org".to_string()];
//!
//!     let client = PeerClient::new(config).await?;
//!     client.connect().await?;
//!     client.call().await?;
//!     client.send_message("hello").await?;
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod engine;
pub mod mock;
pub mod negotiation;
pub mod relay;
pub mod rtc;
pub mod types;

pub use client::{ClientError, PeerClient};
pub use codec::{decode, encode, CodecError, PayloadEncoding};
pub use config::ClientConfig;
pub use engine::{DataChannel, EngineError, PeerEngine, TrackInfo};
pub use negotiation::{Negotiation, NegotiationError, SessionState};
pub use relay::{RelayConnector, RelayError, RelayLink, WsConnector};
pub use rtc::RtcEngine;
pub use types::{Delivery, Envelope, SdpKind, SessionDescription, WireProtocol};
