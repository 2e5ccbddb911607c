//! Peer-connection engine abstraction
//!
//! The engine performs ICE gathering, DTLS and actual data/media transport.
//! The signaling layer only drives it through this narrow contract, so the
//! production implementation ([`crate::rtc::RtcEngine`]) and the in-memory
//! one ([`crate::mock::MockEngine`]) interchange freely.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::SessionDescription;

/// Errors from the peer-connection engine
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("peer connection failure: {0}")]
    Connection(String),
    #[error("description rejected: {0}")]
    Description(String),
    #[error("data channel failure: {0}")]
    Channel(String),
    #[error("engine is closed")]
    Closed,
}

/// Boxed future returned by engine callbacks
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Invoked at most once per inbound data channel
pub type DataChannelHandler =
    Box<dyn Fn(Arc<dyn DataChannel>) -> HandlerFuture + Send + Sync>;

/// Invoked once per message received on a data channel
pub type MessageHandler = Box<dyn Fn(Vec<u8>) -> HandlerFuture + Send + Sync>;

/// Invoked at most once per inbound media track
pub type TrackHandler = Box<dyn Fn(TrackInfo) -> HandlerFuture + Send + Sync>;

/// Summary of an inbound media track
#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub id: String,
    pub kind: String,
}

/// A channel to the remote peer for application data.
///
/// The signaling layer holds a non-owning reference and uses it only to
/// send outbound text and attach a message callback; the engine owns the
/// underlying transport.
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    /// Whether the channel is connected and writable
    fn is_open(&self) -> bool;

    async fn send_text(&self, text: &str) -> Result<(), EngineError>;

    /// Attach the message callback; messages arriving earlier are replayed
    async fn on_message(&self, handler: MessageHandler);

    async fn close(&self);
}

/// Contract with the external peer-connection engine.
///
/// Callbacks registered here may fire from the engine's own tasks and never
/// synchronously with a negotiation step.
#[async_trait]
pub trait PeerEngine: Send + Sync {
    /// Engine-specific media track handle
    type Track: Send;

    async fn create_offer(&self) -> Result<SessionDescription, EngineError>;

    async fn create_answer(&self) -> Result<SessionDescription, EngineError>;

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), EngineError>;

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), EngineError>;

    /// The current local description, if one has been set
    async fn local_description(&self) -> Option<SessionDescription>;

    /// Open an outbound data channel; it becomes writable once the
    /// connection is established
    async fn create_data_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannel>, EngineError>;

    /// Register the inbound data-channel callback (callee side)
    async fn on_data_channel(&self, handler: DataChannelHandler);

    /// Register the inbound media-track callback
    async fn on_track(&self, handler: TrackHandler);

    /// Attach a caller-provided local media track
    async fn add_track(&self, track: Self::Track) -> Result<(), EngineError>;

    async fn close(&self) -> Result<(), EngineError>;
}
