//! Per-session client configuration

use crate::codec::PayloadEncoding;
use crate::types::WireProtocol;

/// Relay addresses tried in order when no list is supplied
pub const DEFAULT_RELAYS: &[&str] = &["wss://quick-ferret-74.deno.dev"];

/// STUN servers handed to the peer-connection engine
pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun.cloudflare.com:3478",
];

/// Configuration for a single signaling session.
///
/// Each session owns its own copy of the relay list; the order defines
/// failover priority and may be edited freely before `connect()`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Our endpoint ID, stable for the lifetime of the process
    pub local_id: String,
    /// The endpoint we negotiate with
    pub remote_id: String,
    /// Relay addresses in failover order; first reachable wins
    pub relays: Vec<String>,
    /// Relay wire convention
    pub wire: WireProtocol,
    /// Payload encoding for negotiation messages
    pub encoding: PayloadEncoding,
    /// Attach media tracks and surface inbound track events
    pub media_enabled: bool,
    /// Label for the outbound data channel
    pub channel_label: String,
    /// Bound on each relay connection attempt (ms)
    pub connect_timeout_ms: u64,
    /// Poll cadence for the ID-map wire convention (ms)
    pub poll_interval_ms: u64,
    /// STUN servers for the peer-connection engine
    pub stun_servers: Vec<String>,
}

impl ClientConfig {
    pub fn new(local_id: impl Into<String>, remote_id: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            remote_id: remote_id.into(),
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            local_id: String::new(),
            remote_id: String::new(),
            relays: DEFAULT_RELAYS.iter().map(|s| s.to_string()).collect(),
            wire: WireProtocol::ActionEnvelope,
            encoding: PayloadEncoding::DeflateBase64,
            media_enabled: false,
            channel_label: "chat".to_string(),
            connect_timeout_ms: 5000,
            poll_interval_ms: 1000,
            stun_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}
