//! In-memory implementations for testing and simulation
//!
//! [`MemoryRelay`] stands in for a signaling relay: every link sees every
//! frame and keeps those addressed to its own ID. [`MockNetwork`] stands in
//! for the peer-connection engine: engines created from the same network can
//! complete an offer/answer exchange and end up with a connected pair of
//! in-memory data channels.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use async_trait::async_trait;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::debug;

use crate::config::ClientConfig;
use crate::engine::{
    DataChannel, DataChannelHandler, EngineError, MessageHandler, PeerEngine, TrackHandler,
    TrackInfo,
};
use crate::relay::{RelayConnector, RelayError, RelayLink};
use crate::types::{Delivery, SdpKind, SessionDescription};

#[derive(Debug, Clone)]
struct Frame {
    from: String,
    target: String,
    payload: String,
}

/// In-memory relay shared by the links it hands out
pub struct MemoryRelay {
    tx: broadcast::Sender<Frame>,
}

impl MemoryRelay {
    pub fn new() -> Arc<Self> {
        let (tx, _) = broadcast::channel(256);
        Arc::new(Self { tx })
    }
}

#[async_trait]
impl RelayConnector for MemoryRelay {
    async fn connect(&self, config: &ClientConfig) -> Result<Arc<dyn RelayLink>, RelayError> {
        let (closed_tx, _) = watch::channel(false);
        Ok(Arc::new(MemoryLink {
            local_id: config.local_id.clone(),
            tx: self.tx.clone(),
            rx: Mutex::new(self.tx.subscribe()),
            closed_tx,
        }))
    }
}

/// One endpoint's view of a [`MemoryRelay`]
pub struct MemoryLink {
    local_id: String,
    tx: broadcast::Sender<Frame>,
    rx: Mutex<broadcast::Receiver<Frame>>,
    closed_tx: watch::Sender<bool>,
}

#[async_trait]
impl RelayLink for MemoryLink {
    fn local_id(&self) -> &str {
        &self.local_id
    }

    async fn send(&self, target: &str, payload: &str) -> Result<(), RelayError> {
        if *self.closed_tx.borrow() {
            return Err(RelayError::TransportClosed);
        }
        self.tx
            .send(Frame {
                from: self.local_id.clone(),
                target: target.to_string(),
                payload: payload.to_string(),
            })
            .map(|_| ())
            .map_err(|e| RelayError::SendFailed(e.to_string()))
    }

    async fn recv(&self) -> Option<Delivery> {
        let mut closed = self.closed_tx.subscribe();
        if *closed.borrow() {
            return None;
        }
        let mut rx = self.rx.lock().await;
        loop {
            tokio::select! {
                _ = closed.changed() => return None,
                frame = rx.recv() => match frame {
                    Ok(frame) if frame.target == self.local_id => {
                        return Some(Delivery {
                            from: frame.from,
                            payload: frame.payload,
                        })
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Closed) => return None,
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                },
            }
        }
    }

    async fn close(&self) {
        let _ = self.closed_tx.send(true);
    }
}

/// Registry linking mock engines so answer application can complete a pair.
/// Cheap to clone; every engine keeps a handle back to it.
#[derive(Clone)]
pub struct MockNetwork {
    engines: Arc<StdMutex<HashMap<String, Weak<MockEngine>>>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self {
            engines: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Create an engine registered under `id`
    pub fn engine(&self, id: &str) -> Arc<MockEngine> {
        let engine = Arc::new(MockEngine {
            id: id.to_string(),
            network: self.clone(),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            pending: Mutex::new(None),
            dc_handler: Mutex::new(None),
            track_handler: Mutex::new(None),
            tracks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
        });
        self.engines
            .lock()
            .unwrap()
            .insert(id.to_string(), Arc::downgrade(&engine));
        engine
    }

    fn lookup(&self, id: &str) -> Option<Arc<MockEngine>> {
        self.engines.lock().unwrap().get(id).and_then(Weak::upgrade)
    }
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self::new()
    }
}

fn mock_sdp(id: &str, kind: SdpKind) -> String {
    format!("v=0 peer={id} kind={kind}")
}

fn peer_of(sdp: &str) -> Option<&str> {
    sdp.split_whitespace()
        .find_map(|token| token.strip_prefix("peer="))
}

/// In-memory peer-connection engine
pub struct MockEngine {
    id: String,
    network: MockNetwork,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    /// (near, far) channel pair created by `create_data_channel`
    pending: Mutex<Option<(Arc<MockDataChannel>, Arc<MockDataChannel>)>>,
    dc_handler: Mutex<Option<DataChannelHandler>>,
    track_handler: Mutex<Option<TrackHandler>>,
    tracks: Mutex<Vec<String>>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
}

impl MockEngine {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Times `close` has been invoked, for teardown assertions
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::Relaxed)
    }

    pub async fn attached_tracks(&self) -> Vec<String> {
        self.tracks.lock().await.clone()
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.closed.load(Ordering::Relaxed) {
            Err(EngineError::Closed)
        } else {
            Ok(())
        }
    }

    /// Applying the remote answer "completes ICE": both channel ends open
    /// and the answering engine receives its end of the pair
    async fn complete_connection(&self, answer_sdp: &str) -> Result<(), EngineError> {
        let peer_id = peer_of(answer_sdp)
            .ok_or_else(|| EngineError::Description("answer names no peer".to_string()))?;
        let peer = self
            .network
            .lookup(peer_id)
            .ok_or_else(|| EngineError::Connection(format!("unknown peer {peer_id}")))?;
        let (near, far) = self
            .pending
            .lock()
            .await
            .take()
            .ok_or_else(|| EngineError::Channel("no pending data channel".to_string()))?;
        near.set_open(true);
        far.set_open(true);
        self.pending.lock().await.replace((near, far.clone()));
        peer.incoming_channel(far).await;
        Ok(())
    }

    async fn incoming_channel(&self, channel: Arc<MockDataChannel>) {
        let guard = self.dc_handler.lock().await;
        if let Some(handler) = guard.as_ref() {
            handler(channel).await;
        } else {
            debug!(id = %self.id, "inbound data channel with no handler registered");
        }
    }

    /// Drive the inbound-track callback the way the real engine would for
    /// a remote media track
    pub async fn push_remote_track(&self, info: TrackInfo) {
        let guard = self.track_handler.lock().await;
        if let Some(handler) = guard.as_ref() {
            handler(info).await;
        } else {
            debug!(id = %self.id, "inbound track with no handler registered");
        }
    }
}

#[async_trait]
impl PeerEngine for MockEngine {
    type Track = String;

    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        self.ensure_open()?;
        Ok(SessionDescription::new(
            mock_sdp(&self.id, SdpKind::Offer),
            SdpKind::Offer,
        ))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        self.ensure_open()?;
        let remote = self.remote.lock().await;
        match remote.as_ref() {
            Some(desc) if desc.kind == SdpKind::Offer => Ok(SessionDescription::new(
                mock_sdp(&self.id, SdpKind::Answer),
                SdpKind::Answer,
            )),
            _ => Err(EngineError::Description(
                "no remote offer to answer".to_string(),
            )),
        }
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;
        *self.local.lock().await = Some(desc);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;
        let is_answer = desc.kind == SdpKind::Answer;
        let sdp = desc.sdp.clone();
        *self.remote.lock().await = Some(desc);
        if is_answer {
            self.complete_connection(&sdp).await?;
        }
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().await.clone()
    }

    async fn create_data_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannel>, EngineError> {
        self.ensure_open()?;
        let (near, far) = MockDataChannel::pair(label);
        *self.pending.lock().await = Some((near.clone(), far));
        Ok(near)
    }

    async fn on_data_channel(&self, handler: DataChannelHandler) {
        *self.dc_handler.lock().await = Some(handler);
    }

    async fn on_track(&self, handler: TrackHandler) {
        *self.track_handler.lock().await = Some(handler);
    }

    async fn add_track(&self, track: Self::Track) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.tracks.lock().await.push(track);
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.close_calls.fetch_add(1, Ordering::Relaxed);
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some((near, _)) = self.pending.lock().await.take() {
            near.close().await;
        }
        Ok(())
    }
}

/// In-memory data channel; one half of a connected pair
pub struct MockDataChannel {
    label: String,
    open: AtomicBool,
    peer: StdMutex<Weak<MockDataChannel>>,
    handler: Mutex<Option<MessageHandler>>,
    inbox: Mutex<Vec<Vec<u8>>>,
}

impl MockDataChannel {
    /// Create a linked pair; both halves stay unwritable until the mock
    /// connection completes
    pub fn pair(label: &str) -> (Arc<Self>, Arc<Self>) {
        let a = Arc::new(Self::new(label));
        let b = Arc::new(Self::new(label));
        *a.peer.lock().unwrap() = Arc::downgrade(&b);
        *b.peer.lock().unwrap() = Arc::downgrade(&a);
        (a, b)
    }

    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            open: AtomicBool::new(false),
            peer: StdMutex::new(Weak::new()),
            handler: Mutex::new(None),
            inbox: Mutex::new(Vec::new()),
        }
    }

    fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::Relaxed);
    }

    async fn deliver(&self, data: Vec<u8>) {
        let guard = self.handler.lock().await;
        if let Some(handler) = guard.as_ref() {
            handler(data).await;
        } else {
            drop(guard);
            self.inbox.lock().await.push(data);
        }
    }
}

#[async_trait]
impl DataChannel for MockDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    async fn send_text(&self, text: &str) -> Result<(), EngineError> {
        if !self.is_open() {
            return Err(EngineError::Channel("data channel is not open".to_string()));
        }
        let peer = { self.peer.lock().unwrap().upgrade() };
        let peer =
            peer.ok_or_else(|| EngineError::Channel("peer channel dropped".to_string()))?;
        peer.deliver(text.as_bytes().to_vec()).await;
        Ok(())
    }

    async fn on_message(&self, handler: MessageHandler) {
        let mut guard = self.handler.lock().await;
        let pending: Vec<Vec<u8>> = self.inbox.lock().await.drain(..).collect();
        for data in pending {
            handler(data).await;
        }
        *guard = Some(handler);
    }

    async fn close(&self) {
        self.set_open(false);
        let peer = { self.peer.lock().unwrap().upgrade() };
        if let Some(peer) = peer {
            peer.set_open(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex as AsyncMutex;

    #[tokio::test]
    async fn channel_rejects_send_before_connection() {
        let (a, _b) = MockDataChannel::pair("chat");
        assert!(!a.is_open());
        assert!(a.send_text("early").await.is_err());
    }

    #[tokio::test]
    async fn engine_pair_connects_and_exchanges_messages() {
        let network = MockNetwork::new();
        let caller = network.engine("me");
        let callee = network.engine("you");

        // callee records the channel it receives
        let received: Arc<AsyncMutex<Option<Arc<dyn DataChannel>>>> =
            Arc::new(AsyncMutex::new(None));
        let slot = received.clone();
        callee
            .on_data_channel(Box::new(move |chan| {
                let slot = slot.clone();
                Box::pin(async move {
                    *slot.lock().await = Some(chan);
                })
            }))
            .await;

        let outbound = caller.create_data_channel("chat").await.unwrap();
        let offer = caller.create_offer().await.unwrap();
        caller.set_local_description(offer.clone()).await.unwrap();

        callee.set_remote_description(offer).await.unwrap();
        let answer = callee.create_answer().await.unwrap();
        callee.set_local_description(answer.clone()).await.unwrap();

        caller.set_remote_description(answer).await.unwrap();

        let inbound = received.lock().await.clone().expect("channel delivered");
        assert!(outbound.is_open());
        assert!(inbound.is_open());

        let messages: Arc<AsyncMutex<Vec<String>>> = Arc::new(AsyncMutex::new(Vec::new()));
        let sink = messages.clone();
        inbound
            .on_message(Box::new(move |data| {
                let sink = sink.clone();
                Box::pin(async move {
                    sink.lock().await.push(String::from_utf8_lossy(&data).into_owned());
                })
            }))
            .await;

        outbound.send_text("hello").await.unwrap();
        assert_eq!(messages.lock().await.as_slice(), ["hello".to_string()]);
    }

    #[tokio::test]
    async fn answer_without_offer_is_rejected() {
        let network = MockNetwork::new();
        let engine = network.engine("me");
        assert!(engine.create_answer().await.is_err());
    }

    #[tokio::test]
    async fn memory_relay_routes_by_target() {
        let relay = MemoryRelay::new();
        let a = relay
            .connect(&ClientConfig::new("me", "you"))
            .await
            .unwrap();
        let b = relay
            .connect(&ClientConfig::new("you", "me"))
            .await
            .unwrap();

        a.send("you", "for-you").await.unwrap();
        a.send("other", "not-for-you").await.unwrap();
        a.send("you", "again").await.unwrap();

        let first = b.recv().await.unwrap();
        assert_eq!(first.from, "me");
        assert_eq!(first.payload, "for-you");
        let second = b.recv().await.unwrap();
        assert_eq!(second.payload, "again");
    }

    #[tokio::test]
    async fn close_unblocks_pending_recv() {
        let relay = MemoryRelay::new();
        let link = relay
            .connect(&ClientConfig::new("me", "you"))
            .await
            .unwrap();
        let waiter = {
            let link = link.clone();
            tokio::spawn(async move { link.recv().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        link.close().await;
        let received = tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("recv unblocked")
            .unwrap();
        assert!(received.is_none());
    }
}
