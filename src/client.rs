//! Session facade
//!
//! Composes the relay link, the payload codec, the negotiation state
//! machine and the peer-connection engine behind a small connect / call /
//! send / close surface, and runs the dispatch loop that routes inbound
//! relay deliveries to the right negotiation step.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec::{self, CodecError, PayloadEncoding};
use crate::config::ClientConfig;
use crate::engine::{DataChannel, EngineError, PeerEngine, TrackInfo};
use crate::negotiation::{Negotiation, NegotiationError, SessionState};
use crate::relay::{RelayConnector, RelayError, RelayLink, WsConnector};
use crate::rtc::RtcEngine;
use crate::types::{Delivery, SdpKind};

/// Errors surfaced by the session facade
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is not connected")]
    NotConnected,
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Client-facing session object; one negotiation with one target at a time
pub struct PeerClient<E: PeerEngine> {
    config: ClientConfig,
    engine: Arc<E>,
    connector: Arc<dyn RelayConnector>,
    link: RwLock<Option<Arc<dyn RelayLink>>>,
    negotiation: Arc<Mutex<Negotiation<E>>>,
    channel: Arc<Mutex<Option<Arc<dyn DataChannel>>>>,
    incoming_tx: mpsc::Sender<String>,
    incoming_rx: Mutex<Option<mpsc::Receiver<String>>>,
    tracks_tx: mpsc::Sender<TrackInfo>,
    tracks_rx: Mutex<Option<mpsc::Receiver<TrackInfo>>>,
    shutdown: watch::Sender<bool>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl PeerClient<RtcEngine> {
    /// Production client: WebSocket relay failover plus a real
    /// peer-connection engine
    pub async fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let engine = RtcEngine::new(&config.stun_servers).await?;
        Ok(Self::with_parts(
            config,
            Arc::new(WsConnector),
            Arc::new(engine),
        ))
    }
}

impl<E: PeerEngine + 'static> PeerClient<E> {
    /// Assemble a client from explicit parts; used by tests and embedders
    /// that bring their own relay or engine
    pub fn with_parts(
        config: ClientConfig,
        connector: Arc<dyn RelayConnector>,
        engine: Arc<E>,
    ) -> Self {
        let negotiation = Arc::new(Mutex::new(Negotiation::new(
            engine.clone(),
            config.channel_label.clone(),
        )));
        let (incoming_tx, incoming_rx) = mpsc::channel(64);
        let (tracks_tx, tracks_rx) = mpsc::channel(16);
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            engine,
            connector,
            link: RwLock::new(None),
            negotiation,
            channel: Arc::new(Mutex::new(None)),
            incoming_tx,
            incoming_rx: Mutex::new(Some(incoming_rx)),
            tracks_tx,
            tracks_rx: Mutex::new(Some(tracks_rx)),
            shutdown,
            dispatch: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Connect to the first reachable relay, register, wire the engine
    /// callbacks and start the dispatch loop
    pub async fn connect(&self) -> Result<(), ClientError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(NegotiationError::Closed.into());
        }

        let link = self.connector.connect(&self.config).await?;
        *self.link.write().await = Some(link.clone());

        // callee side: the engine hands over the inbound channel at most once
        let channel_slot = self.channel.clone();
        let negotiation = self.negotiation.clone();
        let incoming_tx = self.incoming_tx.clone();
        self.engine
            .on_data_channel(Box::new(move |chan: Arc<dyn DataChannel>| {
                let channel_slot = channel_slot.clone();
                let negotiation = negotiation.clone();
                let incoming_tx = incoming_tx.clone();
                Box::pin(async move {
                    info!(label = chan.label(), "inbound data channel");
                    attach_message_pump(&chan, incoming_tx).await;
                    *channel_slot.lock().await = Some(chan);
                    negotiation.lock().await.mark_established();
                })
            }))
            .await;

        if self.config.media_enabled {
            let tracks_tx = self.tracks_tx.clone();
            self.engine
                .on_track(Box::new(move |track: TrackInfo| {
                    let tracks_tx = tracks_tx.clone();
                    Box::pin(async move {
                        info!(id = %track.id, kind = %track.kind, "inbound media track");
                        let _ = tracks_tx.send(track).await;
                    })
                }))
                .await;
        }

        let handle = tokio::spawn(dispatch_loop(
            link,
            self.negotiation.clone(),
            self.config.encoding,
            self.shutdown.subscribe(),
        ));
        *self.dispatch.lock().await = Some(handle);
        Ok(())
    }

    /// Initiate the call toward the configured remote endpoint.
    /// Valid once per session while idle.
    pub async fn call(&self) -> Result<(), ClientError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(NegotiationError::Closed.into());
        }
        let link = self.require_link().await?;
        let (offer, channel) = self.negotiation.lock().await.initiate_call().await?;
        attach_message_pump(&channel, self.incoming_tx.clone()).await;
        *self.channel.lock().await = Some(channel);
        let payload = codec::encode(&offer, self.config.encoding)?;
        link.send(&self.config.remote_id, &payload).await?;
        info!(target = %self.config.remote_id, "offer sent");
        Ok(())
    }

    /// Best-effort, non-queuing send: transmitted only if an open data
    /// channel exists, otherwise dropped
    pub async fn send_message(&self, text: &str) -> Result<(), ClientError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(NegotiationError::Closed.into());
        }
        let channel = self.channel.lock().await.clone();
        match channel {
            Some(chan) if chan.is_open() => {
                if let Err(e) = chan.send_text(text).await {
                    warn!(error = %e, "data channel send failed");
                }
            }
            _ => debug!("no open data channel, dropping outbound message"),
        }
        Ok(())
    }

    /// Attach a caller-provided media track to the engine
    pub async fn add_track(&self, track: E::Track) -> Result<(), ClientError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(NegotiationError::Closed.into());
        }
        self.engine.add_track(track).await.map_err(Into::into)
    }

    /// Receiver for inbound data-channel messages; yields once
    pub async fn take_incoming(&self) -> Option<mpsc::Receiver<String>> {
        self.incoming_rx.lock().await.take()
    }

    /// Receiver for inbound media track events; yields once
    pub async fn take_tracks(&self) -> Option<mpsc::Receiver<TrackInfo>> {
        self.tracks_rx.lock().await.take()
    }

    pub async fn state(&self) -> SessionState {
        self.negotiation.lock().await.state()
    }

    /// Tear the session down: negotiation, data channel, engine, then the
    /// relay link. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.negotiation.lock().await.close();
        let _ = self.shutdown.send(true);
        if let Some(chan) = self.channel.lock().await.take() {
            chan.close().await;
        }
        if let Err(e) = self.engine.close().await {
            debug!(error = %e, "engine close failed");
        }
        if let Some(link) = self.link.write().await.take() {
            link.close().await;
        }
        if let Some(handle) = self.dispatch.lock().await.take() {
            let _ = handle.await;
        }
        info!("session closed");
    }

    async fn require_link(&self) -> Result<Arc<dyn RelayLink>, ClientError> {
        self.link
            .read()
            .await
            .clone()
            .ok_or(ClientError::NotConnected)
    }
}

async fn attach_message_pump(channel: &Arc<dyn DataChannel>, tx: mpsc::Sender<String>) {
    channel
        .on_message(Box::new(move |data: Vec<u8>| {
            let tx = tx.clone();
            Box::pin(async move {
                let text = String::from_utf8_lossy(&data).into_owned();
                let _ = tx.send(text).await;
            })
        }))
        .await;
}

/// Long-running receive loop; one per session. A malformed message or a
/// state mismatch never terminates it, only link closure or shutdown do.
async fn dispatch_loop<E: PeerEngine + 'static>(
    link: Arc<dyn RelayLink>,
    negotiation: Arc<Mutex<Negotiation<E>>>,
    encoding: PayloadEncoding,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("dispatch loop shutting down");
                break;
            }
            delivery = link.recv() => match delivery {
                None => {
                    info!("relay link closed, dispatch loop ending");
                    break;
                }
                Some(delivery) => {
                    handle_delivery(&link, &negotiation, encoding, delivery).await;
                }
            },
        }
    }
}

async fn handle_delivery<E: PeerEngine>(
    link: &Arc<dyn RelayLink>,
    negotiation: &Arc<Mutex<Negotiation<E>>>,
    encoding: PayloadEncoding,
    delivery: Delivery,
) {
    let desc = match codec::decode(&delivery.payload, encoding) {
        Ok(desc) => desc,
        Err(e) => {
            warn!(from = %delivery.from, error = %e, "dropping malformed payload");
            return;
        }
    };
    match desc.kind {
        SdpKind::Offer => {
            let answer = negotiation
                .lock()
                .await
                .handle_offer(&delivery.from, desc)
                .await;
            match answer {
                Ok(answer) => match codec::encode(&answer, encoding) {
                    Ok(payload) => {
                        if let Err(e) = link.send(&delivery.from, &payload).await {
                            warn!(to = %delivery.from, error = %e, "failed to send answer");
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to encode answer"),
                },
                Err(e) if e.is_protocol_violation() => {
                    warn!(from = %delivery.from, error = %e, "rejected offer")
                }
                Err(e) => warn!(from = %delivery.from, error = %e, "failed to answer offer"),
            }
        }
        SdpKind::Answer => {
            match negotiation.lock().await.handle_answer(desc).await {
                Ok(()) => {}
                Err(e) if e.is_protocol_violation() => {
                    warn!(from = %delivery.from, error = %e, "ignoring stale answer")
                }
                Err(e) => warn!(from = %delivery.from, error = %e, "failed to apply answer"),
            }
        }
    }
}
