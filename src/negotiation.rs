//! Offer/answer negotiation state machine
//!
//! Drives the peer-connection engine through the two-step handshake:
//! the caller issues an offer, the callee produces an answer, and either
//! side reaches `Established` exactly once. Messages that do not fit the
//! current state are rejected as protocol violations so the dispatch loop
//! can log and carry on.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::engine::{DataChannel, EngineError, PeerEngine};
use crate::types::SessionDescription;

/// Lifecycle of a negotiation session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    OfferSent,
    AnswerSent,
    Established,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::OfferSent => write!(f, "offer-sent"),
            SessionState::AnswerSent => write!(f, "answer-sent"),
            SessionState::Established => write!(f, "established"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Negotiation failures; protocol violations are recoverable per-message
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("session is closed")]
    Closed,
    #[error("negotiation already active ({0})")]
    AlreadyActive(SessionState),
    #[error("unexpected offer from {from} while {state}")]
    UnexpectedOffer { from: String, state: SessionState },
    #[error("stale answer while {0}")]
    StaleAnswer(SessionState),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl NegotiationError {
    /// Whether this is an inbound message inconsistent with our state,
    /// to be logged and dropped rather than surfaced
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            NegotiationError::UnexpectedOffer { .. } | NegotiationError::StaleAnswer(_)
        )
    }
}

/// Per-session negotiation state; owned by one facade, never shared
pub struct Negotiation<E: PeerEngine> {
    engine: Arc<E>,
    state: SessionState,
    channel_label: String,
}

impl<E: PeerEngine> Negotiation<E> {
    pub fn new(engine: Arc<E>, channel_label: String) -> Self {
        Self {
            engine,
            state: SessionState::Idle,
            channel_label,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Caller path: open the outbound data channel, produce a fresh offer
    /// and return the final local description to send to the callee.
    ///
    /// Valid only while `Idle`; at most one offer may be in flight.
    pub async fn initiate_call(
        &mut self,
    ) -> Result<(SessionDescription, Arc<dyn DataChannel>), NegotiationError> {
        match self.state {
            SessionState::Idle => {}
            SessionState::Closed => return Err(NegotiationError::Closed),
            other => return Err(NegotiationError::AlreadyActive(other)),
        }
        let channel = self.engine.create_data_channel(&self.channel_label).await?;
        let offer = self.engine.create_offer().await?;
        self.engine.set_local_description(offer).await?;
        let local = self.engine.local_description().await.ok_or_else(|| {
            EngineError::Description("no local description after offer".to_string())
        })?;
        self.state = SessionState::OfferSent;
        Ok((local, channel))
    }

    /// Callee path: apply the remote offer and return the answer to send
    /// back.
    ///
    /// Valid only while `Idle`. An offer arriving while one of ours is in
    /// flight (glare) is rejected; peers that need glare resolution can
    /// layer an ID-based role tie-break above this before calling in.
    pub async fn handle_offer(
        &mut self,
        from: &str,
        desc: SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        match self.state {
            SessionState::Idle => {}
            SessionState::Closed => return Err(NegotiationError::Closed),
            other => {
                return Err(NegotiationError::UnexpectedOffer {
                    from: from.to_string(),
                    state: other,
                })
            }
        }
        self.engine.set_remote_description(desc).await?;
        let answer = self.engine.create_answer().await?;
        self.engine.set_local_description(answer).await?;
        let local = self.engine.local_description().await.ok_or_else(|| {
            EngineError::Description("no local description after answer".to_string())
        })?;
        self.state = SessionState::AnswerSent;
        info!(%from, "answered inbound offer");
        Ok(local)
    }

    /// Complete the caller path. Valid only while `OfferSent`; an answer in
    /// any other state is stale and leaves the state untouched.
    pub async fn handle_answer(
        &mut self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        match self.state {
            SessionState::OfferSent => {}
            SessionState::Closed => return Err(NegotiationError::Closed),
            other => return Err(NegotiationError::StaleAnswer(other)),
        }
        self.engine.set_remote_description(desc).await?;
        self.state = SessionState::Established;
        info!("negotiation established");
        Ok(())
    }

    /// Callee completion, driven by the engine's inbound-channel callback
    pub fn mark_established(&mut self) -> bool {
        match self.state {
            SessionState::AnswerSent => {
                self.state = SessionState::Established;
                info!("negotiation established");
                true
            }
            other => {
                debug!(state = %other, "ignoring establish signal");
                false
            }
        }
    }

    /// Terminal; all further operations fail with `Closed`
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }
}
