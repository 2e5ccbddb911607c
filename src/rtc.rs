//! Production peer-connection engine backed by the `webrtc` crate

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::engine::{
    DataChannel, DataChannelHandler, EngineError, MessageHandler, PeerEngine, TrackHandler,
    TrackInfo,
};
use crate::types::{SdpKind, SessionDescription};

/// Bound on waiting for ICE gathering so descriptions carry all candidates
const GATHER_TIMEOUT: Duration = Duration::from_secs(10);

/// Peer-connection engine over a real `RTCPeerConnection`
pub struct RtcEngine {
    pc: Arc<RTCPeerConnection>,
}

impl RtcEngine {
    pub async fn new(stun_servers: &[String]) -> Result<Self, EngineError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| EngineError::Connection(e.to_string()))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| EngineError::Connection(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = api
            .new_peer_connection(config)
            .await
            .map(Arc::new)
            .map_err(|e| EngineError::Connection(e.to_string()))?;

        Ok(Self { pc })
    }

    fn to_rtc(desc: &SessionDescription) -> Result<RTCSessionDescription, EngineError> {
        match desc.kind {
            SdpKind::Offer => RTCSessionDescription::offer(desc.sdp.clone()),
            SdpKind::Answer => RTCSessionDescription::answer(desc.sdp.clone()),
        }
        .map_err(|e| EngineError::Description(e.to_string()))
    }

    fn from_rtc(desc: &RTCSessionDescription) -> Result<SessionDescription, EngineError> {
        let kind = match desc.sdp_type {
            RTCSdpType::Offer => SdpKind::Offer,
            RTCSdpType::Answer => SdpKind::Answer,
            other => {
                return Err(EngineError::Description(format!(
                    "unsupported description type {other}"
                )))
            }
        };
        Ok(SessionDescription::new(desc.sdp.clone(), kind))
    }
}

#[async_trait]
impl PeerEngine for RtcEngine {
    type Track = Arc<dyn TrackLocal + Send + Sync>;

    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| EngineError::Description(e.to_string()))?;
        Self::from_rtc(&offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| EngineError::Description(e.to_string()))?;
        Self::from_rtc(&answer)
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), EngineError> {
        let rtc = Self::to_rtc(&desc)?;
        // wait for gathering so the final description embeds the candidates
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(rtc)
            .await
            .map_err(|e| EngineError::Description(e.to_string()))?;
        if tokio::time::timeout(GATHER_TIMEOUT, gathered.recv())
            .await
            .is_err()
        {
            debug!("ICE gathering still incomplete after timeout");
        }
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), EngineError> {
        let rtc = Self::to_rtc(&desc)?;
        self.pc
            .set_remote_description(rtc)
            .await
            .map_err(|e| EngineError::Description(e.to_string()))
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let desc = self.pc.local_description().await?;
        Self::from_rtc(&desc).ok()
    }

    async fn create_data_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannel>, EngineError> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = self
            .pc
            .create_data_channel(label, Some(init))
            .await
            .map_err(|e| EngineError::Channel(e.to_string()))?;
        Ok(Arc::new(RtcDataChannel { dc }))
    }

    async fn on_data_channel(&self, handler: DataChannelHandler) {
        let handler = Arc::new(handler);
        self.pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let handler = handler.clone();
            Box::pin(async move {
                let wrapped: Arc<dyn DataChannel> = Arc::new(RtcDataChannel { dc });
                handler(wrapped).await;
            })
        }));
    }

    async fn on_track(&self, handler: TrackHandler) {
        let handler = Arc::new(handler);
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let handler = handler.clone();
                Box::pin(async move {
                    let info = TrackInfo {
                        id: track.id(),
                        kind: track.kind().to_string(),
                    };
                    handler(info).await;
                })
            },
        ));
    }

    async fn add_track(&self, track: Self::Track) -> Result<(), EngineError> {
        self.pc
            .add_track(track)
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Connection(e.to_string()))
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.pc
            .close()
            .await
            .map_err(|e| EngineError::Connection(e.to_string()))
    }
}

/// Wrapper implementing the engine-facing channel contract
struct RtcDataChannel {
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannel for RtcDataChannel {
    fn label(&self) -> &str {
        self.dc.label()
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: &str) -> Result<(), EngineError> {
        self.dc
            .send_text(text.to_string())
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Channel(e.to_string()))
    }

    async fn on_message(&self, handler: MessageHandler) {
        let handler = Arc::new(handler);
        self.dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let handler = handler.clone();
            let data = msg.data.to_vec();
            Box::pin(async move {
                handler(data).await;
            })
        }));
    }

    async fn close(&self) {
        let _ = self.dc.close().await;
    }
}
