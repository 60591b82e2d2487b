//! WebRTC Engine auf Basis von webrtc-rs
//!
//! Übersetzt die webrtc-rs Callbacks in `PeerEvent`s auf einem
//! Broadcast-Kanal.

use super::peer::{
    ConnectionState, IceGatheringState, PeerConnection, PeerConnectionFactory, PeerError,
    PeerEvent, RemoteTrack, RtcSettings, SdpType, SessionDescription,
};
use crate::config::{BundlePolicy, IceServer, MediaKind};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_gathering_state::RTCIceGatheringState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

const EVENT_CHANNEL_CAPACITY: usize = 100;

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<&IceServer> for RTCIceServer {
    fn from(server: &IceServer) -> Self {
        RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone(),
            credential: server.credential.clone(),
            ..Default::default()
        }
    }
}

impl From<BundlePolicy> for RTCBundlePolicy {
    fn from(policy: BundlePolicy) -> Self {
        match policy {
            BundlePolicy::MaxBundle => RTCBundlePolicy::MaxBundle,
            BundlePolicy::Balanced => RTCBundlePolicy::Balanced,
            BundlePolicy::MaxCompat => RTCBundlePolicy::MaxCompat,
        }
    }
}

impl From<MediaKind> for RTPCodecType {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Audio => RTPCodecType::Audio,
            MediaKind::Video => RTPCodecType::Video,
        }
    }
}

fn connection_state_from(state: RTCPeerConnectionState) -> ConnectionState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => ConnectionState::New,
        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
        RTCPeerConnectionState::Connected => ConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectionState::Failed,
        RTCPeerConnectionState::Closed => ConnectionState::Closed,
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, PeerError> {
    let result = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    result.map_err(|e| PeerError::InvalidSdp(e.to_string()))
}

fn from_rtc_description(desc: RTCSessionDescription) -> SessionDescription {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Answer => SdpType::Answer,
        _ => SdpType::Offer,
    };
    SessionDescription {
        sdp_type,
        sdp: desc.sdp,
    }
}

fn webrtc_error(e: webrtc::Error) -> PeerError {
    PeerError::WebRTC(e.to_string())
}

// ============================================================================
// RTC PEER
// ============================================================================

/// Peer Connection der webrtc-rs Engine
pub struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
    event_tx: broadcast::Sender<PeerEvent>,
}

impl RtcPeer {
    /// Registriert Event Handler für die Peer Connection
    fn setup_handlers(pc: &RTCPeerConnection, event_tx: &broadcast::Sender<PeerEvent>) {
        // Connection State Handler
        let tx = event_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            tracing::info!("Peer connection state: {:?}", s);
            let _ = tx.send(PeerEvent::ConnectionStateChanged(connection_state_from(s)));
            Box::pin(async {})
        }));

        // ICE Gathering Handler
        let tx = event_tx.clone();
        pc.on_ice_gathering_state_change(Box::new(move |s: RTCIceGathererState| {
            tracing::debug!("ICE gathering state: {:?}", s);
            let state = match s {
                RTCIceGathererState::Gathering => Some(IceGatheringState::Gathering),
                RTCIceGathererState::Complete => Some(IceGatheringState::Complete),
                RTCIceGathererState::New => Some(IceGatheringState::New),
                _ => None,
            };
            if let Some(state) = state {
                let _ = tx.send(PeerEvent::IceGatheringStateChanged(state));
            }
            Box::pin(async {})
        }));

        // Track Handler (eingehendes Media)
        let tx = event_tx.clone();
        pc.on_track(Box::new(move |track, _, _| {
            let kind = match track.kind() {
                RTPCodecType::Audio => Some(MediaKind::Audio),
                RTPCodecType::Video => Some(MediaKind::Video),
                _ => None,
            };
            if let Some(kind) = kind {
                let stream_id = track.stream_id();
                tracing::info!("Received {} track in stream '{}'", kind, stream_id);
                let _ = tx.send(PeerEvent::Track {
                    stream_id: (!stream_id.is_empty()).then_some(stream_id),
                    track: RemoteTrack {
                        id: track.id(),
                        kind,
                        remote: Some(Arc::clone(&track)),
                    },
                });
            } else {
                tracing::warn!("Ignoring track with unknown kind");
            }
            Box::pin(async {})
        }));
    }
}

#[async_trait]
impl PeerConnection for RtcPeer {
    async fn add_recvonly_transceiver(&self, kind: MediaKind) -> Result<(), PeerError> {
        self.pc
            .add_transceiver_from_kind(
                kind.into(),
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(webrtc_error)?;
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        let offer = self.pc.create_offer(None).await.map_err(webrtc_error)?;
        Ok(from_rtc_description(offer))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        self.pc
            .set_local_description(to_rtc_description(desc)?)
            .await
            .map_err(webrtc_error)
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.pc.local_description().await.map(from_rtc_description)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        self.pc
            .set_remote_description(to_rtc_description(desc)?)
            .await
            .map_err(webrtc_error)
    }

    fn connection_state(&self) -> ConnectionState {
        connection_state_from(self.pc.connection_state())
    }

    fn ice_gathering_state(&self) -> IceGatheringState {
        match self.pc.ice_gathering_state() {
            RTCIceGatheringState::Complete => IceGatheringState::Complete,
            RTCIceGatheringState::Gathering => IceGatheringState::Gathering,
            _ => IceGatheringState::New,
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.event_tx.subscribe()
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.pc.close().await.map_err(webrtc_error)
    }
}

// ============================================================================
// FACTORY
// ============================================================================

/// Erstellt Peer Connections mit Default Codecs und Interceptors
#[derive(Debug, Default, Clone)]
pub struct RtcPeerFactory;

#[async_trait]
impl PeerConnectionFactory for RtcPeerFactory {
    async fn create(&self, settings: &RtcSettings) -> Result<Arc<dyn PeerConnection>, PeerError> {
        // Media Engine mit Default Codecs
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(webrtc_error)?;

        // Interceptors für RTCP, NACK etc.
        let mut registry = Registry::new();
        registry =
            register_default_interceptors(registry, &mut media_engine).map_err(webrtc_error)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: settings.ice_servers.iter().map(RTCIceServer::from).collect(),
            bundle_policy: settings.bundle_policy.into(),
            ..Default::default()
        };

        tracing::debug!(
            "Creating peer connection (bundle policy: {}, {} ICE server(s))",
            settings.bundle_policy,
            settings.ice_servers.len()
        );

        let pc = api.new_peer_connection(config).await.map_err(webrtc_error)?;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        RtcPeer::setup_handlers(&pc, &event_tx);

        Ok(Arc::new(RtcPeer {
            pc: Arc::new(pc),
            event_tx,
        }))
    }
}
