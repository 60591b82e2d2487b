//! Schnittstelle zur WebRTC Engine
//!
//! Der Client treibt die Engine nur über Offer/Answer, ICE Gathering und
//! zwei Signale (Connection State, eingehende Tracks). Alles andere
//! (ICE, DTLS, SRTP, Decoding) bleibt in der Engine.

use crate::config::{BundlePolicy, IceServer, MediaKind};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use webrtc::track::track_remote::TrackRemote;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum PeerError {
    #[error("WebRTC error: {0}")]
    WebRTC(String),

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("Peer connection is closed")]
    Closed,
}

// ============================================================================
// STATES
// ============================================================================

/// Verbindungsstatus, wie ihn die Engine meldet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        }
    }

    /// Zustände, in denen kein Media mehr fließt
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Failed | ConnectionState::Disconnected | ConnectionState::Closed
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceGatheringState {
    New,
    Gathering,
    Complete,
}

// ============================================================================
// SESSION DESCRIPTION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

// ============================================================================
// REMOTE MEDIA
// ============================================================================

/// Ein eingehender Track
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: MediaKind,
    /// Engine-Handle zum Lesen der RTP Pakete (fehlt bei Test-Engines)
    pub remote: Option<Arc<TrackRemote>>,
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Ein Remote Media Stream. Weitere Tracks desselben Streams werden
/// nachträglich angehängt.
#[derive(Debug)]
pub struct RemoteStream {
    id: String,
    tracks: RwLock<Vec<RemoteTrack>>,
}

impl RemoteStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tracks: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> Vec<RemoteTrack> {
        self.tracks.read().clone()
    }

    pub fn add_track(&self, track: RemoteTrack) {
        self.tracks.write().push(track);
    }
}

// ============================================================================
// EVENTS
// ============================================================================

/// Signale der Engine
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Remote Track angekommen; `stream_id` fehlt bei Tracks ohne Stream
    Track {
        stream_id: Option<String>,
        track: RemoteTrack,
    },
    ConnectionStateChanged(ConnectionState),
    IceGatheringStateChanged(IceGatheringState),
}

// ============================================================================
// PEER CONNECTION
// ============================================================================

/// Einstellungen für eine neue Peer Connection
#[derive(Debug, Clone, PartialEq)]
pub struct RtcSettings {
    pub ice_servers: Vec<IceServer>,
    pub bundle_policy: BundlePolicy,
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Fügt einen receive-only Transceiver hinzu
    async fn add_recvonly_transceiver(&self, kind: MediaKind) -> Result<(), PeerError>;

    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError>;

    /// Aktuelle Local Description inkl. bisher gesammelter Kandidaten
    async fn local_description(&self) -> Option<SessionDescription>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError>;

    fn connection_state(&self) -> ConnectionState;

    fn ice_gathering_state(&self) -> IceGatheringState;

    /// Gibt einen Event-Receiver zurück
    fn subscribe(&self) -> broadcast::Receiver<PeerEvent>;

    /// Schließt die Verbindung; mehrfacher Aufruf ist erlaubt
    async fn close(&self) -> Result<(), PeerError>;
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(&self, settings: &RtcSettings) -> Result<Arc<dyn PeerConnection>, PeerError>;
}
