//! Fehlertypen des WHEP Clients
//!
//! - Vorbedingungen: Endpoint, Media-Konfiguration, Peer Connection
//! - Autorisierung: HTTP 403, wird nicht wiederholt
//! - Erschöpfung: alle Versuche fehlgeschlagen
//!
//! Fehler beim Aufräumen (DELETE) tauchen hier nicht auf, die werden nur geloggt.

use crate::engine::PeerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WhepError {
    #[error("endpoint is required")]
    MissingEndpoint,

    #[error("Invalid endpoint URL: {0}")]
    InvalidEndpoint(String),

    #[error("cannot disable both audio and video")]
    MediaDisabled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to read configuration: {0}")]
    ConfigRead(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("Peer connection is not initialized")]
    PeerConnectionNotInitialized,

    #[error("A negotiation is already in progress")]
    NegotiationInProgress,

    #[error("Session is already negotiated")]
    AlreadyNegotiated,

    #[error("failed to gather ICE candidates for offer")]
    IceGatheringFailed,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Max retry attempts reached ({attempts})")]
    MaxRetriesExceeded { attempts: u32 },

    #[error("Server answered without a Location header")]
    MissingResourceLocation,

    #[error("Invalid SDP answer: {0}")]
    InvalidAnswer(String),

    #[error(transparent)]
    Peer(#[from] PeerError),
}

impl WhepError {
    /// Fehler, die keinen laufenden Versuch betreffen und daher kein
    /// synthetisches "failed" an die Beobachter schicken
    pub fn is_guard_rejection(&self) -> bool {
        matches!(
            self,
            WhepError::NegotiationInProgress | WhepError::AlreadyNegotiated
        )
    }
}
