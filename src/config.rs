//! WHEP Client Konfiguration
//!
//! Wird beim Erstellen des Clients übergeben und ist danach unveränderlich.
//! Kann aus JSON geladen werden, alle Felder haben Defaults.

use crate::error::WhepError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// DEFAULTS
// ============================================================================

/// Öffentlicher STUN Server, falls keine ICE Server konfiguriert sind
pub const DEFAULT_STUN_URL: &str = "stun:stun.cloudflare.com:3478";

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_ICE_GATHERING_TIMEOUT_MS: u64 = 300;
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

// ============================================================================
// MEDIA KIND
// ============================================================================

/// Art eines empfangenen Media-Tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

// ============================================================================
// BUNDLE POLICY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundlePolicy {
    MaxBundle,
    #[default]
    Balanced,
    MaxCompat,
}

impl fmt::Display for BundlePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BundlePolicy::MaxBundle => f.write_str("max-bundle"),
            BundlePolicy::Balanced => f.write_str("balanced"),
            BundlePolicy::MaxCompat => f.write_str("max-compat"),
        }
    }
}

// ============================================================================
// ICE SERVER
// ============================================================================

/// STUN/TURN Server Eintrag
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Default::default()
        }
    }
}

/// Standard ICE Konfiguration (ein öffentlicher STUN Server)
pub fn default_ice_servers() -> Vec<IceServer> {
    vec![IceServer::stun(DEFAULT_STUN_URL)]
}

// ============================================================================
// WHEP CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhepConfig {
    pub ice_servers: Vec<IceServer>,
    pub bundle_policy: BundlePolicy,
    pub disable_audio: bool,
    pub disable_video: bool,
    /// Anzahl der POST-Versuche (mindestens 1)
    pub max_retries: u32,
    /// Maximale Wartezeit auf ICE Gathering, 0 = nicht warten
    pub ice_gathering_timeout_ms: u64,
    /// Erste Wartezeit zwischen zwei Versuchen, verdoppelt sich danach
    pub initial_retry_interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for WhepConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            bundle_policy: BundlePolicy::default(),
            disable_audio: false,
            disable_video: false,
            max_retries: DEFAULT_MAX_RETRIES,
            ice_gathering_timeout_ms: DEFAULT_ICE_GATHERING_TIMEOUT_MS,
            initial_retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl WhepConfig {
    /// Lädt die Konfiguration aus einem JSON String
    pub fn from_json_str(json: &str) -> Result<Self, WhepError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Lädt die Konfiguration aus einer JSON Datei
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, WhepError> {
        let path = path.as_ref();
        tracing::debug!("Loading WHEP config from {:?}", path);
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Prüft die Konfiguration, bevor irgendetwas aufgebaut wird
    pub fn validate(&self) -> Result<(), WhepError> {
        if self.disable_audio && self.disable_video {
            return Err(WhepError::MediaDisabled);
        }
        if self.max_retries == 0 {
            return Err(WhepError::InvalidConfig(
                "max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Aktivierte Media-Arten in Transceiver-Reihenfolge (Video vor Audio)
    pub fn media_kinds(&self) -> Vec<MediaKind> {
        let mut kinds = Vec::with_capacity(2);
        if !self.disable_video {
            kinds.push(MediaKind::Video);
        }
        if !self.disable_audio {
            kinds.push(MediaKind::Audio);
        }
        kinds
    }

    /// ICE Server, leere Liste fällt auf den Default zurück
    pub fn effective_ice_servers(&self) -> Vec<IceServer> {
        if self.ice_servers.is_empty() {
            default_ice_servers()
        } else {
            self.ice_servers.clone()
        }
    }

    pub fn ice_gathering_timeout(&self) -> Duration {
        Duration::from_millis(self.ice_gathering_timeout_ms)
    }

    pub fn initial_retry_interval(&self) -> Duration {
        Duration::from_millis(self.initial_retry_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
