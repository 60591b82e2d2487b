//! WHEP Client - WebRTC-HTTP Egress Protocol
//!
//! Empfängt einen Live-Stream von einem WHEP-Endpoint:
//! - Receive-only Peer Connection (Audio und/oder Video)
//! - Offer per HTTP POST, Answer aus der 201 Antwort
//! - Retry mit exponentiellem Backoff
//! - Freigabe der Session-Resource per DELETE beim Schließen

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod signaling;

#[cfg(test)]
mod testing;

pub use client::{SessionState, WhepClient};
pub use config::{BundlePolicy, IceServer, MediaKind, WhepConfig};
pub use engine::{ConnectionState, RemoteStream, RemoteTrack};
pub use error::WhepError;
pub use signaling::{NegotiationOutcome, NegotiationPhase};
