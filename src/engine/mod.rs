//! Engine Module - WebRTC Peer Connection
//!
//! Dieses Modul verwaltet:
//! - Die Schnittstelle zur WebRTC Engine
//! - Die webrtc-rs Implementierung
//! - Aufbau, Event-Weiterleitung und Teardown der Peer Connection

mod connection;
mod peer;
mod rtc_peer;

pub use connection::{ConnectionManager, ConnectionStateCallback, Observers, StreamReadyCallback};
pub use peer::{
    ConnectionState, IceGatheringState, PeerConnection, PeerConnectionFactory, PeerError,
    PeerEvent, RemoteStream, RemoteTrack, RtcSettings, SdpType, SessionDescription,
};
pub use rtc_peer::{RtcPeer, RtcPeerFactory};
