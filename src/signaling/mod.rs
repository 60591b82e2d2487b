//! Signaling Module - WHEP über HTTP
//!
//! Dieses Modul verwaltet die Kommunikation mit dem WHEP-Endpoint:
//! - Offer per POST senden, Answer anwenden (mit Retry/Backoff)
//! - Session-Resource aus dem Location Header verwalten
//! - HTTP Transport
//!

mod negotiator;
mod resource;
mod transport;

pub use negotiator::{Backoff, NegotiationOutcome, NegotiationPhase, Negotiator};
pub use resource::ResourceTracker;
pub use transport::{
    HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError, SDP_CONTENT_TYPE,
};
