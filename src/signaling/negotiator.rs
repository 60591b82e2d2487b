//! Offer/Answer Negotiator
//!
//! Ein Durchlauf pro `connect()`:
//!
//! ```text
//! Idle → OfferCreated → GatheringIce → OfferReady → Sending(1..n) → Negotiated | Failed
//! ```
//!
//! Kein Trickle-ICE: gesendet wird die komplette Local Description, nachdem
//! ICE Gathering fertig ist oder der Timeout abgelaufen ist.

use super::resource::ResourceTracker;
use super::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::config::WhepConfig;
use crate::engine::{
    ConnectionState, IceGatheringState, PeerConnection, PeerEvent, SessionDescription,
};
use crate::error::WhepError;
use parking_lot::Mutex;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use url::Url;

// ============================================================================
// NEGOTIATION STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationPhase {
    Idle,
    OfferCreated,
    GatheringIce,
    OfferReady,
    /// POST Versuch Nummer `attempt` (ab 1)
    Sending { attempt: u32 },
    Negotiated,
    Failed,
}

/// Ergebnis eines Durchlaufs ohne Fehler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationOutcome {
    /// Answer angewendet, Resource angelegt
    Negotiated { resource_location: String },
    /// Peer Connection wurde während der Retry-Schleife geschlossen
    Cancelled,
}

impl NegotiationOutcome {
    pub fn resource_location(&self) -> Option<&str> {
        match self {
            NegotiationOutcome::Negotiated { resource_location } => Some(resource_location),
            NegotiationOutcome::Cancelled => None,
        }
    }
}

// ============================================================================
// BACKOFF
// ============================================================================

/// Exponentielles Backoff ohne Obergrenze
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration) -> Self {
        Self { next: initial }
    }

    /// Liefert die aktuelle Wartezeit und verdoppelt sie für das nächste Mal
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.checked_mul(2).unwrap_or(Duration::MAX);
        delay
    }
}

/// Bewertung einer Antwort auf den Offer-POST
enum AttemptResult {
    Created(HttpResponse),
    Retry,
}

// ============================================================================
// NEGOTIATOR
// ============================================================================

pub struct Negotiator<'a> {
    endpoint: &'a Url,
    config: &'a WhepConfig,
    peer: Arc<dyn PeerConnection>,
    transport: &'a dyn HttpTransport,
    resources: &'a ResourceTracker,
    closed: watch::Receiver<bool>,
    phase: Arc<Mutex<NegotiationPhase>>,
}

impl<'a> Negotiator<'a> {
    pub fn new(
        endpoint: &'a Url,
        config: &'a WhepConfig,
        peer: Arc<dyn PeerConnection>,
        transport: &'a dyn HttpTransport,
        resources: &'a ResourceTracker,
        closed: watch::Receiver<bool>,
        phase: Arc<Mutex<NegotiationPhase>>,
    ) -> Self {
        Self {
            endpoint,
            config,
            peer,
            transport,
            resources,
            closed,
            phase,
        }
    }

    /// Führt einen kompletten Offer/Answer Austausch durch
    pub async fn run(mut self) -> Result<NegotiationOutcome, WhepError> {
        self.set_phase(NegotiationPhase::Idle);
        let result = self.negotiate().await;
        match &result {
            Ok(NegotiationOutcome::Negotiated { .. }) => {
                self.set_phase(NegotiationPhase::Negotiated)
            }
            Ok(NegotiationOutcome::Cancelled) | Err(_) => self.set_phase(NegotiationPhase::Failed),
        }
        result
    }

    async fn negotiate(&mut self) -> Result<NegotiationOutcome, WhepError> {
        let offer = self.peer.create_offer().await?;
        self.peer.set_local_description(offer).await?;
        self.set_phase(NegotiationPhase::OfferCreated);

        self.set_phase(NegotiationPhase::GatheringIce);
        let offer = self.wait_for_ice_gathering().await?;
        self.set_phase(NegotiationPhase::OfferReady);

        self.send_offer_with_retry(&offer.sdp).await
    }

    /// Wartet auf "complete" oder den Timeout, je nachdem was zuerst kommt,
    /// und liefert die dann aktuelle Local Description
    async fn wait_for_ice_gathering(&mut self) -> Result<SessionDescription, WhepError> {
        let peer = Arc::clone(&self.peer);
        let mut events = peer.subscribe();

        let gathered = async {
            if peer.ice_gathering_state() == IceGatheringState::Complete {
                return;
            }
            loop {
                match events.recv().await {
                    Ok(PeerEvent::IceGatheringStateChanged(IceGatheringState::Complete)) => return,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if peer.ice_gathering_state() == IceGatheringState::Complete {
                            return;
                        }
                    }
                    // Engine weg, der Timeout entscheidet
                    Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
                }
            }
        };

        let timeout = self.config.ice_gathering_timeout();
        if tokio::time::timeout(timeout, gathered).await.is_err() {
            tracing::debug!(
                "ICE gathering not complete after {:?}, sending offer with candidates so far",
                timeout
            );
        } else {
            tracing::debug!("ICE gathering complete");
        }

        if self.is_closed() {
            return Err(WhepError::IceGatheringFailed);
        }
        self.peer
            .local_description()
            .await
            .ok_or(WhepError::IceGatheringFailed)
    }

    async fn send_offer_with_retry(&mut self, sdp: &str) -> Result<NegotiationOutcome, WhepError> {
        let max_retries = self.config.max_retries.max(1);
        let mut backoff = Backoff::new(self.config.initial_retry_interval());
        let mut attempt = 0;

        loop {
            if self.is_closed() {
                tracing::info!("Peer connection closed, stopping negotiation");
                return Ok(NegotiationOutcome::Cancelled);
            }

            attempt += 1;
            self.set_phase(NegotiationPhase::Sending { attempt });

            if let AttemptResult::Created(response) = self.post_offer(sdp, attempt).await? {
                if self.is_closed() {
                    tracing::info!("Peer connection closed while the offer was in flight");
                    let location = response.header("location").filter(|l| !l.is_empty());
                    if let Some(location) = location {
                        self.resources.discard(location);
                    }
                    return Ok(NegotiationOutcome::Cancelled);
                }

                let resource_location = self.apply_answer(response).await?;
                tracing::info!("WHEP session negotiated, resource: {}", resource_location);
                return Ok(NegotiationOutcome::Negotiated { resource_location });
            }

            if attempt >= max_retries {
                tracing::error!("WHEP negotiation failed after {} attempts", attempt);
                return Err(WhepError::MaxRetriesExceeded { attempts: attempt });
            }
            if self.is_closed() {
                tracing::info!("Peer connection closed, stopping negotiation");
                return Ok(NegotiationOutcome::Cancelled);
            }

            let delay = backoff.next_delay();
            tracing::debug!("Retrying WHEP offer in {:?}", delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_closed(&mut self.closed) => {}
            }
        }
    }

    /// Ein POST; nur 403 bricht sofort ab
    async fn post_offer(&self, sdp: &str, attempt: u32) -> Result<AttemptResult, WhepError> {
        let request = HttpRequest::post_sdp(self.endpoint.clone(), sdp.to_string());

        match self.transport.send(request).await {
            Ok(response) => match response.status {
                StatusCode::CREATED => Ok(AttemptResult::Created(response)),
                StatusCode::FORBIDDEN => {
                    tracing::error!("WHEP endpoint rejected the offer: 403 Forbidden");
                    Err(WhepError::Unauthorized)
                }
                StatusCode::METHOD_NOT_ALLOWED => {
                    // Endpoint-Adresse hat sich geändert, eine Korrektur gibt es noch nicht
                    tracing::warn!("URL must be updated (405 on attempt {})", attempt);
                    Ok(AttemptResult::Retry)
                }
                status => {
                    tracing::error!(
                        "WHEP request failed with status {} on attempt {}: {}",
                        status,
                        attempt,
                        response.body
                    );
                    Ok(AttemptResult::Retry)
                }
            },
            Err(e) => {
                tracing::error!("Network error on attempt {}: {}", attempt, e);
                Ok(AttemptResult::Retry)
            }
        }
    }

    /// Wendet die Answer an und gibt den Location Header zurück.
    ///
    /// Eine von der Engine abgelehnte Answer wird nicht erneut angefragt:
    /// derselbe Offer würde wieder dieselbe Answer liefern. Die gerade
    /// angelegte Resource wird verworfen, der Fehler ist `InvalidAnswer`.
    async fn apply_answer(&self, response: HttpResponse) -> Result<String, WhepError> {
        let location = response
            .header("location")
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .ok_or(WhepError::MissingResourceLocation)?;

        let answer = SessionDescription::answer(response.body);
        if let Err(e) = self.peer.set_remote_description(answer).await {
            tracing::error!("Failed to apply WHEP answer: {}", e);
            self.resources.discard(&location);
            return Err(WhepError::InvalidAnswer(e.to_string()));
        }

        Ok(location)
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.peer.connection_state() == ConnectionState::Closed
    }

    fn set_phase(&self, phase: NegotiationPhase) {
        tracing::debug!("Negotiation phase: {:?}", phase);
        *self.phase.lock() = phase;
    }
}

/// Wird fertig, sobald das Closed-Signal `true` ist
async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    if closed.wait_for(|closed| *closed).await.is_err() {
        std::future::pending::<()>().await;
    }
}
