//! WHEP Client
//!
//! Eine Session pro Instanz: Peer Connection wird beim Erstellen aufgebaut,
//! `connect()` führt genau einen Offer/Answer Austausch durch, `close()`
//! räumt alles auf (Resource freigeben, Peer Connection schließen).
//!
//! ## Verwendung
//! ```no_run
//! # async fn example() -> Result<(), whep_client::WhepError> {
//! use whep_client::{WhepClient, WhepConfig};
//!
//! let client = WhepClient::new("https://example.com/whep", WhepConfig::default()).await?;
//! client.on_stream_ready(|stream| println!("stream {} ready", stream.id()));
//! client.on_connection_state_change(|state| println!("state: {}", state));
//! client.connect().await?;
//! // ...
//! client.close();
//! # Ok(())
//! # }
//! ```

use crate::config::WhepConfig;
use crate::engine::{
    ConnectionManager, ConnectionState, Observers, PeerConnectionFactory, RemoteStream,
    RtcPeerFactory,
};
use crate::error::WhepError;
use crate::signaling::{
    HttpTransport, NegotiationOutcome, NegotiationPhase, Negotiator, ReqwestTransport,
    ResourceTracker,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use url::Url;

// ============================================================================
// SESSION STATE
// ============================================================================

/// Zustand der Session aus Sicht des Clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Peer Connection aufgebaut, noch nicht verhandelt
    Ready,
    /// `connect()` läuft
    Negotiating,
    /// Answer angewendet, Resource aktiv
    Negotiated,
    /// Letzte Verhandlung fehlgeschlagen oder abgebrochen
    Failed,
    Closed,
}

/// Setzt den Zustand zurück, falls `connect()` abgebrochen wird
struct NegotiationGuard<'a> {
    state: &'a Mutex<SessionState>,
    armed: bool,
}

impl NegotiationGuard<'_> {
    /// Gibt `false` zurück, wenn die Session inzwischen geschlossen wurde
    fn complete(mut self, next: SessionState) -> bool {
        self.armed = false;
        let mut state = self.state.lock();
        if *state == SessionState::Negotiating {
            *state = next;
            true
        } else {
            false
        }
    }
}

impl Drop for NegotiationGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.state.lock();
            if *state == SessionState::Negotiating {
                *state = SessionState::Failed;
            }
        }
    }
}

// ============================================================================
// WHEP CLIENT
// ============================================================================

pub struct WhepClient {
    endpoint: Url,
    config: WhepConfig,
    connection: ConnectionManager,
    resources: ResourceTracker,
    transport: Arc<dyn HttpTransport>,
    observers: Arc<Observers>,
    state: Mutex<SessionState>,
    phase: Arc<Mutex<NegotiationPhase>>,
}

impl WhepClient {
    /// Erstellt einen Client mit webrtc-rs Engine und reqwest Transport
    pub async fn new(endpoint: &str, config: WhepConfig) -> Result<Self, WhepError> {
        parse_endpoint(endpoint)?;
        config.validate()?;

        let transport = ReqwestTransport::new(config.request_timeout())
            .map_err(|e| WhepError::InvalidConfig(e.to_string()))?;
        Self::with_components(endpoint, config, &RtcPeerFactory, Arc::new(transport)).await
    }

    /// Erstellt einen Client mit eigener Engine und eigenem Transport
    pub async fn with_components(
        endpoint: &str,
        config: WhepConfig,
        factory: &dyn PeerConnectionFactory,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, WhepError> {
        let endpoint = parse_endpoint(endpoint)?;
        config.validate()?;

        let observers = Arc::new(Observers::new());
        let connection =
            ConnectionManager::initialize(&config, factory, Arc::clone(&observers)).await?;
        let resources = ResourceTracker::new(endpoint.clone(), Arc::clone(&transport));

        tracing::info!("WHEP client created for {}", endpoint);

        Ok(Self {
            endpoint,
            config,
            connection,
            resources,
            transport,
            observers,
            state: Mutex::new(SessionState::Ready),
            phase: Arc::new(Mutex::new(NegotiationPhase::Idle)),
        })
    }

    /// Führt die Verhandlung mit dem WHEP-Endpoint durch.
    ///
    /// `Cancelled` bedeutet, dass die Session währenddessen geschlossen wurde;
    /// es gibt dann keine Resource. Jeder Fehler (außer einem abgewiesenen
    /// zweiten Aufruf) meldet zusätzlich "failed" an den State-Callback.
    pub async fn connect(&self) -> Result<NegotiationOutcome, WhepError> {
        let result = match self.begin_negotiation() {
            Ok(guard) => {
                let result = self.negotiate().await;
                self.finish_negotiation(guard, &result);
                result
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            if !e.is_guard_rejection() {
                tracing::warn!("WHEP connect failed: {}", e);
                self.observers.notify_connection_state(ConnectionState::Failed);
            }
        }
        result
    }

    /// Gibt die Resource frei und schließt die Peer Connection.
    ///
    /// Darf beliebig oft aufgerufen werden. Der zurückgegebene Handle gehört
    /// zum DELETE Request; er muss nicht abgewartet werden.
    pub fn close(&self) -> Option<JoinHandle<()>> {
        let previous = std::mem::replace(&mut *self.state.lock(), SessionState::Closed);
        if previous != SessionState::Closed {
            tracing::info!("Closing WHEP session ({:?})", previous);
        }

        let delete = self.resources.release();
        self.connection.teardown();
        delete
    }

    /// Registriert den Stream-Callback (ersetzt einen vorherigen)
    pub fn on_stream_ready<F>(&self, callback: F)
    where
        F: Fn(Arc<RemoteStream>) + Send + Sync + 'static,
    {
        self.observers.set_stream_ready(Arc::new(callback));
    }

    /// Registriert den State-Callback (ersetzt einen vorherigen)
    pub fn on_connection_state_change<F>(&self, callback: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.observers.set_connection_state(Arc::new(callback));
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Verbindungsstatus: Failed/Closed der Session haben Vorrang vor der Engine
    pub fn connection_state(&self) -> ConnectionState {
        match self.state() {
            SessionState::Closed => ConnectionState::Closed,
            SessionState::Failed => ConnectionState::Failed,
            _ => self
                .connection
                .peer()
                .map(|peer| peer.connection_state())
                .unwrap_or(ConnectionState::Closed),
        }
    }

    pub fn negotiation_phase(&self) -> NegotiationPhase {
        *self.phase.lock()
    }

    /// Location Header der aktiven Resource, unverändert
    pub fn resource_location(&self) -> Option<String> {
        self.resources.location()
    }

    /// Absolute URL der aktiven Resource
    pub fn resource_url(&self) -> Option<String> {
        self.resources
            .location()
            .map(|location| self.resources.resolve(&location))
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn config(&self) -> &WhepConfig {
        &self.config
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    fn begin_negotiation(&self) -> Result<NegotiationGuard<'_>, WhepError> {
        let mut state = self.state.lock();
        match *state {
            SessionState::Negotiating => Err(WhepError::NegotiationInProgress),
            SessionState::Negotiated => Err(WhepError::AlreadyNegotiated),
            SessionState::Closed => Err(WhepError::PeerConnectionNotInitialized),
            SessionState::Ready | SessionState::Failed => {
                *state = SessionState::Negotiating;
                Ok(NegotiationGuard {
                    state: &self.state,
                    armed: true,
                })
            }
        }
    }

    async fn negotiate(&self) -> Result<NegotiationOutcome, WhepError> {
        let peer = self
            .connection
            .peer()
            .ok_or(WhepError::PeerConnectionNotInitialized)?;

        Negotiator::new(
            &self.endpoint,
            &self.config,
            peer,
            self.transport.as_ref(),
            &self.resources,
            self.connection.closed_signal(),
            Arc::clone(&self.phase),
        )
        .run()
        .await
    }

    fn finish_negotiation(
        &self,
        guard: NegotiationGuard<'_>,
        result: &Result<NegotiationOutcome, WhepError>,
    ) {
        match result {
            Ok(NegotiationOutcome::Negotiated { resource_location }) => {
                self.resources.record(resource_location.clone());
                if !guard.complete(SessionState::Negotiated) {
                    tracing::info!("Session closed during negotiation, releasing resource");
                    self.resources.release();
                }
            }
            Ok(NegotiationOutcome::Cancelled) | Err(_) => {
                guard.complete(SessionState::Failed);
            }
        }
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url, WhepError> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(WhepError::MissingEndpoint);
    }

    let url = Url::parse(endpoint).map_err(|e| WhepError::InvalidEndpoint(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(WhepError::InvalidEndpoint(format!(
            "unsupported scheme '{}'",
            scheme
        ))),
    }
}

impl std::fmt::Debug for WhepClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhepClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("state", &self.state())
            .field("phase", &self.negotiation_phase())
            .field("resource", &self.resources.location())
            .finish()
    }
}
