//! Connection Manager
//!
//! Baut die Peer Connection auf, legt die receive-only Transceiver an und
//! leitet Engine-Signale an die registrierten Beobachter weiter.
//! Beim Teardown wird die Event-Weiterleitung beendet, damit nach dem
//! Schließen keine Callbacks mehr ausgelöst werden.

use super::peer::{
    ConnectionState, PeerConnection, PeerConnectionFactory, PeerEvent, RemoteStream, RtcSettings,
};
use crate::config::WhepConfig;
use crate::error::WhepError;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

pub type StreamReadyCallback = Arc<dyn Fn(Arc<RemoteStream>) + Send + Sync>;
pub type ConnectionStateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

// ============================================================================
// OBSERVERS
// ============================================================================

/// Callback-Registry. Jede Registrierung ersetzt die vorherige,
/// Default ist ein No-op.
pub struct Observers {
    stream_ready: RwLock<StreamReadyCallback>,
    connection_state: RwLock<ConnectionStateCallback>,
}

impl Observers {
    pub fn new() -> Self {
        Self {
            stream_ready: RwLock::new(Arc::new(|_| {})),
            connection_state: RwLock::new(Arc::new(|_| {})),
        }
    }

    pub fn set_stream_ready(&self, callback: StreamReadyCallback) {
        *self.stream_ready.write() = callback;
    }

    pub fn set_connection_state(&self, callback: ConnectionStateCallback) {
        *self.connection_state.write() = callback;
    }

    pub fn notify_stream_ready(&self, stream: Arc<RemoteStream>) {
        // Callback klonen, damit er ohne gehaltenen Lock läuft
        let callback = Arc::clone(&self.stream_ready.read());
        callback(stream);
    }

    pub fn notify_connection_state(&self, state: ConnectionState) {
        let callback = Arc::clone(&self.connection_state.read());
        callback(state);
    }
}

impl Default for Observers {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// CONNECTION MANAGER
// ============================================================================

pub struct ConnectionManager {
    peer: Mutex<Option<Arc<dyn PeerConnection>>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
    closed_tx: watch::Sender<bool>,
}

impl ConnectionManager {
    /// Erstellt und konfiguriert die Peer Connection
    pub async fn initialize(
        config: &WhepConfig,
        factory: &dyn PeerConnectionFactory,
        observers: Arc<Observers>,
    ) -> Result<Self, WhepError> {
        config.validate()?;

        let settings = RtcSettings {
            ice_servers: config.effective_ice_servers(),
            bundle_policy: config.bundle_policy,
        };
        let peer = factory.create(&settings).await?;

        for kind in config.media_kinds() {
            if let Err(e) = peer.add_recvonly_transceiver(kind).await {
                let _ = peer.close().await;
                return Err(e.into());
            }
            tracing::debug!("Added recvonly {} transceiver", kind);
        }

        let events = peer.subscribe();
        let event_task = tokio::spawn(Self::forward_events(events, observers));
        let (closed_tx, _) = watch::channel(false);

        Ok(Self {
            peer: Mutex::new(Some(peer)),
            event_task: Mutex::new(Some(event_task)),
            closed_tx,
        })
    }

    /// Gibt die Peer Connection zurück (None nach dem Teardown)
    pub fn peer(&self) -> Option<Arc<dyn PeerConnection>> {
        self.peer.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    /// Receiver, der auf `true` springt sobald der Teardown läuft
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    /// Schließt die Peer Connection. Mehrfacher Aufruf ist ein No-op.
    pub fn teardown(&self) {
        if let Some(task) = self.event_task.lock().take() {
            task.abort();
        }

        let Some(peer) = self.peer.lock().take() else {
            return;
        };
        self.closed_tx.send_replace(true);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No tokio runtime available, dropping peer connection without close");
            return;
        };

        tracing::info!("Closing peer connection");
        runtime.spawn(async move {
            if let Err(e) = peer.close().await {
                tracing::warn!("Failed to close peer connection: {}", e);
            }
        });
    }

    async fn forward_events(mut events: broadcast::Receiver<PeerEvent>, observers: Arc<Observers>) {
        let mut streams: HashMap<String, Arc<RemoteStream>> = HashMap::new();

        loop {
            match events.recv().await {
                Ok(PeerEvent::Track { stream_id, track }) => {
                    let Some(stream_id) = stream_id else {
                        tracing::debug!("Track {} arrived without a stream, ignoring", track.id);
                        continue;
                    };
                    match streams.get(&stream_id) {
                        Some(stream) => stream.add_track(track),
                        None => {
                            let stream = Arc::new(RemoteStream::new(stream_id.clone()));
                            stream.add_track(track);
                            streams.insert(stream_id, Arc::clone(&stream));
                            tracing::info!("Remote stream '{}' ready", stream.id());
                            observers.notify_stream_ready(stream);
                        }
                    }
                }
                Ok(PeerEvent::ConnectionStateChanged(state)) => {
                    observers.notify_connection_state(state);
                }
                Ok(PeerEvent::IceGatheringStateChanged(_)) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Peer event forwarding lagged, skipped {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("initialized", &self.peer.lock().is_some())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BundlePolicy, IceServer, MediaKind};
    use crate::engine::peer::RemoteTrack;
    use crate::testing::{FakePeerFactory, Recorder};
    use std::time::Duration;

    fn track(id: &str, kind: MediaKind) -> RemoteTrack {
        RemoteTrack {
            id: id.to_string(),
            kind,
            remote: None,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_initialize_adds_transceivers_for_enabled_kinds() {
        let factory = FakePeerFactory::new();
        let config = WhepConfig {
            bundle_policy: BundlePolicy::MaxBundle,
            ..Default::default()
        };

        let manager = ConnectionManager::initialize(&config, &factory, Arc::new(Observers::new()))
            .await
            .unwrap();

        let peer = factory.last_peer().unwrap();
        assert_eq!(peer.transceivers(), vec![MediaKind::Video, MediaKind::Audio]);
        assert_eq!(factory.settings()[0].bundle_policy, BundlePolicy::MaxBundle);
        assert_eq!(
            factory.settings()[0].ice_servers,
            vec![IceServer::stun("stun:stun.cloudflare.com:3478")]
        );
        assert!(manager.peer().is_some());
    }

    #[tokio::test]
    async fn test_initialize_passes_configured_ice_servers() {
        let factory = FakePeerFactory::new();
        let turn = IceServer {
            urls: vec!["turn:turn.example.com:3478".to_string()],
            username: "user".to_string(),
            credential: "secret".to_string(),
        };
        let config = WhepConfig {
            ice_servers: vec![IceServer::stun("stun:stun.example.com:19302"), turn.clone()],
            ..Default::default()
        };

        ConnectionManager::initialize(&config, &factory, Arc::new(Observers::new()))
            .await
            .unwrap();

        let settings = factory.settings();
        assert_eq!(settings.len(), 1);
        assert_eq!(
            settings[0].ice_servers,
            vec![IceServer::stun("stun:stun.example.com:19302"), turn]
        );
    }

    #[tokio::test]
    async fn test_both_kinds_disabled_creates_no_peer() {
        let factory = FakePeerFactory::new();
        let config = WhepConfig {
            disable_audio: true,
            disable_video: true,
            ..Default::default()
        };

        let result =
            ConnectionManager::initialize(&config, &factory, Arc::new(Observers::new())).await;

        assert!(matches!(result, Err(WhepError::MediaDisabled)));
        assert_eq!(factory.created(), 0);
    }

    #[tokio::test]
    async fn test_stream_ready_once_per_stream() {
        let factory = FakePeerFactory::new();
        let observers = Arc::new(Observers::new());
        let recorder = Recorder::attach(&observers);
        let _manager =
            ConnectionManager::initialize(&WhepConfig::default(), &factory, observers)
                .await
                .unwrap();

        let peer = factory.last_peer().unwrap();
        peer.emit_track(Some("s1"), track("v", MediaKind::Video));
        peer.emit_track(Some("s1"), track("a", MediaKind::Audio));
        peer.emit_track(None, track("orphan", MediaKind::Audio));
        settle().await;

        let streams = recorder.streams();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].id(), "s1");
        assert_eq!(streams[0].tracks().len(), 2);
    }

    #[tokio::test]
    async fn test_connection_state_forwarded() {
        let factory = FakePeerFactory::new();
        let observers = Arc::new(Observers::new());
        let recorder = Recorder::attach(&observers);
        let _manager =
            ConnectionManager::initialize(&WhepConfig::default(), &factory, observers)
                .await
                .unwrap();

        let peer = factory.last_peer().unwrap();
        peer.set_connection_state(ConnectionState::Connecting);
        peer.set_connection_state(ConnectionState::Connected);
        settle().await;

        assert_eq!(
            recorder.states(),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
    }

    #[tokio::test]
    async fn test_registration_replaces_previous_callback() {
        let observers = Observers::new();
        let first = Recorder::attach(&observers);
        let second = Recorder::attach(&observers);

        observers.notify_connection_state(ConnectionState::Connected);

        assert!(first.states().is_empty());
        assert_eq!(second.states(), vec![ConnectionState::Connected]);
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent_and_stops_callbacks() {
        let factory = FakePeerFactory::new();
        let observers = Arc::new(Observers::new());
        let recorder = Recorder::attach(&observers);
        let manager = ConnectionManager::initialize(&WhepConfig::default(), &factory, observers)
            .await
            .unwrap();
        let peer = factory.last_peer().unwrap();

        manager.teardown();
        manager.teardown();
        settle().await;

        assert!(manager.peer().is_none());
        assert!(manager.is_closed());
        assert_eq!(peer.close_calls(), 1);

        peer.emit_track(Some("late"), track("v", MediaKind::Video));
        settle().await;
        assert!(recorder.streams().is_empty());
        assert!(recorder.states().is_empty());
    }

    #[test]
    fn test_teardown_outside_runtime_does_not_panic() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let factory = FakePeerFactory::new();
        let manager = runtime
            .block_on(ConnectionManager::initialize(
                &WhepConfig::default(),
                &factory,
                Arc::new(Observers::new()),
            ))
            .unwrap();

        std::thread::scope(|s| s.spawn(|| manager.teardown()).join().unwrap());

        assert!(manager.peer().is_none());
        assert!(manager.is_closed());
        assert_eq!(factory.last_peer().unwrap().close_calls(), 0);
    }
}
