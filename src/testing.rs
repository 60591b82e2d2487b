//! Test-Doubles für Engine, HTTP und Beobachter

use crate::config::MediaKind;
use crate::engine::{
    ConnectionState, IceGatheringState, Observers, PeerConnection, PeerConnectionFactory,
    PeerError, PeerEvent, RemoteStream, RemoteTrack, RtcSettings, SessionDescription,
};
use crate::signaling::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, LOCATION};
use reqwest::{Method, StatusCode};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use url::Url;

pub const ANSWER_SDP: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";
pub const LATE_CANDIDATE: &str = "a=candidate:1 1 udp 2130706431 192.0.2.1 50000 typ host\r\n";

// ============================================================================
// FAKE PEER
// ============================================================================

/// Wann die Fake-Engine ICE Gathering abschließt
#[derive(Debug, Clone, Copy)]
pub enum Gathering {
    /// Schon beim Setzen der Local Description
    Immediate,
    /// Per Event nach der angegebenen Zeit
    After(Duration),
    Never,
}

pub struct FakePeer {
    event_tx: broadcast::Sender<PeerEvent>,
    gathering: Gathering,
    connection_state: Mutex<ConnectionState>,
    gathering_state: Arc<Mutex<IceGatheringState>>,
    local: Arc<Mutex<Option<SessionDescription>>>,
    remote: Mutex<Option<SessionDescription>>,
    transceivers: Mutex<Vec<MediaKind>>,
    close_calls: AtomicUsize,
    reject_answer: AtomicBool,
}

impl FakePeer {
    pub fn new(gathering: Gathering) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            event_tx,
            gathering,
            connection_state: Mutex::new(ConnectionState::New),
            gathering_state: Arc::new(Mutex::new(IceGatheringState::New)),
            local: Arc::new(Mutex::new(None)),
            remote: Mutex::new(None),
            transceivers: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
            reject_answer: AtomicBool::new(false),
        })
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        *self.connection_state.lock() = state;
        let _ = self.event_tx.send(PeerEvent::ConnectionStateChanged(state));
    }

    pub fn emit_track(&self, stream_id: Option<&str>, track: RemoteTrack) {
        let _ = self.event_tx.send(PeerEvent::Track {
            stream_id: stream_id.map(str::to_string),
            track,
        });
    }

    pub fn reject_answers(&self) {
        self.reject_answer.store(true, Ordering::SeqCst);
    }

    pub fn transceivers(&self) -> Vec<MediaKind> {
        self.transceivers.lock().clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn add_recvonly_transceiver(&self, kind: MediaKind) -> Result<(), PeerError> {
        self.transceivers.lock().push(kind);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        let mut sdp = String::from("v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n");
        for kind in self.transceivers.lock().iter() {
            sdp.push_str(&format!("m={} 9 UDP/TLS/RTP/SAVPF 96\r\na=recvonly\r\n", kind));
        }
        Ok(SessionDescription::offer(sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        if self.connection_state() == ConnectionState::Closed {
            return Err(PeerError::Closed);
        }
        *self.local.lock() = Some(desc);

        match self.gathering {
            Gathering::Immediate => *self.gathering_state.lock() = IceGatheringState::Complete,
            Gathering::Never => *self.gathering_state.lock() = IceGatheringState::Gathering,
            Gathering::After(delay) => {
                *self.gathering_state.lock() = IceGatheringState::Gathering;
                let state = Arc::clone(&self.gathering_state);
                let local = Arc::clone(&self.local);
                let tx = self.event_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(desc) = local.lock().as_mut() {
                        desc.sdp.push_str(LATE_CANDIDATE);
                    }
                    *state.lock() = IceGatheringState::Complete;
                    let _ = tx.send(PeerEvent::IceGatheringStateChanged(
                        IceGatheringState::Complete,
                    ));
                });
            }
        }
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        if self.connection_state() == ConnectionState::Closed {
            return None;
        }
        self.local.lock().clone()
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        if self.connection_state() == ConnectionState::Closed {
            return Err(PeerError::Closed);
        }
        if self.reject_answer.load(Ordering::SeqCst) {
            return Err(PeerError::InvalidSdp("rejected by fake engine".to_string()));
        }
        *self.remote.lock() = Some(desc);
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        *self.connection_state.lock()
    }

    fn ice_gathering_state(&self) -> IceGatheringState {
        *self.gathering_state.lock()
    }

    fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.event_tx.subscribe()
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.set_connection_state(ConnectionState::Closed);
        Ok(())
    }
}

// ============================================================================
// FAKE FACTORY
// ============================================================================

pub struct FakePeerFactory {
    gathering: Gathering,
    peers: Mutex<Vec<Arc<FakePeer>>>,
    settings: Mutex<Vec<RtcSettings>>,
}

impl FakePeerFactory {
    pub fn new() -> Self {
        Self::with_gathering(Gathering::Immediate)
    }

    pub fn with_gathering(gathering: Gathering) -> Self {
        Self {
            gathering,
            peers: Mutex::new(Vec::new()),
            settings: Mutex::new(Vec::new()),
        }
    }

    pub fn created(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn last_peer(&self) -> Option<Arc<FakePeer>> {
        self.peers.lock().last().cloned()
    }

    pub fn settings(&self) -> Vec<RtcSettings> {
        self.settings.lock().clone()
    }
}

#[async_trait]
impl PeerConnectionFactory for FakePeerFactory {
    async fn create(&self, settings: &RtcSettings) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let peer = FakePeer::new(self.gathering);
        self.peers.lock().push(Arc::clone(&peer));
        self.settings.lock().push(settings.clone());
        Ok(peer)
    }
}

// ============================================================================
// FAKE TRANSPORT
// ============================================================================

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: Url,
    pub content_type: Option<String>,
    pub body: Option<String>,
    pub at: Instant,
}

type RequestHook = Box<dyn Fn(usize) + Send + Sync>;

/// Spielt vorbereitete Antworten der Reihe nach ab, danach `200 OK`
pub struct FakeTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    hook: Mutex<Option<RequestHook>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            hook: Mutex::new(None),
        })
    }

    pub fn push_response(&self, status: StatusCode, headers: HeaderMap, body: &str) {
        self.responses.lock().push_back(Ok(HttpResponse {
            status,
            headers,
            body: body.to_string(),
        }));
    }

    pub fn push_status(&self, status: StatusCode) {
        self.push_response(status, HeaderMap::new(), "");
    }

    pub fn push_created(&self, location: &'static str, answer: &str) {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static(location));
        self.push_response(StatusCode::CREATED, headers, answer);
    }

    pub fn push_network_error(&self, message: &str) {
        self.responses
            .lock()
            .push_back(Err(TransportError::Network(message.to_string())));
    }

    /// Wird bei jedem Request mit dessen Index (ab 0) aufgerufen
    pub fn on_request(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_with(&self, method: Method) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method)
            .collect()
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let index = {
            let mut requests = self.requests.lock();
            requests.push(RecordedRequest {
                method: request.method.clone(),
                url: request.url.clone(),
                content_type: request
                    .headers
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
                body: request.body.clone(),
                at: Instant::now(),
            });
            requests.len() - 1
        };

        if let Some(hook) = self.hook.lock().as_ref() {
            hook(index);
        }

        self.responses.lock().pop_front().unwrap_or_else(|| {
            Ok(HttpResponse {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: String::new(),
            })
        })
    }
}

// ============================================================================
// RECORDER
// ============================================================================

/// Zeichnet alle Callbacks auf
#[derive(Default)]
pub struct Recorder {
    streams: Mutex<Vec<Arc<RemoteStream>>>,
    states: Mutex<Vec<ConnectionState>>,
}

impl Recorder {
    pub fn attach(observers: &Observers) -> Arc<Self> {
        let recorder = Arc::new(Self::default());

        let r = Arc::clone(&recorder);
        observers.set_stream_ready(Arc::new(move |stream| r.streams.lock().push(stream)));
        let r = Arc::clone(&recorder);
        observers.set_connection_state(Arc::new(move |state| r.states.lock().push(state)));

        recorder
    }

    pub fn streams(&self) -> Vec<Arc<RemoteStream>> {
        self.streams.lock().clone()
    }

    pub fn states(&self) -> Vec<ConnectionState> {
        self.states.lock().clone()
    }
}
