//! Resource Lifecycle Tracker
//!
//! Merkt sich die vom Server vergebene Session-Resource (Location Header)
//! und gibt sie beim Schließen per DELETE frei. Die Freigabe ist
//! best-effort: Fehler werden geloggt, nie weitergereicht.

use super::transport::{HttpRequest, HttpTransport};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use url::Url;

pub struct ResourceTracker {
    endpoint: Url,
    location: Mutex<Option<String>>,
    transport: Arc<dyn HttpTransport>,
}

impl ResourceTracker {
    pub fn new(endpoint: Url, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            endpoint,
            location: Mutex::new(None),
            transport,
        }
    }

    /// Speichert den Location Header unverändert
    pub fn record(&self, location: String) {
        tracing::debug!("Recorded WHEP resource: {}", location);
        *self.location.lock() = Some(location);
    }

    pub fn location(&self) -> Option<String> {
        self.location.lock().clone()
    }

    /// Origin-relative Pfade (`/...`) gegen den Origin des Endpoints auflösen,
    /// alles andere unverändert zurückgeben
    pub fn resolve(&self, location: &str) -> String {
        if !location.starts_with('/') {
            return location.to_string();
        }
        match self.endpoint.join(location) {
            Ok(url) => url.to_string(),
            Err(e) => {
                tracing::warn!("Cannot resolve resource location '{}': {}", location, e);
                location.to_string()
            }
        }
    }

    /// Gibt die Resource frei (DELETE als losgelöster Task).
    ///
    /// Die Location wird in jedem Fall gelöscht, auch ohne laufende tokio
    /// Runtime (dann entfällt das DELETE). Der zurückgegebene Handle muss
    /// nicht abgewartet werden.
    pub fn release(&self) -> Option<JoinHandle<()>> {
        let location = self.location.lock().take()?;
        self.discard(&location)
    }

    /// DELETE für eine Resource, die nie aufgezeichnet wurde
    pub fn discard(&self, location: &str) -> Option<JoinHandle<()>> {
        let target = self.resolve(location);
        let url = match Url::parse(&target) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("WHEP DELETE skipped, invalid resource URL '{}': {}", target, e);
                return None;
            }
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No tokio runtime available, WHEP DELETE {} skipped", url);
            return None;
        };

        tracing::info!("Releasing WHEP resource {}", url);
        let transport = Arc::clone(&self.transport);
        Some(runtime.spawn(async move {
            match transport.send(HttpRequest::delete(url.clone())).await {
                Ok(response) if response.status.is_success() => {
                    tracing::debug!("WHEP resource {} released ({})", url, response.status);
                }
                Ok(response) => {
                    tracing::warn!("WHEP DELETE {} failed with status {}", url, response.status);
                }
                Err(e) => tracing::warn!("WHEP DELETE failed: {}", e),
            }
        }))
    }
}

impl std::fmt::Debug for ResourceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceTracker")
            .field("endpoint", &self.endpoint.as_str())
            .field("location", &*self.location.lock())
            .finish()
    }
}
