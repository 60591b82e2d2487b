//! whep-play - Headless WHEP Player
//!
//! ```text
//! whep-play <endpoint>
//! WHEP_ENDPOINT=https://example.com/whep WHEP_CONFIG=config.json whep-play
//! ```

use anyhow::Context;
use std::time::Duration;
use tokio::sync::mpsc;
use whep_client::{NegotiationOutcome, WhepClient, WhepConfig};

/// So lange darf das DELETE beim Beenden noch laufen
const DELETE_GRACE_PERIOD: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("whep_client=debug,webrtc=warn")
            }),
        )
        .init();

    let endpoint = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("WHEP_ENDPOINT").ok())
        .context("usage: whep-play <endpoint> (or set WHEP_ENDPOINT)")?;

    let config = match std::env::var("WHEP_CONFIG") {
        Ok(path) => WhepConfig::from_json_file(&path)
            .with_context(|| format!("failed to load config from {}", path))?,
        Err(_) => WhepConfig::default(),
    };

    let client = WhepClient::new(&endpoint, config)
        .await
        .context("failed to create WHEP client")?;

    let (state_tx, mut state_rx) = mpsc::unbounded_channel();
    client.on_connection_state_change(move |state| {
        tracing::info!("Connection state: {}", state);
        let _ = state_tx.send(state);
    });
    client.on_stream_ready(|stream| {
        let kinds: Vec<String> = stream
            .tracks()
            .iter()
            .map(|track| format!("{} ({})", track.kind, track.id))
            .collect();
        tracing::info!("Stream {} ready: {}", stream.id(), kinds.join(", "));
    });

    match client.connect().await {
        Ok(NegotiationOutcome::Negotiated { resource_location }) => {
            tracing::info!("Playing, resource {}", resource_location);
        }
        Ok(NegotiationOutcome::Cancelled) => {
            tracing::warn!("Negotiation cancelled");
        }
        Err(e) => {
            shutdown(&client).await;
            return Err(e).context("WHEP negotiation failed");
        }
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
            state = state_rx.recv() => match state {
                Some(state) if state.is_terminal() => break,
                Some(_) => {}
                None => break,
            },
        }
    }

    shutdown(&client).await;
    Ok(())
}

async fn shutdown(client: &WhepClient) {
    if let Some(delete) = client.close() {
        if tokio::time::timeout(DELETE_GRACE_PERIOD, delete).await.is_err() {
            tracing::warn!("WHEP DELETE still pending after {:?}", DELETE_GRACE_PERIOD);
        }
    }
}
