//!
//! Position feed poller
//! --------------------
//! Client-side loop that asks the portal for the latest known vehicle
//! position on a fixed cadence and forwards each sample to a display sink
//! (map marker update or equivalent). A failed fetch is logged and the next
//! tick still fires on schedule: no backoff, no failure threshold, no retry
//! cap. The loop runs until its owner cancels it; nothing else stops it.
//!
//! Ticks are wall-clock triggered, not completion triggered. Every tick
//! issues its fetch on its own task, so a slow request never delays the next
//! tick; overlapping in-flight requests are tolerated and the sink keeps the
//! last write.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::store::PositionSample;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("position request failed: {0}")]
    Transport(String),
    #[error("position endpoint returned HTTP {0}")]
    Status(u16),
    #[error("position payload malformed: {0}")]
    Decode(String),
    #[error("position request timed out")]
    Timeout,
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if e.is_decode() {
            FetchError::Decode(e.to_string())
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

/// Source of position samples. The HTTP implementation talks to the portal;
/// tests substitute scripted feeds.
#[async_trait]
pub trait PositionFeed: Send + Sync {
    async fn latest(&self) -> Result<PositionSample, FetchError>;
}

/// Receiver of fresh samples, e.g. a map marker plus camera pan.
pub trait PositionSink: Send + Sync {
    fn update(&self, sample: PositionSample);
}

#[derive(Debug, Deserialize)]
struct PositionWire {
    lat: f64,
    lng: f64,
}

/// Feed over the portal's `GET /api/getLatestPosition` endpoint.
pub struct HttpFeed {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpFeed {
    pub fn new(base: &str, request_timeout: Duration) -> anyhow::Result<Self> {
        let endpoint = Url::parse(base)?.join("/api/getLatestPosition")?;
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl PositionFeed for HttpFeed {
    async fn latest(&self) -> Result<PositionSample, FetchError> {
        let resp = self.client.get(self.endpoint.clone()).send().await?;
        if !resp.status().is_success() {
            return Err(FetchError::Status(resp.status().as_u16()));
        }
        let wire: PositionWire = resp.json().await?;
        Ok(PositionSample { lat: wire.lat, lng: wire.lng })
    }
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self { Self { interval: Duration::from_millis(1_000) } }
}

/// Owner's handle to a running poller. Dropping it also stops the loop.
pub struct PollerHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Request cancellation; no new tick starts after this returns.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Cancel and wait for the loop to wind down.
    pub async fn shutdown(self) {
        let _ = self.cancel.send(true);
        let _ = self.task.await;
    }

    pub fn is_alive(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Start the polling loop. The first fetch happens one full interval after
/// spawn, matching the cadence of the source's timer loop.
pub fn spawn_poller(
    feed: Arc<dyn PositionFeed>,
    sink: Arc<dyn PositionSink>,
    cfg: PollerConfig,
) -> PollerHandle {
    let (cancel, mut cancelled) = watch::channel(false);
    let start = tokio::time::Instant::now() + cfg.interval;
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(start, cfg.interval);
        loop {
            tokio::select! {
                _ = cancelled.changed() => break,
                _ = ticker.tick() => {
                    let feed = feed.clone();
                    let sink = sink.clone();
                    tokio::spawn(async move {
                        match feed.latest().await {
                            Ok(sample) => sink.update(sample),
                            Err(e) => warn!(target: "poller", "position fetch failed: {e}"),
                        }
                    });
                }
            }
        }
    });
    PollerHandle { cancel, task }
}
