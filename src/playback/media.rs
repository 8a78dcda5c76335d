//! Platform media elements.
//!
//! The session never talks to an audio device directly; a host supplies a
//! `MediaElement` and Lectern manages its lifetime. `HttpTrack` is the
//! bundled element, buffering the whole file over HTTP.

use crate::error::LecternError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

pub trait MediaElement: Send + 'static {
    fn url(&self) -> &Url;

    /// Start buffering without starting playback. Must not block.
    fn preload(&mut self);

    /// Detach the source and drop anything buffered.
    fn release(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackState {
    Idle,
    Loading,
    Ready { bytes: usize },
    Failed(String),
    Released,
}

/// Whole-file HTTP buffer with a "can play" signal.
pub struct HttpTrack {
    url: Url,
    http: reqwest::Client,
    state_tx: Arc<watch::Sender<TrackState>>,
    buffer: Arc<std::sync::Mutex<Option<Arc<[u8]>>>>,
    task: Option<JoinHandle<()>>,
}

impl HttpTrack {
    pub fn new(http: reqwest::Client, url: Url) -> Self {
        let (state_tx, _) = watch::channel(TrackState::Idle);
        Self {
            url,
            http,
            state_tx: Arc::new(state_tx),
            buffer: Arc::new(std::sync::Mutex::new(None)),
            task: None,
        }
    }

    pub fn state(&self) -> TrackState {
        self.state_tx.borrow().clone()
    }

    pub fn bytes(&self) -> Option<Arc<[u8]>> {
        self.buffer.lock().ok().and_then(|b| b.clone())
    }

    /// Wait for the buffer to fill, giving up after `timeout`.
    pub async fn wait_ready(&mut self, timeout: Duration) -> Result<Arc<[u8]>, LecternError> {
        self.preload();
        let mut rx = self.state_tx.subscribe();
        let wait = rx.wait_for(|s| {
            matches!(
                s,
                TrackState::Ready { .. } | TrackState::Failed(_) | TrackState::Released
            )
        });
        let state = match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(state)) => state.clone(),
            Ok(Err(_)) => TrackState::Released,
            Err(_) => {
                warn!(url = %self.url, "audio not ready before timeout");
                return Err(LecternError::Timeout(format!("audio {}", self.url)));
            }
        };
        match state {
            TrackState::Ready { .. } => self
                .bytes()
                .ok_or_else(|| LecternError::NotFound(format!("audio buffer {}", self.url))),
            TrackState::Failed(msg) => Err(LecternError::BadRequest(msg)),
            _ => Err(LecternError::NotFound(format!("audio {}", self.url))),
        }
    }
}

impl MediaElement for HttpTrack {
    fn url(&self) -> &Url {
        &self.url
    }

    fn preload(&mut self) {
        if self.task.is_some() || *self.state_tx.borrow() == TrackState::Released {
            return;
        }
        self.state_tx.send_replace(TrackState::Loading);

        let http = self.http.clone();
        let url = self.url.clone();
        let state_tx = self.state_tx.clone();
        let buffer = self.buffer.clone();
        self.task = Some(tokio::spawn(async move {
            let result = async {
                let resp = http.get(url.clone()).send().await?;
                if !resp.status().is_success() {
                    return Err(LecternError::UpstreamStatus(resp.status()));
                }
                Ok::<_, LecternError>(resp.bytes().await?)
            }
            .await;

            match result {
                Ok(body) => {
                    let len = body.len();
                    if let Ok(mut slot) = buffer.lock() {
                        *slot = Some(Arc::from(body.as_ref()));
                    }
                    debug!(url = %url, bytes = len, "audio buffered");
                    state_tx.send_replace(TrackState::Ready { bytes: len });
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "audio buffering failed");
                    state_tx.send_replace(TrackState::Failed(e.to_string()));
                }
            }
        }));
    }

    fn release(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Ok(mut slot) = self.buffer.lock() {
            *slot = None;
        }
        self.state_tx.send_replace(TrackState::Released);
    }
}

impl Drop for HttpTrack {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
