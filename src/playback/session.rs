use super::audio_pool::AudioPool;
use super::batcher::ProgressBatcher;
use super::media::{HttpTrack, MediaElement};
use super::read_along::{ReadAlongTracker, SegmentTimeline, TimedSegment};
use crate::config::PlaybackConfig;
use crate::error::LecternError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

type TimeHandler = Box<dyn FnMut(f64) + Send>;
type EndedHandler = Box<dyn FnMut(&str) + Send>;
type ErrorHandler = Box<dyn FnMut(&LecternError) + Send>;

/// Glue between a player host and the progress, read-along and pool pieces.
///
/// The host forwards its media events (`time_update`, `ended`, `error`) and
/// page lifecycle (`navigate_away`, `unload`); observers registered with the
/// `on_*` methods see the same events. Each observer slot holds one handler;
/// registering again replaces it.
pub struct PlaybackSession<M: MediaElement> {
    pool: AudioPool<M>,
    batcher: ProgressBatcher,
    read_along: Option<ReadAlongTracker>,
    chapter_id: Option<String>,
    last_time: f64,
    debounce: Duration,
    tolerance: f64,
    ready_timeout: Duration,
    on_time_update: Option<TimeHandler>,
    on_ended: Option<EndedHandler>,
    on_error: Option<ErrorHandler>,
}

impl<M: MediaElement> PlaybackSession<M> {
    pub fn new(pool: AudioPool<M>, batcher: ProgressBatcher, cfg: &PlaybackConfig) -> Self {
        Self {
            pool,
            batcher,
            read_along: None,
            chapter_id: None,
            last_time: 0.0,
            debounce: Duration::from_millis(cfg.read_along_debounce_ms),
            tolerance: cfg.segment_tolerance_secs,
            ready_timeout: cfg.ready_timeout(),
            on_time_update: None,
            on_ended: None,
            on_error: None,
        }
    }

    pub fn on_time_update(&mut self, handler: impl FnMut(f64) + Send + 'static) {
        self.on_time_update = Some(Box::new(handler));
    }

    pub fn on_ended(&mut self, handler: impl FnMut(&str) + Send + 'static) {
        self.on_ended = Some(Box::new(handler));
    }

    pub fn on_error(&mut self, handler: impl FnMut(&LecternError) + Send + 'static) {
        self.on_error = Some(Box::new(handler));
    }

    /// Switch to a chapter. Pending progress for the previous one is flushed first.
    pub async fn load_chapter(
        &mut self,
        chapter_id: &str,
        audio_url: &str,
        segments: Vec<TimedSegment>,
    ) -> Result<&mut M, LecternError> {
        if let Some(prev) = self.chapter_id.as_deref()
            && prev != chapter_id
        {
            debug!(from = prev, to = chapter_id, "chapter change; flushing progress");
            if let Err(e) = self.batcher.flush().await {
                warn!(error = %e, "progress flush on chapter change failed");
                self.error(&e);
            }
        }

        self.chapter_id = Some(chapter_id.to_string());
        self.last_time = 0.0;
        let timeline = SegmentTimeline::new(segments, self.tolerance);
        self.read_along = (!timeline.is_empty())
            .then(|| ReadAlongTracker::spawn(timeline, self.debounce));

        match self.pool.acquire(audio_url) {
            Ok(element) => Ok(element),
            Err(e) => {
                if let Some(handler) = self.on_error.as_mut() {
                    handler(&e);
                }
                Err(e)
            }
        }
    }

    /// Start buffering the tracks likely to play next.
    pub fn preload_next<'a>(&mut self, urls: impl IntoIterator<Item = &'a str>) {
        self.pool.preload(urls);
    }

    pub fn time_update(&mut self, t: f64) {
        let Some(chapter_id) = self.chapter_id.as_deref() else {
            return;
        };
        if !t.is_finite() || t < 0.0 {
            return;
        }
        self.last_time = t;
        self.batcher.record(chapter_id, t, false);
        if let Some(tracker) = &self.read_along {
            tracker.update(t);
        }
        if let Some(handler) = self.on_time_update.as_mut() {
            handler(t);
        }
    }

    pub fn ended(&mut self) {
        let Some(chapter_id) = self.chapter_id.clone() else {
            return;
        };
        self.batcher.record(chapter_id.as_str(), self.last_time, true);
        if let Some(handler) = self.on_ended.as_mut() {
            handler(&chapter_id);
        }
    }

    pub fn error(&mut self, err: &LecternError) {
        if let Some(handler) = self.on_error.as_mut() {
            handler(err);
        }
    }

    /// In-app navigation: ship pending progress and wait for the dispatch.
    pub async fn navigate_away(&mut self) -> Result<usize, LecternError> {
        self.batcher.flush().await
    }

    /// Page is going away; hand pending progress to the beacon and return.
    pub fn unload(&mut self) {
        self.batcher.flush_on_unload();
    }

    pub fn chapter_id(&self) -> Option<&str> {
        self.chapter_id.as_deref()
    }

    pub fn active_segment(&self) -> Option<TimedSegment> {
        self.read_along.as_ref().and_then(|t| t.active_segment())
    }

    pub fn read_along(&self) -> Option<&ReadAlongTracker> {
        self.read_along.as_ref()
    }

    pub fn pool(&self) -> &AudioPool<M> {
        &self.pool
    }

    pub fn ready_timeout(&self) -> Duration {
        self.ready_timeout
    }
}

impl PlaybackSession<HttpTrack> {
    /// Session over HTTP-buffered tracks, with the pool sized from `cfg`.
    pub fn from_config(http: reqwest::Client, batcher: ProgressBatcher, cfg: &PlaybackConfig) -> Self {
        let pool = AudioPool::from_config(cfg, move |url| HttpTrack::new(http.clone(), url));
        Self::new(pool, batcher, cfg)
    }

    /// `load_chapter`, then wait up to `ready_timeout` for the track to become playable.
    pub async fn load_chapter_ready(
        &mut self,
        chapter_id: &str,
        audio_url: &str,
        segments: Vec<TimedSegment>,
    ) -> Result<Arc<[u8]>, LecternError> {
        let timeout = self.ready_timeout;
        let result = self
            .load_chapter(chapter_id, audio_url, segments)
            .await?
            .wait_ready(timeout)
            .await;
        if let Err(e) = &result {
            warn!(chapter_id, error = %e, "chapter audio not playable");
            self.error(e);
        }
        result
    }
}
