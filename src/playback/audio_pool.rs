use super::media::MediaElement;
use crate::config::PlaybackConfig;
use crate::error::LecternError;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};
use url::Url;

/// Bounded FIFO cache of media elements keyed by normalized URL.
///
/// Eviction is by insertion order, not recency, and always releases the
/// evicted element. The element last handed out by `acquire` is never
/// evicted while another candidate exists.
pub struct AudioPool<M: MediaElement> {
    capacity: usize,
    entries: HashMap<String, M>,
    order: VecDeque<String>,
    current: Option<String>,
    factory: Box<dyn FnMut(Url) -> M + Send>,
}

impl<M: MediaElement> AudioPool<M> {
    pub fn new(capacity: usize, factory: impl FnMut(Url) -> M + Send + 'static) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            current: None,
            factory: Box::new(factory),
        }
    }

    /// Pool sized by `playback.pool_capacity`.
    pub fn from_config(cfg: &PlaybackConfig, factory: impl FnMut(Url) -> M + Send + 'static) -> Self {
        Self::new(cfg.pool_capacity, factory)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, raw_url: &str) -> bool {
        normalize_url(raw_url)
            .map(|k| self.entries.contains_key(&k))
            .unwrap_or(false)
    }

    /// Element for `raw_url`, created on a miss. Becomes the current element.
    pub fn acquire(&mut self, raw_url: &str) -> Result<&mut M, LecternError> {
        let key = normalize_url(raw_url)?;
        if !self.entries.contains_key(&key) {
            let url = Url::parse(&key)?;
            let element = (self.factory)(url);
            self.insert(key.clone(), element);
        }
        self.current = Some(key.clone());
        self.entries
            .get_mut(&key)
            .ok_or_else(|| LecternError::NotFound(format!("pooled audio {key}")))
    }

    /// Create and start buffering elements for upcoming tracks.
    ///
    /// Best effort: bad URLs are skipped, and nothing happens when the only
    /// evictable slot belongs to the current element.
    pub fn preload<'a>(&mut self, raw_urls: impl IntoIterator<Item = &'a str>) {
        for raw in raw_urls {
            let key = match normalize_url(raw) {
                Ok(k) => k,
                Err(e) => {
                    warn!(url = raw, error = %e, "skipping preload of invalid url");
                    continue;
                }
            };
            if self.entries.contains_key(&key) {
                continue;
            }
            if self.entries.len() >= self.capacity && self.eviction_candidate().is_none() {
                debug!(url = %key, "pool full of pinned entries; preload skipped");
                continue;
            }
            let Ok(url) = Url::parse(&key) else { continue };
            let mut element = (self.factory)(url);
            element.preload();
            self.insert(key, element);
        }
    }

    /// Release and drop one entry.
    pub fn evict(&mut self, raw_url: &str) -> bool {
        let Ok(key) = normalize_url(raw_url) else {
            return false;
        };
        self.remove_key(&key)
    }

    pub fn clear(&mut self) {
        for (_, mut element) in self.entries.drain() {
            element.release();
        }
        self.order.clear();
        self.current = None;
    }

    fn insert(&mut self, key: String, element: M) {
        while self.entries.len() >= self.capacity {
            let Some(victim) = self.eviction_candidate() else { break };
            debug!(url = %victim, "evicting pooled audio");
            self.remove_key(&victim);
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, element);
    }

    fn eviction_candidate(&self) -> Option<String> {
        self.order
            .iter()
            .find(|k| self.current.as_ref() != Some(*k))
            .cloned()
    }

    fn remove_key(&mut self, key: &str) -> bool {
        let Some(mut element) = self.entries.remove(key) else {
            return false;
        };
        element.release();
        self.order.retain(|k| k != key);
        if self.current.as_deref() == Some(key) {
            self.current = None;
        }
        true
    }
}

impl<M: MediaElement> Drop for AudioPool<M> {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Pool key: scheme and host lowercased (by the parser), fragment stripped.
pub fn normalize_url(raw: &str) -> Result<String, LecternError> {
    let mut url = Url::parse(raw.trim())?;
    url.set_fragment(None);
    Ok(url.to_string())
}
