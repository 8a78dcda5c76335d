//! Read-along highlighting: which text segment is "active" at a playback time.

use crate::db::{Granularity, TextSegment};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;

/// A span of narrated text with its `[start, end)` window in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedSegment {
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub granularity: Granularity,
}

impl TimedSegment {
    pub fn sentence(text: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            text: text.into(),
            start,
            end,
            granularity: Granularity::Sentence,
        }
    }
}

impl From<TextSegment> for TimedSegment {
    fn from(s: TextSegment) -> Self {
        Self {
            text: s.text,
            start: s.start_time,
            end: s.end_time,
            granularity: s.granularity,
        }
    }
}

/// Sentence-level highlight timeline; word segments are kept as an optional refinement.
#[derive(Debug, Clone)]
pub struct SegmentTimeline {
    sentences: Vec<TimedSegment>,
    words: Vec<TimedSegment>,
    tolerance: f64,
}

impl SegmentTimeline {
    pub fn new(segments: impl IntoIterator<Item = TimedSegment>, tolerance: f64) -> Self {
        let (mut sentences, mut words): (Vec<_>, Vec<_>) = segments
            .into_iter()
            .filter(|s| s.start.is_finite() && s.end.is_finite())
            .partition(|s| s.granularity == Granularity::Sentence);
        sentences.sort_by(|a, b| a.start.total_cmp(&b.start));
        words.sort_by(|a, b| a.start.total_cmp(&b.start));
        Self {
            sentences,
            words,
            tolerance: tolerance.max(0.0),
        }
    }

    pub fn sentences(&self) -> &[TimedSegment] {
        &self.sentences
    }

    pub fn words(&self) -> &[TimedSegment] {
        &self.words
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    /// Index of the active sentence at `t`.
    ///
    /// An exactly containing window wins, then one containing `t` within the
    /// tolerance, then the latest sentence that has already ended. Times
    /// before every sentence resolve to `None`.
    pub fn resolve(&self, t: f64) -> Option<usize> {
        resolve_in(&self.sentences, t, self.tolerance, true)
    }

    pub fn active(&self, t: f64) -> Option<&TimedSegment> {
        self.resolve(t).map(|i| &self.sentences[i])
    }

    /// Word under the playhead; no fallback, gaps between words highlight nothing.
    pub fn resolve_word(&self, t: f64) -> Option<usize> {
        resolve_in(&self.words, t, 0.0, false)
    }
}

fn resolve_in(segments: &[TimedSegment], t: f64, tolerance: f64, fallback: bool) -> Option<usize> {
    if !t.is_finite() {
        return None;
    }
    if let Some(i) = segments.iter().position(|s| s.start <= t && t < s.end) {
        return Some(i);
    }
    if let Some(i) = segments
        .iter()
        .position(|s| s.start - tolerance <= t && t < s.end + tolerance)
    {
        return Some(i);
    }
    if fallback {
        // overlapping windows: sorted by start is not sorted by end
        return segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.end <= t)
            .max_by(|(_, a), (_, b)| a.end.total_cmp(&b.end))
            .map(|(i, _)| i);
    }
    None
}

/// Vertical extent of a rendered element, in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    pub top: f64,
    pub bottom: f64,
}

/// Scroll only when the active segment is not already fully on screen.
pub fn should_scroll(segment: Span, viewport: Span) -> bool {
    !(segment.top >= viewport.top && segment.bottom <= viewport.bottom)
}

/// Debounced active-segment tracker.
///
/// Time updates are coalesced in a `watch` channel; a background task waits
/// `debounce` after a change, resolves only the newest time and publishes the
/// index when it differs from the previous one.
pub struct ReadAlongTracker {
    timeline: Arc<SegmentTimeline>,
    time_tx: watch::Sender<Option<f64>>,
    active_rx: watch::Receiver<Option<usize>>,
    recomputations: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl ReadAlongTracker {
    pub fn spawn(timeline: SegmentTimeline, debounce: Duration) -> Self {
        let timeline = Arc::new(timeline);
        let (time_tx, mut time_rx) = watch::channel(None::<f64>);
        let (active_tx, active_rx) = watch::channel(None::<usize>);
        let recomputations = Arc::new(AtomicUsize::new(0));

        let tl = timeline.clone();
        let counter = recomputations.clone();
        let task = tokio::spawn(async move {
            while time_rx.changed().await.is_ok() {
                tokio::time::sleep(debounce).await;
                let t = *time_rx.borrow_and_update();
                let next = t.and_then(|t| tl.resolve(t));
                counter.fetch_add(1, Ordering::Relaxed);
                active_tx.send_if_modified(|current| {
                    if *current != next {
                        *current = next;
                        true
                    } else {
                        false
                    }
                });
            }
        });

        Self {
            timeline,
            time_tx,
            active_rx,
            recomputations,
            task,
        }
    }

    pub fn update(&self, t: f64) {
        self.time_tx.send_replace(Some(t));
    }

    pub fn active(&self) -> Option<usize> {
        *self.active_rx.borrow()
    }

    pub fn active_segment(&self) -> Option<TimedSegment> {
        self.active().map(|i| self.timeline.sentences()[i].clone())
    }

    pub fn timeline(&self) -> &SegmentTimeline {
        &self.timeline
    }

    /// Stream of active-index changes, starting with the current value.
    pub fn changes(&self) -> WatchStream<Option<usize>> {
        WatchStream::new(self.active_rx.clone())
    }

    pub fn recomputations(&self) -> usize {
        self.recomputations.load(Ordering::Relaxed)
    }
}

impl Drop for ReadAlongTracker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_sentences() -> SegmentTimeline {
        SegmentTimeline::new(
            vec![
                TimedSegment::sentence("Second.", 5.0, 10.0),
                TimedSegment::sentence("First.", 0.0, 5.0),
            ],
            0.1,
        )
    }

    #[test]
    fn resolves_containing_fallback_and_none() {
        let tl = two_sentences();
        assert_eq!(tl.resolve(7.0), Some(1));
        assert_eq!(tl.resolve(12.0), Some(1));
        assert_eq!(tl.resolve(-1.0), None);
        assert_eq!(tl.resolve(0.0), Some(0));
        assert_eq!(tl.resolve(f64::NAN), None);
    }

    #[test]
    fn exact_match_beats_tolerance_on_shared_edge() {
        let tl = two_sentences();
        assert_eq!(tl.resolve(5.0), Some(1));
        assert_eq!(tl.resolve(4.99), Some(0));
    }

    #[test]
    fn fallback_picks_the_segment_that_ended_last() {
        let tl = SegmentTimeline::new(
            vec![
                TimedSegment::sentence("Long aside.", 0.0, 8.0),
                TimedSegment::sentence("Quick one.", 2.0, 3.0),
                TimedSegment::sentence("Later.", 12.0, 14.0),
            ],
            0.0,
        );
        assert_eq!(tl.resolve(10.0), Some(0));
        assert_eq!(tl.resolve(2.5), Some(0));
        assert_eq!(tl.resolve(15.0), Some(2));
    }

    #[test]
    fn tolerance_applies_on_both_edges() {
        let tl = SegmentTimeline::new(
            vec![
                TimedSegment::sentence("A.", 1.0, 2.0),
                TimedSegment::sentence("B.", 4.0, 6.0),
            ],
            0.1,
        );
        assert_eq!(tl.resolve(0.95), Some(0));
        assert_eq!(tl.resolve(0.5), None);
        // inside the gap but within tolerance of B's start
        assert_eq!(tl.resolve(3.95), Some(1));
        // inside the gap, far from both: latest ended
        assert_eq!(tl.resolve(3.0), Some(0));
    }

    #[test]
    fn words_are_kept_apart_from_sentences() {
        let tl = SegmentTimeline::new(
            vec![
                TimedSegment::sentence("Hi there.", 0.0, 2.0),
                TimedSegment {
                    text: "Hi".into(),
                    start: 0.0,
                    end: 0.5,
                    granularity: Granularity::Word,
                },
                TimedSegment {
                    text: "there".into(),
                    start: 0.7,
                    end: 1.2,
                    granularity: Granularity::Word,
                },
            ],
            0.1,
        );
        assert_eq!(tl.sentences().len(), 1);
        assert_eq!(tl.resolve_word(0.8), Some(1));
        assert_eq!(tl.resolve_word(0.6), None);
    }

    #[test]
    fn fully_visible_segment_does_not_scroll() {
        let viewport = Span { top: 0.0, bottom: 800.0 };
        assert!(!should_scroll(Span { top: 100.0, bottom: 140.0 }, viewport));
        assert!(should_scroll(Span { top: 780.0, bottom: 820.0 }, viewport));
        assert!(should_scroll(Span { top: -10.0, bottom: 20.0 }, viewport));
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_of_updates_resolve_once_with_latest_time() {
        let tracker = ReadAlongTracker::spawn(two_sentences(), Duration::from_millis(100));
        for i in 0..50 {
            tracker.update(i as f64 * 0.15);
        }
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(tracker.recomputations(), 1);
        assert_eq!(tracker.active(), Some(1));
        assert_eq!(tracker.active_segment().unwrap().text, "Second.");
    }

    #[tokio::test(start_paused = true)]
    async fn changes_stream_reports_transitions() {
        use tokio_stream::StreamExt;

        let tracker = ReadAlongTracker::spawn(two_sentences(), Duration::from_millis(50));
        let mut changes = tracker.changes();
        assert_eq!(changes.next().await, Some(None));

        tracker.update(1.0);
        assert_eq!(changes.next().await, Some(Some(0)));
        tracker.update(6.0);
        assert_eq!(changes.next().await, Some(Some(1)));
    }
}
