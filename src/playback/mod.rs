//! Headless client-side playback support for a player host.

pub mod audio_pool;
pub mod batcher;
pub mod cache;
pub mod client;
pub mod media;
pub mod offline;
pub mod read_along;
pub mod session;

pub use audio_pool::AudioPool;
pub use batcher::{BatchPolicy, DeliveryFailure, ProgressBatcher, ProgressSink};
pub use cache::{CacheStrategy, CachedFetcher, strategy_for};
pub use client::LecternClient;
pub use media::{HttpTrack, MediaElement, TrackState};
pub use offline::{ObjectUrl, OfflineStore};
pub use read_along::{ReadAlongTracker, SegmentTimeline, TimedSegment};
pub use session::PlaybackSession;
