//! Wire types shared by the REST handlers and the playback client.

use serde::{Deserialize, Serialize};

/// One playback-position report for a chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub chapter_id: String,
    pub current_time: f64,
    #[serde(default)]
    pub is_completed: bool,
}

impl ProgressUpdate {
    pub fn new(chapter_id: impl Into<String>, current_time: f64, is_completed: bool) -> Self {
        Self {
            chapter_id: chapter_id.into(),
            current_time,
            is_completed,
        }
    }

    /// Positions must be finite and non-negative seconds.
    pub fn is_valid(&self) -> bool {
        !self.chapter_id.is_empty() && self.current_time.is_finite() && self.current_time >= 0.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressBatch {
    pub updates: Vec<ProgressUpdate>,
}
