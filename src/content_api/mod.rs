//! Client for the third-party course-content API consumed by the sync service.

pub mod client;
pub mod types;

pub use client::ContentApiClient;
pub use types::{ApiAssignment, ApiCourse, ApiLearningObject, ApiSegment};
