use crate::content_api::ContentApiClient;
use crate::db::{LecternStorage, SyncLog, SyncStatus};
use crate::error::LecternError;
use serde::Serialize;
use tracing::{error, info};

/// Counts of rows written by one sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub courses: usize,
    pub assignments: usize,
    pub chapters: usize,
    pub segments: usize,
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "synced {} courses, {} assignments, {} chapters, {} segments",
            self.courses, self.assignments, self.chapters, self.segments
        )
    }
}

/// Full-snapshot pull from the content API, upserted by external id.
///
/// Runs are serialized through the sync log: a new run is refused while the
/// latest one is still `in_progress`. Failed runs are recorded and never retried.
#[derive(Clone)]
pub struct ContentSync {
    storage: LecternStorage,
    api: ContentApiClient,
}

impl ContentSync {
    pub fn new(storage: LecternStorage, api: ContentApiClient) -> Self {
        Self { storage, api }
    }

    /// Open a sync log row and run the pull in the background.
    pub async fn trigger(&self) -> Result<SyncLog, LecternError> {
        let log = self.storage.begin_sync().await?;
        info!(sync_id = %log.id, "content sync started");

        let this = self.clone();
        let sync_id = log.id.clone();
        tokio::spawn(async move {
            let _ = this.finish(&sync_id).await;
        });
        Ok(log)
    }

    /// Open a sync log row and run the pull to completion on the caller's task.
    pub async fn run_now(&self) -> Result<SyncReport, LecternError> {
        let log = self.storage.begin_sync().await?;
        info!(sync_id = %log.id, "content sync started");
        self.finish(&log.id).await
    }

    pub async fn status(&self) -> Result<Option<SyncLog>, LecternError> {
        self.storage.latest_sync().await
    }

    async fn finish(&self, sync_id: &str) -> Result<SyncReport, LecternError> {
        match self.pull_and_upsert().await {
            Ok(report) => {
                info!(sync_id, %report, "content sync finished");
                self.storage
                    .finish_sync(sync_id, SyncStatus::Success, report.to_string())
                    .await?;
                Ok(report)
            }
            Err(e) => {
                error!(sync_id, error = %e, "content sync failed");
                if let Err(db_err) = self
                    .storage
                    .finish_sync(sync_id, SyncStatus::Error, e.to_string())
                    .await
                {
                    error!(sync_id, error = %db_err, "failed to record sync failure");
                }
                Err(e)
            }
        }
    }

    /// Sequential course → assignment → chapter walk; no fan-out.
    async fn pull_and_upsert(&self) -> Result<SyncReport, LecternError> {
        let mut report = SyncReport::default();

        let courses = self.api.list_courses().await?;
        for (ci, course) in courses.iter().enumerate() {
            let course_id = self.storage.upsert_course(&course.to_upsert(ci)).await?;
            report.courses += 1;

            let assignments = self.api.list_assignments(&course.id).await?;
            for (ai, assignment) in assignments.iter().enumerate() {
                let assignment_id = self
                    .storage
                    .upsert_assignment(&assignment.to_upsert(&course_id, ai))
                    .await?;
                report.assignments += 1;

                let objects = self.api.list_learning_objects(&assignment.id).await?;
                for (oi, object) in objects.iter().enumerate() {
                    let chapter_id = self
                        .storage
                        .upsert_chapter(&object.to_upsert(&assignment_id, oi))
                        .await?;
                    report.chapters += 1;

                    report.segments += self
                        .storage
                        .replace_segments(&chapter_id, &object.new_segments())
                        .await?;
                }
            }
        }
        Ok(report)
    }
}
