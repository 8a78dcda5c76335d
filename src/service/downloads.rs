use crate::db::{Chapter, DownloadedContent, LecternStorage};
use crate::error::LecternError;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use url::Url;

/// Fetches chapter audio to local disk and keeps `downloaded_content` in step with it.
#[derive(Clone)]
pub struct DownloadService {
    storage: LecternStorage,
    http: reqwest::Client,
    dir: PathBuf,
    /// One fetch per chapter at a time; later callers reuse the finished file.
    in_flight: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl DownloadService {
    pub fn new(storage: LecternStorage, dir: impl Into<PathBuf>) -> Result<Self, LecternError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("lectern/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::with_client(storage, http, dir))
    }

    pub fn with_client(storage: LecternStorage, http: reqwest::Client, dir: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            http,
            dir: dir.into(),
            in_flight: Arc::default(),
        }
    }

    /// Download a chapter for a user. Already-present files are reused, not refetched.
    pub async fn download(
        &self,
        user_id: &str,
        chapter_id: &str,
    ) -> Result<DownloadedContent, LecternError> {
        let chapter = self.storage.get_chapter(chapter_id).await?;

        if let Some(existing) = self.storage.get_download(user_id, chapter_id).await?
            && file_exists(Path::new(&existing.file_path)).await
        {
            debug!(chapter_id, "download already present");
            return Ok(existing);
        }

        let guard = self.lock_chapter(chapter_id).await;
        let result = self.download_locked(user_id, &chapter).await;
        drop(guard);
        self.forget_lock(chapter_id);
        result
    }

    async fn download_locked(
        &self,
        user_id: &str,
        chapter: &Chapter,
    ) -> Result<DownloadedContent, LecternError> {
        if let Some(shared) = self.local_path(&chapter.id).await? {
            let size = fs::metadata(&shared).await?.len() as i64;
            let path = shared.to_string_lossy().into_owned();
            return self
                .storage
                .record_download(user_id, &chapter.id, &path, size)
                .await;
        }

        let (path, size) = self.fetch_to_disk(chapter).await?;
        let path = path.to_string_lossy().into_owned();
        self.storage
            .record_download(user_id, &chapter.id, &path, size as i64)
            .await
    }

    async fn lock_chapter(&self, chapter_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(chapter_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    fn forget_lock(&self, chapter_id: &str) {
        let mut map = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if map.get(chapter_id).is_some_and(|l| Arc::strong_count(l) == 1) {
            map.remove(chapter_id);
        }
    }

    /// Remove the user's download and progress; the file goes once nobody references it.
    pub async fn delete(&self, user_id: &str, chapter_id: &str) -> Result<bool, LecternError> {
        let Some(removed) = self.storage.delete_download(user_id, chapter_id).await? else {
            return Ok(false);
        };
        if self.storage.count_download_refs(&removed.file_path).await? == 0 {
            match fs::remove_file(&removed.file_path).await {
                Ok(()) => info!(chapter_id, path = %removed.file_path, "download file removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %removed.file_path, error = %e, "failed to remove download file"),
            }
        }
        Ok(true)
    }

    /// A local copy of the chapter's audio that still exists on disk.
    pub async fn local_path(&self, chapter_id: &str) -> Result<Option<PathBuf>, LecternError> {
        match self.storage.any_download_path(chapter_id).await? {
            Some(p) if file_exists(Path::new(&p)).await => Ok(Some(PathBuf::from(p))),
            _ => Ok(None),
        }
    }

    async fn fetch_to_disk(&self, chapter: &Chapter) -> Result<(PathBuf, u64), LecternError> {
        let audio_url = chapter
            .audio_url
            .as_deref()
            .ok_or_else(|| LecternError::BadRequest(format!("chapter {} has no audio", chapter.id)))?;
        let url = Url::parse(audio_url)?;

        fs::create_dir_all(&self.dir).await?;
        let final_path = self
            .dir
            .join(format!("{}.{}", chapter.id, audio_extension(&url)));
        let tmp_path = self.dir.join(format!(
            "{}.{}.part",
            chapter.id,
            uuid::Uuid::new_v4().simple()
        ));

        match self.stream_into(&url, &tmp_path).await {
            Ok(size) => {
                fs::rename(&tmp_path, &final_path).await?;
                info!(chapter_id = %chapter.id, size, path = %final_path.display(), "audio downloaded");
                Ok((final_path, size))
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                warn!(chapter_id = %chapter.id, error = %e, "audio download failed");
                Err(e)
            }
        }
    }

    async fn stream_into(&self, url: &Url, path: &Path) -> Result<u64, LecternError> {
        let resp = self.http.get(url.clone()).send().await?;
        if !resp.status().is_success() {
            return Err(LecternError::UpstreamStatus(resp.status()));
        }

        let mut file = fs::File::create(path).await?;
        let mut written = 0u64;
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

async fn file_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

/// File extension from the URL path, `mp3` when absent or implausible.
fn audio_extension(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segs| segs.next_back())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "mp3".to_string())
}

/// MIME type for a stored audio file, keyed on its extension.
pub fn audio_content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("m4a") | Some("mp4") | Some("aac") => "audio/mp4",
        Some("ogg") | Some("oga") => "audio/ogg",
        Some("wav") => "audio/wav",
        Some("webm") => "audio/webm",
        _ => "audio/mpeg",
    }
}
