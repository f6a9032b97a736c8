pub mod log;
pub mod oauth;
pub mod profiles;
pub mod youtube;

pub use log::UploadLog;
pub use oauth::GoogleBroker;
pub use profiles::{CredentialBroker, ProfileManager, ProfileSession, StoredToken};
pub use youtube::YouTubeUploader;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::PublishSettings;
use crate::constants::{DEFAULT_TITLE_MAX_LEN, HASHTAGS_PER_DESCRIPTION, SHORTS_URL_PREFIX};
use crate::core::PublishRecord;
use crate::error::PublishError;
use crate::ingest::namer::bound_title;
use crate::telemetry::{Counter, RunMonitor};

const SHORTS_HASHTAG: &str = "#shorts";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category_id: String,
    pub privacy: String,
    pub made_for_kids: bool,
}

impl VideoMetadata {
    /// `snippet` and `status` parts of a `videos.insert` request.
    pub fn to_resource(&self) -> Value {
        json!({
            "snippet": {
                "title": self.title,
                "description": self.description,
                "tags": self.tags,
                "categoryId": self.category_id,
            },
            "status": {
                "privacyStatus": self.privacy,
                "selfDeclaredMadeForKids": self.made_for_kids,
            }
        })
    }
}

/// Sends one local video to the hosting platform and returns its remote id.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, path: &Path, metadata: &VideoMetadata) -> Result<String, PublishError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Wait after failed attempt `attempt` (1-based). Grows linearly.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub published: Vec<(PathBuf, String)>,
    pub failed: Vec<PathBuf>,
}

pub struct Publisher<U: Uploader> {
    uploader: U,
    log: UploadLog,
    settings: PublishSettings,
    monitor: RunMonitor,
}

impl<U: Uploader> Publisher<U> {
    pub fn new(uploader: U, settings: PublishSettings, monitor: RunMonitor) -> Self {
        Self {
            log: UploadLog::new(&settings.log_file),
            uploader,
            settings,
            monitor,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.settings.max_attempts.max(1),
            base_delay: self.settings.retry_base_delay,
        }
    }

    pub fn metadata_for(&self, title: &str) -> VideoMetadata {
        let title = bound_title(title, DEFAULT_TITLE_MAX_LEN);
        VideoMetadata {
            description: describe(&title, &self.settings.hashtags, &mut rand::thread_rng()),
            title,
            tags: self.settings.tags.clone(),
            category_id: self.settings.category_id.clone(),
            privacy: self.settings.privacy.clone(),
            made_for_kids: false,
        }
    }

    /// Uploads one file. The upload log gains a record only when the platform
    /// returned an id.
    pub async fn publish(&self, path: &Path, title: &str) -> Result<String, PublishError> {
        if !path.is_file() {
            return Err(PublishError::MissingFile(path.to_path_buf()));
        }
        let title = match title.trim() {
            "" => path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default(),
            trimmed => trimmed.to_string(),
        };
        let metadata = self.metadata_for(&title);
        info!(title = %metadata.title, path = %path.display(), "starting upload");
        let video_id = self.uploader.upload(path, &metadata).await?;

        let record = PublishRecord {
            timestamp: OffsetDateTime::now_utc(),
            video_path: path.to_string_lossy().to_string(),
            video_id: video_id.clone(),
            title: metadata.title,
            url: format!("{SHORTS_URL_PREFIX}{video_id}"),
        };
        // The video is already live; losing the log line must not trigger a re-upload.
        if let Err(err) = self.log.append(&record) {
            warn!(log = %self.log.path().display(), error = %err, "could not record upload");
        }
        info!(video_id = %video_id, url = %record.url, "upload complete");
        Ok(video_id)
    }

    /// Publishes every `.mp4` directly inside `dir` in name order, titled
    /// from the file stems.
    pub async fn publish_directory(&self, dir: &Path, pacing: Duration) -> Result<BatchReport> {
        if !dir.is_dir() {
            bail!("directory not found: {}", dir.display());
        }
        let videos = list_videos(dir)?;
        if videos.is_empty() {
            warn!(dir = %dir.display(), "no .mp4 files to publish");
        }
        Ok(self.publish_batch(videos, pacing).await)
    }

    /// Uploads `videos` in order. Each item gets up to `max_attempts` tries
    /// with a linearly growing wait; exhausted items are reported as failed
    /// and the batch moves on. `pacing` is waited after every successful
    /// upload except the last item.
    pub async fn publish_batch(&self, videos: Vec<PathBuf>, pacing: Duration) -> BatchReport {
        let mut report = BatchReport::default();
        if videos.is_empty() {
            return report;
        }
        info!(count = videos.len(), "publishing videos");

        let policy = self.retry_policy();
        let total = videos.len();
        for (position, path) in videos.into_iter().enumerate() {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let title = title_from_file_stem(&stem);
            info!(item = position + 1, total, %title, "processing video");

            let mut outcome = None;
            for attempt in 1..=policy.max_attempts {
                match self.publish(&path, &title).await {
                    Ok(id) => {
                        info!(attempt, "upload succeeded");
                        outcome = Some(id);
                        break;
                    }
                    Err(err) if attempt < policy.max_attempts => {
                        let wait = policy.delay_after(attempt);
                        warn!(attempt, error = %err, wait = ?wait, "upload attempt failed");
                        tokio::time::sleep(wait).await;
                    }
                    Err(err) => {
                        warn!(attempt, error = %err, %title, "all upload attempts failed");
                    }
                }
            }

            match outcome {
                Some(id) => {
                    self.monitor.bump(Counter::Published);
                    report.published.push((path, id));
                    if position + 1 < total && !pacing.is_zero() {
                        info!(wait = ?pacing, "pacing before next upload");
                        tokio::time::sleep(pacing).await;
                    }
                }
                None => {
                    self.monitor.bump(Counter::PublishFailed);
                    report.failed.push(path);
                }
            }
        }

        info!(
            published = report.published.len(),
            failed = report.failed.len(),
            "batch finished"
        );
        report
    }
}

fn list_videos(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut videos = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("reading {}", dir.display()))?;
        let is_mp4 = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("mp4"));
        if is_mp4 && entry.file_type().is_file() {
            videos.push(entry.into_path());
        }
    }
    videos.sort();
    Ok(videos)
}

/// Title for a file named by the ingest step: drops the `NNN_` index and
/// `video_`/`temp_` prefixes.
pub fn title_from_file_stem(stem: &str) -> String {
    static INDEX: OnceLock<Regex> = OnceLock::new();
    let index = INDEX.get_or_init(|| Regex::new(r"^\d{3,}_").expect("valid regex"));
    let without_index = index.replace(stem, "");

    let title = ["video_", "temp_"]
        .iter()
        .find_map(|prefix| without_index.strip_prefix(prefix))
        .map(|rest| rest.replace('_', " "))
        .unwrap_or_else(|| without_index.to_string());
    let title = title.trim();
    if title.is_empty() {
        stem.to_string()
    } else {
        title.to_string()
    }
}

/// Description body: the title, a short blurb, and five hashtags drawn from
/// `pool` followed by `#shorts`.
pub fn describe<R: Rng + ?Sized>(title: &str, pool: &[String], rng: &mut R) -> String {
    let candidates: Vec<&String> = pool
        .iter()
        .filter(|tag| !tag.eq_ignore_ascii_case(SHORTS_HASHTAG))
        .collect();
    let mut tags: Vec<&str> = candidates
        .choose_multiple(rng, HASHTAGS_PER_DESCRIPTION)
        .map(|tag| tag.as_str())
        .collect();
    tags.push(SHORTS_HASHTAG);

    format!(
        "✨ {title}\n\n\
         🎯 Sharing tech tips and new finds!\n\
         💡 Discover products that can make everyday life easier\n\
         🌟 Knowledge is meant to be shared\n\n\
         {}\n\n\
         👋 Leave a comment and share your experience!",
        tags.join(" ")
    )
}
