use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

use crate::error::PublishError;
use crate::publish::profiles::{FixedToken, TokenSource};
use crate::publish::{Uploader, VideoMetadata};

const UPLOAD_BASE: &str = "https://www.googleapis.com/upload/youtube/v3";
const API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(600);
const VIDEO_MIME: &str = "video/mp4";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub title: String,
    pub id: String,
    pub videos: u64,
}

/// YouTube Data API client acting for one authorized profile. Every upload
/// asks `tokens` for a current bearer token, so a long batch survives token
/// expiry.
pub struct YouTubeUploader {
    http: Client,
    tokens: Arc<dyn TokenSource>,
    chunk_size: usize,
    upload_base: String,
    api_base: String,
}

impl YouTubeUploader {
    pub fn new(tokens: Arc<dyn TokenSource>, chunk_size: usize) -> Result<Self, PublishError> {
        // 308 means "resume incomplete" here, not a redirect.
        let http = Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .redirect(Policy::none())
            .build()?;
        Ok(Self {
            http,
            tokens,
            chunk_size: chunk_size.max(1),
            upload_base: UPLOAD_BASE.to_string(),
            api_base: API_BASE.to_string(),
        })
    }

    /// Client bound to a single token that is never renewed.
    pub fn fixed(access_token: String, chunk_size: usize) -> Result<Self, PublishError> {
        Self::new(Arc::new(FixedToken(access_token)), chunk_size)
    }

    pub fn with_endpoints(mut self, upload_base: &str, api_base: &str) -> Self {
        self.upload_base = upload_base.trim_end_matches('/').to_string();
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// Owning channel of the token. `None` when the account has no channel.
    pub async fn channel_info(&self) -> Result<Option<ChannelInfo>, PublishError> {
        let token = self.tokens.access_token().await?;
        let resp = self
            .http
            .get(format!("{}/channels", self.api_base))
            .bearer_auth(&token)
            .query(&[("part", "snippet,statistics"), ("mine", "true")])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PublishError::Status { status, body });
        }
        let payload: Value = resp.json().await?;
        Ok(parse_channel(&payload))
    }

    async fn start_session(
        &self,
        token: &str,
        metadata: &VideoMetadata,
        content_type: &str,
        size: u64,
    ) -> Result<String, PublishError> {
        let mut headers = HeaderMap::new();
        let content_type = HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(VIDEO_MIME));
        headers.insert("X-Upload-Content-Type", content_type);
        headers.insert("X-Upload-Content-Length", HeaderValue::from(size));

        let resp = self
            .http
            .post(format!("{}/videos", self.upload_base))
            .bearer_auth(token)
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .headers(headers)
            .json(&metadata.to_resource())
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PublishError::Status { status, body });
        }
        resp.headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or(PublishError::MissingSession)
    }

    /// One resumable upload of `size` bytes from `path`, start to finish.
    async fn send_file(
        &self,
        token: &str,
        path: &Path,
        metadata: &VideoMetadata,
        size: u64,
    ) -> Result<String, PublishError> {
        let content_type = video_mime(path);
        let session = self.start_session(token, metadata, &content_type, size).await?;
        debug!(session = %session, "upload session opened");

        let mut file = tokio::fs::File::open(path).await?;
        let mut offset = 0u64;
        let mut buffer = vec![0u8; self.chunk_size];
        loop {
            let length = (size - offset).min(self.chunk_size as u64) as usize;
            file.seek(SeekFrom::Start(offset)).await?;
            file.read_exact(&mut buffer[..length]).await?;
            let end = offset + length as u64 - 1;

            let resp = self
                .http
                .put(&session)
                .bearer_auth(token)
                .header(CONTENT_TYPE, content_type.as_str())
                .header(CONTENT_LENGTH, length)
                .header(CONTENT_RANGE, format!("bytes {offset}-{end}/{size}"))
                .body(buffer[..length].to_vec())
                .send()
                .await?;

            match resp.status() {
                StatusCode::OK | StatusCode::CREATED => {
                    let payload: Value = resp.json().await?;
                    let id = payload
                        .get("id")
                        .and_then(|v| v.as_str())
                        .filter(|id| !id.is_empty())
                        .ok_or(PublishError::MissingId)?;
                    info!(progress = "100%", "upload progress");
                    return Ok(id.to_string());
                }
                StatusCode::PERMANENT_REDIRECT => {
                    offset = resp
                        .headers()
                        .get(RANGE)
                        .and_then(|v| v.to_str().ok())
                        .and_then(committed_through)
                        .map(|last| last + 1)
                        .unwrap_or(0);
                    let percent = offset * 100 / size;
                    info!(progress = %format!("{percent}%"), "upload progress");
                    if offset >= size {
                        // Everything is stored but the server still wants a final response.
                        return Err(PublishError::MissingId);
                    }
                }
                status => {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(PublishError::Status { status, body });
                }
            }
        }
    }
}

/// Upload content type guessed from the extension; anything that is not
/// recognisably video is sent as MP4.
fn video_mime(path: &Path) -> String {
    mime_guess::from_path(path)
        .first()
        .filter(|mime| mime.type_() == mime::VIDEO)
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| VIDEO_MIME.to_string())
}

#[async_trait]
impl Uploader for YouTubeUploader {
    async fn upload(&self, path: &Path, metadata: &VideoMetadata) -> Result<String, PublishError> {
        let size = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Err(PublishError::MissingFile(path.to_path_buf())),
        };
        if size == 0 {
            return Err(PublishError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{} is empty", path.display()),
            )));
        }

        let token = self.tokens.access_token().await?;
        match self.send_file(&token, path, metadata, size).await {
            Err(PublishError::Status { status, .. }) if status == StatusCode::UNAUTHORIZED => {
                warn!(path = %path.display(), "access token rejected, renewing");
                let token = self.tokens.renew().await?;
                self.send_file(&token, path, metadata, size).await
            }
            other => other,
        }
    }
}

/// Last byte the server has stored, from a `Range: bytes=0-N` header.
fn committed_through(range: &str) -> Option<u64> {
    range
        .trim()
        .strip_prefix("bytes=")?
        .split_once('-')?
        .1
        .trim()
        .parse()
        .ok()
}

fn parse_channel(payload: &Value) -> Option<ChannelInfo> {
    let channel = payload.get("items")?.as_array()?.first()?;
    let videos = channel
        .pointer("/statistics/videoCount")
        .and_then(|v| {
            v.as_str()
                .and_then(|s| s.parse().ok())
                .or_else(|| v.as_u64())
        })
        .unwrap_or(0);
    Some(ChannelInfo {
        title: channel
            .pointer("/snippet/title")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        id: channel.get("id")?.as_str()?.to_string(),
        videos,
    })
}
