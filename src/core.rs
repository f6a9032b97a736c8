use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::discover::classify::is_media_url;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EvidenceSource {
    NetworkEvent,
    ResourceTiming,
    InlineScript,
    EmbeddedJson,
}

impl EvidenceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceSource::NetworkEvent => "network-event",
            EvidenceSource::ResourceTiming => "resource-timing",
            EvidenceSource::InlineScript => "inline-script",
            EvidenceSource::EmbeddedJson => "embedded-json",
        }
    }
}

impl fmt::Display for EvidenceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deduplicated candidate media URLs for one page session.
///
/// Only strings accepted by [`is_media_url`] are admitted. The first source a
/// URL was seen through is kept for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateSet {
    urls: BTreeMap<String, EvidenceSource>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when `url` was newly added.
    pub fn insert(&mut self, url: &str, source: EvidenceSource) -> bool {
        if !is_media_url(url) || self.urls.contains_key(url) {
            return false;
        }
        tracing::debug!(%source, url, "candidate found");
        self.urls.insert(url.to_string(), source);
        true
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains_key(url)
    }

    pub fn source_of(&self, url: &str) -> Option<EvidenceSource> {
        self.urls.get(url).copied()
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.urls.keys().map(String::as_str)
    }
}

/// Best-effort product metadata the page exposes near a video element.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProductHint {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub description: String,
}

impl ProductHint {
    pub fn label(&self) -> Option<String> {
        let title = self.title.trim();
        if title.is_empty() {
            return None;
        }
        let price = self.price.trim();
        if price.is_empty() {
            Some(title.to_string())
        } else {
            Some(format!("{title} - {price}"))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedAsset {
    pub url: String,
    pub index: usize,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub video_path: String,
    pub video_id: String,
    pub title: String,
    pub url: String,
}

/// Turns sampled frames into a short title. Failures are absorbed as `None`.
pub trait TitleSynthesizer: Send + Sync {
    fn synthesize(&self, frames: &[image::RgbImage]) -> Option<String>;
}

/// Extracts still frames from a local video. Never fails; may return fewer frames.
pub trait FrameSource: Send + Sync {
    fn sample(&self, path: &std::path::Path, count: usize) -> Vec<image::RgbImage>;
}
