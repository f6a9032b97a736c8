use anyhow::Context;
use serde::Deserialize;
use std::{
    env,
    fs::File,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::warn;
use url::Url;

use crate::constants::*;
use crate::error::ConfigError;
use crate::utils::parse_duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Defaults {
    pub model: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub workers: Option<usize>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DiscoveryCfg {
    pub domain: Option<String>,
    pub initial_settle: Option<String>,
    pub scroll_settle: Option<String>,
    pub observe_window: Option<String>,
    pub poll_interval: Option<String>,
    pub max_cycles: Option<usize>,
    pub headless: Option<bool>,
    pub user_agent: Option<String>,
    pub product_hints: Option<bool>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct FetchCfg {
    pub timeout: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct FramesCfg {
    pub count: Option<usize>,
    pub max_dimension: Option<u32>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TitleCfg {
    pub prompt: Option<String>,
    pub max_len: Option<usize>,
    pub placeholder: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PublishCfg {
    pub client_secrets: Option<PathBuf>,
    pub tokens_dir: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub max_attempts: Option<u32>,
    pub retry_base_delay: Option<String>,
    pub pacing: Option<String>,
    pub category_id: Option<String>,
    pub privacy: Option<String>,
    pub tags: Option<Vec<String>>,
    pub hashtags: Option<Vec<String>>,
    pub chunk_size: Option<usize>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Root {
    pub defaults: Option<Defaults>,
    pub discovery: Option<DiscoveryCfg>,
    pub fetch: Option<FetchCfg>,
    pub frames: Option<FramesCfg>,
    pub title: Option<TitleCfg>,
    pub publish: Option<PublishCfg>,
}

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub domain: String,
    pub initial_settle: Duration,
    pub scroll_settle: Duration,
    pub observe_window: Duration,
    pub poll_interval: Duration,
    pub max_cycles: Option<usize>,
    pub headless: bool,
    pub user_agent: String,
    pub product_hints: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            domain: DEFAULT_PLATFORM_DOMAIN.to_string(),
            initial_settle: Duration::from_secs(DEFAULT_INITIAL_SETTLE_SECS),
            scroll_settle: Duration::from_secs(DEFAULT_SCROLL_SETTLE_SECS),
            observe_window: Duration::from_secs(DEFAULT_OBSERVE_WINDOW_SECS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_cycles: None,
            headless: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            product_hints: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TitleSettings {
    pub prompt: Option<String>,
    pub max_len: usize,
    pub placeholder: String,
}

impl Default for TitleSettings {
    fn default() -> Self {
        Self {
            prompt: None,
            max_len: DEFAULT_TITLE_MAX_LEN,
            placeholder: DEFAULT_TITLE_PLACEHOLDER.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub client_secrets: PathBuf,
    pub tokens_dir: PathBuf,
    pub log_file: PathBuf,
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub pacing: Duration,
    pub category_id: String,
    pub privacy: String,
    pub tags: Vec<String>,
    pub hashtags: Vec<String>,
    pub chunk_size: usize,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            client_secrets: PathBuf::from(DEFAULT_CLIENT_SECRETS),
            tokens_dir: default_tokens_dir(),
            log_file: PathBuf::from(DEFAULT_UPLOAD_LOG),
            max_attempts: DEFAULT_MAX_UPLOAD_ATTEMPTS,
            retry_base_delay: Duration::from_secs(DEFAULT_RETRY_BASE_DELAY_SECS),
            pacing: Duration::from_secs(DEFAULT_PACING_SECS),
            category_id: DEFAULT_CATEGORY_ID.to_string(),
            privacy: DEFAULT_PRIVACY_STATUS.to_string(),
            tags: DEFAULT_TAGS.iter().map(|s| s.to_string()).collect(),
            hashtags: DEFAULT_HASHTAGS.iter().map(|s| s.to_string()).collect(),
            chunk_size: DEFAULT_UPLOAD_CHUNK_BYTES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub output_dir: PathBuf,
    pub workers: usize,
    pub scan: ScanSettings,
    pub fetch_timeout: Duration,
    pub frame_count: usize,
    pub max_frame_dimension: u32,
    pub title: TitleSettings,
    pub publish: PublishSettings,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let root = match path {
            Some(p) => Some(Self::read_yaml(p)?),
            None => {
                let mut found = None;
                for candidate in ["clipcaster.yaml", "clipcaster.yml"] {
                    let path = Path::new(candidate);
                    if path.exists() {
                        found = Some(Self::read_yaml(path)?);
                        break;
                    }
                }
                found
            }
        };
        Self::from_root(root.unwrap_or_default())
    }

    fn read_yaml(path: &Path) -> anyhow::Result<Root> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        serde_yaml::from_reader(file).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_root(r: Root) -> anyhow::Result<Self> {
        let defaults = r.defaults.unwrap_or_default();
        let model = env::var("CLIPCASTER_MODEL")
            .ok()
            .or(defaults.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let output_dir = env::var("CLIPCASTER_OUTPUT_DIR")
            .ok()
            .map(PathBuf::from)
            .or(defaults.output_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));

        let discovery = r.discovery.unwrap_or_default();
        let mut scan = ScanSettings::default();
        if let Some(domain) = discovery.domain {
            scan.domain = domain.trim().trim_start_matches('.').to_lowercase();
        }
        override_duration(&mut scan.initial_settle, discovery.initial_settle)?;
        override_duration(&mut scan.scroll_settle, discovery.scroll_settle)?;
        override_duration(&mut scan.observe_window, discovery.observe_window)?;
        override_duration(&mut scan.poll_interval, discovery.poll_interval)?;
        let min_poll = Duration::from_millis(MIN_POLL_INTERVAL_MS);
        if !scan.observe_window.is_zero() && scan.poll_interval < min_poll {
            warn!(
                poll_interval = ?scan.poll_interval,
                "poll interval too short, using {min_poll:?}"
            );
            scan.poll_interval = min_poll;
        }
        scan.max_cycles = discovery.max_cycles;
        scan.headless = discovery.headless.unwrap_or(scan.headless);
        scan.product_hints = discovery.product_hints.unwrap_or(scan.product_hints);
        if let Some(agent) = discovery.user_agent {
            scan.user_agent = agent;
        }

        let mut fetch_timeout = Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS);
        override_duration(&mut fetch_timeout, r.fetch.unwrap_or_default().timeout)?;

        let frames = r.frames.unwrap_or_default();

        let title_cfg = r.title.unwrap_or_default();
        let mut title = TitleSettings::default();
        title.prompt = title_cfg.prompt;
        title.max_len = title_cfg.max_len.unwrap_or(title.max_len).max(8);
        if let Some(placeholder) = title_cfg.placeholder {
            title.placeholder = placeholder;
        }

        let publish_cfg = r.publish.unwrap_or_default();
        let mut publish = PublishSettings::default();
        if let Some(path) = publish_cfg.client_secrets {
            publish.client_secrets = path;
        }
        if let Some(dir) = env::var("CLIPCASTER_TOKENS_DIR")
            .ok()
            .map(PathBuf::from)
            .or(publish_cfg.tokens_dir)
        {
            publish.tokens_dir = dir;
        }
        if let Some(path) = publish_cfg.log_file {
            publish.log_file = path;
        }
        publish.max_attempts = publish_cfg.max_attempts.unwrap_or(publish.max_attempts).max(1);
        override_duration(&mut publish.retry_base_delay, publish_cfg.retry_base_delay)?;
        override_duration(&mut publish.pacing, publish_cfg.pacing)?;
        if let Some(category) = publish_cfg.category_id {
            publish.category_id = category;
        }
        if let Some(privacy) = publish_cfg.privacy {
            publish.privacy = privacy;
        }
        if let Some(tags) = publish_cfg.tags {
            publish.tags = tags;
        }
        if let Some(hashtags) = publish_cfg.hashtags {
            publish.hashtags = hashtags;
        }
        if let Some(size) = publish_cfg.chunk_size {
            publish.chunk_size = round_chunk_size(size);
        }

        Ok(Self {
            api_key: env::var("GEMINI_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            model,
            output_dir,
            workers: defaults.workers.unwrap_or(1).max(1),
            scan,
            fetch_timeout,
            frame_count: frames.count.unwrap_or(DEFAULT_FRAME_COUNT),
            max_frame_dimension: frames
                .max_dimension
                .unwrap_or(DEFAULT_MAX_FRAME_DIMENSION)
                .max(16),
            title,
            publish,
        })
    }

    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key.as_deref().ok_or(ConfigError::MissingApiKey)
    }

    /// Rejects targets that are not http(s) pages on the configured platform domain.
    pub fn validate_target(&self, target: &str) -> Result<Url, ConfigError> {
        validate_target(target, &self.scan.domain)
    }
}

pub fn validate_target(target: &str, domain: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(target.trim()).map_err(|err| ConfigError::InvalidTarget {
        url: target.to_string(),
        reason: err.to_string(),
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidTarget {
            url: target.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    let host = url.host_str().unwrap_or_default().to_lowercase();
    if host != domain && !host.ends_with(&format!(".{domain}")) {
        return Err(ConfigError::ForeignDomain {
            url: target.to_string(),
            domain: domain.to_string(),
        });
    }
    Ok(url)
}

fn override_duration(slot: &mut Duration, value: Option<String>) -> anyhow::Result<()> {
    if let Some(text) = value {
        *slot = parse_duration(&text)?;
    }
    Ok(())
}

fn round_chunk_size(size: usize) -> usize {
    const UNIT: usize = 256 * 1024;
    (size / UNIT).max(1) * UNIT
}

fn default_tokens_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("clipcaster").join("tokens"))
        .unwrap_or_else(|| PathBuf::from("tokens"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_platform_urls_and_subdomains() {
        assert!(validate_target("https://www.temu.com/deals.html", "temu.com").is_ok());
        assert!(validate_target("https://temu.com/", "temu.com").is_ok());
    }

    #[test]
    fn rejects_foreign_or_malformed_targets() {
        assert!(matches!(
            validate_target("https://example.com/temu.com", "temu.com"),
            Err(ConfigError::ForeignDomain { .. })
        ));
        assert!(matches!(
            validate_target("https://nottemu.com/", "temu.com"),
            Err(ConfigError::ForeignDomain { .. })
        ));
        assert!(matches!(
            validate_target("temu.com", "temu.com"),
            Err(ConfigError::InvalidTarget { .. })
        ));
        assert!(matches!(
            validate_target("ftp://www.temu.com/", "temu.com"),
            Err(ConfigError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn yaml_overrides_defaults() {
        let root: Root = serde_yaml::from_str(
            r#"
discovery:
  observe_window: 2s
  max_cycles: 12
publish:
  pacing: 90s
  max_attempts: 5
  chunk_size: 1000000
title:
  placeholder: Clip
"#,
        )
        .unwrap();
        let cfg = AppConfig::from_root(root).unwrap();
        assert_eq!(cfg.scan.observe_window, Duration::from_secs(2));
        assert_eq!(cfg.scan.max_cycles, Some(12));
        assert_eq!(cfg.scan.initial_settle, Duration::from_secs(15));
        assert_eq!(cfg.publish.pacing, Duration::from_secs(90));
        assert_eq!(cfg.publish.max_attempts, 5);
        assert_eq!(cfg.publish.chunk_size, 3 * 256 * 1024);
        assert_eq!(cfg.title.placeholder, "Clip");
    }

    #[test]
    fn zero_poll_interval_is_raised_to_the_floor() {
        let root: Root = serde_yaml::from_str("discovery:\n  poll_interval: 0s\n").unwrap();
        let cfg = AppConfig::from_root(root).unwrap();
        assert_eq!(cfg.scan.poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn bad_duration_is_a_config_error() {
        let root: Root = serde_yaml::from_str("fetch:\n  timeout: forever\n").unwrap();
        assert!(AppConfig::from_root(root).is_err());
    }
}
