//! Shared constants for the clipcaster pipeline.

pub const GEMINI_2_5_FLASH: &str = "gemini-2.5-flash";
pub const GEMINI_2_5_FLASH_LITE: &str = "gemini-2.5-flash-lite";
pub const GEMINI_2_FLASH: &str = "gemini-2.0-flash";

pub const AVAILABLE_MODELS: &[&str] = &[GEMINI_2_5_FLASH, GEMINI_2_5_FLASH_LITE, GEMINI_2_FLASH];

pub const DEFAULT_MODEL: &str = GEMINI_2_5_FLASH_LITE;

/// Substrings that mark a URL as a video resource. Matched case-insensitively.
pub const MEDIA_URL_PATTERNS: &[&str] = &[
    ".mp4",
    "goods-vod",
    "/video/",
    "videoplayback",
    "video_content",
    "media/video",
];

pub const DEFAULT_PLATFORM_DOMAIN: &str = "temu.com";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
pub const DEFAULT_INITIAL_SETTLE_SECS: u64 = 15;
pub const DEFAULT_SCROLL_SETTLE_SECS: u64 = 2;
pub const DEFAULT_OBSERVE_WINDOW_SECS: u64 = 5;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;
pub const MIN_POLL_INTERVAL_MS: u64 = 100;

pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_OUTPUT_DIR: &str = "videos";

pub const DEFAULT_FRAME_COUNT: usize = 3;
pub const DEFAULT_MAX_FRAME_DIMENSION: u32 = 1024;

pub const DEFAULT_TITLE_MAX_LEN: usize = 100;
pub const DEFAULT_TITLE_PLACEHOLDER: &str = "Product";
pub const TRUNCATION_MARKER: &str = "...";
pub const GENERIC_TITLE: &str = "video";

pub const DEFAULT_MAX_UPLOAD_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_SECS: u64 = 30;
pub const DEFAULT_PACING_SECS: u64 = 60;
pub const DEFAULT_CATEGORY_ID: &str = "22";
pub const DEFAULT_PRIVACY_STATUS: &str = "private";
/// Resumable upload chunks must be a multiple of 256 KiB.
pub const DEFAULT_UPLOAD_CHUNK_BYTES: usize = 32 * 256 * 1024;
pub const DEFAULT_UPLOAD_LOG: &str = "uploads_log.ndjson";
pub const DEFAULT_CLIENT_SECRETS: &str = "client_secrets.json";
pub const SHORTS_URL_PREFIX: &str = "https://youtube.com/shorts/";

pub const DEFAULT_TAGS: &[&str] = &["shorts", "technology", "innovation", "products"];
pub const DEFAULT_HASHTAGS: &[&str] = &[
    "#TechForEveryone",
    "#GadgetOfTheDay",
    "#InnovativeProducts",
    "#EssentialElectronics",
    "#EasierLife",
    "#TechNews",
    "#ProductReview",
    "#DailyPracticality",
    "#SmartHome",
    "#BestElectronics",
];
pub const HASHTAGS_PER_DESCRIPTION: usize = 5;

pub const OAUTH_REDIRECT_PORT: u16 = 8080;
pub const YOUTUBE_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/youtube.upload",
    "https://www.googleapis.com/auth/youtube.readonly",
];
