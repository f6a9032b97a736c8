use std::path::PathBuf;

use reqwest::StatusCode;

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("{url} answered with status {status}")]
    Status { url: String, status: StatusCode },

    #[error("{url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout {
                url: url.to_string(),
            };
        }
        match err.status() {
            Some(status) => Self::Status {
                url: url.to_string(),
                status,
            },
            None => Self::Transport {
                url: url.to_string(),
                source: err,
            },
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    #[error("video not found: {0}")]
    MissingFile(PathBuf),

    #[error("upload endpoint answered with status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("upload session response carried no Location header")]
    MissingSession,

    #[error("upload finished without a video id")]
    MissingId,

    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upload log: {0}")]
    Log(String),

    #[error("credentials: {0}")]
    Auth(#[from] AuthError),
}

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("client secrets not found at {0}")]
    MissingClientSecrets(PathBuf),

    #[error("malformed client secrets: {0}")]
    ClientSecrets(String),

    #[error("authorization was denied: {0}")]
    Denied(String),

    #[error("authorization state mismatch")]
    StateMismatch,

    #[error("token endpoint answered with status {status}: {body}")]
    TokenEndpoint { status: StatusCode, body: String },

    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("token store: {0}")]
    Store(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("'{url}' is not a valid page URL: {reason}")]
    InvalidTarget { url: String, reason: String },

    #[error("'{url}' is not on {domain}")]
    ForeignDomain { url: String, domain: String },

    #[error("GEMINI_API_KEY not set")]
    MissingApiKey,
}
