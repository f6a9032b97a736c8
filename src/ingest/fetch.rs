use std::fs::{self, File};
use std::io::copy;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use bytesize::ByteSize;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, REFERER};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::FetchError;
use crate::utils::ensure_dir;

pub struct Fetcher {
    client: Client,
    referer: Option<String>,
}

impl Fetcher {
    pub fn new(timeout: Duration, user_agent: &str, page: Option<&Url>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("video/webm,video/mp4,video/*;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        Ok(Self {
            client: Client::builder()
                .timeout(timeout)
                .connect_timeout(timeout)
                .user_agent(user_agent)
                .default_headers(headers)
                .build()?,
            referer: page.map(|url| format!("{}/", url.origin().ascii_serialization())),
        })
    }

    /// Temporary file name for the asset with 1-based `index`.
    pub fn temp_path(dest_dir: &Path, index: usize) -> PathBuf {
        dest_dir.join(format!("temp_video_{index}.mp4"))
    }

    /// Streams `url` into `dest_dir` under a temporary name keyed by `index`.
    /// A partially written file is removed on failure.
    pub fn fetch(&self, url: &str, dest_dir: &Path, index: usize) -> Result<PathBuf, FetchError> {
        ensure_dir(dest_dir)?;
        let target = Self::temp_path(dest_dir, index);

        let mut request = self.client.get(url);
        if let Some(referer) = &self.referer {
            request = request.header(REFERER, referer);
        }
        let response = request
            .send()
            .map_err(|err| FetchError::from_reqwest(url, err))?;
        let mut response = response
            .error_for_status()
            .map_err(|err| FetchError::from_reqwest(url, err))?;

        if let Some(kind) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<mime::Mime>().ok())
        {
            if kind.type_() != mime::VIDEO && kind != mime::APPLICATION_OCTET_STREAM {
                debug!(url, content_type = %kind, "fetching non-video content type");
            }
        }

        let written = File::create(&target)
            .map_err(FetchError::from)
            .and_then(|mut file| {
                copy(&mut response, &mut file).map_err(|err| {
                    let timed_out = err.kind() == std::io::ErrorKind::TimedOut
                        || err
                            .get_ref()
                            .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
                            .is_some_and(reqwest::Error::is_timeout);
                    if timed_out {
                        FetchError::Timeout {
                            url: url.to_string(),
                        }
                    } else {
                        FetchError::Io(err)
                    }
                })
            });

        match written {
            Ok(size) => {
                info!(index, size = %ByteSize(size), path = %target.display(), "downloaded");
                Ok(target)
            }
            Err(err) => {
                if target.exists() {
                    if let Err(remove_err) = fs::remove_file(&target) {
                        warn!(path = %target.display(), error = %remove_err, "could not remove partial download");
                    }
                }
                Err(err)
            }
        }
    }
}
