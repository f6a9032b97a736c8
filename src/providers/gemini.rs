use std::io::Cursor;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::RgbImage;
use rand::Rng;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::core::TitleSynthesizer;
use crate::telemetry::RunMonitor;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const INFERENCE_TIMEOUT: Duration = Duration::from_secs(120);
const JPEG_QUALITY: u8 = 85;
const MAX_RETRIES: usize = 3;
const BACKOFF_BASE_SECONDS: f64 = 1.0;
const BACKOFF_CAP_SECONDS: f64 = 8.0;

pub struct GeminiTitleSynthesizer {
    api_key: String,
    model: String,
    instruction: String,
    max_dimension: u32,
    base_url: String,
    http: Client,
    monitor: RunMonitor,
}

impl GeminiTitleSynthesizer {
    pub fn new(
        api_key: String,
        model: String,
        instruction: String,
        max_dimension: u32,
        monitor: RunMonitor,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(INFERENCE_TIMEOUT)
            .build()
            .context("building inference client")?;
        Ok(Self {
            api_key,
            model,
            instruction,
            max_dimension: max_dimension.max(1),
            base_url: API_BASE.to_string(),
            http,
            monitor,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn frame_part(&self, frame: &RgbImage) -> Result<Value> {
        let (width, height) = fit_within(frame.width(), frame.height(), self.max_dimension);
        let resized;
        let source = if (width, height) == frame.dimensions() {
            frame
        } else {
            resized = image::imageops::resize(frame, width, height, FilterType::Triangle);
            &resized
        };
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(Cursor::new(&mut bytes), JPEG_QUALITY)
            .encode_image(source)
            .context("encoding frame as jpeg")?;
        Ok(json!({
            "inline_data": {
                "mime_type": "image/jpeg",
                "data": BASE64.encode(&bytes),
            }
        }))
    }

    fn generate(&self, frames: &[RgbImage]) -> Result<Value> {
        let mut parts = vec![json!({"text": self.instruction})];
        for frame in frames {
            parts.push(self.frame_part(frame)?);
        }
        let request = json!({
            "contents": [
                {
                    "role": "user",
                    "parts": parts,
                }
            ]
        });
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let mut attempt = 0;
        loop {
            match self
                .http
                .post(&url)
                .query(&[("key", self.api_key.as_str())])
                .json(&request)
                .send()
            {
                Ok(resp) => {
                    if resp.status().is_success() {
                        return resp.json().context("parsing generateContent response");
                    }
                    let status = resp.status();
                    if should_retry_status(status) && attempt < MAX_RETRIES {
                        let delay = backoff_delay(attempt);
                        self.monitor.note_event(
                            "retry.generateContent",
                            json!({
                                "attempt": attempt + 1,
                                "delay_ms": delay.as_millis(),
                                "status": status.as_u16(),
                                "model": self.model,
                            }),
                        );
                        thread::sleep(delay);
                        attempt += 1;
                        continue;
                    }
                    let text = resp.text().unwrap_or_default();
                    return Err(anyhow!(
                        "generateContent failed with status {}: {}",
                        status,
                        text
                    ));
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt < MAX_RETRIES {
                        let delay = backoff_delay(attempt);
                        self.monitor.note_event(
                            "retry.generateContent",
                            json!({
                                "attempt": attempt + 1,
                                "delay_ms": delay.as_millis(),
                                "error": err.to_string(),
                                "model": self.model,
                            }),
                        );
                        thread::sleep(delay);
                        attempt += 1;
                        continue;
                    }
                    return Err(err).context("calling generateContent");
                }
            }
        }
    }
}

impl TitleSynthesizer for GeminiTitleSynthesizer {
    fn synthesize(&self, frames: &[RgbImage]) -> Option<String> {
        if frames.is_empty() {
            return None;
        }
        match self.generate(frames) {
            Ok(payload) => {
                let title = extract_title(&payload);
                if title.is_none() {
                    debug!(model = %self.model, "response carried no title text");
                }
                title
            }
            Err(err) => {
                warn!(model = %self.model, error = %err, "title synthesis failed");
                None
            }
        }
    }
}

/// First text part of the first candidate, trimmed and unquoted.
pub fn extract_title(payload: &Value) -> Option<String> {
    let text = payload
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?
        .iter()
        .find_map(|part| part.get("text").and_then(|t| t.as_str()))?;
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let unquoted = line
        .trim_matches(|c| matches!(c, '"' | '\'' | '*' | '`'))
        .trim();
    if unquoted.is_empty() {
        None
    } else {
        Some(unquoted.to_string())
    }
}

/// Largest size with the same aspect ratio that fits a `max`×`max` box.
/// Never upscales.
pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width, height);
    }
    let scale = f64::from(max) / f64::from(width.max(height));
    let scaled = |side: u32| ((f64::from(side) * scale).round() as u32).clamp(1, max);
    (scaled(width), scaled(height))
}

fn should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    if let Some(status) = err.status() {
        if should_retry_status(status) {
            return true;
        }
    }
    err.is_timeout() || err.is_connect() || err.is_request()
}

fn backoff_delay(attempt: usize) -> Duration {
    let exp = BACKOFF_BASE_SECONDS * 2f64.powi(attempt as i32);
    let capped = exp.min(BACKOFF_CAP_SECONDS);
    let mut rng = rand::thread_rng();
    let jitter: f64 = rng.gen_range(0.8..=1.2);
    Duration::from_secs_f64((capped * jitter).min(BACKOFF_CAP_SECONDS))
}
