use anyhow::{anyhow, bail, Context, Result};
use image::RgbImage;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

use crate::core::FrameSource;

#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub path: PathBuf,
    pub frame_count: u64,
    pub duration_seconds: f64,
    pub fps: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl VideoMetadata {
    /// Timestamp of frame `position`, from the frame rate when known,
    /// otherwise proportionally to the duration.
    pub fn timestamp_of(&self, position: u64) -> f64 {
        match self.fps {
            Some(fps) if fps > 0.0 => position as f64 / fps,
            _ if self.frame_count > 0 => {
                self.duration_seconds * position as f64 / self.frame_count as f64
            }
            _ => 0.0,
        }
    }
}

/// Samples frames by shelling out to `ffprobe` and `ffmpeg`.
#[derive(Debug, Clone)]
pub struct FfmpegSampler {
    ffprobe: Option<PathBuf>,
    ffmpeg: Option<PathBuf>,
}

impl Default for FfmpegSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegSampler {
    pub fn new() -> Self {
        let ffprobe = which::which("ffprobe").ok();
        let ffmpeg = which::which("ffmpeg").ok();
        if ffprobe.is_none() || ffmpeg.is_none() {
            warn!("ffmpeg/ffprobe not found on PATH; titles will fall back to placeholders");
        }
        Self { ffprobe, ffmpeg }
    }

    pub fn probe(&self, path: &Path) -> Result<VideoMetadata> {
        let ffprobe = self
            .ffprobe
            .as_deref()
            .ok_or_else(|| anyhow!("ffprobe unavailable"))?;
        probe_video(ffprobe, path)
    }

    fn decode_frame(&self, path: &Path, seconds: f64) -> Result<RgbImage> {
        let ffmpeg = self
            .ffmpeg
            .as_deref()
            .ok_or_else(|| anyhow!("ffmpeg unavailable"))?;
        let output = Command::new(ffmpeg)
            .args(["-v", "error", "-ss", &format!("{seconds:.3}"), "-i"])
            .arg(path)
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"])
            .output()
            .context("ffmpeg invocation failed")?;
        if !output.status.success() || output.stdout.is_empty() {
            bail!(
                "ffmpeg could not decode a frame at {seconds:.3}s: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        let decoded = image::load_from_memory(&output.stdout).context("decoding frame png")?;
        Ok(decoded.to_rgb8())
    }
}

impl FrameSource for FfmpegSampler {
    fn sample(&self, path: &Path, count: usize) -> Vec<RgbImage> {
        let metadata = match self.probe(path) {
            Ok(meta) => meta,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "probe failed");
                return Vec::new();
            }
        };
        let mut frames = Vec::with_capacity(count);
        for position in frame_positions(metadata.frame_count, count) {
            let seconds = metadata.timestamp_of(position);
            match self.decode_frame(path, seconds) {
                Ok(frame) => frames.push(frame),
                Err(err) => debug!(position, error = %err, "frame skipped"),
            }
        }
        debug!(path = %path.display(), sampled = frames.len(), requested = count, "frames sampled");
        frames
    }
}

/// `count` evenly spaced positions strictly inside `0..total`.
pub fn frame_positions(total: u64, count: usize) -> Vec<u64> {
    if total == 0 || count == 0 {
        return Vec::new();
    }
    let slots = count as u64 + 1;
    (1..=count as u64).map(|i| total * i / slots).collect()
}

pub fn probe_video(ffprobe: &Path, path: &Path) -> Result<VideoMetadata> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .output()
        .context("ffprobe invocation failed")?;
    if !output.status.success() {
        bail!("ffprobe failed with status {}", output.status);
    }
    let parsed: Value = serde_json::from_slice(&output.stdout)?;
    Ok(metadata_from_probe(path, &parsed))
}

fn metadata_from_probe(path: &Path, parsed: &Value) -> VideoMetadata {
    let format = parsed.get("format").cloned().unwrap_or_default();
    let stream = parsed
        .get("streams")
        .and_then(|v| v.as_array())
        .and_then(|streams| {
            streams
                .iter()
                .find(|s| s.get("codec_type").and_then(|v| v.as_str()) == Some("video"))
        })
        .cloned()
        .unwrap_or_default();

    let duration = stream
        .get("duration")
        .or_else(|| format.get("duration"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0)
        .max(0.0);
    let fps = stream
        .get("avg_frame_rate")
        .and_then(|v| v.as_str())
        .and_then(parse_rate)
        .or_else(|| {
            stream
                .get("r_frame_rate")
                .and_then(|v| v.as_str())
                .and_then(parse_rate)
        });
    let frame_count = stream
        .get("nb_frames")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|count| *count > 0)
        .unwrap_or_else(|| match fps {
            Some(rate) => (duration * rate).floor() as u64,
            None => 0,
        });

    VideoMetadata {
        path: path.to_path_buf(),
        frame_count,
        duration_seconds: duration,
        fps,
        width: stream
            .get("width")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32),
        height: stream
            .get("height")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32),
    }
}

fn parse_rate(rate: &str) -> Option<f64> {
    if let Some((num, denom)) = rate.split_once('/') {
        let n: f64 = num.parse().ok()?;
        let d: f64 = denom.parse().ok()?;
        if d > 0.0 && n > 0.0 {
            return Some(n / d);
        }
        return None;
    }
    rate.parse().ok().filter(|r: &f64| *r > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn positions_exclude_start_and_end() {
        assert_eq!(frame_positions(100, 3), vec![25, 50, 75]);
        assert_eq!(frame_positions(10, 1), vec![5]);
        assert!(frame_positions(0, 3).is_empty());
        assert!(frame_positions(90, 0).is_empty());
        for pos in frame_positions(7, 5) {
            assert!(pos < 7);
        }
    }

    #[test]
    fn probe_json_prefers_nb_frames() {
        let parsed = json!({
            "streams": [{
                "codec_type": "video",
                "nb_frames": "300",
                "avg_frame_rate": "30/1",
                "duration": "10.0",
                "width": 720,
                "height": 1280
            }],
            "format": {"duration": "10.1"}
        });
        let meta = metadata_from_probe(Path::new("a.mp4"), &parsed);
        assert_eq!(meta.frame_count, 300);
        assert_eq!(meta.fps, Some(30.0));
        assert_eq!(meta.width, Some(720));
        assert!((meta.timestamp_of(150) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn probe_json_estimates_frames_without_nb_frames() {
        let parsed = json!({
            "streams": [{"codec_type": "video", "avg_frame_rate": "0/0", "r_frame_rate": "25/1"}],
            "format": {"duration": "4.0"}
        });
        let meta = metadata_from_probe(Path::new("b.mp4"), &parsed);
        assert_eq!(meta.frame_count, 100);
        assert_eq!(meta.fps, Some(25.0));
    }

    #[test]
    fn empty_probe_means_no_frames() {
        let meta = metadata_from_probe(Path::new("c.mp4"), &json!({}));
        assert_eq!(meta.frame_count, 0);
        assert_eq!(meta.timestamp_of(10), 0.0);
    }

    #[test]
    fn unreadable_file_samples_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("not-a-video.mp4");
        std::fs::write(&bogus, b"garbage").unwrap();
        assert!(FfmpegSampler::new().sample(&bogus, 3).is_empty());
    }
}
