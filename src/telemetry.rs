use crate::utils::ensure_dir;
use serde::Serialize;
use serde_json::json;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

/// Per-run counters. Each asset increments exactly one of `titled`,
/// `hinted` or `fallback` once it is named.
#[derive(Debug, Default, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct RunCounters {
    pub discovered: usize,
    pub fetched: usize,
    pub fetch_failed: usize,
    pub titled: usize,
    pub hinted: usize,
    pub fallback: usize,
    pub published: usize,
    pub publish_failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Discovered,
    Fetched,
    FetchFailed,
    Titled,
    Hinted,
    Fallback,
    Published,
    PublishFailed,
}

#[derive(Clone)]
pub struct RunMonitor {
    inner: Arc<Mutex<RunState>>,
}

impl Default for RunMonitor {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RunState {
                started: OffsetDateTime::now_utc(),
                counters: RunCounters::default(),
                notes: Vec::new(),
            })),
        }
    }
}

struct RunState {
    started: OffsetDateTime,
    counters: RunCounters,
    notes: Vec<Note>,
}

#[derive(Debug, Clone, Serialize)]
struct Note {
    name: String,
    payload: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
}

impl RunMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RunState> {
        // A panicking worker must not hide the counters of the others.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add(&self, counter: Counter, amount: usize) {
        let mut state = self.state();
        let slot = match counter {
            Counter::Discovered => &mut state.counters.discovered,
            Counter::Fetched => &mut state.counters.fetched,
            Counter::FetchFailed => &mut state.counters.fetch_failed,
            Counter::Titled => &mut state.counters.titled,
            Counter::Hinted => &mut state.counters.hinted,
            Counter::Fallback => &mut state.counters.fallback,
            Counter::Published => &mut state.counters.published,
            Counter::PublishFailed => &mut state.counters.publish_failed,
        };
        *slot += amount;
    }

    pub fn bump(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn note_event(&self, name: &str, payload: serde_json::Value) {
        self.state().notes.push(Note {
            name: name.to_string(),
            payload,
            timestamp: OffsetDateTime::now_utc(),
        });
    }

    pub fn counters(&self) -> RunCounters {
        self.state().counters
    }

    pub fn note_count(&self, name: &str) -> usize {
        self.state().notes.iter().filter(|n| n.name == name).count()
    }

    pub fn flush_summary(&self, to: &Path, target: &str, files: &[&Path]) -> anyhow::Result<()> {
        if let Some(parent) = to.parent() {
            ensure_dir(parent)?;
        }
        let state = self.state();
        let finished = OffsetDateTime::now_utc();
        let elapsed = (finished - state.started)
            .max(Duration::ZERO)
            .as_seconds_f64();

        let payload = json!({
            "target": target,
            "totals": state.counters,
            "time": {
                "start": state.started.format(&Rfc3339)?,
                "end": finished.format(&Rfc3339)?,
                "elapsed_sec": (elapsed * 1000.0).round() / 1000.0,
            },
            "files": files.iter().map(|p| p.to_string_lossy().to_string()).collect::<Vec<_>>(),
            "notes": state.notes.clone(),
        });

        let mut file = File::create(to)?;
        file.write_all(serde_json::to_string_pretty(&payload)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_shared_between_clones() {
        let monitor = RunMonitor::new();
        let worker = monitor.clone();
        worker.bump(Counter::Fetched);
        worker.add(Counter::Discovered, 4);
        monitor.bump(Counter::Fallback);
        let counters = monitor.counters();
        assert_eq!(counters.discovered, 4);
        assert_eq!(counters.fetched, 1);
        assert_eq!(counters.fallback, 1);
        assert_eq!(counters.titled, 0);
    }

    #[test]
    fn summary_lists_totals_and_notes() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = RunMonitor::new();
        monitor.add(Counter::Discovered, 2);
        monitor.note_event("title_retry", json!({"status": 503}));
        assert_eq!(monitor.note_count("title_retry"), 1);

        let out = dir.path().join("nested/run-summary.json");
        let file = dir.path().join("001_Lamp.mp4");
        monitor
            .flush_summary(&out, "https://www.temu.com/x.html", &[file.as_path()])
            .unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(written["target"], "https://www.temu.com/x.html");
        assert_eq!(written["totals"]["discovered"], 2);
        assert_eq!(written["notes"][0]["name"], "title_retry");
        assert_eq!(written["files"].as_array().unwrap().len(), 1);
    }
}
