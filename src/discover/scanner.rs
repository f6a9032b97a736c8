use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::ScanSettings;
use crate::constants::MIN_POLL_INTERVAL_MS;
use crate::core::CandidateSet;
use crate::discover::evidence::{from_inline_scripts, from_network_events, from_resource_timing};
use crate::discover::PageDriver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Init,
    Loaded,
    Scroll,
    Observe,
    Stable,
    Downloading,
    Done,
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScanState::Init => "init",
            ScanState::Loaded => "loaded",
            ScanState::Scroll => "scroll",
            ScanState::Observe => "observe",
            ScanState::Stable => "stable",
            ScanState::Downloading => "downloading",
            ScanState::Done => "done",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Stabilized,
    CycleCap,
    HeightUnavailable,
}

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub candidates: CandidateSet,
    pub cycles: usize,
    pub stop: StopReason,
}

pub struct PageScanner {
    settings: ScanSettings,
    state: ScanState,
}

impl PageScanner {
    pub fn new(settings: ScanSettings) -> Self {
        Self {
            settings,
            state: ScanState::Init,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn transition(&mut self, next: ScanState) {
        debug!(from = %self.state, to = %next, "scan state");
        self.state = next;
    }

    /// Loads `url` and scrolls until the page height stops growing, collecting
    /// candidate media URLs along the way. Ends in [`ScanState::Stable`].
    pub fn scan<D: PageDriver>(&mut self, driver: &mut D, url: &str) -> Result<ScanOutcome> {
        self.state = ScanState::Init;
        let mut candidates = CandidateSet::new();

        info!(url, "loading page");
        driver
            .navigate(url)
            .with_context(|| format!("navigating to {url}"))?;
        pause(self.settings.initial_settle);
        self.transition(ScanState::Loaded);

        let mut last_height = match driver.page_height() {
            Ok(height) => height,
            Err(err) => {
                warn!(error = %err, "could not measure page height");
                self.collect_all(driver, &mut candidates);
                self.transition(ScanState::Stable);
                return Ok(ScanOutcome {
                    candidates,
                    cycles: 0,
                    stop: StopReason::HeightUnavailable,
                });
            }
        };

        let mut cycles = 0;
        let stop = loop {
            if let Some(cap) = self.settings.max_cycles {
                if cycles >= cap {
                    warn!(cap, "scroll cycle cap reached before the page stabilized");
                    break StopReason::CycleCap;
                }
            }

            self.transition(ScanState::Scroll);
            if let Err(err) = driver.scroll_to_bottom() {
                warn!(error = %err, "scroll failed");
            }
            pause(self.settings.scroll_settle);

            self.transition(ScanState::Observe);
            self.collect_all(driver, &mut candidates);
            self.observe(driver, &mut candidates);
            cycles += 1;

            match driver.page_height() {
                Ok(height) if height == last_height => break StopReason::Stabilized,
                Ok(height) => {
                    debug!(previous = last_height, height, "page grew");
                    last_height = height;
                }
                Err(err) => {
                    warn!(error = %err, "could not measure page height");
                    break StopReason::HeightUnavailable;
                }
            }
            info!(cycles, found = candidates.len(), "candidates so far");
        };

        self.transition(ScanState::Stable);
        info!(cycles, found = candidates.len(), ?stop, "page scan finished");
        Ok(ScanOutcome {
            candidates,
            cycles,
            stop,
        })
    }

    fn collect_all<D: PageDriver>(&self, driver: &mut D, candidates: &mut CandidateSet) {
        self.collect_network(driver, candidates);
        match driver.inline_scripts() {
            Ok(scripts) => {
                from_inline_scripts(&scripts, candidates);
            }
            Err(err) => warn!(error = %err, "reading inline scripts failed"),
        }
    }

    fn collect_network<D: PageDriver>(&self, driver: &mut D, candidates: &mut CandidateSet) {
        match driver.drain_network_events() {
            Ok(events) => {
                from_network_events(&events, candidates);
            }
            Err(err) => warn!(error = %err, "reading network events failed"),
        }
        match driver.resource_urls() {
            Ok(urls) => {
                from_resource_timing(&urls, candidates);
            }
            Err(err) => warn!(error = %err, "reading resource timing failed"),
        }
    }

    /// Keeps sampling network activity for the observation window so requests
    /// triggered late by the scroll are caught.
    fn observe<D: PageDriver>(&self, driver: &mut D, candidates: &mut CandidateSet) {
        let window = self.settings.observe_window;
        if window.is_zero() {
            return;
        }
        let interval = self
            .settings
            .poll_interval
            .max(Duration::from_millis(MIN_POLL_INTERVAL_MS));
        let deadline = Instant::now() + window;
        while Instant::now() < deadline {
            self.collect_network(driver, candidates);
            let remaining = deadline.saturating_duration_since(Instant::now());
            pause(interval.min(remaining));
        }
    }
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::ProductHint;
    use crate::discover::NetworkEvent;
    use serde_json::json;
    use std::collections::VecDeque;

    #[derive(Default)]
    pub(crate) struct ScriptedDriver {
        pub heights: VecDeque<u64>,
        pub scrolls: usize,
        pub navigated: Vec<String>,
        pub events: VecDeque<Vec<NetworkEvent>>,
        pub scripts: Vec<String>,
        pub resources: Vec<String>,
        pub hints: std::collections::HashMap<String, ProductHint>,
        pub polls: usize,
    }

    impl ScriptedDriver {
        pub(crate) fn with_heights(heights: &[u64]) -> Self {
            Self {
                heights: heights.iter().copied().collect(),
                ..Self::default()
            }
        }
    }

    impl PageDriver for ScriptedDriver {
        fn navigate(&mut self, url: &str) -> Result<()> {
            self.navigated.push(url.to_string());
            Ok(())
        }

        fn drain_network_events(&mut self) -> Result<Vec<NetworkEvent>> {
            self.polls += 1;
            Ok(self.events.pop_front().unwrap_or_default())
        }

        fn resource_urls(&mut self) -> Result<Vec<String>> {
            Ok(self.resources.clone())
        }

        fn inline_scripts(&mut self) -> Result<Vec<String>> {
            Ok(self.scripts.clone())
        }

        fn scroll_to_bottom(&mut self) -> Result<()> {
            self.scrolls += 1;
            Ok(())
        }

        fn page_height(&mut self) -> Result<u64> {
            self.heights
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("no more heights"))
        }

        fn product_hint(&mut self, video_url: &str) -> Result<Option<ProductHint>> {
            Ok(self.hints.get(video_url).cloned())
        }
    }

    pub(crate) fn instant_settings() -> ScanSettings {
        ScanSettings {
            initial_settle: Duration::ZERO,
            scroll_settle: Duration::ZERO,
            observe_window: Duration::ZERO,
            poll_interval: Duration::ZERO,
            ..ScanSettings::default()
        }
    }

    #[test]
    fn stops_after_height_repeats() {
        let mut driver = ScriptedDriver::with_heights(&[100, 200, 200]);
        let mut scanner = PageScanner::new(instant_settings());
        let outcome = scanner.scan(&mut driver, "https://www.temu.com/x").unwrap();
        assert_eq!(outcome.cycles, 2);
        assert_eq!(driver.scrolls, 2);
        assert_eq!(outcome.stop, StopReason::Stabilized);
        assert_eq!(scanner.state(), ScanState::Stable);
        assert_eq!(driver.navigated, vec!["https://www.temu.com/x".to_string()]);
    }

    #[test]
    fn cycle_cap_bounds_a_growing_page() {
        let mut driver = ScriptedDriver::with_heights(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut settings = instant_settings();
        settings.max_cycles = Some(3);
        let mut scanner = PageScanner::new(settings);
        let outcome = scanner.scan(&mut driver, "https://www.temu.com/x").unwrap();
        assert_eq!(outcome.cycles, 3);
        assert_eq!(outcome.stop, StopReason::CycleCap);
    }

    #[test]
    fn collects_from_every_source_per_cycle() {
        let mut driver = ScriptedDriver::with_heights(&[100, 200, 200]);
        driver.events = VecDeque::from(vec![
            vec![NetworkEvent::new(
                "Network.requestWillBeSent",
                json!({"request": {"url": "https://cdn/first.mp4"}}),
            )],
            vec![NetworkEvent::new(
                "Network.requestWillBeSent",
                json!({"request": {"url": "https://cdn/second.mp4"}}),
            )],
        ]);
        driver.resources = vec!["https://goods-vod.cdn/r".into(), "https://cdn/a.js".into()];
        driver.scripts = vec![r#"var v = {"src": "https://cdn/s.mp4"};"#.into()];

        let mut scanner = PageScanner::new(instant_settings());
        let outcome = scanner.scan(&mut driver, "https://www.temu.com/x").unwrap();
        let urls: Vec<_> = outcome.candidates.iter().collect();
        assert_eq!(
            urls,
            vec![
                "https://cdn/first.mp4",
                "https://cdn/s.mp4",
                "https://cdn/second.mp4",
                "https://goods-vod.cdn/r",
            ]
        );
    }

    #[test]
    fn zero_poll_interval_still_paces_observation() {
        let mut driver = ScriptedDriver::with_heights(&[100, 100]);
        let mut settings = instant_settings();
        settings.observe_window = Duration::from_millis(250);
        let mut scanner = PageScanner::new(settings);
        let started = Instant::now();
        let outcome = scanner.scan(&mut driver, "https://www.temu.com/x").unwrap();
        assert_eq!(outcome.cycles, 1);
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert!(driver.polls <= 6, "polled {} times", driver.polls);
    }

    #[test]
    fn missing_height_stops_without_error() {
        let mut driver = ScriptedDriver::with_heights(&[]);
        let mut scanner = PageScanner::new(instant_settings());
        let outcome = scanner.scan(&mut driver, "https://www.temu.com/x").unwrap();
        assert_eq!(outcome.cycles, 0);
        assert_eq!(outcome.stop, StopReason::HeightUnavailable);
    }
}
