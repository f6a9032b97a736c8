use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ScanSettings;
use crate::core::{CandidateSet, FrameSource, ProductHint, TitleSynthesizer};
use crate::discover::{ChromeDriver, PageDriver, PageScanner, ScanState};
use crate::ingest::IngestPipeline;
use crate::telemetry::{Counter, RunMonitor};

/// One page-processing session: scan the page, then ingest what was found.
pub struct Engine<S, T>
where
    S: FrameSource,
    T: TitleSynthesizer,
{
    pub scan: ScanSettings,
    pub pipeline: IngestPipeline<S, T>,
    pub monitor: RunMonitor,
}

impl<S, T> Engine<S, T>
where
    S: FrameSource,
    T: TitleSynthesizer,
{
    /// Launches a browser for `url` and returns the paths of the named files.
    pub fn process_page(&self, url: &Url) -> Result<Vec<PathBuf>> {
        let mut driver = ChromeDriver::launch(&self.scan).context("starting browser")?;
        self.process_with(&mut driver, url.as_str())
    }

    pub fn process_with<D: PageDriver>(&self, driver: &mut D, url: &str) -> Result<Vec<PathBuf>> {
        let mut scanner = PageScanner::new(self.scan.clone());
        let outcome = scanner.scan(driver, url)?;
        self.monitor.add(Counter::Discovered, outcome.candidates.len());

        if outcome.candidates.is_empty() {
            warn!(url, "no media urls found on page");
            scanner.transition(ScanState::Done);
            return Ok(Vec::new());
        }
        info!(found = outcome.candidates.len(), "media urls discovered");

        let hints = if self.scan.product_hints {
            collect_hints(driver, &outcome.candidates)
        } else {
            HashMap::new()
        };

        scanner.transition(ScanState::Downloading);
        let assets = self.pipeline.ingest(&outcome.candidates, &hints)?;
        scanner.transition(ScanState::Done);
        Ok(assets.into_iter().map(|asset| asset.path).collect())
    }
}

/// Best effort: a failing hint lookup only loses that hint.
fn collect_hints<D: PageDriver>(
    driver: &mut D,
    candidates: &CandidateSet,
) -> HashMap<String, ProductHint> {
    let mut hints = HashMap::new();
    for url in candidates.iter() {
        match driver.product_hint(url) {
            Ok(Some(hint)) => {
                hints.insert(url.to_string(), hint);
            }
            Ok(None) => {}
            Err(err) => debug!(url, error = %err, "product hint lookup failed"),
        }
    }
    hints
}
