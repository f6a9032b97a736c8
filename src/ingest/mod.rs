pub mod fetch;
pub mod namer;

pub use fetch::Fetcher;
pub use namer::Namer;

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{info, warn};

use crate::core::{CandidateSet, FetchedAsset, FrameSource, ProductHint, TitleSynthesizer};
use crate::telemetry::{Counter, RunMonitor};

/// Fetch → sample → synthesize → name, once per candidate URL.
///
/// A failure in any stage only affects its own item: failed fetches are
/// skipped, everything after a successful fetch degrades to a placeholder
/// name instead of failing.
pub struct IngestPipeline<S, T>
where
    S: FrameSource,
    T: TitleSynthesizer,
{
    pub fetcher: Fetcher,
    pub sampler: S,
    pub synthesizer: T,
    pub namer: Namer,
    pub frame_count: usize,
    pub output_dir: PathBuf,
    pub workers: usize,
    pub monitor: RunMonitor,
}

impl<S, T> IngestPipeline<S, T>
where
    S: FrameSource,
    T: TitleSynthesizer,
{
    /// Indexes are 1-based in candidate iteration order and stay stable
    /// regardless of `workers`. The returned list is ordered by index.
    pub fn ingest(
        &self,
        candidates: &CandidateSet,
        hints: &HashMap<String, ProductHint>,
    ) -> Result<Vec<FetchedAsset>> {
        let work: Vec<(usize, &str)> = candidates
            .iter()
            .enumerate()
            .map(|(idx, url)| (idx + 1, url))
            .collect();
        info!(count = work.len(), workers = self.workers, "ingesting candidates");

        let assets: Vec<FetchedAsset> = if self.workers > 1 && work.len() > 1 {
            let pool = ThreadPoolBuilder::new().num_threads(self.workers).build()?;
            pool.install(|| {
                work.par_iter()
                    .filter_map(|(index, url)| self.ingest_one(url, *index, hints.get(*url)))
                    .collect()
            })
        } else {
            work.iter()
                .filter_map(|(index, url)| self.ingest_one(url, *index, hints.get(*url)))
                .collect()
        };

        info!(
            ingested = assets.len(),
            skipped = work.len() - assets.len(),
            "ingest finished"
        );
        Ok(assets)
    }

    fn ingest_one(
        &self,
        url: &str,
        index: usize,
        hint: Option<&ProductHint>,
    ) -> Option<FetchedAsset> {
        let temp = match self.fetcher.fetch(url, &self.output_dir, index) {
            Ok(path) => path,
            Err(err) => {
                warn!(index, url, error = %err, "fetch failed, skipping");
                self.monitor.bump(Counter::FetchFailed);
                return None;
            }
        };
        self.monitor.bump(Counter::Fetched);

        let synthesized = {
            let frames = self.sampler.sample(&temp, self.frame_count);
            if frames.is_empty() {
                warn!(index, path = %temp.display(), "no frames decoded");
            }
            self.synthesizer.synthesize(&frames)
        };

        let title = match synthesized {
            Some(title) => {
                self.monitor.bump(Counter::Titled);
                Some(title)
            }
            None => match hint.and_then(ProductHint::label) {
                Some(label) => {
                    self.monitor.bump(Counter::Hinted);
                    Some(label)
                }
                None => {
                    self.monitor.bump(Counter::Fallback);
                    None
                }
            },
        };

        let name = self.namer.name(title.as_deref(), index);
        let path = self.namer.finalize(&temp, index, &name);
        info!(index, path = %path.display(), "asset ready");
        Some(FetchedAsset {
            url: url.to_string(),
            index,
            path,
        })
    }
}
