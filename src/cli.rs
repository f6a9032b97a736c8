use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::AppConfig;
use crate::utils::parse_duration;

#[derive(Parser, Debug)]
#[command(
    name = "clipcaster",
    version,
    about = "Find product videos on a page, title them from their frames, publish them as Shorts"
)]
pub struct Cli {
    /// YAML config file (defaults to ./clipcaster.yaml or ./clipcaster.yml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Discover, download and title the videos on a page
    Scan {
        url: String,
        #[command(flatten)]
        opts: ScanOpts,
    },
    /// Scan a page, then publish what it produced
    Run {
        url: String,
        #[arg(long)]
        profile: String,
        #[arg(long, value_parser = parse_duration)]
        pacing: Option<Duration>,
        #[command(flatten)]
        opts: ScanOpts,
    },
    /// Publish every .mp4 in a directory
    Publish {
        dir: PathBuf,
        #[arg(long)]
        profile: String,
        /// Wait between successful uploads, e.g. "90s" or "2m"
        #[arg(long, value_parser = parse_duration)]
        pacing: Option<Duration>,
    },
    /// Manage upload identities
    Profiles {
        #[command(subcommand)]
        command: ProfilesCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProfilesCommand {
    /// Registered profiles and whether they hold a token
    List,
    /// Register a profile and authorize it
    Add { name: String },
    /// Discard the stored token and authorize again
    Reauth { name: String },
}

#[derive(Args, Debug, Default)]
pub struct ScanOpts {
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,
    #[arg(long)]
    pub model: Option<String>,
    /// Parallel downloads during ingest
    #[arg(long)]
    pub workers: Option<usize>,
    /// Give up scrolling after this many cycles
    #[arg(long)]
    pub max_cycles: Option<usize>,
    /// Show the browser window
    #[arg(long, default_value_t = false)]
    pub headful: bool,
    /// Skip the in-page product hint lookup
    #[arg(long, default_value_t = false)]
    pub no_hints: bool,
}

impl ScanOpts {
    pub fn apply(&self, cfg: &mut AppConfig) {
        if let Some(dir) = &self.output_dir {
            cfg.output_dir = dir.clone();
        }
        if let Some(model) = &self.model {
            cfg.model = model.clone();
        }
        if let Some(workers) = self.workers {
            cfg.workers = workers.max(1);
        }
        if self.max_cycles.is_some() {
            cfg.scan.max_cycles = self.max_cycles;
        }
        if self.headful {
            cfg.scan.headless = false;
        }
        if self.no_hints {
            cfg.scan.product_hints = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn publish_parses_pacing() {
        let cli = Cli::parse_from([
            "clipcaster",
            "publish",
            "videos",
            "--profile",
            "main",
            "--pacing",
            "90s",
        ]);
        match cli.cmd {
            Command::Publish {
                dir,
                profile,
                pacing,
            } => {
                assert_eq!(dir, PathBuf::from("videos"));
                assert_eq!(profile, "main");
                assert_eq!(pacing, Some(Duration::from_secs(90)));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn scan_options_override_config() {
        let cli = Cli::parse_from([
            "clipcaster",
            "--config",
            "c.yaml",
            "scan",
            "https://www.temu.com/x.html",
            "--workers",
            "4",
            "--max-cycles",
            "10",
            "--headful",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("c.yaml")));
        let Command::Scan { url, opts } = cli.cmd else {
            panic!("expected scan");
        };
        assert_eq!(url, "https://www.temu.com/x.html");

        let mut cfg = AppConfig::from_root(Default::default()).unwrap();
        opts.apply(&mut cfg);
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.scan.max_cycles, Some(10));
        assert!(!cfg.scan.headless);
        assert!(cfg.scan.product_hints);
    }
}
