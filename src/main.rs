mod cli;
mod config;
mod constants;
mod core;
mod discover;
mod engine;
mod error;
mod ingest;
mod prompts;
mod providers;
mod publish;
mod telemetry;
mod utils;
mod video;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use cli::{Command, ProfilesCommand, ScanOpts};
use config::AppConfig;
use constants::AVAILABLE_MODELS;
use engine::Engine;
use ingest::{Fetcher, IngestPipeline, Namer};
use providers::GeminiTitleSynthesizer;
use publish::oauth::ClientSecrets;
use publish::{GoogleBroker, ProfileManager, ProfileSession, Publisher, StoredToken, YouTubeUploader};
use telemetry::RunMonitor;
use video::FfmpegSampler;

const RUN_SUMMARY_FILE: &str = "run-summary.json";

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse();
    let mut cfg = AppConfig::load(cli.config.as_deref())?;

    match cli.cmd {
        Command::Scan { url, opts } => {
            let (target, api_key) = prepare_scan(&mut cfg, &url, &opts)?;
            let paths = process_page(&cfg, target, api_key, RunMonitor::new()).await?;
            print_paths(&paths);
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            url,
            profile,
            pacing,
            opts,
        } => {
            let (target, api_key) = prepare_scan(&mut cfg, &url, &opts)?;
            let mut manager = open_profiles(&cfg)?;
            authenticate(&mut manager, &cfg, &profile, false).await?;

            let monitor = RunMonitor::new();
            let paths = process_page(&cfg, target, api_key, monitor.clone()).await?;
            print_paths(&paths);
            if paths.is_empty() {
                return Ok(ExitCode::SUCCESS);
            }

            let publisher = publisher(&cfg, manager, &profile, monitor)?;
            let report = publisher
                .publish_batch(paths, pacing.unwrap_or(cfg.publish.pacing))
                .await;
            Ok(print_report(&report))
        }
        Command::Publish {
            dir,
            profile,
            pacing,
        } => {
            let mut manager = open_profiles(&cfg)?;
            authenticate(&mut manager, &cfg, &profile, false).await?;
            let publisher = publisher(&cfg, manager, &profile, RunMonitor::new())?;
            let report = publisher
                .publish_directory(&dir, pacing.unwrap_or(cfg.publish.pacing))
                .await?;
            Ok(print_report(&report))
        }
        Command::Profiles { command } => {
            match command {
                ProfilesCommand::List => {
                    let manager = open_profiles(&cfg)?;
                    let profiles = manager.list_profiles();
                    if profiles.is_empty() {
                        println!("No profiles registered in {}", cfg.publish.tokens_dir.display());
                    }
                    for profile in profiles {
                        let state = if profile.has_token { "token" } else { "no token" };
                        println!(
                            "{:<24} {:<9} {}",
                            profile.name,
                            state,
                            profile.token_file.display()
                        );
                    }
                }
                ProfilesCommand::Add { name } => {
                    let mut manager = open_profiles(&cfg)?;
                    authenticate(&mut manager, &cfg, &name, false).await?;
                    println!("Profile '{name}' is ready");
                }
                ProfilesCommand::Reauth { name } => {
                    let mut manager = open_profiles(&cfg)?;
                    authenticate(&mut manager, &cfg, &name, true).await?;
                    println!("Profile '{name}' was reauthorized");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Applies CLI overrides and checks everything that would otherwise fail
/// only after the browser has started.
fn prepare_scan(cfg: &mut AppConfig, url: &str, opts: &ScanOpts) -> anyhow::Result<(Url, String)> {
    opts.apply(cfg);
    let target = cfg.validate_target(url)?;
    let api_key = cfg.require_api_key()?.to_string();
    if !AVAILABLE_MODELS.contains(&cfg.model.as_str()) {
        warn!(model = %cfg.model, "model is not in the known list; trying it anyway");
    }
    Ok((target, api_key))
}

async fn process_page(
    cfg: &AppConfig,
    target: Url,
    api_key: String,
    monitor: RunMonitor,
) -> anyhow::Result<Vec<PathBuf>> {
    let cfg = cfg.clone();
    tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<PathBuf>> {
        let synthesizer = GeminiTitleSynthesizer::new(
            api_key,
            cfg.model.clone(),
            prompts::title_instruction(&cfg.title),
            cfg.max_frame_dimension,
            monitor.clone(),
        )?;
        let pipeline = IngestPipeline {
            fetcher: Fetcher::new(cfg.fetch_timeout, &cfg.scan.user_agent, Some(&target))?,
            sampler: FfmpegSampler::new(),
            synthesizer,
            namer: Namer::from_settings(&cfg.title),
            frame_count: cfg.frame_count,
            output_dir: cfg.output_dir.clone(),
            workers: cfg.workers,
            monitor: monitor.clone(),
        };
        let engine = Engine {
            scan: cfg.scan.clone(),
            pipeline,
            monitor: monitor.clone(),
        };

        let paths = engine.process_page(&target)?;
        let files: Vec<&Path> = paths.iter().map(PathBuf::as_path).collect();
        let summary = cfg.output_dir.join(RUN_SUMMARY_FILE);
        if let Err(err) = monitor.flush_summary(&summary, target.as_str(), &files) {
            warn!(path = %summary.display(), error = %err, "could not write run summary");
        }
        Ok(paths)
    })
    .await
    .context("page processing task failed")?
}

fn open_profiles(cfg: &AppConfig) -> anyhow::Result<ProfileManager<GoogleBroker>> {
    let secrets = ClientSecrets::load(&cfg.publish.client_secrets)?;
    let broker = GoogleBroker::new(secrets)?;
    Ok(ProfileManager::open(&cfg.publish.tokens_dir, broker)?)
}

/// Authenticates `profile` and logs which channel the token belongs to.
async fn authenticate(
    manager: &mut ProfileManager<GoogleBroker>,
    cfg: &AppConfig,
    profile: &str,
    force: bool,
) -> anyhow::Result<StoredToken> {
    let token = if force {
        manager.force_reauthenticate(profile).await?
    } else {
        manager.authenticate(profile).await?
    };
    let uploader = YouTubeUploader::fixed(token.access_token.clone(), cfg.publish.chunk_size)?;
    match uploader.channel_info().await {
        Ok(Some(channel)) => info!(
            profile,
            channel = %channel.title,
            id = %channel.id,
            videos = channel.videos,
            "connected to channel"
        ),
        Ok(None) => warn!(profile, "account has no channel"),
        Err(err) => warn!(profile, error = %err, "channel lookup failed"),
    }
    Ok(token)
}

/// Publisher whose uploader asks the profile for a fresh token before each
/// item, so batches may run longer than one access token lives.
fn publisher(
    cfg: &AppConfig,
    manager: ProfileManager<GoogleBroker>,
    profile: &str,
    monitor: RunMonitor,
) -> anyhow::Result<Publisher<YouTubeUploader>> {
    let session = Arc::new(ProfileSession::new(manager, profile));
    let uploader = YouTubeUploader::new(session, cfg.publish.chunk_size)?;
    Ok(Publisher::new(uploader, cfg.publish.clone(), monitor))
}

fn print_paths(paths: &[PathBuf]) {
    if paths.is_empty() {
        println!("No videos were produced");
        return;
    }
    println!("{} video(s) ready:", paths.len());
    for path in paths {
        println!("  {}", path.display());
    }
}

/// Prints the batch outcome; the exit code is 2 when any item failed.
fn print_report(report: &publish::BatchReport) -> ExitCode {
    for (path, id) in &report.published {
        println!(
            "published {} -> {}{}",
            path.display(),
            constants::SHORTS_URL_PREFIX,
            id
        );
    }
    for path in &report.failed {
        println!("failed    {}", path.display());
    }
    println!(
        "{} published, {} failed",
        report.published.len(),
        report.failed.len()
    );
    ExitCode::from(exit_status(report))
}

fn exit_status(report: &publish::BatchReport) -> u8 {
    if report.failed.is_empty() {
        0
    } else {
        2
    }
}
