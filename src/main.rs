// src/main.rs
//! Hike Recorder - record hikes from gpsd with crash-safe session restore

use anyhow::Context;
use chrono::{Duration, Utc};
use clap::{Args, Parser, Subcommand};
use hike_recorder::{
    clock::SystemClock,
    config::RecorderConfig,
    display::{self, TerminalDisplay},
    geo,
    hike::HikeStore,
    location::{gpsd::GpsdSource, replay::ReplaySource, LocationSource},
    monitor::{HikeMonitor, Outcome},
    recorder::{
        snapshot::{self, RestorePlan},
        FileStore, PersistedSnapshot, Recorder, SnapshotStore, SystemdInhibit,
    },
};
use std::path::{Path, PathBuf};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "hike-recorder")]
#[command(about = "Record hikes from gpsd, surviving crashes and restarts", long_about = None)]
struct Cli {
    /// Override the data directory (snapshots and saved hikes)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a hike, or continue the one left in progress
    Record(RecordArgs),
    /// Show the session left in progress, if any
    Status,
    /// List saved hikes
    Hikes,
    /// Print the effective configuration
    Config {
        /// Write it back to the config file
        #[arg(long)]
        save: bool,
    },
}

#[derive(Args)]
struct RecordArgs {
    /// gpsd host
    #[arg(long)]
    gpsd_host: Option<String>,
    /// gpsd port
    #[arg(long)]
    gpsd_port: Option<u16>,
    /// Replay a file of gpsd JSON lines instead of connecting to gpsd
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,
    /// Replay speed multiplier
    #[arg(long, default_value_t = 1.0)]
    speedup: f64,
    /// Keep the system awake while tracking
    #[arg(long)]
    keep_awake: bool,
    /// Name for the saved hike
    #[arg(long)]
    name: Option<String>,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = RecorderConfig::load().context("Failed to load configuration")?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = Some(dir);
    }
    let data_dir = config.data_dir()?;

    match cli.command {
        Commands::Record(args) => record(config, &data_dir, args).await,
        Commands::Status => status(&config, &data_dir),
        Commands::Hikes => list_hikes(&data_dir),
        Commands::Config { save } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if save {
                let path = config.save().context("Failed to save configuration")?;
                println!("Saved to {}", path.display());
            }
            Ok(())
        }
    }
}

fn session_store(data_dir: &Path) -> anyhow::Result<FileStore> {
    let dir = data_dir.join("session");
    FileStore::new(dir.clone()).with_context(|| format!("Failed to open session store at {}", dir.display()))
}

fn hike_store(data_dir: &Path) -> anyhow::Result<HikeStore> {
    Ok(HikeStore::new(data_dir.join("hikes"))?)
}

async fn record(mut config: RecorderConfig, data_dir: &Path, args: RecordArgs) -> anyhow::Result<()> {
    if args.gpsd_host.is_some() || args.gpsd_port.is_some() {
        let host = args.gpsd_host.clone().unwrap_or_else(|| config.gpsd_host.clone());
        let port = args.gpsd_port.unwrap_or(config.gpsd_port);
        config.update_gpsd(host, port);
    }
    config.keep_awake |= args.keep_awake;

    match &args.replay {
        Some(path) => {
            let source = ReplaySource::from_file(path, args.speedup)
                .with_context(|| format!("Failed to load replay {}", path.display()))?;
            if source.is_empty() {
                anyhow::bail!("{} contains no usable fixes", path.display());
            }
            let title = format!("Hike Recorder - replay of {}", path.display());
            run_recorder(source, title, true, &config, data_dir, args.name).await
        }
        None => {
            let source = GpsdSource::new(config.gpsd_host.clone(), config.gpsd_port);
            let title = format!("Hike Recorder - gpsd {}:{}", config.gpsd_host, config.gpsd_port);
            run_recorder(source, title, false, &config, data_dir, args.name).await
        }
    }
}

async fn run_recorder<L: LocationSource>(
    source: L,
    title: String,
    finite: bool,
    config: &RecorderConfig,
    data_dir: &Path,
    name: Option<String>,
) -> anyhow::Result<()> {
    let mut recorder = Recorder::new(
        config.session.clone(),
        source,
        session_store(data_dir)?,
        SystemdInhibit::new(),
        SystemClock,
    );
    if config.keep_awake {
        recorder.enable_keep_awake();
    }

    let display = TerminalDisplay::new(title, display::is_interactive());
    let mut monitor = HikeMonitor::new(recorder, hike_store(data_dir)?, display)
        .with_hike_name(name)
        .finish_when_source_ends(finite);
    monitor.start_or_continue();

    match monitor.run().await? {
        Outcome::Saved { path, hike_name } => {
            println!("Saved \"{}\" to {}", hike_name, path.display());
        }
        Outcome::Empty(result) => {
            println!(
                "Finished after {} without any usable fix; nothing saved",
                geo::format_duration(result.duration_sec)
            );
        }
        Outcome::Detached => {
            println!("Recording left in progress; run `hike-recorder record` to continue it");
        }
    }
    Ok(())
}

fn status(config: &RecorderConfig, data_dir: &Path) -> anyhow::Result<()> {
    let store = session_store(data_dir)?;
    let raw = match store.get(snapshot::SNAPSHOT_KEY)? {
        Some(raw) => raw,
        None => {
            println!("No recording in progress");
            return Ok(());
        }
    };
    let saved = PersistedSnapshot::from_json(&raw).context("Session snapshot is unreadable")?;

    println!(
        "{} | {} | {} | {} points{}",
        serde_json::to_string(&saved.state)?.trim_matches('"'),
        geo::format_duration(saved.elapsed_sec),
        geo::format_distance(saved.distance_meters),
        saved.points.len(),
        if saved.degraded { " (track trimmed to fit storage)" } else { "" }
    );
    println!("Last saved {}", saved.saved_at.to_rfc3339());

    let freshness = Duration::seconds(config.session.freshness_window_secs as i64);
    let last_finished = snapshot::read_last_finished(&store);
    match snapshot::plan_restore(saved, last_finished, Utc::now(), freshness) {
        RestorePlan::ResumeLive { extra_secs, .. } => {
            println!("Will resume live tracking, crediting {:.0}s while away", extra_secs)
        }
        RestorePlan::RestorePaused { .. } => println!("Will restore as paused"),
        RestorePlan::Discard(reason) => println!("Will be discarded ({:?})", reason),
    }
    Ok(())
}

fn list_hikes(data_dir: &Path) -> anyhow::Result<()> {
    let store = hike_store(data_dir)?;
    let hikes = store.list()?;
    if hikes.is_empty() {
        println!("No saved hikes in {}", store.dir().display());
        return Ok(());
    }
    for hike in hikes {
        println!("{:<24} {}", hike.name, hike.summary());
    }
    Ok(())
}
