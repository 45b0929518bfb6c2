//! howsample: audition and export sample timelines

mod config;
mod session;

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use howsample_core::{format_time, SampleKind, TransportState};
use howsample_services::{write_export_to, AudioDevice, CpalDevice, HeadlessDevice, Scheduler};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::AppConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Parser)]
#[command(name = "howsample", about = "Arrange samples on a timeline, play them back and export a mix")]
struct Cli {
    /// Override the engine sample rate
    #[arg(long, global = true)]
    sample_rate: Option<u32>,
    /// Override the output channel count
    #[arg(long, global = true)]
    channels: Option<usize>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a session to a WAV file
    Export {
        /// Session JSON file
        #[arg(short, long)]
        session: PathBuf,
        /// Output path (defaults to the configured filename)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Play a session through the default output device
    Play {
        #[arg(short, long)]
        session: PathBuf,
        /// Run against a silent, faster-than-realtime device
        #[arg(long)]
        headless: bool,
    },
    /// List the samples of a session
    List {
        #[arg(short, long)]
        session: PathBuf,
        /// Only show samples of this kind (user, sampled, target, derived)
        #[arg(short, long)]
        kind: Option<String>,
    },
    /// Show the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        save: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("howsample=info".parse()?))
        .init();

    let cli = Cli::parse();
    let mut config = config::load_config();
    if let Some(rate) = cli.sample_rate {
        config.engine.sample_rate = rate;
    }
    if let Some(channels) = cli.channels {
        config.engine.channels = channels;
    }

    match cli.command {
        Commands::Export { session, out } => export(&config, &session, out),
        Commands::Play { session, headless } => play(&config, &session, headless),
        Commands::List { session, kind } => list(&config, &session, kind.as_deref()),
        Commands::Config { save } => show_config(&config, save),
    }
}

fn export(config: &AppConfig, session_path: &Path, out: Option<PathBuf>) -> Result<()> {
    let session = session::load_session(session_path, config.engine.sample_rate)?;
    info!(
        samples = session.names.len(),
        failed = session.failed.len(),
        tracks = session.timeline.tracks().len(),
        "Loaded session"
    );
    let out = out.unwrap_or_else(|| PathBuf::from(&config.export.filename));
    write_export_to(&session.timeline, &config.render_config(), &out)
        .with_context(|| format!("exporting to {}", out.display()))?;
    println!("{}", out.display());
    Ok(())
}

fn play(config: &AppConfig, session_path: &Path, headless: bool) -> Result<()> {
    if headless {
        let render = config.render_config();
        let device = HeadlessDevice::new(render.sample_rate, render.channels, render.stage);
        let session = session::load_session(session_path, render.sample_rate)?;
        let mut scheduler = Scheduler::new(device);
        run_transport(&mut scheduler, &session, |s| {
            s.device_mut().advance(POLL_INTERVAL.as_secs_f64());
        })
    } else {
        let device = CpalDevice::open(config.stage()).context("opening output device")?;
        info!(device = device.device_name(), "Using output device");
        let session = session::load_session(session_path, device.sample_rate())?;
        let mut scheduler = Scheduler::new(device);
        run_transport(&mut scheduler, &session, |_| thread::sleep(POLL_INTERVAL))
    }
}

/// Play the session and wait until the transport returns to idle
fn run_transport<D: AudioDevice>(
    scheduler: &mut Scheduler<D>,
    session: &session::Session,
    mut wait: impl FnMut(&mut Scheduler<D>),
) -> Result<()> {
    let end = session.timeline.end_time();
    let report = scheduler.play(&session.timeline)?;
    if report.skipped > 0 {
        info!(skipped = report.skipped, "Some placements were skipped");
    }

    let mut last_second = None;
    while scheduler.poll() == TransportState::Playing {
        if let Some(position) = scheduler.position() {
            let second = position.floor() as i64;
            if last_second != Some(second) {
                last_second = Some(second);
                info!("{} / {}", format_time(position), format_time(end));
            }
        }
        wait(scheduler);
    }
    Ok(())
}

fn list(config: &AppConfig, session_path: &Path, kind: Option<&str>) -> Result<()> {
    let session = session::load_session(session_path, config.engine.sample_rate)?;
    let kind: Option<SampleKind> = kind
        .map(|k| serde_json::from_value(serde_json::Value::String(k.to_lowercase())))
        .transpose()
        .context("unknown sample kind")?;

    let samples: Vec<_> = match kind {
        Some(kind) => session.timeline.samples_of_kind(kind).collect(),
        None => session.timeline.samples().iter().collect(),
    };
    for s in samples {
        println!(
            "{:>4}  {:<24} {:<8} speed {:>5.2}  pitch {:>+6.2}  {}-{}{}",
            s.id.0,
            s.name,
            format!("{:?}", s.kind).to_lowercase(),
            s.speed(),
            s.pitch(),
            format_time(s.start_point()),
            format_time(s.end_point()),
            if s.is_edited() { "  (edited)" } else { "" },
        );
    }
    Ok(())
}

fn show_config(config: &AppConfig, save: bool) -> Result<()> {
    if save {
        let path = config::save_config(config)?;
        println!("# saved to {}", path.display());
    } else {
        println!("# {}", config::config_path().display());
    }
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
