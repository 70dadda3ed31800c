// src/main.rs
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, warn};

use neurocursor::dsp::{ReplaySource, SimulatedSource};
use neurocursor::openbci::{self, OpenBciSession};
use neurocursor::{spawn, EngineHandle, PipelineConfig};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SourceKind {
    /// Synthetic lateralized mu rhythm
    Sim,
    /// CSV recording, one sample per row
    Replay,
    /// OpenBCI Cyton + Daisy through BrainFlow
    Openbci,
}

#[derive(Parser)]
#[command(
    name = "neurocursor",
    version,
    about = "Turn a live EEG stream into high/low/neutral control decisions"
)]
struct Cli {
    /// JSON pipeline configuration; missing fields take their defaults
    #[arg(long, env = "NEUROCURSOR_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = SourceKind::Sim)]
    source: SourceKind,

    /// Serial port of the dongle (auto-detected when omitted)
    #[arg(long)]
    port: Option<String>,

    /// Recording to replay with `--source replay`
    #[arg(long)]
    file: Option<PathBuf>,

    /// Replay at the configured sample rate instead of as fast as possible
    #[arg(long)]
    paced: bool,

    /// Stop after this many seconds
    #[arg(long)]
    seconds: Option<u64>,

    /// Run `setserial <port> low_latency` before connecting (Linux only)
    #[arg(long)]
    low_latency: bool,

    /// Mains frequency to suppress before windowing, e.g. 50 or 60
    #[arg(long)]
    notch: Option<f64>,

    /// Classification border on the normalized value
    #[arg(long)]
    border: Option<f64>,

    /// Windows used only to seed the normalization history
    #[arg(long)]
    warmup: Option<usize>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .parse_default_env()
        .init();

    let config = load_config(&cli)?;
    let engine = match cli.source {
        SourceKind::Sim => {
            let designated = designated_positions(&config)?;
            spawn(&config, SimulatedSource::new(config.sampling_rate_hz, designated, 7))?
        }
        SourceKind::Replay => {
            let path = cli.file.as_deref().context("--source replay needs --file")?;
            let mut source = ReplaySource::new(read_recording(path)?, config.sampling_rate_hz);
            if cli.paced {
                source = source.paced();
            }
            spawn(&config, source)?
        }
        SourceKind::Openbci => {
            let port = match &cli.port {
                Some(port) => port.clone(),
                None => openbci::find_dongle_port()?,
            };
            if cli.low_latency {
                if let Err(err) = openbci::set_low_latency(&port) {
                    warn!("could not switch {port} to low latency: {err:#}");
                }
            }
            let session = OpenBciSession::connect(Some(&port))?;
            if (session.sample_rate_hz() - config.sampling_rate_hz).abs() > f64::EPSILON {
                warn!(
                    "board streams at {} Hz but the pipeline is configured for {} Hz",
                    session.sample_rate_hz(),
                    config.sampling_rate_hz
                );
            }
            spawn(&config, session)?
        }
    };

    let default_limit = matches!(cli.source, SourceKind::Sim).then_some(30);
    consume(&engine, cli.seconds.or(default_limit).map(Duration::from_secs))?;
    let report = engine.join()?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.termination.is_fatal() {
        bail!("session ended with {:?}", report.termination);
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("invalid configuration in {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };
    if let Some(notch) = cli.notch {
        config.notch_hz = Some(notch);
    }
    if let Some(border) = cli.border {
        config.classification_border = border;
    }
    if let Some(warmup) = cli.warmup {
        config.warmup_windows = warmup;
    }
    Ok(config)
}

fn designated_positions(config: &PipelineConfig) -> Result<[usize; 2]> {
    let position = |wanted: &str| {
        config
            .channel_names
            .iter()
            .position(|name| name == wanted)
            .with_context(|| format!("designated channel `{wanted}` is not configured"))
    };
    Ok([
        position(&config.designated_channels[0])?,
        position(&config.designated_channels[1])?,
    ])
}

/// Recordings are headerless CSV, one sample per row; `#` lines are skipped.
fn recording_reader() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(csv::Trim::All);
    builder
}

fn read_recording(path: &Path) -> Result<Vec<Vec<f64>>> {
    let reader = recording_reader()
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let channels = collect_channels(reader, &path.display().to_string())?;
    info!(
        "loaded {} samples x {} channels from {}",
        channels.first().map_or(0, Vec::len),
        channels.len(),
        path.display()
    );
    Ok(channels)
}

/// Transposes rows into per-channel series. Ragged rows are rejected by the
/// reader itself.
fn collect_channels<R: io::Read>(mut reader: csv::Reader<R>, origin: &str) -> Result<Vec<Vec<f64>>> {
    let mut channels: Vec<Vec<f64>> = Vec::new();
    for (row_no, record) in reader.deserialize::<Vec<f64>>().enumerate() {
        let row = record.with_context(|| format!("{origin}: bad sample on row {}", row_no + 1))?;
        if channels.is_empty() {
            channels = vec![Vec::new(); row.len()];
        }
        for (channel, value) in channels.iter_mut().zip(row) {
            channel.push(value);
        }
    }
    Ok(channels)
}

/// Prints each decision as a JSON line until the session closes its output
/// queue or `limit` elapses.
fn consume(engine: &EngineHandle, limit: Option<Duration>) -> Result<()> {
    let outputs = engine.outputs();
    let started = Instant::now();
    loop {
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            info!("time limit reached, stopping");
            engine.stop();
        }
        match outputs.pop_timeout(Duration::from_millis(100)) {
            Some(output) => println!("{}", serde_json::to_string(&output)?),
            None if outputs.is_closed() && outputs.is_empty() => return Ok(()),
            None => {}
        }
    }
}
