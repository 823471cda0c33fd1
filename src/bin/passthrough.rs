//! Passthrough demo
//!
//! Runs the frame pipeline from a tone generator or raw PCM on stdin to
//! stdout or a null device, logging input levels while it runs.
//!
//! Usage: `passthrough [tone[:HZ] | stdin] [null | stdout] [SECONDS]`
//!
//! Logs go to stderr so stdout can carry PCM.

use anyhow::{bail, Context, Result};
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pcm_passthrough::{
    audio::{
        AudioProcessor, FrameConsumer, FrameSnapshot, MonitorHandle, NullSink, ReaderSource,
        ToneSource, VuMeter, WriterSink,
    },
    config::AppConfig,
};

enum SourceKind {
    Tone(f64),
    Stdin,
}

enum SinkKind {
    Null,
    Stdout,
}

fn parse_source(arg: Option<&str>) -> Result<SourceKind> {
    match arg {
        None | Some("tone") => Ok(SourceKind::Tone(440.0)),
        Some("stdin") => Ok(SourceKind::Stdin),
        Some(other) => match other.strip_prefix("tone:") {
            Some(hz) => Ok(SourceKind::Tone(
                hz.parse().with_context(|| format!("Invalid tone frequency: {hz}"))?,
            )),
            None => bail!("Unknown source: {other}"),
        },
    }
}

fn parse_sink(arg: Option<&str>) -> Result<SinkKind> {
    match arg {
        None | Some("null") => Ok(SinkKind::Null),
        Some("stdout") => Ok(SinkKind::Stdout),
        Some(other) => bail!("Unknown sink: {other}"),
    }
}

/// Tracks the loudest sample seen in the snapshot history
#[derive(Default)]
struct PeakTracker {
    peak: f32,
    frames: u64,
}

impl FrameConsumer for PeakTracker {
    fn consume(&mut self, snapshot: &FrameSnapshot) {
        let frame_peak = snapshot.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        self.peak = self.peak.max(frame_peak);
        self.frames += 1;
    }
}

fn vu_bar(level: f32) -> String {
    const WIDTH: usize = 20;
    let filled = (level * WIDTH as f32).round() as usize;
    format!("{}{}", "#".repeat(filled), "-".repeat(WIDTH - filled.min(WIDTH)))
}

async fn monitor_levels(monitor: MonitorHandle, poll: Duration) {
    let vu = VuMeter::default();
    let mut peaks = PeakTracker::default();
    let mut interval = tokio::time::interval(poll);
    let mut last_report = Instant::now();

    loop {
        interval.tick().await;
        monitor.feed(&mut peaks);

        let Some(dbfs) = monitor.snapshot_input().loudness_dbfs else {
            continue;
        };
        let reading = vu.reading(dbfs);
        tracing::debug!("Input level {:.1} dBFS ({:?})", dbfs, reading.zone);

        if last_report.elapsed() >= Duration::from_secs(1) {
            tracing::info!(
                "Input {:>6.1} dBFS [{}] {:?}, peak {:.3} over {} frames, {} snapshots dropped",
                dbfs,
                vu_bar(reading.level),
                reading.zone,
                peaks.peak,
                peaks.frames,
                monitor.history().evicted()
            );
            peaks = PeakTracker::default();
            last_report = Instant::now();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let source_kind = parse_source(args.first().map(String::as_str))?;
    let sink_kind = parse_sink(args.get(1).map(String::as_str))?;
    let time_limit = args
        .get(2)
        .map(|s| s.parse::<f64>().map(Duration::from_secs_f64))
        .transpose()
        .context("Invalid duration")?;

    let config = match std::env::var("PCM_PASSTHROUGH_CONFIG") {
        Ok(path) => AppConfig::load(Path::new(&path))
            .with_context(|| format!("Failed to load config from {path}"))?,
        Err(_) => AppConfig::load_or_default()?,
    };
    let pipeline = config.pipeline;

    let mut processor = AudioProcessor::from_app_config(&config)?;
    match (source_kind, sink_kind) {
        (SourceKind::Tone(hz), sink) => {
            tracing::info!("Source: {:.1} Hz tone", hz);
            let source = ToneSource::new(pipeline.sample_format()?, pipeline.sample_rate_hz, hz, 0.5)
                .paced(true);
            match sink {
                SinkKind::Null => processor.bind_devices(source, NullSink::new())?,
                SinkKind::Stdout => processor.bind_devices(source, WriterSink::new(io::stdout()))?,
            }
        }
        (SourceKind::Stdin, sink) => {
            tracing::info!("Source: raw PCM on stdin");
            let source = ReaderSource::new(io::stdin());
            match sink {
                SinkKind::Null => processor.bind_devices(source, NullSink::new())?,
                SinkKind::Stdout => processor.bind_devices(source, WriterSink::new(io::stdout()))?,
            }
        }
    }

    processor.start()?;

    let poll = Duration::from_millis(config.monitor.poll_interval_ms.max(1));
    let monitor_task = tokio::spawn(monitor_levels(processor.monitor(), poll));

    let stop = processor.stop_handle();
    let events = processor.events();
    let finished = tokio::task::spawn_blocking(move || events.recv().ok());
    let limit = async {
        match time_limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };

    tracing::info!("Running - press Ctrl+C to stop");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Ctrl+C received, stopping"),
        _ = limit => tracing::info!("Time limit reached, stopping"),
        event = finished => tracing::info!("Processor exited on its own: {:?}", event.ok().flatten()),
    }
    stop.stop();

    // Joining the loop thread blocks until the in-flight frame completes
    let (outcome, stats) = tokio::task::spawn_blocking(move || {
        let outcome = processor.wait();
        (outcome, processor.stats())
    })
    .await?;
    monitor_task.abort();

    tracing::info!(
        "Stats: {} frames processed, {} samples clamped",
        stats.frames_processed,
        stats.samples_clamped
    );
    let reason = outcome?;
    tracing::info!("Stopped: {:?}", reason);
    Ok(())
}
