//! labdaq - headless acquisition runner
//!
//! Connects to the instrument, collects one sample window and prints its
//! summary.
//!
//! ```text
//! labdaq [--mock] [--port NAME] [--profile quick|period]
//! ```

use anyhow::{bail, Context};
use clap::Parser;
use labdaq::{
    backend::{BackendMessage, DaqBackend, MockSignal, MockTransport},
    config::{self, AppConfig, SamplingProfile},
    sampling::{SamplingSession, SessionState, WindowSummary},
};
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long a session may take before the runner gives up
const SESSION_LIMIT: Duration = Duration::from_secs(120);

#[derive(Parser, Debug)]
#[command(name = "labdaq")]
#[command(about = "Collect and reduce one sample window from a serial instrument", long_about = None)]
struct Args {
    /// Use the simulated instrument instead of a serial port
    #[arg(long)]
    mock: bool,

    /// Serial port to open; auto-selected when omitted
    #[arg(long)]
    port: Option<String>,

    /// Sampling preset
    #[arg(long, value_parser = ["quick", "period"])]
    profile: Option<String>,
}

/// Install stderr logging plus a daily log file when the data dir is writable
fn init_logging() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,labdaq=debug"));

    let file = config::ensure_app_data_dir().ok().map(|dir| {
        let appender = tracing_appender::rolling::daily(dir, "labdaq.log");
        tracing_appender::non_blocking(appender)
    });
    let (file_layer, guard) = match file {
        Some((writer, guard)) => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer),
            ),
            Some(guard),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}

fn print_summary(summary: &WindowSummary) {
    println!("profile:  {}", summary.profile);
    println!("samples:  {}", summary.samples.len());
    match summary.average {
        Some(avg) => println!("average:  {:.6}", avg),
        None => println!("average:  -"),
    }
    if !summary.block_sums.is_empty() {
        println!("blocks:   {:?}", summary.block_sums);
        for row in &summary.timing {
            println!("  {:>3} periods  {:.6}", row.periods, row.time);
        }
    }
    if summary.outliers.has_outliers() {
        println!("outliers: {:?}", summary.outliers.flagged);
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guard = init_logging();

    tracing::info!("Starting labdaq");

    let mut config = AppConfig::load_or_default();
    if let Some(port) = args.port {
        config.serial.port = Some(port);
    }
    if let Some(name) = args.profile.as_deref() {
        config.sampling = SamplingProfile::preset(name)
            .with_context(|| format!("unknown profile {:?}", name))?;
    }

    let (backend, frontend) = if args.mock {
        let signal = MockSignal::Sine {
            period: 50.0,
            amplitude: 0.002,
            offset: 1.523,
        };
        let (transport, _handle) =
            MockTransport::with_signal(signal, "period", Duration::from_millis(20));
        DaqBackend::with_transport(config.clone(), Box::new(transport))
    } else {
        DaqBackend::new(config.clone())
    };
    let worker = std::thread::spawn(move || backend.run());

    let lines = frontend.subscribe_lines();
    frontend.connect().context("Failed to connect")?;

    let mut session = SamplingSession::new(config.sampling.clone());
    session.start();
    let started = std::time::Instant::now();
    while session.state() == SessionState::Armed {
        session.pump(&lines);
        for msg in frontend.drain() {
            if let BackendMessage::ConnectionError(cause) = msg {
                bail!("Connection lost: {}", cause);
            }
        }
        if let Some(cause) = frontend.status().error() {
            bail!("Connection lost: {}", cause);
        }
        if started.elapsed() > SESSION_LIMIT {
            session.stop();
            tracing::warn!("Session limit reached");
        }
        std::thread::sleep(config.command.idle_poll());
    }

    let result = session.finalize();

    frontend.disconnect();
    frontend.shutdown();
    if worker.join().is_err() {
        tracing::error!("Backend thread panicked");
    }

    let summary = result.context("Sampling session produced no result")?;
    print_summary(&summary);

    tracing::info!("Shutting down...");
    Ok(())
}
