// SPDX-License-Identifier: Apache-2.0

use clap::{Parser, ValueEnum};
use rotel_tail::bounded_channel::{BoundedReceiver, bounded};
use rotel_tail::init::args::{EventOutput, TailRun};
use rotel_tail::tail::{ChannelEventSink, EventBatch, TailReceiver};
use std::io::Write;
use std::process::ExitCode;
use tokio::select;
use tower::BoxError;
use tracing::metadata::LevelFilter;
use tracing::{debug, error, info, warn};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Tail files and print their events
    Start(Box<TailRun>),

    /// Return version
    Version,
}

#[derive(Debug, Parser)]
#[command(name = "rotel-tail")]
#[command(bin_name = "rotel-tail")]
#[command(version, about, long_about = None)]
#[command(subcommand_required = true)]
struct Arguments {
    #[arg(
        value_enum,
        long,
        global = true,
        env = "ROTEL_LOG_FORMAT",
        default_value = "text"
    )]
    /// Log format
    log_format: LogFormatArg,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

fn main() -> ExitCode {
    let opt = Arguments::parse();

    match opt.command {
        Some(Commands::Version) => {
            println!("{}", get_version())
        }
        Some(Commands::Start(run)) => {
            // Logs go to stderr, stdout carries events
            let _guard = match setup_logging(&opt.log_format) {
                Ok(guard) => guard,
                Err(e) => {
                    eprintln!("ERROR: failed to setup logging: {}", e);
                    return ExitCode::from(1);
                }
            };

            if let Err(e) = run_tail(run) {
                error!(error = e, "Failed to run tail receiver.");
                return ExitCode::from(1);
            }
        }
        _ => {
            // it shouldn't be possible to get here since we mark a subcommand as
            // required
            error!("Must specify a command");
            return ExitCode::from(2);
        }
    }

    ExitCode::SUCCESS
}

#[tokio::main]
async fn run_tail(run: Box<TailRun>) -> Result<(), BoxError> {
    let config = run.tail_receiver.build_config();
    let (events_tx, mut events_rx) = bounded::<EventBatch>(config.event_queue_size);

    let mut receiver =
        TailReceiver::with_event_sink(config, Box::new(ChannelEventSink::new(events_tx)))?;
    receiver.start()?;

    let mut emitted: u64 = 0;
    loop {
        select! {
            _ = signal_wait() => {
                info!("Shutdown signal received.");
                break;
            },
            batch = events_rx.next() => {
                match batch {
                    Some(batch) => emitted += write_batch(run.event_output, &batch)?,
                    None => {
                        warn!("Unexpected close of the event queue.");
                        break;
                    }
                }
            },
        }
    }

    // Joining the reactor thread blocks
    let steps = tokio::task::spawn_blocking(move || receiver.shutdown()).await??;
    debug!(steps = steps.len(), "Shutdown complete");

    emitted += drain(run.event_output, &mut events_rx)?;
    info!(emitted, "Tail receiver exited");
    Ok(())
}

fn drain(output: EventOutput, rx: &mut BoundedReceiver<EventBatch>) -> Result<u64, BoxError> {
    let mut emitted = 0;
    while let Some(batch) = rx.try_recv() {
        emitted += write_batch(output, &batch)?;
    }
    Ok(emitted)
}

fn write_batch(output: EventOutput, batch: &EventBatch) -> Result<u64, BoxError> {
    if output == EventOutput::Stdout {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for event in &batch.events {
            let line = serde_json::json!({
                "tag": batch.tag,
                "time": event.time.to_rfc3339(),
                "record": event.record,
            });
            writeln!(out, "{}", line)?;
        }
        out.flush()?;
    }
    Ok(batch.events.len() as u64)
}

type LoggerGuard = tracing_appender::non_blocking::WorkerGuard;

fn setup_logging(log_format: &LogFormatArg) -> Result<LoggerGuard, BoxError> {
    LogTracer::init().expect("Unable to setup log tracer!");

    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;

    if *log_format == LogFormatArg::Json {
        let app_name = format!("{}-{}", env!("CARGO_PKG_NAME"), get_version());
        let bunyan_formatting_layer = BunyanFormattingLayer::new(app_name, non_blocking_writer);
        let subscriber = Registry::default()
            .with(filter)
            .with(JsonStorageLayer)
            .with(bunyan_formatting_layer);
        tracing::subscriber::set_global_default(subscriber).unwrap();
    } else {
        use std::io;
        use std::io::IsTerminal;

        // Skip color codes when not in a terminal
        let use_ansi = io::stderr().is_terminal();

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_target(false)
            .with_level(true)
            .with_ansi(use_ansi)
            .compact();

        let subscriber = Registry::default().with(filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber).unwrap();
    }

    Ok(guard)
}

fn get_version() -> String {
    // Set during CI
    let version_build = option_env!("BUILD_SHORT_SHA").unwrap_or("dev");
    format!("{}-{}", env!("CARGO_PKG_VERSION"), version_build)
}

#[cfg(unix)]
async fn signal_wait() {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut sig_term, mut sig_int) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            _ => {
                error!("Failed to install signal handlers");
                return;
            }
        };
    select! {
        _ = sig_term.recv() => {},
        _ = sig_int.recv() => {},
    }
}

#[cfg(not(unix))]
async fn signal_wait() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", e);
    }
}
