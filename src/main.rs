//! E-Nose acquisition agent CLI.
//!
//! Headless front end for the ingestion and session-control core: binds the
//! producer-facing listeners, drives a recording session, and exports it.

use anyhow::Context;
use clap::{Parser, Subcommand};
use crossbeam_channel::bounded;
use enose_acquisition::{
    command::CommandClient,
    config::Config,
    edge_impulse::BlockingEdgeImpulseClient,
    export,
    listener::{IngestListener, ListenerKind},
    protocol::CommandRequest,
    session::{ConnectionHealth, DisplaySink, InfluxStatusCounter, SamplingState, SessionController},
    SensorFrame, VERSION,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "enose-acq")]
#[command(version = VERSION)]
#[command(about = "E-nose telemetry ingestion and session control", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a sampling session and export it
    Run {
        /// Name of the sample under test
        #[arg(long, default_value = "sample")]
        sample_name: String,

        /// Sample type, used as the Edge Impulse label (defaults from config)
        #[arg(long)]
        sample_type: Option<String>,

        /// Stop automatically after this many seconds (Ctrl+C otherwise)
        #[arg(long)]
        duration: Option<u64>,

        /// Only listen; do not send START_SAMPLING to the producer
        #[arg(long)]
        no_start: bool,

        /// Export format on completion (csv, json, both, none)
        #[arg(long, default_value = "both")]
        save: String,

        /// Upload the session to Edge Impulse on completion
        #[arg(long)]
        upload: bool,

        /// Output directory for exports (defaults from config)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Send a one-shot command to the producer
    Send {
        /// Directive: start or stop
        directive: String,
    },

    /// Show configuration
    Config,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            sample_name,
            sample_type,
            duration,
            no_start,
            save,
            upload,
            output,
        } => cmd_run(
            &sample_name,
            sample_type,
            duration,
            no_start,
            &save,
            upload,
            output,
        ),
        Commands::Send { directive } => cmd_send(&directive),
        Commands::Config => cmd_config(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

/// Console implementation of the display sink.
struct ConsoleSink {
    relay_connected: Option<bool>,
}

impl ConsoleSink {
    fn new() -> Self {
        Self {
            relay_connected: None,
        }
    }
}

impl DisplaySink for ConsoleSink {
    fn on_frame_appended(&mut self, frame: &SensorFrame) {
        // 10 Hz stream; a line every 5 seconds is enough for a console.
        if frame.sample_index % 50 == 0 {
            println!(
                "[{:7.1}s] samples: {}  CO (MCS): {:.2} ppm  NO2 (GM): {:.2} ppm",
                frame.time_offset(),
                frame.sample_index,
                frame.channels.co_mcs,
                frame.channels.no2_gm
            );
        }
    }

    fn on_connection_health(&mut self, health: ConnectionHealth) {
        let label = match health {
            ConnectionHealth::Waiting => "waiting",
            ConnectionHealth::Connected => "connected",
            ConnectionHealth::Sampling => "sampling",
        };
        println!("Producer link: {label}");
    }

    fn on_influx_status(&mut self, status: &InfluxStatusCounter) {
        if self.relay_connected != Some(status.connected) {
            self.relay_connected = Some(status.connected);
            if status.connected {
                println!("InfluxDB relay: connected");
            } else {
                println!("InfluxDB relay: write failed");
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_run(
    sample_name: &str,
    sample_type: Option<String>,
    duration: Option<u64>,
    no_start: bool,
    save: &str,
    upload: bool,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    println!("E-Nose Acquisition Agent v{VERSION}");
    println!();

    let config = Config::load().unwrap_or_default();
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: could not create export directory: {e}");
    }

    let sample_type = sample_type.unwrap_or_else(|| config.default_sample_type.clone());

    let (tx, rx) = bounded(10_000);

    // Bind both listeners before starting anything; a taken port is the one
    // startup failure that aborts.
    let mut data_listener = IngestListener::bind(
        config.data_addr()?,
        ListenerKind::Data,
        tx.clone(),
    )
    .context("could not bind data listener")?;
    let mut status_listener = IngestListener::bind(
        config.status_addr()?,
        ListenerKind::Status,
        tx,
    )
    .context("could not bind status listener")?;

    data_listener.start()?;
    status_listener.start()?;

    println!("Data listener:   {}", data_listener.local_addr());
    println!("Status listener: {}", status_listener.local_addr());
    println!("Command port:    {}", config.command_addr()?);
    println!("Sample: {sample_name} ({sample_type})");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let commands = CommandClient::new(config.command_addr()?);
    let mut controller = SessionController::with_sink(Box::new(ConsoleSink::new()));

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("could not install Ctrl+C handler")?;

    if !no_start {
        controller
            .start(&commands)
            .context("producer rejected START_SAMPLING")?;
    }

    let started = Instant::now();
    let deadline = duration.map(Duration::from_secs);

    while running.load(Ordering::SeqCst) {
        if let Some(limit) = deadline {
            if started.elapsed() >= limit {
                break;
            }
        }

        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => controller.handle_event(event),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                eprintln!("Listeners disconnected unexpectedly");
                break;
            }
        }
    }

    if controller.state() == SamplingState::Sampling {
        println!();
        println!("Stopping session...");
        if let Err(e) = controller.stop(&commands) {
            eprintln!("Warning: could not send STOP_SAMPLING: {e}");
        }
    }

    // Stop both listener threads before touching the recorded data, so no
    // socket read races process teardown.
    data_listener.stop();
    status_listener.stop();

    let snapshot = controller.snapshot(sample_name, &sample_type);
    let status = controller.influx_status();

    println!();
    println!("Session complete:");
    println!("  Samples recorded:     {}", snapshot.len());
    println!("  Relay records sent:   {}", status.records_sent);

    if snapshot.is_empty() {
        if save != "none" || upload {
            eprintln!("No data recorded; skipping export.");
        }
        return Ok(());
    }

    let export_dir = output.unwrap_or_else(|| config.export_path.clone());

    if save == "csv" || save == "both" {
        let path = export_dir.join(export::default_file_name(&snapshot, "csv"));
        export::write_csv(&snapshot, &path)?;
        println!("  CSV saved:  {}", path.display());
    }
    if save == "json" || save == "both" {
        let path = export_dir.join(export::default_file_name(&snapshot, "json"));
        export::write_json(&snapshot, &path)?;
        println!("  JSON saved: {}", path.display());
    }

    if upload {
        println!("Uploading to Edge Impulse...");
        match BlockingEdgeImpulseClient::new(config.edge_impulse.clone()) {
            Ok(client) => match client.upload(&snapshot) {
                Ok(()) => println!("  Upload complete ({} samples)", snapshot.len()),
                Err(e) => eprintln!("  Upload failed: {e}"),
            },
            Err(e) => eprintln!("  Upload failed: {e}"),
        }
    }

    Ok(())
}

fn cmd_send(directive: &str) -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();
    let commands = CommandClient::new(config.command_addr()?);

    let request = match directive.to_lowercase().as_str() {
        "start" => CommandRequest::StartSampling,
        "stop" => CommandRequest::StopSampling,
        other => anyhow::bail!("unknown directive {other:?} (expected start or stop)"),
    };

    commands
        .send(request)
        .with_context(|| format!("could not send {}", request.as_wire()))?;
    println!("Sent {}", request.as_wire());
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
    Ok(())
}
