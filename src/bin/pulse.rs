//! Pulse CLI - Command-line interface for Synheart Pulse
//!
//! Commands:
//! - simulate: Run a full collection session against the simulated sensor
//! - boundary: Search the decision boundary of a recorded session
//! - decode: Decode a single notification payload
//! - config: Show (and optionally initialise) the collector configuration

use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use synheart_pulse::collector::DEFAULT_CHANNEL_CAPACITY;
use synheart_pulse::gatt::GattCentral;
use synheart_pulse::simulated::SimulatedCentral;
use synheart_pulse::{
    stop_signal, BoundaryOptimizer, Collector, CollectorConfig, FrameDecoder, PulseError,
    ScoreTarget, SessionOptions, SessionReport, PRODUCER_NAME, PULSE_VERSION,
};

const DEFAULT_CONFIG_PATH: &str = "pulse-config.json";

/// Pulse - chest-strap telemetry collection and HRV state tracking
#[derive(Parser)]
#[command(name = "pulse")]
#[command(author = "Synheart AI Inc")]
#[command(version = PULSE_VERSION)]
#[command(about = "Collect heart rate, RR and ECG sessions and analyse HRV states", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a collection session against the simulated sensor
    Simulate {
        /// Sensor address passed to the central
        #[arg(long, default_value = "sim:h10")]
        address: String,

        /// Stop after this many seconds (default: run until Ctrl-C)
        #[arg(long)]
        duration: Option<u64>,

        /// Experiment name used in output file names
        #[arg(long, default_value = "session")]
        experiment: String,

        /// Participant identifier used in output file names
        #[arg(long, default_value = "anonymous")]
        participant: String,

        /// Directory for the recorded files
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,

        /// Also capture the PMD ECG stream
        #[arg(long)]
        ecg: bool,

        /// Add a current_time column with the local time of day
        #[arg(long)]
        current_time: bool,

        /// Record sdNN and state with every RR row
        #[arg(long)]
        record_sdnn: bool,

        /// Print a live line once per second
        #[arg(long)]
        graph: bool,

        /// Collector configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Synthetic heart rate period in milliseconds
        #[arg(long, default_value = "1000")]
        period_ms: u64,

        /// Notifications buffered ahead of the pipeline
        #[arg(long, default_value_t = DEFAULT_CHANNEL_CAPACITY)]
        channel_capacity: usize,
    },

    /// Search the decision boundary of a recorded session
    Boundary {
        /// CSV file with std and real_state columns
        #[arg(short, long)]
        input: PathBuf,

        /// What each candidate split is scored against
        #[arg(long, value_enum, default_value = "std")]
        target: TargetArg,

        /// Output the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decode one notification payload given as hex
    Decode {
        /// Notification channel
        #[arg(long, value_enum)]
        channel: ChannelArg,

        /// Payload bytes as hex (e.g. 10400004)
        payload: String,
    },

    /// Print the effective collector configuration
    Config {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        path: PathBuf,

        /// Write the default configuration when the file does not exist
        #[arg(long)]
        init: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum TargetArg {
    /// The sdNN values themselves
    Std,
    /// The annotated real_state column
    RealState,
}

impl From<TargetArg> for ScoreTarget {
    fn from(target: TargetArg) -> Self {
        match target {
            TargetArg::Std => ScoreTarget::Std,
            TargetArg::RealState => ScoreTarget::RealState,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum ChannelArg {
    /// Heart Rate Measurement (0x2A37)
    Hr,
    /// PMD ECG data
    Ecg,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), PulseCliError> {
    match cli.command {
        Commands::Simulate {
            address,
            duration,
            experiment,
            participant,
            output_dir,
            ecg,
            current_time,
            record_sdnn,
            graph,
            config,
            period_ms,
            channel_capacity,
        } => {
            let options = SessionOptions {
                experiment_name: experiment,
                participant_id: participant,
                capture_ecg: ecg,
                save_current_time: current_time,
                record_sdnn,
                display_graph: graph,
                output_dir,
            };
            let config = CollectorConfig::load(&config);
            cmd_simulate(&address, duration, options, config, period_ms, channel_capacity)
        }

        Commands::Boundary { input, target, json } => cmd_boundary(input, target.into(), json),

        Commands::Decode { channel, payload } => cmd_decode(channel, &payload),

        Commands::Config { path, init } => cmd_config(&path, init),
    }
}

fn cmd_simulate(
    address: &str,
    duration: Option<u64>,
    options: SessionOptions,
    config: CollectorConfig,
    period_ms: u64,
    channel_capacity: usize,
) -> Result<(), PulseCliError> {
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;

    let report = runtime.block_on(async {
        let central = SimulatedCentral::new(Duration::from_millis(period_ms.max(1)));
        let client = central.connect(address).await.map_err(PulseError::from)?;

        let base = options.output_base();
        let display_graph = options.display_graph;
        let collector = Collector::new(config, options).with_channel_capacity(channel_capacity);
        let (handle, stop) = stop_signal();

        tokio::spawn(async move {
            match duration {
                Some(secs) => {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                        _ = tokio::signal::ctrl_c() => {}
                    }
                }
                None => {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        // Keep the handle alive: dropping it would stop the session
                        log::warn!("Cannot listen for Ctrl-C: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            log::info!("Stopping session");
            handle.stop();
        });

        if display_graph {
            let live = collector.live_feed();
            let mut stop = stop.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(1));
                let mut cursor = 0;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = stop.stopped() => break,
                    }
                    let (points, next) = live.snapshot_since(cursor);
                    cursor = next;
                    if let Some(point) = points.last() {
                        let sdnn = point
                            .sdnn
                            .map(|v| format!("{:.1}", v))
                            .unwrap_or_else(|| "-".to_string());
                        println!(
                            "x={:>8.1}  hr={:>3}  rr={:>4}  sdnn={:>6}  state={}",
                            point.x,
                            point.hr,
                            point.rr,
                            sdnn,
                            point.state.index()
                        );
                    }
                }
            });
        }

        let taps = if atty::is(atty::Stream::Stdin) {
            log::info!("Type b + Enter to record a tap");
            Some(spawn_tap_reader())
        } else {
            None
        };

        let result = collector.run(&*client, stop, taps).await;
        if let Err(e) = client.disconnect().await {
            log::warn!("Disconnect failed: {}", e);
        }

        let mut session = result?;
        session.save(&base)?;
        Ok::<SessionReport, PulseCliError>(session.report)
    })?;

    runtime.shutdown_background();

    let output = SimulateOutput {
        producer: PRODUCER_NAME.to_string(),
        version: PULSE_VERSION.to_string(),
        report,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Forward `b` lines from stdin as tap markers
fn spawn_tap_reader() -> tokio::sync::mpsc::Receiver<()> {
    let (tx, rx) = tokio::sync::mpsc::channel(16);
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().eq_ignore_ascii_case("b") && tx.blocking_send(()).is_err() {
                break;
            }
        }
    });
    rx
}

fn cmd_boundary(input: PathBuf, target: ScoreTarget, json: bool) -> Result<(), PulseCliError> {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let result = runtime.block_on(BoundaryOptimizer::run_in_background(input, target))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("Boundary Search");
    println!("===============");
    println!("Rows:       {}", result.std_values.len());
    println!("Candidates: {}", result.midpoints.len());
    match result.best_threshold {
        Some(threshold) => {
            println!("Best:       {:.4}", threshold);
            println!("Score:      {:.6}", result.best_score);
        }
        None => println!("Best:       none (no split scores above zero)"),
    }

    Ok(())
}

fn cmd_decode(channel: ChannelArg, payload: &str) -> Result<(), PulseCliError> {
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = hex::decode(&cleaned).map_err(|e| PulseCliError::InvalidHex(e.to_string()))?;

    let json = match channel {
        ChannelArg::Hr => serde_json::to_string_pretty(
            &FrameDecoder::decode_heart_rate(&bytes).map_err(PulseError::from)?,
        )?,
        ChannelArg::Ecg => serde_json::to_string_pretty(
            &FrameDecoder::decode_ecg(&bytes).map_err(PulseError::from)?,
        )?,
    };
    println!("{}", json);
    Ok(())
}

fn cmd_config(path: &Path, init: bool) -> Result<(), PulseCliError> {
    if init && !path.exists() {
        CollectorConfig::default().save(path)?;
        log::info!("Wrote default configuration to {}", path.display());
    }

    let config = CollectorConfig::load(path);
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

// Error types

#[derive(Debug)]
enum PulseCliError {
    Io(io::Error),
    Pulse(PulseError),
    Json(serde_json::Error),
    InvalidHex(String),
}

impl From<io::Error> for PulseCliError {
    fn from(e: io::Error) -> Self {
        PulseCliError::Io(e)
    }
}

impl From<PulseError> for PulseCliError {
    fn from(e: PulseError) -> Self {
        PulseCliError::Pulse(e)
    }
}

impl From<serde_json::Error> for PulseCliError {
    fn from(e: serde_json::Error) -> Self {
        PulseCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<PulseCliError> for CliError {
    fn from(e: PulseCliError) -> Self {
        match e {
            PulseCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            PulseCliError::Pulse(e) => {
                let (code, hint) = match &e {
                    PulseError::Decode(_) => ("DECODE_ERROR", "Check the payload length and flags"),
                    PulseError::Connection(_) => ("CONNECTION_ERROR", "Check the sensor is on and in range"),
                    PulseError::Config(_) => ("CONFIG_ERROR", "Run 'pulse config --init' to write defaults"),
                    PulseError::Io(_) => ("IO_ERROR", "Check file paths and permissions"),
                    PulseError::Csv(_) | PulseError::MissingColumn(_) | PulseError::ParseError(_) => {
                        ("PARSE_ERROR", "Input needs numeric std and real_state columns")
                    }
                    PulseError::JsonError(_) => ("JSON_ERROR", "Check JSON syntax"),
                    PulseError::TaskFailed(_) => ("TASK_FAILED", "Retry the command"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            PulseCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            PulseCliError::InvalidHex(msg) => CliError {
                code: "INVALID_HEX".to_string(),
                message: msg,
                hint: Some("Pass the payload as hex digits, e.g. 10400004".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct SimulateOutput {
    producer: String,
    version: String,
    report: SessionReport,
}
