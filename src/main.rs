//! CLI entry point for the FootSole logger.
//!
//! # Usage
//!
//! Record 60 seconds of the right insole from a capture replay:
//! ```bash
//! footsole-logger record --replay capture.bin
//! ```
//!
//! Record the left insole over USB serial until Ctrl+C:
//! ```bash
//! footsole-logger record --left --serial /dev/ttyACM0 --until-end
//! ```
//!
//! Show the configuration after file and environment overrides:
//! ```bash
//! FOOTSOLE_SESSION__BATCH_ROWS=32 footsole-logger config
//! ```
//!
//! Show the first rows of a session file:
//! ```bash
//! footsole-logger inspect left_2024-03-09-14-05-07.h5 --nrows 3
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use footsole_daq::config::{LoggerConfig, DEFAULT_CONFIG_PATH};
use footsole_daq::logging;
use footsole_daq::protocol::ROW_WIDTH;
use footsole_daq::session::{shutdown_channel, SessionController, SessionReport, Side};
use footsole_daq::storage::read_datasets;
use footsole_daq::transport::{ReaderTransport, Transport};
use tracing::{info, warn};

/// Readings shown per row by `inspect`.
const INSPECT_READINGS: usize = 8;

#[derive(Parser)]
#[command(name = "footsole-logger")]
#[command(about = "Record FootSole pressure-insole frames into an append-only dataset", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record one session
    Record(RecordArgs),

    /// Print the effective configuration as TOML
    Config,

    /// Print the shape and first and last rows of a session file
    Inspect {
        /// Session file (.h5)
        file: PathBuf,

        /// Rows to print per dataset
        #[arg(long, default_value_t = 3)]
        nrows: usize,
    },
}

#[derive(Args)]
#[command(group(ArgGroup::new("source").required(true).args(["replay", "serial"])))]
struct RecordArgs {
    /// Device name to subscribe to
    #[arg(long)]
    name: Option<String>,

    /// Record the left insole (default: configured side)
    #[arg(long, conflicts_with = "right")]
    left: bool,

    /// Record the right insole (default: configured side)
    #[arg(long)]
    right: bool,

    /// Recording time in seconds
    #[arg(long, conflicts_with = "until_end")]
    duration: Option<u64>,

    /// Record until the source ends or Ctrl+C
    #[arg(long)]
    until_end: bool,

    /// Samples per flush
    #[arg(long)]
    batch_rows: Option<usize>,

    /// Directory for the session file
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Exact session file, overriding the generated name
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Replay a raw capture file
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Pause between replayed chunks, in milliseconds
    #[arg(long, default_value_t = 0, requires = "replay")]
    replay_interval_ms: u64,

    /// Read from a USB serial port (requires the tokio_serial feature)
    #[arg(long)]
    serial: Option<String>,

    /// Serial baud rate
    #[arg(long, default_value_t = 115_200, requires = "serial")]
    baud: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = LoggerConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        config.application.log_level = level;
    }
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Record(args) => record(config, args).await,
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Commands::Inspect { file, nrows } => inspect(file, nrows),
    }
}

async fn record(mut config: LoggerConfig, args: RecordArgs) -> Result<()> {
    if let Some(name) = args.name {
        config.device.name = name;
    }
    if args.left {
        config.device.side = Side::Left;
    } else if args.right {
        config.device.side = Side::Right;
    }
    if let Some(seconds) = args.duration {
        config.session.duration = Duration::from_secs(seconds);
        config.session.until_end_of_stream = false;
    }
    if args.until_end {
        config.session.until_end_of_stream = true;
    }
    if let Some(rows) = args.batch_rows {
        config.session.batch_rows = rows;
    }
    if let Some(dir) = args.output_dir {
        config.storage.output_dir = dir;
    }
    config.validate().map_err(anyhow::Error::msg)?;

    let mut session = config.session_config();
    session.output_path = args.output;
    let controller = SessionController::new(session);
    let read_chunk_bytes = config.session.read_chunk_bytes;

    let report = if let Some(path) = args.replay {
        let transport = ReaderTransport::open_file(&path, read_chunk_bytes)
            .await?
            .with_chunk_interval(Duration::from_millis(args.replay_interval_ms));
        run_session(&controller, transport).await?
    } else if let Some(port) = args.serial {
        record_serial(&controller, &port, args.baud, read_chunk_bytes).await?
    } else {
        bail!("no source given; use --replay or --serial");
    };

    println!("{report}");
    report.ensure_clean()?;
    Ok(())
}

#[cfg(feature = "tokio_serial")]
async fn record_serial(
    controller: &SessionController,
    port: &str,
    baud: u32,
    read_chunk_bytes: usize,
) -> Result<SessionReport> {
    let transport = ReaderTransport::open_serial(port, baud, read_chunk_bytes)?;
    run_session(controller, transport).await
}

#[cfg(not(feature = "tokio_serial"))]
async fn record_serial(
    _controller: &SessionController,
    port: &str,
    _baud: u32,
    _read_chunk_bytes: usize,
) -> Result<SessionReport> {
    bail!("cannot open {port}: rebuild with --features tokio_serial for serial input")
}

async fn run_session<T: Transport>(
    controller: &SessionController,
    transport: T,
) -> Result<SessionReport> {
    let (trigger, signal) = shutdown_channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl+C received, closing session");
                trigger.trigger();
            }
            Err(e) => warn!(error = %e, "Cannot listen for Ctrl+C"),
        }
    });

    let report = controller.run(transport, signal).await?;
    Ok(report)
}

fn inspect(file: PathBuf, nrows: usize) -> Result<()> {
    let datasets =
        read_datasets(&file).with_context(|| format!("reading {}", file.display()))?;
    if datasets.is_empty() {
        println!("{}: no datasets", file.display());
        return Ok(());
    }

    for dataset in &datasets {
        let (rows, columns) = dataset.shape();
        println!("{} {}: {rows} x {columns}", file.display(), dataset.name());
        if columns != ROW_WIDTH {
            println!("  (not a {ROW_WIDTH}-column sample dataset)");
        }
        let head = nrows.min(rows);
        let tail_start = rows.saturating_sub(nrows).max(head);
        for index in 0..head {
            print_row(dataset.row(index), index);
        }
        if tail_start > head {
            println!("  ...");
        }
        for index in tail_start..rows {
            print_row(dataset.row(index), index);
        }
    }
    Ok(())
}

fn print_row(row: Option<&[f64]>, index: usize) {
    let Some((timestamp, readings)) = row.and_then(|r| r.split_first()) else {
        return;
    };
    let shown: Vec<String> = readings
        .iter()
        .take(INSPECT_READINGS)
        .map(|v| format!("{v:.0}"))
        .collect();
    let more = if readings.len() > INSPECT_READINGS { " ..." } else { "" };
    println!("  [{index}] t={timestamp:.0} ns  {}{more}", shown.join(" "));
}
