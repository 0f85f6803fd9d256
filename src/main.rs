//! # dshot-gpio
//!
//! Runs a throttle schedule on DShot ESCs wired to Raspberry Pi GPIO pins.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use dshot_gpio::config::{Config, LoggingConfig};
use dshot_gpio::esc::EscDriver;
use dshot_gpio::gpio::{GpioBackend, MmapGpio, RecordingGpio};
use dshot_gpio::runner::{run_phases, RunSummary};
use dshot_gpio::timing::MonotonicClock;

/// Configuration file used when none is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// File name prefix for rolling log files
const LOG_FILE_NAME: &str = "dshot-gpio.log";

/// Main entry point
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (`dshot-gpio [config.toml]`)
///    - Set up logging with tracing subscriber
///    - Build the ESC driver on the memory-mapped or recording backend
///
/// 2. **Run**
///    - Send the configured throttle phases on a blocking worker thread
///    - Handle Ctrl+C by asking the worker to stop between rounds
///
/// 3. **Shutdown**
///    - Send the zero-throttle disarm burst
///    - Drive all used pins low and unmap the registers
///
/// # Errors
///
/// Returns error if:
/// - The configuration file is invalid
/// - GPIO registers cannot be mapped (missing device or privilege)
/// - A frame cannot be sent
///
/// # Examples
///
/// ```bash
/// sudo ./target/release/dshot-gpio config/default.toml
/// ```
///
/// Expected output:
/// ```text
/// INFO dshot_gpio: dshot-gpio v0.1.0 starting...
/// INFO dshot_gpio::gpio::mmap: Mapped GPIO block from /dev/gpiomem at offset 0x0
/// INFO dshot_gpio::esc: DShot150 ready: T = 6667 ns, ...
/// INFO dshot_gpio::runner: Phase 1/3: throttle 48 for 10000 rounds on pins [5, 7, 19, 20]
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let explicit_path = std::env::args().nth(1);
    let config_path = explicit_path
        .clone()
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let use_defaults = explicit_path.is_none() && !Path::new(&config_path).exists();

    let config = if use_defaults {
        Config::default()
    } else {
        Config::load(&config_path).with_context(|| format!("Failed to load {}", config_path))?
    };

    let _log_guard = init_logging(&config.logging);

    info!("dshot-gpio v{} starting...", env!("CARGO_PKG_VERSION"));
    if use_defaults {
        warn!("{} not found, using built-in defaults", config_path);
    } else {
        info!("Loaded configuration from {}", config_path);
    }

    let summary = if config.gpio.dry_run {
        let recorder = RecordingGpio::new(config.gpio.pin_count).count_only();
        let esc = EscDriver::new(recorder.clone(), MonotonicClock::new(), config.driver_settings());
        info!("Dry run: register writes are recorded, not performed");

        let summary = run(esc, &config).await?;
        info!("Dry run recorded {} register writes", recorder.register_writes());
        summary
    } else {
        let backend = MmapGpio::new(config.gpio.mmap_config());
        let esc = EscDriver::new(backend, MonotonicClock::new(), config.driver_settings());
        esc.init()?;

        run(esc, &config).await?
    };

    info!("Total frames sent: {}", summary.frames_sent);
    Ok(())
}

/// Run the configured schedule on a blocking thread until done or Ctrl+C
async fn run<B>(esc: EscDriver<B>, config: &Config) -> Result<RunSummary>
where
    B: GpioBackend + Send + Sync + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let runner = config.runner.clone();

    info!("Press Ctrl+C to stop");

    let mut worker = tokio::task::spawn_blocking({
        let stop = Arc::clone(&stop);
        move || {
            let result = run_phases(&esc, &runner.pins, &runner.phases, runner.disarm_frames, &stop);
            esc.shutdown();
            result
        }
    });

    let result = tokio::select! {
        joined = &mut worker => joined?,

        // Handle Ctrl+C for graceful shutdown
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            stop.store(true, Ordering::Relaxed);
            worker.await?
        }
    };

    Ok(result?)
}

/// Install the console subscriber and, when configured, a daily rolling file
///
/// `RUST_LOG` overrides the configured level. The returned guard flushes the
/// file writer on drop and must live until exit.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (file_layer, guard) = match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    guard
}
