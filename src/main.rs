use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::fs::File;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap_verbosity_flag::{InfoLevel, Verbosity};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use dsforty_lib::device::list_scanners;
use dsforty_lib::{
    ColorMode, CropMode, DeviceChannel, DeviceConfig, EngineConfig, JpegtranCodec, OutputTarget, PaperWait,
    ScanConfig, Scanner, UsbChannel,
};
use tokio_util::sync::CancellationToken;

/// Used for `--continuous` when no `--output` pattern is given.
const DEFAULT_PATTERN: &str = "scan-{n}.jpg";

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Color {
    /// Black and white (newer firmware only)
    M,
    /// 8-bit grayscale
    G,
    /// 24-bit colour
    C,
}

impl From<Color> for ColorMode {
    fn from(color: Color) -> Self {
        match color {
            Color::M => ColorMode::Mono,
            Color::G => ColorMode::Gray,
            Color::C => ColorMode::Color,
        }
    }
}

/// Scan pages from an Epson DS-40 to JPEG.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Resolution in dpi (300 or 600).
    #[arg(short, long = "res", default_value_t = 300)]
    resolution: u16,
    /// Colour mode: m (mono), g (gray) or c (colour).
    #[arg(short, long, value_enum, default_value_t = Color::C)]
    color: Color,
    /// JPEG quality, 1 to 100.
    #[arg(short = 'Q', long, default_value_t = 100)]
    quality: u8,
    /// Only cut the page to its scanned height, keep the full width.
    #[arg(short = 'n', long, conflicts_with = "raw")]
    no_crop: bool,
    /// Write the scanner's JPEG untouched.
    #[arg(long)]
    raw: bool,
    /// Output file. With --continuous, a pattern where `{n}` is the page number.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Keep scanning pages until interrupted.
    #[arg(short = 'C', long)]
    continuous: bool,
    /// Give up if no paper is fed within this many seconds.
    #[arg(long, value_name = "SECS")]
    paper_timeout: Option<u64>,
    /// Reset the scanner before claiming it.
    #[arg(long)]
    reset: bool,
    /// List attached scanners and exit.
    #[arg(long)]
    list: bool,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

impl Cli {
    fn crop_mode(&self) -> CropMode {
        if self.raw {
            CropMode::None
        } else if self.no_crop {
            CropMode::FixedHeight
        } else {
            CropMode::AutoEdges
        }
    }

    fn engine_config(&self) -> EngineConfig {
        let mut engine = EngineConfig::default();
        if let Some(secs) = self.paper_timeout {
            engine.paper_wait = PaperWait::with_timeout(engine.paper_wait.poll_interval, Duration::from_secs(secs));
        }
        engine
    }

    fn output_target(&self) -> OutputTarget {
        match (&self.output, self.continuous) {
            (Some(path), true) => OutputTarget::numbered(path.to_string_lossy()),
            (None, true) => OutputTarget::numbered(DEFAULT_PATTERN),
            (Some(path), false) => OutputTarget::File(path.clone()),
            (None, false) => OutputTarget::Stdout,
        }
    }
}

fn setup_logging(log_file_path: Option<PathBuf>, verbosity: &Verbosity<InfoLevel>) -> Result<Option<WorkerGuard>> {
    // Stdout may carry the scanned image.
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .without_time();

    let (file_layer, guard) = if let Some(ref path) = log_file_path {
        let log_file = File::create(path).with_context(|| format!("Failed to create log file at: {:?}", path))?;
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(log_file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    // INFO by default, DEBUG with -v, TRACE with -vv; RUST_LOG wins.
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file_path {
        info!("Logging to file: {:?}", path);
    }

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let guard = setup_logging(cli.log_file.clone(), &cli.verbose)?;

    if let Err(e) = run(cli).await {
        error!("Scan failed: {:#}", e);
        // process::exit skips destructors; flush the file log first.
        drop(guard);
        process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let device_config = DeviceConfig {
        reset_before_claim: cli.reset,
        ..DeviceConfig::ds40()
    };

    if cli.list {
        let scanners = list_scanners(&device_config).context("Failed to enumerate USB devices")?;
        if scanners.is_empty() {
            info!("No DS-40 scanners found.");
        }
        for (i, scanner) in scanners.iter().enumerate() {
            info!(
                "Scanner #{}: Bus: {:03}, Address: {:03}, Product: {}, Serial: {}",
                i + 1,
                scanner.bus,
                scanner.address,
                scanner.product.as_deref().unwrap_or("<Not available>"),
                scanner.serial.as_deref().unwrap_or("<Not available>")
            );
        }
        return Ok(());
    }

    let config = ScanConfig::new(cli.resolution, cli.color.into(), cli.quality, cli.crop_mode())
        .context("Invalid scan settings")?;
    let engine = cli.engine_config();
    let mut output = cli.output_target();

    let channel = UsbChannel::open(&device_config)
        .await
        .context("Failed to open the scanner")?;
    let mut scanner = Scanner::new(channel, JpegtranCodec::new(), config, engine);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping after the current page.");
                cancel.cancel();
            }
        }
    });

    let result = if cli.continuous {
        scanner
            .run_continuous(&mut output, &cancel)
            .await
            .map(|pages| info!("Saved {} page(s).", pages))
    } else {
        scanner.run_once(&mut output, &cancel).await.map(|page| {
            info!(
                bytes = page.jpeg.len(),
                raw_bytes = page.raw_len,
                height = page.final_height,
                "Page done."
            )
        })
    };

    let (mut channel, _) = scanner.into_parts();
    if let Err(e) = channel.close().await {
        warn!("Failed to release the scanner: {}", e);
    }

    result.context("Scanning stopped")
}
