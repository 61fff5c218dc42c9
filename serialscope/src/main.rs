/*!
# Serial Scope

Headless capture front-end for framed serial telemetry. Raw bytes from a
device node, a UDP bridge or the built-in generator are decoded into
per-channel samples and printed as JSON lines or recorded to disk.

## Usage

### Capture from the configured source
```bash
serialscope --config serialscope.toml
```

### Decode a pty fed by the generator
```bash
serialscope generate --output /dev/pts/4 --rate-hz 5000 --corrupt-every 100 &
serialscope capture --path /dev/pts/5 --record-dir ./captures
```

### Bench test without hardware
```bash
serialscope capture --synthetic
```
*/

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, Level};

mod capture;
mod config;
mod generator;
mod output;

use capture::SerialCapture;
use config::{AppConfig, SourceKind};
use generator::SyntheticGenerator;

#[derive(Parser)]
#[command(name = "serialscope")]
#[command(about = "Framed serial stream capture and decoding")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "serialscope.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Disable logging
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture and decode a byte stream (default)
    Capture {
        /// Read from a device node, pty, file, or `-` for stdin
        #[arg(long, conflicts_with_all = ["udp", "synthetic"])]
        path: Option<String>,

        /// Receive datagrams on ADDR:PORT
        #[arg(long, conflicts_with = "synthetic")]
        udp: Option<SocketAddr>,

        /// Decode frames from the built-in generator
        #[arg(long)]
        synthetic: bool,

        /// Record decoded frames under this directory
        #[arg(long)]
        record_dir: Option<String>,

        /// Do not print decoded batches to stdout
        #[arg(long)]
        no_live: bool,
    },

    /// Write a synthetic frame stream
    Generate {
        /// Destination path, `-` for stdout
        #[arg(short, long, default_value = "-")]
        output: String,

        /// Stop after this many frames
        #[arg(short = 'n', long)]
        count: Option<u64>,

        /// Frames per second
        #[arg(long)]
        rate_hz: Option<f64>,

        /// Insert a garbage byte before every Nth frame
        #[arg(long)]
        corrupt_every: Option<u64>,
    },

    /// Print the configured frame layout
    Scheme,

    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = "serialscope.toml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries decoded data, logs go to stderr
    if !cli.quiet {
        let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_max_level(level)
            .init();
    }

    match cli.command {
        Some(Commands::Capture {
            path,
            udp,
            synthetic,
            record_dir,
            no_live,
        }) => {
            let mut config = AppConfig::load_or_default(&cli.config)?;
            if let Some(path) = path {
                config.source.kind = SourceKind::File;
                config.source.path = path;
            }
            if let Some(addr) = udp {
                config.source.kind = SourceKind::Udp;
                config.source.udp_bind_addr = addr.ip().to_string();
                config.source.udp_port = addr.port();
            }
            if synthetic {
                config.source.kind = SourceKind::Synthetic;
            }
            if record_dir.is_some() {
                config.output.record_dir = record_dir;
            }
            if no_live {
                config.output.live = false;
            }
            run_capture(config)
        }

        Some(Commands::Generate {
            output,
            count,
            rate_hz,
            corrupt_every,
        }) => {
            let mut config = AppConfig::load_or_default(&cli.config)?;
            if let Some(rate_hz) = rate_hz {
                config.generator.rate_hz = rate_hz;
            }
            if let Some(corrupt_every) = corrupt_every {
                config.generator.corrupt_every = corrupt_every;
            }
            run_generator(config, &output, count)
        }

        Some(Commands::Scheme) => {
            let config = AppConfig::load_or_default(&cli.config)?;
            print_scheme(&config)
        }

        Some(Commands::Config { output }) => generate_config_file(output),

        None => {
            let config = AppConfig::load_or_default(&cli.config)?;
            run_capture(config)
        }
    }
}

/// Install a Ctrl+C handler that clears `running`
fn install_stop_handler(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        info!("🛑 Received Ctrl+C, shutting down gracefully...");
        running.store(false, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl+C handler")
}

/// Run the capture pipeline until the source ends or Ctrl+C
fn run_capture(config: AppConfig) -> Result<()> {
    info!("🚀 Starting capture ({:?} source)", config.source.kind);

    let mut capture = SerialCapture::new(config)?;
    install_stop_handler(capture.get_running_flag())?;

    let summary = capture.start().context("Capture failed")?;

    info!(
        "✅ Capture completed: {} frames, {} bytes discarded",
        summary.decoder.frames, summary.decoder.error_bytes
    );
    info!(
        "   Last rates: {:.0} packets/s, {:.0} errors/s",
        summary.packet_rate, summary.error_rate
    );
    Ok(())
}

/// Stream generated frames to a path or stdout
fn run_generator(config: AppConfig, output: &str, count: Option<u64>) -> Result<()> {
    config.validate()?;
    let scheme = config.parser.to_scheme()?;
    let generator = SyntheticGenerator::new(scheme, &config.generator);

    let running = Arc::new(AtomicBool::new(true));
    install_stop_handler(Arc::clone(&running))?;

    let writer: Box<dyn Write> = if output == "-" {
        Box::new(std::io::stdout())
    } else {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(output)
            .with_context(|| format!("Failed to open {}", output))?;
        Box::new(file)
    };

    generator::run_to_writer(generator, writer, config.generator.rate_hz, count, running)?;
    Ok(())
}

/// Print frame size, payload size and the expected byte pattern
fn print_scheme(config: &AppConfig) -> Result<()> {
    let scheme = config.parser.to_scheme()?;

    println!("Frame size:   {} bytes", scheme.frame_size());
    println!("Payload size: {} bytes", scheme.payload_size());
    let data_type = scheme.data_type();
    let kind = if data_type.is_float() {
        "floating point"
    } else if data_type.is_signed() {
        "signed integer"
    } else {
        "unsigned integer"
    };
    println!(
        "Layout:       {} x {} ({}, {:?} endian)",
        scheme.channels(),
        data_type,
        kind,
        scheme.endianness()
    );
    println!("Pattern:      {}", scheme.expected_pattern());

    Ok(())
}

/// Generate a default configuration file
fn generate_config_file(output_path: PathBuf) -> Result<()> {
    let config = AppConfig::new();
    config.save_to_file(&output_path)?;

    println!("✅ Generated configuration file: {}", output_path.display());
    println!("📝 Edit the file to customize settings, then run:");
    println!("   serialscope --config {}", output_path.display());

    Ok(())
}
