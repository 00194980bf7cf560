//! Screamdeck command-line tool.
//!
//! Lists attached decks, prints panel geometry, streams key events and
//! drives the panel through the native `screamdeck` library.

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use screamdeck::{
    DeckDriver, DeckSession, Directory, NativeDriver, ReadLengthPolicy, SessionConfig,
};
use screamdeck_core::constants::MAX_QUALITY_PERCENT;
use screamdeck_core::{DeviceType, PixelFormat};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "screamdeck")]
#[command(about = "List, watch and drive Screamdeck key panels")]
#[command(version)]
struct Cli {
    /// Path to the native library (default: $SCREAMDECK_LIBRARY, then the
    /// platform library name)
    #[arg(long, global = true)]
    library: Option<PathBuf>,

    /// Log debug output (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List attached decks
    List {
        /// Print JSON instead of one line per deck
        #[arg(long)]
        json: bool,
    },

    /// Print the panel geometry of a model
    Info {
        /// Model name, e.g. mk2, mini-mk2, xl
        device_type: DeviceType,

        #[arg(long)]
        json: bool,
    },

    /// Print key presses and releases until interrupted
    Watch {
        #[command(flatten)]
        target: Target,

        /// Key read timeout in milliseconds
        #[arg(long, default_value_t = SessionConfig::default().read_timeout_ms)]
        read_timeout_ms: u32,

        /// Accept only reads longer than the key count
        #[arg(long)]
        oversized_reads: bool,
    },

    /// Set backlight brightness
    Brightness {
        #[command(flatten)]
        target: Target,

        /// Brightness in percent (0-100)
        percent: u8,
    },

    /// Show the device screensaver
    Screensaver {
        #[command(flatten)]
        target: Target,
    },

    /// Fill the whole panel with one colour
    Fill {
        #[command(flatten)]
        target: Target,

        /// Colour as RRGGBB hex, with or without a leading '#'
        #[arg(value_parser = parse_color)]
        color: [u8; 3],

        /// Encoder quality hint (0-100)
        #[arg(long, default_value_t = MAX_QUALITY_PERCENT)]
        quality: u8,
    },
}

/// Which deck a command talks to.
#[derive(Args)]
struct Target {
    /// Model to open; "none" accepts any model
    #[arg(short = 't', long = "type", default_value = "none")]
    device_type: DeviceType,

    /// Serial number to open; requires a concrete --type
    #[arg(short, long)]
    serial: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let driver = load_driver(cli.library.as_ref())?;
    let directory = Directory::new(driver);

    match cli.command {
        Command::List { json } => list(&directory, json),
        Command::Info { device_type, json } => print_info(&directory, device_type, json),
        Command::Watch {
            target,
            read_timeout_ms,
            oversized_reads,
        } => {
            let config = SessionConfig {
                read_timeout_ms,
                read_length: if oversized_reads {
                    ReadLengthPolicy::Oversized
                } else {
                    ReadLengthPolicy::Exact
                },
                ..SessionConfig::default()
            };
            watch(open(&directory, &target, &config)?).await
        }
        Command::Brightness { target, percent } => {
            let session = open(&directory, &target, &SessionConfig::default())?;
            report("set brightness", session.set_brightness(percent)?);
            session.close_async().await;
            Ok(())
        }
        Command::Screensaver { target } => {
            let session = open(&directory, &target, &SessionConfig::default())?;
            report("show screensaver", session.set_screensaver()?);
            session.close_async().await;
            Ok(())
        }
        Command::Fill {
            target,
            color,
            quality,
        } => {
            let session = open(&directory, &target, &SessionConfig::default())?;
            let pixels = session.type_info().image_buffer_len(PixelFormat::Rgb) / 3;
            let buffer = color.repeat(pixels);
            report(
                "fill panel",
                session.set_image_24(&buffer, PixelFormat::Rgb, quality)?,
            );
            session.close_async().await;
            Ok(())
        }
    }
}

fn load_driver(library: Option<&PathBuf>) -> Result<Arc<dyn DeckDriver>> {
    let driver = match library {
        Some(path) => NativeDriver::load_from(path)?,
        None => NativeDriver::load()?,
    };
    debug!(path = driver.path(), "Native library loaded");
    Ok(Arc::new(driver))
}

fn list(directory: &Directory, json: bool) -> Result<()> {
    let devices = directory.enumerate()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
    } else if devices.is_empty() {
        println!("No decks attached");
    } else {
        for device in &devices {
            println!("{device}");
        }
    }
    Ok(())
}

fn print_info(directory: &Directory, device_type: DeviceType, json: bool) -> Result<()> {
    let info = directory.device_type_info(device_type)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }
    println!("{device_type}");
    println!("  keys:        {} x {} ({})", info.columns, info.rows, info.key_count());
    println!(
        "  key image:   {} x {} px",
        info.key_image_width, info.key_image_height
    );
    println!(
        "  key gap:     {} x {} px",
        info.key_gap_width, info.key_gap_height
    );
    println!("  panel image: {} x {} px", info.image_width, info.image_height);
    Ok(())
}

fn open(directory: &Directory, target: &Target, config: &SessionConfig) -> Result<DeckSession> {
    let driver = Arc::clone(directory.driver());
    let session = match &target.serial {
        Some(serial) => {
            DeckSession::open_with_config(driver, target.device_type, serial, config)?
        }
        None => DeckSession::open_first_with_config(driver, target.device_type, config)?,
    };
    session.ok_or_else(|| match &target.serial {
        Some(serial) => anyhow!("Deck {serial} ({}) not found or busy", target.device_type),
        None => anyhow!("No attachable {} deck found", target.device_type),
    })
}

async fn watch(session: DeckSession) -> Result<()> {
    let mut events = session.subscribe();
    info!(
        serial = session.serial_number(),
        keys = session.type_info().key_count(),
        "Watching keys, Ctrl-C to stop"
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => println!("{event}"),
                Err(RecvError::Lagged(missed)) => warn!(missed, "Dropped key events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.close_async().await;
    Ok(())
}

fn report(action: &str, succeeded: bool) {
    if succeeded {
        info!("{action}: ok");
    } else {
        warn!("{action}: rejected by device");
    }
}

fn parse_color(s: &str) -> Result<[u8; 3]> {
    let hex = s.strip_prefix('#').unwrap_or(s);
    if hex.len() != 6 || !hex.is_ascii() {
        bail!("Expected RRGGBB, got {s:?}");
    }
    let channel = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&hex[range], 16).with_context(|| format!("Invalid hex colour {s:?}"))
    };
    Ok([channel(0..2)?, channel(2..4)?, channel(4..6)?])
}
