//! `rfa` - command-line control of a Nikon Remote Focus Accessory.
//!
//! ```bash
//! # Which serial ports are there, and what are their USB ids?
//! rfa list-ports
//!
//! # Connect by USB id and move to 25 um
//! rfa --vid 6790 --pid 29987 move-abs 25
//!
//! # Use a config file and read the max speed
//! rfa --config config/rfa.toml speed
//! ```
//!
//! Logging goes through `tracing`; set `RUST_LOG=debug` to see every exchange.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use nikon_rfa::config::{RfaConfig, DEFAULT_CONFIG_PATH};
use nikon_rfa::controller::FocusController;
use nikon_rfa::events::TracingSink;
use nikon_rfa::transport::{PortDiscovery, SerialTransport, SystemPorts};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Control a Nikon Remote Focus Accessory over its serial port
#[derive(Parser, Debug)]
#[command(name = "rfa")]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Serial port, overrides the configuration (e.g. /dev/ttyUSB0, COM3)
    #[arg(long)]
    port: Option<String>,

    /// USB vendor id of the serial chip
    #[arg(long)]
    vid: Option<u16>,

    /// USB product id of the serial chip
    #[arg(long)]
    pid: Option<u16>,

    /// Reply timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List serial ports with their USB vendor/product ids
    ListPorts,
    /// Read the current position in micrometers
    Position,
    /// Move to an absolute position in micrometers
    MoveAbs {
        /// Target position (um)
        #[arg(allow_negative_numbers = true)]
        um: f64,
    },
    /// Move by a relative distance in micrometers
    MoveRel {
        /// Distance (um)
        #[arg(allow_negative_numbers = true)]
        um: f64,
    },
    /// Stop the current move
    Halt,
    /// Reset the device as if power was cycled
    Reset,
    /// Make the current position the origin
    Zero,
    /// Relabel the current position without moving
    Redefine {
        /// New label for the current position (um)
        #[arg(allow_negative_numbers = true)]
        um: f64,
    },
    /// Read or set the maximum speed (50-60000, 60000 is slowest)
    Speed {
        /// New value
        #[arg(allow_negative_numbers = true)]
        value: Option<i64>,
    },
    /// Read or set the start-up speed (50-60000, 60000 is slowest)
    MinSpeed {
        /// New value
        #[arg(allow_negative_numbers = true)]
        value: Option<i64>,
    },
    /// Read or set the acceleration ramp (1-255, larger is slower)
    RampSlope {
        /// New value
        #[arg(allow_negative_numbers = true)]
        value: Option<i64>,
    },
    /// Read or switch the encoder
    Encoder {
        /// New state
        state: Option<EncoderState>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum EncoderState {
    On,
    Off,
}

fn main() -> Result<()> {
    // Initialize tracing with RUST_LOG env var
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Commands::ListPorts = cli.command {
        return list_ports();
    }

    let config = load_config(&cli)?;
    let mut rfa = FocusController::open(&config, Arc::new(TracingSink))
        .context("Failed to connect to RFA")?;

    run(&mut rfa, cli.command)?;
    rfa.close()?;
    Ok(())
}

fn run(rfa: &mut FocusController<SerialTransport>, command: Commands) -> Result<()> {
    match command {
        Commands::ListPorts => list_ports()?,
        Commands::Position => print_position(rfa.read_position()?),
        Commands::MoveAbs { um } => print_position(rfa.move_absolute_and_read(um)?),
        Commands::MoveRel { um } => print_position(rfa.move_relative_and_read(um)?),
        Commands::Halt => rfa.halt()?,
        Commands::Reset => rfa.reset()?,
        Commands::Zero => rfa.zero_here()?,
        Commands::Redefine { um } => rfa.redefine_position(um)?,
        Commands::Speed { value: None } => print_value("SPEED", rfa.max_speed()?),
        Commands::Speed { value: Some(v) } => println!("SPEED {}", rfa.set_max_speed(v)?),
        Commands::MinSpeed { value: None } => print_value("MINSPEED", rfa.min_speed()?),
        Commands::MinSpeed { value: Some(v) } => println!("MINSPEED {}", rfa.set_min_speed(v)?),
        Commands::RampSlope { value: None } => print_value("RAMPSLOPE", rfa.ramp_slope()?),
        Commands::RampSlope { value: Some(v) } => {
            println!("RAMPSLOPE {}", rfa.set_ramp_slope(v)?)
        }
        Commands::Encoder { state: None } => match rfa.encoder_enabled()? {
            Some(true) => println!("ENCODER ON"),
            Some(false) => println!("ENCODER OFF"),
            None => println!("ENCODER unknown"),
        },
        Commands::Encoder { state: Some(s) } => {
            rfa.set_encoder(matches!(s, EncoderState::On))?
        }
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<RfaConfig> {
    let mut config: RfaConfig = RfaConfig::figment(&cli.config)
        .extract()
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    if let Some(port) = &cli.port {
        config.connection.port = Some(port.clone());
    }
    if cli.vid.is_some() || cli.pid.is_some() {
        config.connection.vendor_id = cli.vid;
        config.connection.product_id = cli.pid;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.connection.timeout_ms = timeout_ms;
    }

    config.validate()?;
    Ok(config)
}

fn list_ports() -> Result<()> {
    println!("{:<24} {:>6} {:>6}  description", "port", "vid", "pid");
    for port in SystemPorts.list_ports()? {
        println!(
            "{:<24} {:>6} {:>6}  {}",
            port.address,
            port.vendor_id.map(|v| v.to_string()).unwrap_or_default(),
            port.product_id.map(|v| v.to_string()).unwrap_or_default(),
            port.description
        );
    }
    Ok(())
}

fn print_position(position: Option<f64>) {
    match position {
        Some(um) => println!("{} um", um),
        None => println!("position unknown"),
    }
}

fn print_value(name: &str, value: Option<u32>) {
    match value {
        Some(v) => println!("{} {}", name, v),
        None => println!("{} unknown", name),
    }
}
