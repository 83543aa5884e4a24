//! fwdump
//!
//! Dumps firmware memory from a microcontroller over a serial link. The
//! device side (a Pico-based SWD readout board) speaks a plain text line
//! protocol: a ready banner, a one-byte start trigger, `ADDRESS:HEXVALUE`
//! lines, and a DONE sentinel. Decoded 32-bit words land in the output
//! file in little-endian order.
//!
//! # Usage
//!
//! ```bash
//! # Dump to firmware.bin over the default port
//! fwdump dump firmware.bin
//!
//! # Explicit port and a transcript of every received line
//! fwdump dump firmware.bin --port /dev/ttyUSB0 --log session.log
//!
//! # List candidate serial ports
//! fwdump ports
//!
//! # Inspect the built-in device profiles
//! fwdump devices list
//! fwdump devices show stm32f0
//! ```

mod device;
mod error;
mod protocol;
mod serial;
mod session;
mod transcript;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;

use device::DumpProfile;
use error::DumpError;
use serial::{PortConfig, SerialConnection};
use session::{DumpSession, SessionOptions};
use transcript::Transcript;

/// Firmware memory dumper
///
/// Speaks the line protocol of the SWD readout firmware and writes the
/// dumped words to a binary file.
#[derive(Parser)]
#[command(name = "fwdump")]
#[command(version = "0.1.0")]
#[command(about = "Dump firmware memory over a serial line protocol")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a dump session
    Dump {
        /// File to write the firmware to (created or truncated)
        output: PathBuf,

        /// Serial device path (auto-detected when omitted, falling back
        /// to /dev/ttyACM0)
        #[arg(short, long)]
        port: Option<String>,

        /// Device profile name (e.g., stm32f0, generic)
        #[arg(short, long, default_value = "stm32f0")]
        device: String,

        /// Load a custom device profile from a TOML file
        #[arg(long, conflicts_with = "device")]
        profile_file: Option<PathBuf>,

        /// Baud rate (overrides the device profile)
        #[arg(short, long)]
        baud: Option<u32>,

        /// Per-line read timeout in seconds (overrides the device profile)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Maximum seconds to wait for the start acknowledgment
        #[arg(long, default_value_t = 30)]
        max_wait: u64,

        /// Continue past a mismatched ready banner instead of aborting
        #[arg(long)]
        lenient: bool,

        /// Record every received line (with timestamps) to this file
        #[arg(short, long)]
        log: Option<PathBuf>,
    },

    /// List available serial ports
    Ports,

    /// Device profile operations
    #[command(subcommand)]
    Devices(DeviceCommands),
}

#[derive(Subcommand)]
enum DeviceCommands {
    /// List built-in device profiles
    List,

    /// Show a device profile in detail
    Show {
        /// Profile name (e.g., stm32f0)
        device: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let result = match cli.command {
        Commands::Dump {
            output,
            port,
            device,
            profile_file,
            baud,
            timeout,
            max_wait,
            lenient,
            log,
        } => handle_dump(DumpArgs {
            output,
            port,
            device,
            profile_file,
            baud,
            timeout,
            max_wait,
            lenient,
            log,
        }),
        Commands::Ports => serial::port::print_ports(),
        Commands::Devices(cmd) => handle_devices(cmd),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {:#}", "[ERROR]".red().bold(), err);
            let code = err
                .downcast_ref::<DumpError>()
                .map(DumpError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

struct DumpArgs {
    output: PathBuf,
    port: Option<String>,
    device: String,
    profile_file: Option<PathBuf>,
    baud: Option<u32>,
    timeout: Option<u64>,
    max_wait: u64,
    lenient: bool,
    log: Option<PathBuf>,
}

fn handle_dump(args: DumpArgs) -> Result<()> {
    let profile = match args.profile_file {
        Some(ref path) => DumpProfile::from_toml_file(path)?,
        None => device::get_profile(&args.device)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown device profile: {}. Use 'fwdump devices list' to see available profiles.",
                    args.device
                )
            })?
            .clone(),
    };

    let baud_rate = args.baud.unwrap_or(profile.baud_rate);
    let read_timeout = args
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| profile.read_timeout());

    let port_path = match args.port {
        Some(p) => p,
        None => {
            let detected = serial::port::detect_ports()?;
            match serial::port::choose_port(&detected) {
                Some(info) => {
                    println!(
                        "{} Auto-detected: {}",
                        "[OK]".green().bold(),
                        info.path.white()
                    );
                    info.path.clone()
                }
                None => serial::port::DEFAULT_PORT.to_string(),
            }
        }
    };

    println!(
        "{} Reading from {} to file {}",
        "[*]".cyan().bold(),
        port_path.white(),
        args.output.display().to_string().white()
    );
    println!(
        "{} Using device profile: {} (baud: {})",
        "[*]".cyan().bold(),
        profile.name.white(),
        baud_rate
    );

    let port_config = PortConfig::new(&port_path)
        .with_baud_rate(baud_rate)
        .with_timeout(read_timeout);

    let mut connection = SerialConnection::open(port_config)?;
    connection.clear_buffers()?;
    println!(
        "{} Connected to {} at {} baud",
        "[OK]".green().bold(),
        connection.config().port_path.white().bold(),
        connection.config().baud_rate
    );

    let options = SessionOptions {
        lenient: args.lenient,
        max_wait: Duration::from_secs(args.max_wait),
    };

    let mut session = DumpSession::new(connection, profile, options);
    if let Some(ref log_path) = args.log {
        let transcript = Transcript::create(log_path)?;
        println!(
            "{} Logging received lines to: {}",
            "[LOG]".cyan().bold(),
            log_path.display()
        );
        session = session.with_transcript(transcript);
    }

    let summary = session.run(&args.output)?;

    println!(
        "{} Dump complete: {} words ({} bytes) written to {} in {:.1?}",
        "[OK]".green().bold(),
        summary.words,
        summary.bytes,
        args.output.display().to_string().white(),
        summary.elapsed
    );

    Ok(())
}

fn handle_devices(cmd: DeviceCommands) -> Result<()> {
    match cmd {
        DeviceCommands::List => {
            println!("{}", "=".repeat(60));
            println!("{}", "Built-in Device Profiles".cyan().bold());
            println!("{}", "=".repeat(60));

            for name in device::profile_names() {
                if let Some(profile) = device::get_profile(name) {
                    println!("\n  {}: {}", name.white().bold(), profile.description);
                    println!("    Baud rate: {}", profile.baud_rate);
                    println!("    Ready banner: {:?}", profile.ready_banner);
                }
            }

            println!("\n{}", "=".repeat(60));
            println!(
                "Use {} to see full profile details",
                "fwdump devices show <device>".cyan()
            );
        }

        DeviceCommands::Show { device } => {
            let profile = device::get_profile(&device).ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown device profile: {}. Use 'fwdump devices list' to see available profiles.",
                    device
                )
            })?;

            print_profile(profile);
        }
    }

    Ok(())
}

fn print_profile(profile: &DumpProfile) {
    println!("{}", "=".repeat(70));
    println!(
        "{}",
        format!("Device Profile: {}", profile.name).cyan().bold()
    );
    println!("{}", "=".repeat(70));

    println!("\n{}", "Basic Information:".white().bold());
    println!("  ID: {}", profile.id);
    println!("  Description: {}", profile.description);

    println!("\n{}", "Serial Settings:".white().bold());
    println!("  Baud rate: {}", profile.baud_rate);
    println!("  Read timeout: {} ms", profile.read_timeout_ms);
    println!("  Word size: {} bytes", profile.word_size);

    println!("\n{}", "Handshake:".white().bold());
    println!("  Ready banner: {:?}", profile.ready_banner);
    println!(
        "  Trigger byte: {:?} (0x{:02x})",
        profile.trigger_byte as char, profile.trigger_byte
    );
    println!("  Trigger delay: {} ms", profile.trigger_delay_ms);
    println!("  Start acknowledgment: {:?}", profile.starting_pattern);
    println!("  End sentinel: {:?}", profile.done_sentinel);

    println!("\n{}", "=".repeat(70));
}
