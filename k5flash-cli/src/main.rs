//! k5flash CLI - Command-line tool for UV-K5 family radios.
//!
//! ## Features
//!
//! - Read and write EEPROM through the running firmware
//! - Flash packed or raw firmware images through the bootloader (V2 and V5)
//! - Pack and unpack firmware images
//! - Decode captured frames, sniff a line, emulate a bootloader
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use k5flash::Generation;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod progress;
mod serial;

use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Failures that are the caller's fault rather than the radio's.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad arguments or no usable port.
    #[error("{0}")]
    Usage(String),
    /// The user backed out of a prompt or pressed Ctrl-C.
    #[error("{0}")]
    Cancelled(String),
}

/// k5flash - Serial flashing and EEPROM tool for UV-K5 family radios.
///
/// Environment variables:
///   K5FLASH_PORT              - Default serial port
///   K5FLASH_BAUD              - Default baud rate (default: 38400)
///   K5FLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "k5flash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "K5FLASH_PORT")]
    pub(crate) port: Option<String>,

    /// Baud rate [default: 38400].
    #[arg(short, long, global = true, env = "K5FLASH_BAUD")]
    pub(crate) baud: Option<u32>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Non-interactive mode (never prompt).
    #[arg(long, global = true, env = "K5FLASH_NON_INTERACTIVE")]
    pub(crate) non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Bootloader generation to emulate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BootloaderKind {
    /// Legacy bootloader, plain chunks.
    V2,
    /// Newer bootloader, encrypted chunks.
    V5,
}

impl From<BootloaderKind> for Generation {
    fn from(kind: BootloaderKind) -> Self {
        match kind {
            BootloaderKind::V2 => Generation::V2,
            BootloaderKind::V5 => Generation::V5,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Greet the radio and print its firmware version.
    Hello,

    /// Reboot the radio into its bootloader and print the bootloader version.
    Reboot,

    /// Read battery voltage and current.
    ReadAdc,

    /// Read RSSI, noise and glitch indicators.
    ReadRssi,

    /// Read EEPROM to a file.
    ///
    /// Arguments: [OFFSET SIZE] [FILE]. Defaults to the whole 0x2000 bytes
    /// and `eeprom-{offset}-{size}.raw`.
    #[command(name = "read-eeprom")]
    ReadEeprom {
        /// [OFFSET SIZE] [FILE]
        #[arg(num_args = 0..=3, value_name = "ARGS")]
        args: Vec<String>,
    },

    /// Write a file to EEPROM.
    ///
    /// Arguments: [OFFSET] FILE. Offset defaults to 0.
    #[command(name = "write-eeprom")]
    WriteEeprom {
        /// [OFFSET] FILE
        #[arg(num_args = 1..=2, required = true, value_name = "ARGS")]
        args: Vec<String>,
    },

    /// Flash a packed firmware image.
    #[command(name = "write-flash")]
    WriteFlash {
        /// Packed firmware image.
        file: PathBuf,

        /// Key slot requested from V5 bootloaders.
        #[arg(long, value_parser = parse_u8)]
        key: Option<u8>,
    },

    /// Flash a raw firmware blob.
    ///
    /// Arguments: [VERSION] FILE.
    #[command(name = "write-flash-raw")]
    WriteFlashRaw {
        /// [VERSION] FILE
        #[arg(num_args = 1..=2, required = true, value_name = "ARGS")]
        args: Vec<String>,

        /// Key slot requested from V5 bootloaders.
        #[arg(long, value_parser = parse_u8)]
        key: Option<u8>,
    },

    /// Pack a raw firmware blob with a version string.
    Pack {
        /// Version string (at most 16 ASCII characters).
        #[arg(id = "version_string", value_name = "VERSION")]
        version: String,
        /// Raw firmware blob.
        file: PathBuf,
        /// Output file [default: {stem}.bin].
        output: Option<PathBuf>,
    },

    /// Unpack a packed firmware image.
    Unpack {
        /// Packed firmware image.
        file: PathBuf,
        /// Output file [default: {stem}-{version}.raw].
        output: Option<PathBuf>,
    },

    /// Decode an enveloped frame given as hex.
    Parse {
        /// Hex bytes (spaces allowed).
        #[arg(required = true, num_args = 1.., value_name = "HEX")]
        hex: Vec<String>,
    },

    /// Decode a plain (de-enveloped) packet given as hex.
    #[command(name = "parse-plain")]
    ParsePlain {
        /// Hex bytes (spaces allowed).
        #[arg(required = true, num_args = 1.., value_name = "HEX")]
        hex: Vec<String>,
    },

    /// Print every packet seen on the port until Ctrl-C.
    Sniffer,

    /// Act as a radio bootloader on the port until Ctrl-C.
    Emulate {
        /// Bootloader generation to announce.
        #[arg(long, value_enum, default_value = "v2")]
        bootloader: BootloaderKind,

        /// Directory for received images.
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// List available serial ports.
    #[command(name = "list-ports")]
    ListPorts {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Parse a number given as `0x` hex or decimal (underscores allowed).
pub(crate) fn parse_number(s: &str) -> Result<usize, String> {
    let s: String = s.trim().chars().filter(|c| *c != '_').collect();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        usize::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|e| format!("Invalid number '{s}': {e}"))
}

fn parse_u8(s: &str) -> Result<u8, String> {
    let value = parse_number(s)?;
    u8::try_from(value).map_err(|_| format!("Value {value} does not fit in a byte"))
}

/// Map a failure to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 1,
        };
    }
    if let Some(lib_err) = err.downcast_ref::<k5flash::Error>() {
        return match lib_err {
            k5flash::Error::DeviceNotFound => 2,
            _ => 1,
        };
    }
    if err.downcast_ref::<std::io::Error>().is_some() {
        return 1;
    }
    3
}

fn main() -> ExitCode {
    // NO_COLOR and TTY detection
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "k5flash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    k5flash::set_interrupt_checker(was_interrupted);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&e))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Hello => commands::device::cmd_hello(cli, &mut config),
        Commands::Reboot => commands::device::cmd_reboot(cli, &mut config),
        Commands::ReadAdc => commands::device::cmd_read_adc(cli, &mut config),
        Commands::ReadRssi => commands::device::cmd_read_rssi(cli, &mut config),
        Commands::ReadEeprom { args } => {
            let request = commands::eeprom::ReadRequest::from_args(args)?;
            commands::eeprom::cmd_read_eeprom(cli, &mut config, &request)
        },
        Commands::WriteEeprom { args } => {
            let request = commands::eeprom::WriteRequest::from_args(args)?;
            commands::eeprom::cmd_write_eeprom(cli, &mut config, &request)
        },
        Commands::WriteFlash { file, key } => {
            commands::flash::cmd_write_flash(cli, &mut config, file, *key)
        },
        Commands::WriteFlashRaw { args, key } => {
            let (version, file) = commands::flash::split_raw_args(args)?;
            commands::flash::cmd_write_flash_raw(cli, &mut config, version, &file, *key)
        },
        Commands::Pack {
            version,
            file,
            output,
        } => commands::image::cmd_pack(version, file, output.as_deref()),
        Commands::Unpack { file, output } => commands::image::cmd_unpack(file, output.as_deref()),
        Commands::Parse { hex } => commands::image::cmd_parse(hex),
        Commands::ParsePlain { hex } => commands::image::cmd_parse_plain(hex),
        Commands::Sniffer => commands::monitor::cmd_sniffer(cli, &mut config),
        Commands::Emulate {
            bootloader,
            output_dir,
        } => commands::monitor::cmd_emulate(cli, &mut config, (*bootloader).into(), output_dir),
        Commands::ListPorts { json } => {
            commands::device::cmd_list_ports(&config, *json);
            Ok(())
        },
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Get serial port from CLI args, config or selection.
pub(crate) fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        non_interactive: cli.non_interactive,
    };

    let selected = select_serial_port(&options, config)?;

    if selected.prompted && !selected.is_known && !cli.non_interactive {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.name)
}

/// Baud rate from CLI, then config, then the radio's default.
pub(crate) fn baud_rate(cli: &Cli, config: &Config) -> u32 {
    cli.baud
        .or(config.port.connection.baud)
        .unwrap_or(k5flash::port::DEFAULT_BAUD)
}
