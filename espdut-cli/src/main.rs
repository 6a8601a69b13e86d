//! espdut CLI - drive ESP boards under test from the command line.
//!
//! ## Features
//!
//! - Locate the board (`ESPPORT` hint, invalid ports filtered, chip probing)
//! - Flash an ESP-IDF build with baud-rate fallback and NVS blanking
//! - Reset, erase a partition, read flash back
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use espdut::esptool::{Esptool, ProcessRunner};
use espdut::select::{Platform, list_available_ports, select_ports};
use espdut::{DEFAULT_BAUD_RATES, NativePortEnumerator, PortEnumerator};
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

mod commands;
mod config;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Default esptool executable, as installed on `PATH` by ESP-IDF.
const DEFAULT_ESPTOOL: &str = "esptool.py";

/// Check if spinners and colors should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors raised by the CLI itself, each with its own exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid combination of arguments.
    #[error("{0}")]
    Usage(String),
    /// Unusable configuration file.
    #[error("{0}")]
    Config(String),
    /// Interrupted by the user.
    #[error("{0}")]
    Cancelled(String),
}

/// Map an error to the process exit code.
///
/// 1 generic failure, 2 usage, 3 configuration, 4 device not found,
/// 130 cancelled.
fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Config(_) => 3,
            CliError::Cancelled(_) => 130,
        };
    }

    match err.downcast_ref::<espdut::Error>() {
        Some(espdut::Error::Config(_) | espdut::Error::PartitionTable(_)) => 3,
        Some(espdut::Error::DeviceNotFound) => 4,
        _ => 1,
    }
}

/// espdut - flash and control ESP boards under test through esptool.
///
/// Environment variables:
///   ESPPORT                - Preferred serial port (tried first)
///   ESPTOOL                - esptool script or executable
///   ESPDUT_PYTHON          - Interpreter for the esptool script
///   ESPDUT_BAUD_RATES      - Flash baud rates, fastest first (e.g. 921600,115200)
#[derive(Parser)]
#[command(name = "espdut")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:
  espdut list-ports
  espdut -p /dev/ttyUSB0 flash build
  espdut dump-flash nvs.bin --build-dir build --partition nvs
  espdut dump-flash boot.bin --address 0x1000 --size 32K")]
struct Cli {
    /// Preferred serial port; other ports are still probed when it is absent.
    #[arg(short, long, global = true, env = "ESPPORT")]
    port: Option<String>,

    /// Baud rates to try when flashing, fastest first.
    #[arg(
        short,
        long,
        global = true,
        value_delimiter = ',',
        env = "ESPDUT_BAUD_RATES"
    )]
    baud_rates: Vec<u32>,

    /// esptool script or executable.
    #[arg(long, global = true, env = "ESPTOOL", value_name = "PATH")]
    esptool: Option<PathBuf>,

    /// Interpreter used to run the esptool script.
    #[arg(long, global = true, env = "ESPDUT_PYTHON", value_name = "PROGRAM")]
    python: Option<String>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Where the application and its partition table come from.
#[derive(Args, Debug, Default)]
struct AppArgs {
    /// ESP-IDF build directory (containing flasher_args.json).
    #[arg(long, value_name = "DIR")]
    build_dir: Option<PathBuf>,

    /// Partition table (CSV or binary) overriding the one from the build.
    #[arg(long, value_name = "FILE")]
    partition_table: Option<PathBuf>,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// List serial ports in the order they are probed.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Find the board and print its chip type.
    ChipId {
        /// Output the result as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Flash an ESP-IDF build onto the board.
    Flash {
        /// ESP-IDF build directory (containing flasher_args.json).
        build_dir: PathBuf,

        /// Partition table (CSV or binary) overriding the one from the build.
        #[arg(long, value_name = "FILE")]
        partition_table: Option<PathBuf>,

        /// Keep the contents of the nvs partition.
        #[arg(long)]
        no_erase_nvs: bool,
    },

    /// Reset the board into its application.
    Reset,

    /// Erase one partition.
    ErasePartition {
        /// Partition name (e.g. nvs, otadata).
        name: String,

        #[command(flatten)]
        app: AppArgs,
    },

    /// Read flash contents into a file.
    DumpFlash {
        /// Output file.
        output: PathBuf,

        /// Partition to read (takes precedence over --address/--size).
        #[arg(long)]
        partition: Option<String>,

        /// Start address (hex, decimal, or with K/M suffix).
        #[arg(long, value_parser = parse_u32)]
        address: Option<u32>,

        /// Number of bytes (hex, decimal, or with K/M suffix).
        #[arg(long, value_parser = parse_u32)]
        size: Option<u32>,

        #[command(flatten)]
        app: AppArgs,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions (auto-detected if not specified with --install).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Automatically install completions to your shell configuration.
        #[arg(long)]
        install: bool,
    },
}

/// Parse an address or size: `0x9000`, `36864`, `24K`, `1M`.
fn parse_u32(s: &str) -> Result<u32, String> {
    espdut::partition::parse_size(s).ok_or_else(|| format!("Invalid number: '{s}'"))
}

/// Preferred port: `--port`/`ESPPORT`, then the config file.
fn port_hint(cli: &Cli, config: &Config) -> Option<String> {
    cli.port
        .clone()
        .or_else(|| config.port.serial.clone())
        .filter(|p| !p.is_empty())
}

/// Enumerated ports, ordered by the port hint.
fn candidate_ports(cli: &Cli, config: &Config) -> Result<Vec<String>> {
    let ports = match port_hint(cli, config) {
        Some(hint) => {
            let names: Vec<String> = NativePortEnumerator::list_ports()?
                .into_iter()
                .map(|p| p.name)
                .collect();
            select_ports(&names, Some(hint.as_str()), Platform::current())
        },
        None => list_available_ports()?,
    };
    debug!("Candidate ports: {ports:?}");
    Ok(ports)
}

/// Flash baud rates: `--baud-rates`, then the config file, then the defaults.
fn baud_rates(cli: &Cli, config: &Config) -> Vec<u32> {
    if !cli.baud_rates.is_empty() {
        return cli.baud_rates.clone();
    }
    config
        .flash
        .baud_rates
        .clone()
        .unwrap_or_else(|| DEFAULT_BAUD_RATES.to_vec())
}

/// Build the esptool runner.
///
/// A `.py` script given by path runs through the interpreter (`python`
/// unless given). Bare command names such as `esptool.py` on `PATH` and
/// other executables run directly unless an interpreter is given.
fn esptool_runner(script: Option<&Path>, interpreter: Option<&str>) -> ProcessRunner {
    let script = script.unwrap_or(Path::new(DEFAULT_ESPTOOL));
    match interpreter {
        Some(interpreter) => ProcessRunner::with_interpreter(interpreter, script),
        None if script.extension().is_some_and(|ext| ext == "py") && script.components().count() > 1 => {
            ProcessRunner::python_script(script)
        },
        None => ProcessRunner::new(script),
    }
}

fn esptool(cli: &Cli, config: &Config) -> Esptool {
    let script = cli.esptool.as_deref().or(config.tool.esptool.as_deref());
    let interpreter = cli.python.as_deref().or(config.tool.program.as_deref());
    Esptool::new(esptool_runner(script, interpreter))
}

/// Spinner on stderr, hidden in quiet or non-TTY mode.
fn spinner(cli: &Cli, message: String) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn install_interrupt_handler() {
    let result = ctrlc::set_handler(|| {
        // A second Ctrl-C gives up on waiting for esptool.
        if INTERRUPTED.swap(true, Ordering::Relaxed) {
            std::process::exit(130);
        }
    });
    if let Err(e) = result {
        debug!("Could not install Ctrl-C handler: {e}");
    }
}

fn init_logging(cli: &Cli) {
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
}

fn run(cli: &Cli) -> Result<()> {
    let config = match &cli.config_path {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load(),
    };

    let result = match &cli.command {
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(cli, &config, *json),
        Commands::ChipId { json } => commands::ports::cmd_chip_id(cli, &config, *json),
        Commands::Flash {
            build_dir,
            partition_table,
            no_erase_nvs,
        } => commands::dut::cmd_flash(
            cli,
            &config,
            build_dir,
            partition_table.as_deref(),
            *no_erase_nvs,
        ),
        Commands::Reset => commands::dut::cmd_reset(cli, &config),
        Commands::ErasePartition { name, app } => {
            commands::dut::cmd_erase_partition(cli, &config, name, app)
        },
        Commands::DumpFlash {
            output,
            partition,
            address,
            size,
            app,
        } => commands::dut::cmd_dump_flash(
            cli,
            &config,
            output,
            partition.as_deref(),
            *address,
            *size,
            app,
        ),
        Commands::Completions { shell, install } => {
            if *install {
                commands::completions::cmd_completions_install(*shell)
            } else {
                match (*shell).or_else(commands::completions::detect_shell_type) {
                    Some(shell) => {
                        commands::completions::cmd_completions(shell);
                        Ok(())
                    },
                    None => Err(CliError::Usage(
                        "specify a shell type, e.g.: espdut completions bash".into(),
                    )
                    .into()),
                }
            }
        },
    };

    if result.is_err() && was_interrupted() {
        return Err(CliError::Cancelled("Operation cancelled".into()).into());
    }
    result
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);
    install_interrupt_handler();

    debug!(
        "espdut v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code(&err))
        },
    }
}
