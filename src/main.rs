//! klippy-console
//!
//! Talks to Klipper's API socket. Without a subcommand, starts an
//! interactive G-code console on stdin.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use klippy_uds::console::Console;
use klippy_uds::logging::{init_file_logging, init_logging};
use klippy_uds::{Printer, SessionConfig, ToolOffset, DEFAULT_SOCKET_PATH};
use std::path::PathBuf;
use std::time::Duration;

/// Klipper API socket client
#[derive(Parser)]
#[command(name = "klippy-console")]
#[command(about = "Send G-code and query printer state over Klipper's API socket")]
#[command(version)]
#[command(after_help = "\
Examples:
  klippy-console                          Interactive G-code console
  klippy-console status                   Print klippy state
  klippy-console gcode G28                Home all axes
  klippy-console gcode 'G10 P1 Z0.15'     Store tool 1 Z offset in TOOLS.cfg
  klippy-console tool-offset --tool 1     Print tool 1 offsets
")]
struct Cli {
    /// Path of klippy's API socket
    #[arg(short, long, env = "KLIPPY_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    /// Overall deadline per request, in seconds (0 waits forever)
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Give up connecting after this many seconds (default: wait forever)
    #[arg(long)]
    connect_timeout_secs: Option<u64>,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive G-code console (default)
    Console,

    /// Print klippy's state
    Status,

    /// Print the G-code and machine positions
    Position,

    /// Print the active tool and extruder count
    Tools,

    /// Print a tool's offsets from the macro config
    ToolOffset {
        /// Tool index (default: active tool)
        #[arg(short, long)]
        tool: Option<u32>,
    },

    /// Run a single G-code line
    Gcode {
        /// G-code words, e.g. `G1 X10 F3000`
        #[arg(required = true, num_args = 1..)]
        line: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.log_file {
        Some(path) => init_file_logging(path)?,
        None => init_logging()?,
    }

    let config = SessionConfig::new(&cli.socket)
        .with_call_timeout((cli.timeout_secs > 0).then(|| Duration::from_secs(cli.timeout_secs)))
        .with_connect_timeout(cli.connect_timeout_secs.map(Duration::from_secs));

    tracing::debug!(socket = %config.socket_path.display(), "Connecting");
    let mut printer = Printer::connect(config).context("Cannot reach klippy")?;

    match cli.command.unwrap_or(Commands::Console) {
        Commands::Console => {
            let mut console = Console::stdio(printer)?;
            console.run()?;
        }
        Commands::Status => {
            println!("{}", printer.status()?);
        }
        Commands::Position => {
            println!("gcode:    {}", printer.position()?);
            println!("absolute: {}", printer.absolute_position()?);
        }
        Commands::Tools => {
            match printer.current_tool()? {
                Some(tool) => println!("active tool: T{}", tool),
                None => println!("active tool: none"),
            }
            println!("extruders: {}", printer.extruder_count()?);
        }
        Commands::ToolOffset { tool } => {
            let offset: ToolOffset = printer.tool_offset(tool)?;
            println!("{}", offset);
        }
        Commands::Gcode { line } => {
            println!("{}", printer.gcode(&line.join(" "))?);
        }
    }

    Ok(())
}
