use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use ledgrid_control::config::{Config, SerialConfig};
use ledgrid_control::recorder::LogFileRecorder;
use ledgrid_control::session::{Outcome, SessionController, SystemClock};
use ledgrid_control::sink::{self, FrameSink, SerialSink, SimulatedSink};
use ledgrid_control::{Engine, EngineHandle, COLS};

#[derive(Parser)]
#[command(name = "ledgrid")]
#[command(about = "LED grid session control\n\nDrives an 8x12 LED grid over serial and logs the time-weighted average brightness of each session.", long_about = None)]
struct Cli {
    /// Path to configuration file (JSON)
    config: Option<PathBuf>,

    /// Serial port to open (overrides the config file)
    #[arg(long)]
    port: Option<String>,

    /// Baud rate for --port
    #[arg(long)]
    baud: Option<u32>,

    /// Log frames instead of writing to a device
    #[arg(long)]
    simulate: bool,

    /// File session summaries are appended to
    #[arg(long)]
    log: Option<String>,

    /// List detected serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Enable debug output (every frame sent)
    #[arg(long)]
    debug: bool,
}

const HELP: &str = "\
commands:
  set <row> <col> <value>   brightness 0-100 for R<row>C<col> (1-based)
  on | off | toggle         start or end a session
  show                      print the grid
  cell <row> <col>          current and average brightness of one cell
  status                    session state and running time
  quit                      end any session and exit";

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    if cli.list_ports {
        let ports = sink::list_ports()?;
        if ports.is_empty() {
            println!("No serial ports found.");
        }
        for (i, (name, description)) in ports.iter().enumerate() {
            println!("  {}) {} - {}", i + 1, name, description);
        }
        return Ok(());
    }

    let config = load_config(&cli)?;

    let sink: Box<dyn FrameSink> = match (&config.serial, cli.simulate) {
        (Some(serial), false) => Box::new(SerialSink::open(serial)?),
        _ => Box::new(SimulatedSink::new()),
    };
    let recorder = LogFileRecorder::new(&config.session.log_path);
    info!("Session summaries go to {}", recorder.path().display());
    let mut controller = SessionController::new(sink, recorder, SystemClock);

    // Start the device from a known, dark state
    if let Err(e) = controller.send_matrix() {
        warn!("Initial frame not delivered: {}", e);
    }

    let mut engine = Engine::start(
        controller,
        Duration::from_millis(config.session.tick_interval_ms),
    );
    let handle = engine.handle();

    // Ctrl-C ends any session cleanly: zero frame first, then the log
    let signal_handle = handle.clone();
    let result = ctrlc::set_handler(move || {
        info!("Shutting down...");
        if let Err(e) = signal_handle.shutdown() {
            error!("Shutdown failed: {}", e);
        }
        std::process::exit(0);
    });
    if let Err(e) = result {
        warn!("Could not set Ctrl-C handler: {}", e);
    }

    println!("{}", HELP);
    run_shell(&handle)?;

    engine.stop();
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(port) = &cli.port {
        config.serial = Some(SerialConfig::new(port.clone()));
    }
    if let (Some(baud), Some(serial)) = (cli.baud, config.serial.as_mut()) {
        serial.baud_rate = baud;
    }
    if let Some(log) = &cli.log {
        config.session.log_path = log.clone();
    }
    Ok(config)
}

/// Read commands from stdin until `quit` or end of input.
fn run_shell(handle: &EngineHandle) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush().context("Failed to flush stdout")?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }

        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => {}
            ["set", row, col, value] => match parse_edit(row, col, value) {
                Ok((row, col, value)) => match handle.set_brightness(row, col, value)? {
                    Ok(outcome) => report(&outcome),
                    Err(e) => println!("Rejected: {}", e),
                },
                Err(msg) => println!("{}", msg),
            },
            ["on"] => report(&handle.set_session_active(true)?),
            ["off"] => report(&handle.set_session_active(false)?),
            ["toggle"] => report(&handle.toggle()?),
            ["show"] => show(handle)?,
            ["cell", row, col] => match parse_edit(row, col, "0") {
                Ok((row, col, _)) => {
                    let view = handle.view()?;
                    match view.cells.get(row * COLS + col).filter(|_| col < COLS) {
                        Some(cell) => println!("{}", cell.label()),
                        None => println!("No such cell"),
                    }
                }
                Err(msg) => println!("{}", msg),
            },
            ["status"] => {
                let view = handle.view()?;
                let state = if view.active { "ON" } else { "OFF" };
                println!("Instrument {} - Running time: {}", state, view.elapsed);
            }
            ["quit"] | ["exit"] => return Ok(()),
            _ => println!("{}", HELP),
        }
    }
}

/// Coordinates are entered 1-based, as printed by `show`.
fn parse_edit(row: &str, col: &str, value: &str) -> Result<(usize, usize, u8), String> {
    let row: usize = row.parse().map_err(|_| format!("Invalid row: {}", row))?;
    let col: usize = col.parse().map_err(|_| format!("Invalid column: {}", col))?;
    let value: u8 = value
        .parse()
        .map_err(|_| format!("Invalid brightness: {} (expected 0-100)", value))?;
    if row == 0 || col == 0 {
        return Err("Rows and columns start at 1".to_string());
    }
    Ok((row - 1, col - 1, value))
}

fn report(outcome: &Outcome) {
    if let Some(e) = &outcome.transmission_error {
        println!("Serial Error: could not send data: {}", e);
    }
    if let Some(e) = &outcome.persistence_error {
        println!("Save Error: could not save session data: {}", e);
    }
    if let Some(summary) = &outcome.summary {
        println!("Session closed after {:.2} seconds", summary.elapsed_secs);
    }
}

fn show(handle: &EngineHandle) -> Result<()> {
    let view = handle.view()?;
    for row in view.cells.chunks(COLS) {
        let line: Vec<String> = row
            .iter()
            .map(|cell| format!("{:>3}%/{:>5.1}", cell.brightness, cell.average))
            .collect();
        println!("R{} {}", row[0].row + 1, line.join(" "));
    }
    println!("Running time: {}", view.elapsed);
    Ok(())
}
