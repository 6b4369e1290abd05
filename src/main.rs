use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{error, info};

use dobot_ctl::cancel::CancelToken;
use dobot_ctl::jog::{self, JogSettings};
use dobot_ctl::keys::CrosstermKeys;
use dobot_ctl::limits::MonitorSettings;
use dobot_ctl::panel::TerminalView;
use dobot_ctl::pose::HOME;
use dobot_ctl::prompt::{LinePrompt, SharedPrompt, shared};
use dobot_ctl::robot::{DEFAULT_ACCELERATION, DEFAULT_SPEED, SerialDobot};
use dobot_ctl::sim::SimArm;
use dobot_ctl::spinner::{self, PoseSpinner};
use dobot_ctl::{Arm, ArmError, Dobot, Margin, MoveMode, Session, menu, ports};

/// Operator tools for a Dobot arm on a serial port
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Serial port of the arm; asked interactively when omitted
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Run against an in-memory arm instead of hardware
    #[arg(long, global = true)]
    simulate: bool,

    /// Log every controller frame
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Append log output to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the available serial ports
    Ports,
    /// Pick a serial port interactively and print it
    SelectPort,
    /// Print the current pose once
    Pose,
    /// Move to the home position and print the pose
    Home,
    /// Menu with predefined positions, home and manual keyboard control
    Control {
        /// Jog step per tick in mm (degrees for R)
        #[arg(long, default_value_t = jog::DEFAULT_STEP)]
        step: f32,

        /// Jog polling interval in milliseconds
        #[arg(long, default_value_t = 5)]
        interval_ms: u64,
    },
    /// Menu with live pose readout and boundary alerts
    Monitor {
        /// Safety margin in mm around each boundary point (5 to 50)
        #[arg(long, default_value = "15")]
        margin: Margin,
    },
}

fn init_logging(cli: &Cli) -> Result<()> {
    let mut builder = env_logger::Builder::from_default_env();
    let level = if cli.verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    };
    if std::env::var_os("RUST_LOG").is_none() {
        builder.filter_level(level);
    }
    if let Some(path) = &cli.log_file {
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.init();
    Ok(())
}

fn discover() -> Result<Vec<String>, ArmError> {
    spinner::task("Searching serial ports...", "Serial ports found!", || {
        ports::require_any(ports::discover()?)
    })
}

fn connect(cli: &Cli, prompt: &SharedPrompt) -> Result<Session> {
    if cli.simulate {
        info!("Using simulated arm");
        return Ok(Session::new(Arc::new(SimArm::animated())));
    }
    let dobot = match &cli.port {
        Some(port) => open(port, cli.verbose)?,
        None => ports::connect(
            discover(),
            |names| -> Result<String> { Ok(ports::select(&mut *prompt.lock(), names)?) },
            |port| open(port, cli.verbose),
        )?,
    };
    Ok(Session::new(Arc::new(dobot)))
}

fn open(port: &str, verbose: bool) -> Result<SerialDobot> {
    spinner::task("Connecting to Dobot...", "Connected!", || {
        Dobot::open(port, verbose)
    })
    .with_context(|| format!("Connection on {port} failed"))
}

/// Ctrl+C outside raw mode: end the background loops, halt the queue, leave.
fn install_interrupt(arm: Arc<dyn Arm>, cancel: Option<CancelToken>) -> Result<()> {
    ctrlc::set_handler(move || {
        if let Some(cancel) = &cancel {
            cancel.cancel();
        }
        if let Err(e) = arm.stop() {
            error!("Stop on interrupt failed: {e}");
        }
        eprintln!("\nInterrupted, motion queue halted.");
        std::process::exit(130);
    })
    .context("Failed to install Ctrl+C handler")
}

fn run(cli: Cli) -> Result<()> {
    let prompt = shared(LinePrompt::stdio());
    match cli.command {
        Command::Ports => {
            let names = ports::discover()?;
            println!("available ports: {names:?}");
        }
        Command::SelectPort => {
            let names = discover()?;
            let port = ports::select(&mut *prompt.lock(), &names)?;
            println!("Selected port: {port}");
        }
        Command::Pose => {
            let session = connect(&cli, &prompt)?;
            let pose = session.pose()?;
            println!("{pose}");
            session.close()?;
        }
        Command::Home => {
            let session = connect(&cli, &prompt)?;
            install_interrupt(session.share(), None)?;
            session.set_speed(DEFAULT_SPEED, DEFAULT_ACCELERATION)?;
            let target = HOME.target().context("Home position is incomplete")?;
            spinner::task("Moving home...", "Home reached!", || {
                session.move_to(target, MoveMode::Blocking)
            })?;
            println!("{}", session.pose()?);
            session.close()?;
        }
        Command::Control { step, interval_ms } => {
            if !step.is_finite() || step <= 0.0 {
                bail!("Jog step must be a positive number, got {step}");
            }
            let session = connect(&cli, &prompt)?;
            install_interrupt(session.share(), None)?;
            let settings = JogSettings {
                step,
                interval: Duration::from_millis(interval_ms),
            };
            menu::run_control(session, &prompt, &mut |arm: &dyn Arm| {
                let mut view = TerminalView::enter()?;
                let mut keys = CrosstermKeys::new()?;
                jog::run(arm, &mut keys, &mut view, settings).map(|_| ())
            })?;
        }
        Command::Monitor { margin } => {
            let session = connect(&cli, &prompt)?;
            let settings = MonitorSettings {
                margin,
                ..MonitorSettings::default()
            };
            let cancel = CancelToken::new();
            install_interrupt(session.share(), Some(cancel.clone()))?;
            menu::run_monitor(
                session,
                &prompt,
                Box::new(PoseSpinner::new()),
                settings,
                cancel,
            )?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(&cli) {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("✘ {e:#}");
            ExitCode::FAILURE
        }
    }
}
