use clap::{Parser, Subcommand};
use nm_killswitch::config::{CONFIG_FILE_NAME, Config, ConfigError};
use nm_killswitch::controller::TunnelState;
use nm_killswitch::planner::parse_server_address;
use nm_killswitch::platform::{self, BackendError, NetworkBackend};
use nm_killswitch::{
    KillSwitchError, KillSwitchMode, KillSwitchStatus, LifecycleEvent, ModeController,
    ReconciliationEngine,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Conventional exit status for a process stopped by SIGINT
const EXIT_INTERRUPTED: u8 = 130;

/// The action failed in a way that rerunning it cannot fix
const EXIT_FATAL: u8 = 3;

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "nm-killswitch")]
#[command(about = "VPN kill switch for NetworkManager")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of the default search paths
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Turn the kill switch on
    Enable {
        /// Keep blocking traffic after the VPN disconnects
        #[arg(long)]
        permanent: bool,

        /// A VPN connection to this server is in progress
        #[arg(long)]
        server: Option<String>,
    },
    /// Turn the kill switch off and remove its connections
    Disable,
    /// Report a VPN lifecycle event
    Event {
        #[arg(value_enum)]
        event: LifecycleEvent,

        /// VPN server address, required for `connecting`
        #[arg(long)]
        server: Option<String>,
    },
    /// Show current kill switch status
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate default config file
    Init,
    /// Script mode for OpenConnect integration
    ///
    /// This command is called by OpenConnect with environment variables
    /// describing the VPN connection. Do not call this directly.
    ///
    /// Usage: sudo openconnect ... -s 'nm-killswitch script'
    Script,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // stderr only: stdout belongs to OpenConnect and `status --json`
    init_logging(cli.verbose);

    let interrupted = install_interrupt_handler();

    let code = match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            match KillSwitchError::from_chain(e.as_ref()) {
                Some(err) if err.is_fatal() => {
                    error!("Manual intervention required, retrying will not help");
                    ExitCode::from(EXIT_FATAL)
                }
                _ => ExitCode::FAILURE,
            }
        }
    };

    if interrupted.load(Ordering::SeqCst) {
        warn!("Interrupted, exiting after the action finished");
        return ExitCode::from(EXIT_INTERRUPTED);
    }
    code
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Record SIGINT/SIGTERM instead of dying mid-action
///
/// A half-finished transition could leave neither construct active, so the
/// signal only takes effect once the current action returns.
fn install_interrupt_handler() -> Arc<AtomicBool> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);

    if let Err(e) = ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    }) {
        warn!("Failed to install interrupt handler: {}", e);
    }
    interrupted
}

fn run(cli: Cli) -> CliResult {
    let load_config = || -> Result<(Config, PathBuf), ConfigError> {
        let (config, path) = Config::discover(cli.config.as_deref())?;
        debug!("Using config {}", path.display());
        Ok((config, path))
    };

    match cli.command {
        Commands::Init => init_config(cli.config.clone())?,
        Commands::Enable { permanent, server } => {
            let (mut config, config_path) = load_config()?;
            let tunnel = match server {
                Some(server) => TunnelState::Connecting(parse_server_address(&server)?),
                None => TunnelState::Down,
            };

            // Persist first so script invocations honor the mode even if this run fails
            config.killswitch.mode = if permanent {
                KillSwitchMode::Permanent
            } else {
                KillSwitchMode::On
            };
            config.save(&config_path)?;

            let controller = open_controller(&config)?;
            let _lock = acquire_lock(&config)?;
            controller.set_tunnel(tunnel);
            let action = controller.enable(permanent)?;
            println!("Kill switch enabled ({})", action);
        }
        Commands::Disable => {
            let (mut config, config_path) = load_config()?;
            config.killswitch.mode = KillSwitchMode::Off;
            config.save(&config_path)?;

            let controller = open_controller(&config)?;
            let _lock = acquire_lock(&config)?;
            controller.disable()?;
            println!("Kill switch disabled");
        }
        Commands::Event { event, server } => {
            let (config, _) = load_config()?;
            let server = server
                .as_deref()
                .map(parse_server_address)
                .transpose()?
                .or(config.openconnect.server);

            let controller = open_controller(&config)?;
            let _lock = acquire_lock(&config)?;
            match controller.on_lifecycle_event(event, server)? {
                Some(action) => println!("Ran {}", action),
                None => println!(
                    "No action for {:?} in mode {:?}",
                    event, config.killswitch.mode
                ),
            }
        }
        Commands::Status { json } => {
            let (config, _) = load_config()?;
            let status = open_controller(&config)?.status()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&config, &status);
            }
        }
        Commands::Script => {
            let (config, _) = load_config()?;
            let controller = open_controller(&config)?;
            let _lock = acquire_lock(&config)?;
            match nm_killswitch::handle_script_mode(&controller, &config)? {
                Some(action) => info!("Script completed: {}", action),
                None => info!("Script completed, nothing to do"),
            }
        }
    }

    Ok(())
}

type Controller = ModeController<Box<dyn NetworkBackend + Send>>;

fn open_controller(config: &Config) -> Result<Controller, BackendError> {
    #[cfg(target_os = "linux")]
    {
        if !platform::lock::is_root() {
            warn!("Not running as root, NetworkManager may refuse changes");
        }
    }

    let backend = platform::get_backend(&config.backend.nmcli)?;
    Ok(ModeController::new(
        ReconciliationEngine::new(backend),
        config.killswitch.mode,
    ))
}

#[cfg(target_os = "linux")]
fn acquire_lock(config: &Config) -> Result<platform::lock::ActionLock, platform::lock::LockError> {
    platform::lock::ActionLock::acquire(&config.backend.lock_file)
}

// No cross-process lock off Linux; backend selection already failed there.
#[cfg(not(target_os = "linux"))]
fn acquire_lock(_config: &Config) -> Result<(), BackendError> {
    Ok(())
}

fn init_config(path: Option<PathBuf>) -> CliResult {
    let path = path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    if path.exists() {
        println!("Config already exists: {}", path.display());
        return Ok(());
    }

    info!("Generating default config...");
    Config::default().save(&path)?;
    println!("Created default config: {}", path.display());
    Ok(())
}

fn print_status(config: &Config, status: &KillSwitchStatus) {
    let describe = |exists: bool, active: bool| match (exists, active) {
        (_, true) => "active",
        (true, false) => "inactive",
        (false, false) => "absent",
    };

    println!("Kill switch mode: {:?}", config.killswitch.mode);
    println!("  Posture: {:?}", status.posture);
    println!(
        "  Blocking: {}",
        describe(status.blocking.exists, status.blocking.active)
    );
    println!(
        "  Routed: {}",
        describe(status.routed.exists, status.routed.active)
    );
    println!(
        "  Connectivity check: {}",
        if status.probe.enabled { "enabled" } else { "disabled" }
    );
}
