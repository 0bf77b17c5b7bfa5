#![forbid(unsafe_code)]

mod apply;
mod brightness;
mod config;
mod constants;
mod edid;
mod error;
mod event_handler;
mod ipc;
mod ipc_handler;
mod layout;
mod manager;
mod mirror;
mod monitor;
mod registry;
mod scale;
mod server;
#[cfg(test)]
mod testing;
mod touchscreen;
mod types;
mod x11_utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use tracing::{error, info, Level as TraceLevel};
use tracing_subscriber::FmtSubscriber;

use config::ConfigPaths;
use event_handler::Job;
use ipc::{DisplayClient, DisplayRequest, DisplaySocket};
use manager::{Manager, ManagerOptions};
use types::DisplayMode;
use x11_utils::X11Server;

#[derive(Parser, Debug)]
#[command(name = "randr-layoutd")]
#[command(version, about = "Multi-monitor layout daemon for X11 sessions", long_about = None)]
struct Cli {
    /// Log at debug level (overrides LOG_LEVEL)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the layout daemon
    Daemon {
        /// Directory holding the layout store and settings
        #[arg(long)]
        config_dir: Option<PathBuf>,

        /// Control socket path
        #[arg(long)]
        socket: Option<PathBuf>,

        /// Treat the machine as a laptop
        #[arg(long, conflicts_with = "desktop")]
        laptop: bool,

        /// Treat the machine as a desktop
        #[arg(long)]
        desktop: bool,

        /// Program run to ask which output an unmatched touchscreen belongs to
        #[arg(long)]
        touchscreen_dialog: Option<String>,
    },

    /// Talk to a running daemon
    Ctl {
        /// Control socket path
        #[arg(long)]
        socket: Option<PathBuf>,

        #[command(subcommand)]
        action: CtlAction,
    },
}

#[derive(Subcommand, Debug)]
enum CtlAction {
    Ping,
    /// Print every known monitor
    Monitors,
    /// Print connected output names
    Outputs,
    /// Print mode sizes shared by every connected output
    CommonModes,
    /// Print the active display mode
    Mode,
    /// Print the display mode inferred from live geometry
    RealMode,
    /// Print the builtin output, if any
    Builtin,
    /// Print per-output brightness
    GetBrightness,
    /// Commit pending edits
    Apply,
    /// Discard pending edits
    Reset,
    /// Switch display mode (custom, mirror, extend, only-one)
    Switch {
        mode: DisplayMode,
        /// Custom profile, or the output for only-one
        #[arg(default_value = "")]
        name: String,
    },
    /// Make an output primary
    Primary { name: String },
    /// Set and persist brightness of an output
    Brightness { output: String, value: f64 },
    /// Persist pending edits
    Save,
    /// Rename a custom profile
    Rename { old: String, new: String },
    /// Delete a custom profile
    Delete { name: String },
    /// Bind a touchscreen to an output
    Associate { uuid: String, output: String },
    /// Send a raw JSON request
    Raw { json: String },
    /// Stop the daemon
    Shutdown,
}

fn init_logging(debug: bool) -> Result<()> {
    // Parse log level from environment variable
    let log_level = if debug {
        TraceLevel::DEBUG
    } else {
        match std::env::var("LOG_LEVEL")
            .unwrap_or_else(|_| "info".to_string())
            .to_lowercase()
            .as_str()
        {
            "trace" => TraceLevel::TRACE,
            "debug" => TraceLevel::DEBUG,
            "warn" => TraceLevel::WARN,
            "error" => TraceLevel::ERROR,
            _ => TraceLevel::INFO,
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn run_daemon(
    config_dir: Option<PathBuf>,
    socket: Option<PathBuf>,
    laptop: Option<bool>,
    touchscreen_dialog: Option<String>,
) -> Result<()> {
    let (conn, screen_num) = x11rb::connect(None).context("Failed to connect to X11")?;
    let conn = Arc::new(conn);
    let server = Arc::new(X11Server::new(conn, screen_num)?);
    info!(screen = screen_num, "connected to x11");

    let paths = config_dir.map(ConfigPaths::new).unwrap_or_default();
    info!(dir = %paths.dir().display(), "using config directory");

    let manager = Arc::new(Manager::new(
        server.clone(),
        ManagerOptions {
            paths,
            laptop,
            touchscreen_dialog,
        },
    )?);

    manager
        .start()
        .context("Failed to subscribe to RandR notifications")?;

    let socket = match socket {
        Some(path) => DisplaySocket::bind_to(path)?,
        None => DisplaySocket::bind()?,
    };
    let socket_path = socket.path().to_path_buf();

    let (jobs_tx, jobs_rx) = mpsc::channel();

    let events_tx = jobs_tx.clone();
    let events = server.clone();
    std::thread::spawn(move || loop {
        match events.wait_for_randr_event() {
            Ok(event) => {
                if events_tx.send(Job::Event(event)).is_err() {
                    break;
                }
            }
            Err(e) => {
                error!(error = %e, "lost connection to x11");
                events_tx.send(Job::Shutdown).ok();
                break;
            }
        }
    });

    let _ipc_handle = ipc_handler::spawn_ipc_listener(socket, manager.clone(), jobs_tx);

    event_handler::run_dispatcher(&manager, jobs_rx);

    // Listener thread is parked in accept() and never drops the socket
    let _ = std::fs::remove_file(&socket_path);
    info!("daemon stopped");
    Ok(())
}

fn run_ctl(socket: Option<PathBuf>, action: CtlAction) -> Result<()> {
    let mut client = match socket {
        Some(path) => DisplayClient::connect_to(&path)?,
        None => DisplayClient::connect()?,
    };

    let request = match action {
        CtlAction::Ping => DisplayRequest::Ping,
        CtlAction::Monitors => DisplayRequest::GetMonitors,
        CtlAction::Outputs => DisplayRequest::ListOutputNames,
        CtlAction::CommonModes => DisplayRequest::ListCommonModes,
        CtlAction::Mode => DisplayRequest::GetDisplayMode,
        CtlAction::RealMode => DisplayRequest::GetRealDisplayMode,
        CtlAction::Builtin => DisplayRequest::GetBuiltin,
        CtlAction::GetBrightness => DisplayRequest::GetBrightness,
        CtlAction::Apply => DisplayRequest::ApplyChanges,
        CtlAction::Reset => DisplayRequest::ResetChanges,
        CtlAction::Switch { mode, name } => DisplayRequest::SwitchMode { mode, name },
        CtlAction::Primary { name } => DisplayRequest::SetPrimary { name },
        CtlAction::Brightness { output, value } => {
            DisplayRequest::SetAndSaveBrightness { output, value }
        }
        CtlAction::Save => DisplayRequest::Save,
        CtlAction::Rename { old, new } => DisplayRequest::RenameCustom { old, new },
        CtlAction::Delete { name } => DisplayRequest::DeleteCustom { name },
        CtlAction::Associate { uuid, output } => {
            DisplayRequest::AssociateTouchscreen { uuid, output }
        }
        CtlAction::Raw { json } => {
            serde_json::from_str(&json).context("Failed to parse request JSON")?
        }
        CtlAction::Shutdown => DisplayRequest::Shutdown,
    };

    let response = client.request(request)?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    if let ipc::DisplayResponse::Error { .. } = response {
        std::process::exit(1);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug)?;

    let command = cli.command.unwrap_or(Command::Daemon {
        config_dir: None,
        socket: None,
        laptop: false,
        desktop: false,
        touchscreen_dialog: None,
    });
    match command {
        Command::Daemon {
            config_dir,
            socket,
            laptop,
            desktop,
            touchscreen_dialog,
        } => {
            let laptop = match (laptop, desktop) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            run_daemon(config_dir, socket, laptop, touchscreen_dialog)
        }
        Command::Ctl { socket, action } => run_ctl(socket, action),
    }
}
