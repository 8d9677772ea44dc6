//! bustrack-driver: driver console for campus bus trips.
//!
//! Runs the trip core against the on-disk store and delivers finished trips
//! to the sync receiver over its Unix socket.
//!
//! ## Subcommands
//!
//! - `console` (default): interactive trip console, reads commands from stdin
//! - `status`: print trip, queue and receiver state, then exit

mod logging;
mod repl;
mod sync_client;

use clap::{Parser, Subcommand};
use std::io;
use std::path::PathBuf;

use sync_client::SocketTransport;
use trip_core::{DriverApp, FileStore, NetworkStatus, Route, StorageConfig};

#[derive(Parser)]
#[command(name = "bustrack-driver")]
#[command(about = "Campus bus driver console")]
#[command(version)]
struct Cli {
    /// Data directory (default: $BUSTRACK_HOME or ~/.bustrack)
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Sync receiver socket (default: <data dir>/sync.sock)
    #[arg(long, value_name = "PATH")]
    socket: Option<PathBuf>,

    /// Connectivity at startup: offline, wifi, cellular, unknown
    #[arg(long, default_value = "unknown")]
    network: NetworkStatus,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive trip console (reads commands from stdin)
    Console,

    /// Print trip and sync state
    Status,
}

fn main() {
    let cli = Cli::parse();

    let config = match &cli.data_dir {
        Some(dir) => StorageConfig::with_root(dir.clone()),
        None => match StorageConfig::from_env() {
            Some(config) => config,
            None => {
                eprintln!("error: no data directory (set BUSTRACK_HOME or pass --data-dir)");
                std::process::exit(1);
            }
        },
    };

    let _logging_guard = logging::init(&config.logs_dir());

    let store = match FileStore::open(&config.store_dir()) {
        Ok(store) => store,
        Err(err) => {
            tracing::error!(error = %err, "Failed to open driver store");
            eprintln!("error: {}", err);
            std::process::exit(1);
        }
    };

    let socket = cli.socket.clone().unwrap_or_else(|| config.sync_socket());
    let transport = SocketTransport::new(socket);

    let mut app = match DriverApp::open(store, Route::default(), transport) {
        Ok(app) => app,
        Err(err) => {
            tracing::error!(error = %err, "Failed to open driver state");
            eprintln!("error: {}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = app.set_network(cli.network) {
        tracing::warn!(error = %err, "Initial network update failed");
    }

    match cli.command.unwrap_or(Commands::Console) {
        Commands::Console => {
            let stdin = io::stdin();
            let result = repl::Console::new(&mut app, io::stdout()).run(stdin.lock());
            if let Err(err) = result {
                tracing::error!(error = %err, "Console I/O failed");
                std::process::exit(1);
            }
        }
        Commands::Status => print_status(&mut app),
    }
}

fn print_status(app: &mut DriverApp<FileStore, SocketTransport>) {
    println!("{}", repl::status_line(app));
    println!("{}", repl::sync_line(app));
    if let Some(identity) = app.identity() {
        println!("Driver: {} | Bus: {}", identity.name, identity.bus_number);
    }
    if app.pending_change_count() > 0 {
        println!("Pending preference changes: {}", app.pending_change_count());
    }

    let socket = app.transport_mut().socket().display().to_string();
    let receiver = match app.transport_mut().health() {
        Some(true) => "ok",
        Some(false) => "unhealthy",
        None => "not running",
    };
    println!("Receiver: {} ({})", receiver, socket);
}
