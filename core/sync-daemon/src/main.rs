//! bustrack sync receiver entrypoint.
//!
//! A small single-writer service standing in for the campus backend. It
//! accepts finalized trips and student preference changes over a Unix
//! socket, validates every record, and stores them idempotently in SQLite.

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use bustrack_sync_protocol::{
    parse_change_batch, parse_trip_batch, ErrorInfo, Method, Request, Response,
    MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use chrono::Utc;
use serde_json::Value;
use trip_core::StorageConfig;

mod backoff;
mod db;

use db::Db;

const DEBUG_LOG_ENV: &str = "BUSTRACK_DEBUG_LOG";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

struct Receiver {
    db: Db,
    config: StorageConfig,
}

fn main() {
    init_logging();

    let config = match StorageConfig::from_env() {
        Some(config) => config,
        None => {
            error!("Failed to resolve data directory (set BUSTRACK_HOME)");
            std::process::exit(1);
        }
    };

    backoff::apply_startup_backoff(&config.sync_backoff_file());

    let socket_path = config.sync_socket();

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare receiver socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let db = match Db::new(config.sync_db_file()) {
        Ok(db) => db,
        Err(err) => {
            error!(error = %err, "Failed to initialize receiver database");
            std::process::exit(1);
        }
    };

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind receiver socket");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "bustrack sync receiver started");

    let receiver = Arc::new(Receiver { db, config });

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let receiver = Arc::clone(&receiver);
                thread::spawn(move || handle_connection(stream, receiver));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept receiver connection");
            }
        }
    }
}

fn init_logging() {
    let debug_enabled = env::var(DEBUG_LOG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, receiver: Arc<Receiver>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Receiver request received");
    let response = handle_request(request, &receiver);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, receiver: &Receiver) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => {
            let mut data = serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
            });
            match receiver.db.totals() {
                Ok(totals) => {
                    if let Ok(value) = serde_json::to_value(totals) {
                        data["totals"] = value;
                    }
                }
                Err(err) => warn!(error = %err, "Failed to count stored records"),
            }
            if let Some(snapshot) = backoff::snapshot(&receiver.config.sync_backoff_file()) {
                if let Ok(value) = serde_json::to_value(snapshot) {
                    data["backoff"] = value;
                }
            }
            Response::ok(request.id, data)
        }
        Method::SubmitTrips => handle_submit_trips(request.id, request.params, receiver),
        Method::SubmitChanges => handle_submit_changes(request.id, request.params, receiver),
    }
}

fn handle_submit_trips(id: Option<String>, params: Option<Value>, receiver: &Receiver) -> Response {
    let Some(params) = params else {
        return Response::error(id, "invalid_params", "trips are required");
    };
    let batch = match parse_trip_batch(params) {
        Ok(batch) => batch,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Rejected trip batch");
            return Response::error_with_info(id, err);
        }
    };

    match receiver.db.insert_trips(&batch.trips, Utc::now()) {
        Ok(ack) => {
            info!(
                accepted = ack.accepted,
                duplicates = ack.duplicates,
                "Trip batch stored"
            );
            ack_response(id, ack)
        }
        Err(err) => {
            error!(error = %err, "Failed to store trip batch");
            Response::error(id, "storage_error", err)
        }
    }
}

fn handle_submit_changes(
    id: Option<String>,
    params: Option<Value>,
    receiver: &Receiver,
) -> Response {
    let Some(params) = params else {
        return Response::error(id, "invalid_params", "changes are required");
    };
    let batch = match parse_change_batch(params) {
        Ok(batch) => batch,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Rejected change batch");
            return Response::error_with_info(id, err);
        }
    };

    match receiver.db.insert_changes(&batch.changes, Utc::now()) {
        Ok(ack) => {
            info!(
                accepted = ack.accepted,
                duplicates = ack.duplicates,
                "Change batch stored"
            );
            ack_response(id, ack)
        }
        Err(err) => {
            error!(error = %err, "Failed to store change batch");
            Response::error(id, "storage_error", err)
        }
    }
}

fn ack_response(id: Option<String>, ack: bustrack_sync_protocol::SubmitAck) -> Response {
    match serde_json::to_value(ack) {
        Ok(value) => Response::ok(id, value),
        Err(err) => Response::error(
            id,
            "serialization_error",
            format!("Failed to serialize acknowledgement: {}", err),
        ),
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
