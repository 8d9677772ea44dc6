//! Socket transport to the sync receiver.
//!
//! Batches larger than the receiver's per-request limit are split and sent
//! in order. A batch counts as delivered only if every chunk is
//! acknowledged; if a later chunk fails, the earlier ones are redelivered on
//! the next flush and the receiver reports them as duplicates.

use bustrack_sync_protocol::{
    ChangeBatch, Method, PendingChange, Request, Response, TripBatch, TripRecord,
    MAX_BATCH_RECORDS, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use serde::Serialize;
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use trip_core::{DeliveryError, Transport};

const READ_TIMEOUT_MS: u64 = 3000;
const WRITE_TIMEOUT_MS: u64 = 3000;

pub struct SocketTransport {
    socket: PathBuf,
    next_request: u64,
}

impl SocketTransport {
    pub fn new(socket: PathBuf) -> Self {
        Self {
            socket,
            next_request: 0,
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// `Some(true)` when the receiver answers a health check with "ok".
    pub fn health(&mut self) -> Option<bool> {
        let response = self.call(Method::GetHealth, None).ok()?;
        if !response.ok {
            return Some(false);
        }
        let status = response
            .data
            .as_ref()
            .and_then(|data| data.get("status"))
            .and_then(|value| value.as_str());
        Some(matches!(status, Some("ok")))
    }

    fn submit<P: Serialize>(&mut self, method: Method, params: &P) -> Result<(), DeliveryError> {
        let params = serde_json::to_value(params)
            .map_err(|err| DeliveryError::BadResponse(format!("Failed to encode batch: {}", err)))?;
        let response = self.call(method, Some(params))?;
        if response.ok {
            if let Some(data) = &response.data {
                tracing::debug!(ack = %data, "Batch acknowledged");
            }
            return Ok(());
        }
        Err(match response.error {
            Some(info) => DeliveryError::Rejected {
                code: info.code,
                message: info.message,
            },
            None => DeliveryError::BadResponse("error response without details".to_string()),
        })
    }

    fn call(
        &mut self,
        method: Method,
        params: Option<serde_json::Value>,
    ) -> Result<Response, DeliveryError> {
        self.next_request += 1;
        let request = Request {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: Some(format!("req-{}-{}", std::process::id(), self.next_request)),
            params,
        };

        let mut stream = UnixStream::connect(&self.socket)
            .map_err(|err| DeliveryError::Unreachable(err.to_string()))?;
        let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
        let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

        let mut payload = serde_json::to_vec(&request)
            .map_err(|err| DeliveryError::BadResponse(format!("Failed to encode request: {}", err)))?;
        payload.push(b'\n');
        stream.write_all(&payload).map_err(io_failure)?;
        stream.flush().ok();

        read_response(&mut stream)
    }
}

impl Transport<TripRecord> for SocketTransport {
    fn send(&mut self, batch: &[TripRecord]) -> Result<(), DeliveryError> {
        for chunk in batch.chunks(MAX_BATCH_RECORDS) {
            self.submit(
                Method::SubmitTrips,
                &TripBatch {
                    trips: chunk.to_vec(),
                },
            )?;
        }
        tracing::info!(trips = batch.len(), socket = %self.socket.display(), "Trips delivered");
        Ok(())
    }
}

impl Transport<PendingChange> for SocketTransport {
    fn send(&mut self, batch: &[PendingChange]) -> Result<(), DeliveryError> {
        for chunk in batch.chunks(MAX_BATCH_RECORDS) {
            self.submit(
                Method::SubmitChanges,
                &ChangeBatch {
                    changes: chunk.to_vec(),
                },
            )?;
        }
        tracing::info!(changes = batch.len(), "Changes delivered");
        Ok(())
    }
}

fn io_failure(err: io::Error) -> DeliveryError {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => DeliveryError::Timeout,
        _ => DeliveryError::Unreachable(err.to_string()),
    }
}

fn read_response(stream: &mut UnixStream) -> Result<Response, DeliveryError> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(DeliveryError::BadResponse(
                        "response exceeded maximum size".to_string(),
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) => return Err(io_failure(err)),
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err(DeliveryError::BadResponse(
            "receiver response was empty".to_string(),
        ));
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| DeliveryError::BadResponse(format!("invalid response JSON: {}", err)))
}
