//! Wire protocol and record schema for bustrack trip sync.
//!
//! Shared by the driver client and the sync receiver so the payload shape
//! cannot drift between them. The receiver is the authority on validation;
//! clients reuse the same types (and may validate before sending).
//!
//! Framing is one JSON document per line over a Unix domain socket.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_BATCH_RECORDS: usize = 500;
pub const MAX_PASSENGERS: u32 = 100;
pub const MAX_ID_LEN: usize = 128;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    SubmitTrips,
    SubmitChanges,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// Confirmation that the bus reached a stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckIn {
    pub stop_id: u32,
    pub stop_name: String,
    pub timestamp: DateTime<Utc>,
    pub passengers_at_check_in: u32,
}

/// A finished trip. Immutable once built, except for `synced`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripRecord {
    pub id: String,
    pub route_id: String,
    pub route_name: String,
    pub bus_number: String,
    pub driver_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub stops: Vec<CheckIn>,
    pub total_passengers: u32,
    #[serde(default)]
    pub synced: bool,
}

impl TripRecord {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.id, "id")?;
        require_id(&self.route_id, "routeId")?;
        require_id(&self.driver_id, "driverId")?;

        if self.end_time < self.start_time {
            return Err(ErrorInfo::new(
                "invalid_timestamp",
                "endTime must not precede startTime",
            ));
        }

        if self.stops.is_empty() {
            return Err(ErrorInfo::new(
                "missing_field",
                "stops must contain at least one check-in",
            ));
        }

        if self.total_passengers > MAX_PASSENGERS {
            return Err(ErrorInfo::new(
                "invalid_passengers",
                format!("totalPassengers must be at most {}", MAX_PASSENGERS),
            ));
        }

        let mut seen = HashSet::new();
        let mut previous = self.start_time;
        for check_in in &self.stops {
            if !seen.insert(check_in.stop_id) {
                return Err(ErrorInfo::new(
                    "duplicate_stop",
                    format!("stop {} was checked in more than once", check_in.stop_id),
                ));
            }
            if check_in.timestamp < previous || check_in.timestamp > self.end_time {
                return Err(ErrorInfo::new(
                    "invalid_timestamp",
                    format!(
                        "check-in at stop {} is out of order or outside the trip",
                        check_in.stop_id
                    ),
                ));
            }
            if check_in.passengers_at_check_in > MAX_PASSENGERS {
                return Err(ErrorInfo::new(
                    "invalid_passengers",
                    format!(
                        "passengersAtCheckIn must be at most {} (stop {})",
                        MAX_PASSENGERS, check_in.stop_id
                    ),
                ));
            }
            previous = check_in.timestamp;
        }

        Ok(())
    }
}

/// A queued preference or report change from the student portal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl PendingChange {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.id, "id")?;
        require_id(&self.kind, "kind")?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Method params and results
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TripBatch {
    pub trips: Vec<TripRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangeBatch {
    pub changes: Vec<PendingChange>,
}

/// Receiver acknowledgement for a submitted batch.
///
/// `duplicates` counts records whose id was already stored; they are
/// acknowledged like fresh ones so clients can safely redeliver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitAck {
    pub accepted: usize,
    pub duplicates: usize,
}

pub fn parse_trip_batch(params: Value) -> Result<TripBatch, ErrorInfo> {
    let batch: TripBatch = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("trip batch is invalid JSON: {}", err),
        )
    })?;
    require_batch_size(batch.trips.len())?;
    for trip in &batch.trips {
        trip.validate()?;
    }
    Ok(batch)
}

pub fn parse_change_batch(params: Value) -> Result<ChangeBatch, ErrorInfo> {
    let batch: ChangeBatch = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("change batch is invalid JSON: {}", err),
        )
    })?;
    require_batch_size(batch.changes.len())?;
    for change in &batch.changes {
        change.validate()?;
    }
    Ok(batch)
}

fn require_batch_size(len: usize) -> Result<(), ErrorInfo> {
    if len == 0 {
        return Err(ErrorInfo::new("empty_batch", "batch must not be empty"));
    }
    if len > MAX_BATCH_RECORDS {
        return Err(ErrorInfo::new(
            "batch_too_large",
            format!("batch must contain at most {} records", MAX_BATCH_RECORDS),
        ));
    }
    Ok(())
}

fn require_id(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    if value.len() > MAX_ID_LEN {
        return Err(ErrorInfo::new(
            "invalid_field",
            format!("{} must be {} characters or fewer", field, MAX_ID_LEN),
        ));
    }
    Ok(())
}
