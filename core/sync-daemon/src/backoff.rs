//! Crash-loop protection for the receiver.
//!
//! Start times from the last two minutes are kept on disk. Past three starts
//! in that window, startup sleeps `10s × extra starts`, capped at one minute.

use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::cmp;
use std::path::Path;
use std::thread;
use std::time::Duration as StdDuration;
use tracing::warn;

const WINDOW_SECS: i64 = 120;
const MAX_STARTS: usize = 3;
const BACKOFF_STEP_SECS: u64 = 10;
const BACKOFF_MAX_SECS: u64 = 60;

#[derive(Default, Serialize, Deserialize)]
struct BackoffState {
    starts: Vec<DateTime<Utc>>,
}

/// Reported by `get_health`.
#[derive(Debug, Serialize)]
pub struct BackoffSnapshot {
    pub recent_starts: usize,
    pub window_secs: i64,
}

pub fn apply_startup_backoff(path: &Path) {
    let now = Utc::now();
    let mut state = match load_state(path) {
        Ok(state) => state,
        Err(err) => {
            warn!(error = %err, "Discarding unreadable receiver backoff state");
            BackoffState::default()
        }
    };
    let backoff_secs = compute_backoff(now, &mut state);

    if let Err(err) = save_state(path, &state) {
        warn!(error = %err, "Failed to persist receiver backoff state");
    }

    if let Some(secs) = backoff_secs {
        warn!(
            count = state.starts.len(),
            backoff_secs = secs,
            "Receiver start backoff engaged"
        );
        thread::sleep(StdDuration::from_secs(secs));
    }
}

pub fn snapshot(path: &Path) -> Option<BackoffSnapshot> {
    let state = load_state(path).ok()?;
    let now = Utc::now();
    let recent_starts = state
        .starts
        .iter()
        .filter(|at| now.signed_duration_since(**at).num_seconds() <= WINDOW_SECS)
        .count();
    Some(BackoffSnapshot {
        recent_starts,
        window_secs: WINDOW_SECS,
    })
}

fn compute_backoff(now: DateTime<Utc>, state: &mut BackoffState) -> Option<u64> {
    state
        .starts
        .retain(|at| now.signed_duration_since(*at).num_seconds() <= WINDOW_SECS);
    state.starts.push(now);

    if state.starts.len() <= MAX_STARTS {
        return None;
    }

    let extra = state.starts.len().saturating_sub(MAX_STARTS) as u64;
    let backoff = BACKOFF_STEP_SECS.saturating_mul(extra);
    Some(cmp::min(backoff, BACKOFF_MAX_SECS))
}

fn load_state(path: &Path) -> Result<BackoffState, String> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(BackoffState::default())
        }
        Err(err) => return Err(format!("Failed to read backoff state: {}", err)),
    };

    serde_json::from_slice(&data).map_err(|err| format!("Failed to parse backoff state: {}", err))
}

fn save_state(path: &Path, state: &BackoffState) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("Failed to create receiver backoff dir: {}", err))?;
    }

    let payload = serde_json::to_vec_pretty(state)
        .map_err(|err| format!("Failed to serialize backoff state: {}", err))?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, payload)
        .map_err(|err| format!("Failed to write backoff state: {}", err))?;
    fs::rename(&tmp_path, path)
        .map_err(|err| format!("Failed to commit backoff state: {}", err))?;
    Ok(())
}
