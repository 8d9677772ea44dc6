//! When a flush may run, and how sync state is reported to the operator.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connectivity as classified by the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
    Offline,
    Wifi,
    Cellular,
    /// Online, but the platform cannot tell what kind of link.
    #[default]
    Unknown,
}

impl NetworkStatus {
    pub fn is_online(&self) -> bool {
        !matches!(self, NetworkStatus::Offline)
    }

    /// An unclassifiable link is treated as WiFi.
    pub fn is_wifi(&self) -> bool {
        matches!(self, NetworkStatus::Wifi | NetworkStatus::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkStatus::Offline => "offline",
            NetworkStatus::Wifi => "wifi",
            NetworkStatus::Cellular => "cellular",
            NetworkStatus::Unknown => "unknown",
        }
    }
}

impl FromStr for NetworkStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "offline" => Ok(NetworkStatus::Offline),
            "wifi" => Ok(NetworkStatus::Wifi),
            "cellular" => Ok(NetworkStatus::Cellular),
            "unknown" => Ok(NetworkStatus::Unknown),
            other => Err(format!(
                "unknown network status '{}' (expected offline, wifi, cellular, unknown)",
                other
            )),
        }
    }
}

impl fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeferReason {
    Offline,
    WifiOnly,
}

impl fmt::Display for DeferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeferReason::Offline => f.write_str("no internet connection"),
            DeferReason::WifiOnly => f.write_str("waiting for WiFi"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncGate {
    Open,
    Deferred(DeferReason),
}

/// A deferred flush is a no-op, not a failure.
pub fn sync_gate(network: NetworkStatus, wifi_only: bool) -> SyncGate {
    if !network.is_online() {
        SyncGate::Deferred(DeferReason::Offline)
    } else if wifi_only && !network.is_wifi() {
        SyncGate::Deferred(DeferReason::WifiOnly)
    } else {
        SyncGate::Open
    }
}

/// Sync indicator shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Offline,
    Syncing,
    Synced,
}

impl SyncStatus {
    pub fn derive(in_flight: bool, network: NetworkStatus, pending: usize) -> Self {
        if in_flight {
            SyncStatus::Syncing
        } else if !network.is_online() || pending > 0 {
            SyncStatus::Offline
        } else {
            SyncStatus::Synced
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Offline => "offline",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// "Just now", "N mins ago", "N hours ago", or "Never".
pub fn last_sync_label(last_sync: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(last) = last_sync else {
        return "Never".to_string();
    };
    let minutes = now.signed_duration_since(last).num_minutes().max(0);
    if minutes < 1 {
        "Just now".to_string()
    } else if minutes < 60 {
        format!("{} mins ago", minutes)
    } else {
        format!("{} hours ago", minutes / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn offline_defers_regardless_of_setting() {
        assert_eq!(
            sync_gate(NetworkStatus::Offline, false),
            SyncGate::Deferred(DeferReason::Offline)
        );
    }

    #[test]
    fn wifi_only_defers_on_cellular() {
        assert_eq!(
            sync_gate(NetworkStatus::Cellular, true),
            SyncGate::Deferred(DeferReason::WifiOnly)
        );
        assert_eq!(sync_gate(NetworkStatus::Cellular, false), SyncGate::Open);
    }

    #[test]
    fn unknown_link_counts_as_wifi() {
        assert_eq!(sync_gate(NetworkStatus::Unknown, true), SyncGate::Open);
    }

    #[test]
    fn status_reflects_queue_and_network() {
        assert_eq!(
            SyncStatus::derive(true, NetworkStatus::Wifi, 1),
            SyncStatus::Syncing
        );
        assert_eq!(
            SyncStatus::derive(false, NetworkStatus::Wifi, 2),
            SyncStatus::Offline
        );
        assert_eq!(
            SyncStatus::derive(false, NetworkStatus::Wifi, 0),
            SyncStatus::Synced
        );
        assert_eq!(
            SyncStatus::derive(false, NetworkStatus::Offline, 0),
            SyncStatus::Offline
        );
    }

    #[test]
    fn last_sync_labels() {
        let now = Utc.with_ymd_and_hms(2026, 1, 30, 12, 0, 0).unwrap();
        assert_eq!(last_sync_label(None, now), "Never");
        assert_eq!(last_sync_label(Some(now), now), "Just now");
        assert_eq!(
            last_sync_label(Some(now - Duration::minutes(12)), now),
            "12 mins ago"
        );
        assert_eq!(
            last_sync_label(Some(now - Duration::minutes(185)), now),
            "3 hours ago"
        );
    }

    #[test]
    fn parses_network_status() {
        assert_eq!("WiFi".parse::<NetworkStatus>(), Ok(NetworkStatus::Wifi));
        assert!("satellite".parse::<NetworkStatus>().is_err());
    }
}
