//! Driver identity for the current session.
//!
//! Credentials are only checked for shape here; verifying them against a
//! roster is the receiver's job. A remembered identity is persisted under
//! `driver_data` and restored on the next start.

use bustrack_sync_protocol::MAX_ID_LEN;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TripError};
use crate::store::{keys, load_json, save_json, KeyValueStore};

pub const DEFAULT_BUS_NUMBER: &str = "101";
const PIN_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverIdentity {
    pub id: String,
    pub name: String,
    pub bus_number: String,
}

impl DriverIdentity {
    /// Validates login input and builds the session identity.
    pub fn sign_in(driver_id: &str, pin: &str, bus_number: Option<&str>) -> Result<Self> {
        let driver_id = driver_id.trim();
        if driver_id.is_empty() {
            return Err(TripError::InvalidCredentials(
                "driver id is required".to_string(),
            ));
        }
        if driver_id.len() > MAX_ID_LEN {
            return Err(TripError::InvalidCredentials(format!(
                "driver id must be {} characters or fewer",
                MAX_ID_LEN
            )));
        }
        if pin.len() != PIN_LEN || !pin.chars().all(|c| c.is_ascii_digit()) {
            return Err(TripError::InvalidCredentials(format!(
                "PIN must be {} digits",
                PIN_LEN
            )));
        }
        let bus_number = bus_number
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_BUS_NUMBER);
        Ok(Self {
            id: driver_id.to_string(),
            name: format!("Driver {}", driver_id),
            bus_number: bus_number.to_string(),
        })
    }

    /// Restores a remembered identity. A malformed record is ignored with a
    /// warning; the driver just signs in again.
    pub fn load_remembered(store: &impl KeyValueStore) -> Result<Option<Self>> {
        match load_json(store, keys::DRIVER_DATA) {
            Ok(identity) => Ok(identity),
            Err(TripError::Json { source, .. }) => {
                tracing::warn!(error = %source, "Ignoring malformed remembered driver");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub fn remember(&self, store: &mut impl KeyValueStore) -> Result<()> {
        save_json(store, keys::DRIVER_DATA, self)
    }

    pub fn forget(store: &mut impl KeyValueStore) -> Result<()> {
        store.remove(keys::DRIVER_DATA)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn sign_in_requires_driver_id() {
        assert!(matches!(
            DriverIdentity::sign_in("  ", "1234", None),
            Err(TripError::InvalidCredentials(_))
        ));
    }

    #[test]
    fn sign_in_rejects_overlong_driver_id() {
        let long_id = "D".repeat(MAX_ID_LEN + 1);
        assert!(matches!(
            DriverIdentity::sign_in(&long_id, "1234", None),
            Err(TripError::InvalidCredentials(_))
        ));
        assert!(DriverIdentity::sign_in(&"D".repeat(MAX_ID_LEN), "1234", None).is_ok());
    }

    #[test]
    fn sign_in_requires_four_digit_pin() {
        assert!(DriverIdentity::sign_in("D-7", "123", None).is_err());
        assert!(DriverIdentity::sign_in("D-7", "12a4", None).is_err());
        assert!(DriverIdentity::sign_in("D-7", "4321", None).is_ok());
    }

    #[test]
    fn sign_in_defaults_bus_number() {
        let identity = DriverIdentity::sign_in("D-7", "4321", None).unwrap();
        assert_eq!(identity.bus_number, DEFAULT_BUS_NUMBER);
        let identity = DriverIdentity::sign_in("D-7", "4321", Some("214")).unwrap();
        assert_eq!(identity.bus_number, "214");
    }

    #[test]
    fn remember_and_forget() {
        let mut store = MemoryStore::new();
        let identity = DriverIdentity::sign_in("D-7", "4321", None).unwrap();
        identity.remember(&mut store).unwrap();
        assert_eq!(
            DriverIdentity::load_remembered(&store).unwrap(),
            Some(identity)
        );
        DriverIdentity::forget(&mut store).unwrap();
        assert!(DriverIdentity::load_remembered(&store).unwrap().is_none());
    }
}
