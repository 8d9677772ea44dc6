//! Operator settings, persisted under `driver_settings`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::{keys, load_json_or_default, save_json, KeyValueStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriverSettings {
    pub vibration: bool,
    pub sound: bool,
    /// Hold sync until the device is on WiFi.
    pub wifi_only: bool,
    pub brightness: bool,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            vibration: true,
            sound: false,
            wifi_only: true,
            brightness: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    Vibration,
    Sound,
    WifiOnly,
    Brightness,
}

impl FromStr for SettingKey {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "vibration" => Ok(SettingKey::Vibration),
            "sound" => Ok(SettingKey::Sound),
            "wifiOnly" | "wifi-only" | "wifi_only" => Ok(SettingKey::WifiOnly),
            "brightness" => Ok(SettingKey::Brightness),
            other => Err(format!("unknown setting '{}'", other)),
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SettingKey::Vibration => "vibration",
            SettingKey::Sound => "sound",
            SettingKey::WifiOnly => "wifiOnly",
            SettingKey::Brightness => "brightness",
        };
        f.write_str(name)
    }
}

impl DriverSettings {
    pub fn load(store: &impl KeyValueStore) -> Result<Self> {
        load_json_or_default(store, keys::DRIVER_SETTINGS)
    }

    pub fn save(&self, store: &mut impl KeyValueStore) -> Result<()> {
        save_json(store, keys::DRIVER_SETTINGS, self)
    }

    pub fn with(&self, key: SettingKey, value: bool) -> Self {
        let mut next = self.clone();
        match key {
            SettingKey::Vibration => next.vibration = value,
            SettingKey::Sound => next.sound = value,
            SettingKey::WifiOnly => next.wifi_only = value,
            SettingKey::Brightness => next.brightness = value,
        }
        next
    }
}
