use crate::domain::models::BondingPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            console_logging_enabled: default_true(),
            file_logging_enabled: default_false(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "ble_pairing_peripheral".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Settle windows between radio operations, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingSettings {
    /// Off → on power cycle at startup
    #[serde(default = "default_radio_settle_ms")]
    pub radio_settle_ms: u64,
    /// GATT server open → advertising start
    #[serde(default = "default_advertise_delay_ms")]
    pub advertise_delay_ms: u64,
    /// Disconnect → advertising stop
    #[serde(default = "default_restart_stop_delay_ms")]
    pub restart_stop_delay_ms: u64,
    /// Advertising stop → advertising start
    #[serde(default = "default_restart_start_delay_ms")]
    pub restart_start_delay_ms: u64,
}

impl TimingSettings {
    pub fn radio_settle(&self) -> Duration {
        Duration::from_millis(self.radio_settle_ms)
    }

    pub fn advertise_delay(&self) -> Duration {
        Duration::from_millis(self.advertise_delay_ms)
    }

    pub fn restart_stop_delay(&self) -> Duration {
        Duration::from_millis(self.restart_stop_delay_ms)
    }

    pub fn restart_start_delay(&self) -> Duration {
        Duration::from_millis(self.restart_start_delay_ms)
    }
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            radio_settle_ms: default_radio_settle_ms(),
            advertise_delay_ms: default_advertise_delay_ms(),
            restart_stop_delay_ms: default_restart_stop_delay_ms(),
            restart_start_delay_ms: default_restart_start_delay_ms(),
        }
    }
}

fn default_radio_settle_ms() -> u64 {
    1000
}
fn default_advertise_delay_ms() -> u64 {
    500
}
fn default_restart_stop_delay_ms() -> u64 {
    1000
}
fn default_restart_start_delay_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Adapter name included in the advertisement
    #[serde(default = "default_device_name")]
    pub device_name: String,
    #[serde(default)]
    pub bonding_policy: BondingPolicy,
    #[serde(default)]
    pub timings: TimingSettings,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            bonding_policy: BondingPolicy::default(),
            timings: TimingSettings::default(),
            log_settings: LogSettings::default(),
        }
    }
}

fn default_device_name() -> String {
    "BLE".to_string()
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load from the per-user config directory
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::from_path(settings_path))
    }

    /// Load from an explicit file; a missing or unreadable file yields defaults
    pub fn from_path(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings ({}: {})",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("BlePairingPeripheral");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}
