use crate::domain::models::{LightConfig, LightId};
use crate::domain::registry::ModelDescriptor;
use crate::infrastructure::bluetooth::protocol;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
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
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
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
    "ble_light_controller".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Admission control, retry and keep-alive tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Upper bound on simultaneously active BLE sessions.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Failed connect/send attempts before a processing task gives up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Attempts inside a single connect call.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_retry_delay_ms")]
    pub connect_retry_delay_ms: u64,
    #[serde(default = "default_backoff_min_ms")]
    pub backoff_min_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_keep_alive_interval_ms")]
    pub keep_alive_interval_ms: u64,
    #[serde(default = "default_keep_alive_max_duration_ms")]
    pub keep_alive_max_duration_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            max_attempts: default_max_attempts(),
            connect_attempts: default_connect_attempts(),
            connect_retry_delay_ms: default_connect_retry_delay_ms(),
            backoff_min_ms: default_backoff_min_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            keep_alive_interval_ms: default_keep_alive_interval_ms(),
            keep_alive_max_duration_ms: default_keep_alive_max_duration_ms(),
        }
    }
}

impl SchedulerSettings {
    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    pub fn keep_alive_max_duration(&self) -> Duration {
        Duration::from_millis(self.keep_alive_max_duration_ms)
    }

    /// Backoff bounds with min <= max.
    pub fn backoff_range(&self) -> (Duration, Duration) {
        let min = self.backoff_min_ms.min(self.backoff_max_ms);
        let max = self.backoff_min_ms.max(self.backoff_max_ms);
        (Duration::from_millis(min), Duration::from_millis(max))
    }
}

fn default_max_parallel() -> usize {
    10
}
fn default_max_attempts() -> u32 {
    3
}
fn default_connect_attempts() -> u32 {
    3
}
fn default_connect_retry_delay_ms() -> u64 {
    250
}
fn default_backoff_min_ms() -> u64 {
    700
}
fn default_backoff_max_ms() -> u64 {
    1300
}
fn default_keep_alive_interval_ms() -> u64 {
    300
}
fn default_keep_alive_max_duration_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BluetoothSettings {
    /// How long to scan for a configured address before giving up.
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
    #[serde(default = "default_control_char_uuid")]
    pub control_char_uuid: String,
}

impl Default for BluetoothSettings {
    fn default() -> Self {
        Self {
            scan_timeout_ms: default_scan_timeout_ms(),
            control_char_uuid: default_control_char_uuid(),
        }
    }
}

fn default_scan_timeout_ms() -> u64 {
    10_000
}
fn default_control_char_uuid() -> String {
    protocol::CONTROL_CHAR_UUID.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    #[serde(default = "default_domain")]
    pub domain: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            domain: default_domain(),
        }
    }
}

fn default_domain() -> String {
    "goveeble2mqtt".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub bluetooth: BluetoothSettings,
    #[serde(default)]
    pub bridge: BridgeSettings,
    /// Peripherals registered at startup.
    #[serde(default)]
    pub devices: Vec<LightConfig>,
    /// Model descriptors merged over the built-in table.
    #[serde(default)]
    pub models: HashMap<String, ModelDescriptor>,
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load from the per-user config directory, writing defaults on first run.
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Self::open(settings_path)
    }

    /// Load from an explicit path, writing defaults if it does not exist.
    pub fn open(settings_path: PathBuf) -> anyhow::Result<Self> {
        let settings = if settings_path.exists() {
            Self::load_from_file(&settings_path)?
        } else {
            Settings::default()
        };

        let service = Self {
            settings,
            settings_path,
        };
        if !service.settings_path.exists() {
            service.save()?;
        }
        Ok(service)
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("ble-light-controller");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Invalid settings file {}: {}", path.display(), e))?;
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

    pub fn add_device(&mut self, device: LightConfig) -> anyhow::Result<()> {
        let id = LightId::new(&device.address);
        let known = self
            .settings
            .devices
            .iter()
            .any(|d| LightId::new(&d.address) == id);
        if !known {
            self.settings.devices.push(device);
            self.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::registry::ColorMode;

    #[test]
    fn test_empty_json_uses_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.scheduler, SchedulerSettings::default());
        assert_eq!(settings.scheduler.max_parallel, 10);
        assert_eq!(settings.bridge.domain, "goveeble2mqtt");
        assert_eq!(settings.bluetooth.control_char_uuid, protocol::CONTROL_CHAR_UUID);
        assert!(settings.devices.is_empty());
    }

    #[test]
    fn test_devices_and_models_parse() {
        let json = r#"{
            "scheduler": { "max_parallel": 2 },
            "devices": [
                { "address": "a4:c1:38:00:00:01", "model": "H6046", "name": "Shelf" },
                { "address": "A4C138000002" }
            ],
            "models": {
                "H7000": { "led_mode": 21, "color_mode": "extended", "brightness_max": 100 }
            }
        }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();

        assert_eq!(settings.scheduler.max_parallel, 2);
        assert_eq!(settings.scheduler.max_attempts, 3);
        assert_eq!(settings.devices.len(), 2);
        assert_eq!(settings.devices[1].model, "default");
        assert_eq!(settings.devices[0].name.as_deref(), Some("Shelf"));
        assert_eq!(settings.models["H7000"].color_mode, ColorMode::Extended);
    }

    #[test]
    fn test_backoff_range_is_ordered() {
        let scheduler = SchedulerSettings {
            backoff_min_ms: 900,
            backoff_max_ms: 100,
            ..SchedulerSettings::default()
        };
        let (min, max) = scheduler.backoff_range();
        assert!(min <= max);
    }

    #[test]
    fn test_open_writes_defaults_and_reloads() {
        let dir = std::env::temp_dir().join(format!("blc-settings-{}", std::process::id()));
        let path = dir.join("settings.json");
        let _ = fs::remove_file(&path);

        let mut service = SettingsService::open(path.clone()).unwrap();
        assert!(path.exists());

        service
            .add_device(LightConfig::new("A4:C1:38:00:00:09", "H6008"))
            .unwrap();
        service
            .add_device(LightConfig::new("a4c138000009", "H6008"))
            .unwrap();

        let reloaded = SettingsService::open(path.clone()).unwrap();
        assert_eq!(reloaded.get().devices.len(), 1);

        let _ = fs::remove_dir_all(dir);
    }
}
