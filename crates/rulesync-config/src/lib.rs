//! Shared configuration for the rulesync tools.
//!
//! TOML device profiles, credential resolution (env + keyring + plaintext),
//! and translation into the runtime types `rulesync-core` and
//! `rulesync-api` consume. The CLI layers its flag overrides on top.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use rulesync_api::{TlsMode, TransportConfig};
use rulesync_core::{DeviceSpec, SyncConfig};

/// Keyring service under which device passwords are stored.
pub const KEYRING_SERVICE: &str = "rulesync";

/// Admin port assumed when a profile does not name one.
pub const DEFAULT_PORT: u16 = 9090;

const OUTPUT_FORMATS: [&str; 3] = ["table", "json", "plain"];

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no device named '{name}' in config")]
    UnknownDevice { name: String },

    #[error("no device selected and no default_device configured")]
    NoDevice,

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Device used when no `--device` flag is given.
    pub default_device: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named device profiles.
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceProfile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default)]
    pub insecure: bool,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Pause between two refreshes of the same device, in milliseconds.
    #[serde(default = "default_refresh_delay_ms")]
    pub refresh_delay_ms: u64,

    /// Sleep of an idle updater, in milliseconds.
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            insecure: false,
            timeout: default_timeout(),
            refresh_delay_ms: default_refresh_delay_ms(),
            idle_interval_ms: default_idle_interval_ms(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_refresh_delay_ms() -> u64 {
    250
}
fn default_idle_interval_ms() -> u64 {
    500
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_true() -> bool {
    true
}

/// A named device profile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceProfile {
    /// Hostname or address of the appliance's admin interface.
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    /// Password (plaintext; prefer the keyring or `password_env`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Environment variable holding the password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    /// Path to a PEM CA certificate for this device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,

    /// Override the global insecure TLS setting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,

    /// Override the global timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// `false` registers the device without connecting to it.
    #[serde(default = "default_true")]
    pub connect: bool,
}

impl DeviceProfile {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            username: username.into(),
            password: None,
            password_env: None,
            ca_cert: None,
            insecure: None,
            timeout: None,
            connect: true,
        }
    }
}

impl Config {
    /// Pick a profile: the explicit name, else `default_device`, else the
    /// only configured device.
    pub fn select(&self, name: Option<&str>) -> Result<(&str, &DeviceProfile), ConfigError> {
        let wanted = match name.or(self.default_device.as_deref()) {
            Some(wanted) => wanted,
            None if self.devices.len() == 1 => {
                return self
                    .devices
                    .iter()
                    .next()
                    .map(|(name, profile)| (name.as_str(), profile))
                    .ok_or(ConfigError::NoDevice);
            }
            None => return Err(ConfigError::NoDevice),
        };
        self.devices
            .get_key_value(wanted)
            .map(|(name, profile)| (name.as_str(), profile))
            .ok_or_else(|| ConfigError::UnknownDevice {
                name: wanted.into(),
            })
    }

    /// Check values serde cannot: empty hosts, port 0, unknown output format,
    /// two profiles pointing at the same endpoint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !OUTPUT_FORMATS.contains(&self.defaults.output.as_str()) {
            return Err(ConfigError::Validation {
                field: "defaults.output".into(),
                reason: format!(
                    "expected one of {}, got '{}'",
                    OUTPUT_FORMATS.join(", "),
                    self.defaults.output
                ),
            });
        }

        let mut seen: BTreeMap<(&str, u16), &str> = BTreeMap::new();
        for (name, profile) in &self.devices {
            if profile.host.trim().is_empty() {
                return Err(ConfigError::Validation {
                    field: format!("devices.{name}.host"),
                    reason: "must not be empty".into(),
                });
            }
            if profile.port == 0 {
                return Err(ConfigError::Validation {
                    field: format!("devices.{name}.port"),
                    reason: "must be between 1 and 65535".into(),
                });
            }
            if let Some(other) = seen.insert((profile.host.as_str(), profile.port), name) {
                return Err(ConfigError::Validation {
                    field: format!("devices.{name}"),
                    reason: format!(
                        "same endpoint {}:{} as '{other}'",
                        profile.host, profile.port
                    ),
                });
            }
        }

        if let Some(ref default) = self.default_device {
            if !self.devices.contains_key(default) {
                return Err(ConfigError::UnknownDevice {
                    name: default.clone(),
                });
            }
        }
        Ok(())
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "rulesync", "rulesync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("rulesync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file, then layer `RULESYNC_*` variables on top
/// (`RULESYNC_DEFAULTS__TIMEOUT=5`, `RULESYNC_DEVICES__LB1__PORT=9443`).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("RULESYNC_").split("__"));

    let config: Config = figment.extract()?;
    config.validate()?;
    Ok(config)
}

/// Load config, returning a default if the file is missing or unreadable.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    cfg.validate()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    debug!(path = %path.display(), "config saved");
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

fn keyring_entry(device_name: &str) -> Result<keyring::Entry, keyring::Error> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{device_name}/password"))
}

/// Resolve a device password: `password_env`, then the system keyring,
/// then plaintext. `None` leaves the device waiting for a password.
pub fn resolve_password(profile: &DeviceProfile, device_name: &str) -> Option<SecretString> {
    // 1. Profile's password_env → env var lookup
    if let Some(ref env_name) = profile.password_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring_entry(device_name) {
        if let Ok(pw) = entry.get_password() {
            return Some(SecretString::from(pw));
        }
    }

    // 3. Plaintext in config
    profile.password.clone().map(SecretString::from)
}

/// Store a device password in the system keyring.
pub fn store_password(device_name: &str, password: &SecretString) -> Result<(), ConfigError> {
    keyring_entry(device_name)?.set_password(password.expose_secret())?;
    Ok(())
}

// ── Translation to runtime types ────────────────────────────────────

/// Build a [`DeviceSpec`] from a profile, resolving its password.
pub fn device_spec(profile: &DeviceProfile, device_name: &str) -> DeviceSpec {
    let mut spec = DeviceSpec::new(profile.host.clone(), profile.port, profile.username.clone());
    if let Some(password) = resolve_password(profile, device_name) {
        spec = spec.with_password(password);
    }
    if !profile.connect {
        spec = spec.offline();
    }
    spec
}

/// Transport settings for one device: profile overrides win over defaults.
pub fn transport_config(defaults: &Defaults, profile: &DeviceProfile) -> TransportConfig {
    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };

    TransportConfig {
        tls,
        timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
    }
}

/// Scheduler settings from the global defaults.
pub fn sync_config(defaults: &Defaults) -> SyncConfig {
    SyncConfig {
        idle_interval: Duration::from_millis(defaults.idle_interval_ms),
        refresh_delay: Duration::from_millis(defaults.refresh_delay_ms),
        ..SyncConfig::default()
    }
}
