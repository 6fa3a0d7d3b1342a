//! Bridges loaded profiles and global flags into a running `Controller`.
//!
//! One-shot commands open a [`Session`] on a single device with the
//! background updater turned off; `devices --refresh` and `watch` build a
//! controller over every configured profile.

use std::collections::HashMap;
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;
use secrecy::SecretString;
use tracing::{debug, warn};

use rulesync_api::{Connector, Endpoint, HttpClient, RemoteClient, TlsMode, TransportConfig};
use rulesync_config::{Config, DeviceProfile, device_spec, sync_config, transport_config};
use rulesync_core::{
    Controller, Device, DeviceKey, DeviceSpec, ModelError, ModelListener, NoPasswordPrompt,
    PasswordCallback, Rule, SyncConfig, SyncState,
};

use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;

// ── Connector ───────────────────────────────────────────────────────

/// Builds HTTP clients with per-profile transport settings.
pub struct ProfileConnector {
    transports: HashMap<DeviceKey, TransportConfig>,
    fallback: TransportConfig,
}

impl ProfileConnector {
    pub fn new(fallback: TransportConfig) -> Self {
        Self {
            transports: HashMap::new(),
            fallback,
        }
    }

    pub fn insert(&mut self, key: DeviceKey, transport: TransportConfig) {
        self.transports.insert(key, transport);
    }

    fn transport(&self, endpoint: &Endpoint) -> &TransportConfig {
        self.transports
            .get(&DeviceKey::new(endpoint.host.clone(), endpoint.port))
            .unwrap_or(&self.fallback)
    }
}

impl Connector for ProfileConnector {
    fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn RemoteClient>, rulesync_api::Error> {
        let client = HttpClient::new(endpoint, self.transport(endpoint))?;
        Ok(Arc::new(client))
    }
}

// ── Flag overrides ──────────────────────────────────────────────────

/// Profile transport settings with `--insecure` / `--timeout` applied.
pub fn transport_for(global: &GlobalOpts, cfg: &Config, profile: &DeviceProfile) -> TransportConfig {
    let mut transport = transport_config(&cfg.defaults, profile);
    if global.insecure {
        transport.tls = TlsMode::DangerAcceptInvalid;
    }
    if let Some(secs) = global.timeout {
        transport.timeout = Duration::from_secs(secs);
    }
    transport
}

/// `--output`, else the config default, else a table.
pub fn output_format(global: &GlobalOpts, cfg: &Config) -> OutputFormat {
    global.output.unwrap_or_else(|| {
        OutputFormat::from_str(&cfg.defaults.output, true).unwrap_or(OutputFormat::Table)
    })
}

/// Resolve a profile's `DeviceSpec`, asking on the terminal when no stored
/// password exists.
pub fn resolve_spec(name: &str, profile: &DeviceProfile) -> Result<DeviceSpec, CliError> {
    let mut spec = device_spec(profile, name);
    if spec.password.is_none() && spec.online && std::io::stdin().is_terminal() {
        let password = rpassword::prompt_password(format!(
            "Password for {}@{}: ",
            spec.username,
            spec.key()
        ))?;
        spec = spec.with_password(SecretString::from(password));
    }
    Ok(spec)
}

// ── Single-device session ───────────────────────────────────────────

/// One device, refreshed once, ready for edits.
pub struct Session {
    controller: Controller,
    device: Arc<Device>,
}

impl Session {
    pub async fn open(global: &GlobalOpts, cfg: &Config) -> Result<Self, CliError> {
        let (name, profile) = cfg.select(global.profile.as_deref())?;
        let spec = resolve_spec(name, profile)?;

        let mut connector = ProfileConnector::new(TransportConfig::default());
        connector.insert(spec.key(), transport_for(global, cfg, profile));

        let controller = Controller::new(
            SyncConfig {
                start_updaters: false,
                ..sync_config(&cfg.defaults)
            },
            Arc::new(connector),
            Arc::new(NoPasswordPrompt),
        );
        let device = controller.add_device(spec)?;
        debug!(profile = name, device = %device.key(), "refreshing device");
        device.refresh().await;
        ensure_synced(&device)?;

        Ok(Self { controller, device })
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Look up a rule loaded by the initial refresh.
    pub fn rule(&self, name: &str) -> Result<Arc<Rule>, CliError> {
        self.device.rule(name).ok_or_else(|| CliError::NotFound {
            resource_type: "rule".into(),
            identifier: name.into(),
            list_command: "rules".into(),
        })
    }

    pub async fn close(self) {
        self.controller.dispose().await;
    }
}

/// Turn a device's post-refresh state into a command error.
pub fn ensure_synced(device: &Device) -> Result<(), CliError> {
    match device.state() {
        SyncState::UpToDate => Ok(()),
        SyncState::Disconnected => Err(CliError::Offline {
            device: device.key().to_string(),
        }),
        SyncState::WaitingForFirstUpdate => Err(CliError::NoCredentials {
            device: device.key().to_string(),
        }),
        SyncState::CannotSync | SyncState::Deleted => Err(device.last_error().map_or_else(
            || CliError::Remote {
                kind: ModelError::Internal,
                message: format!("device {} did not sync", device.key()),
            },
            CliError::from,
        )),
    }
}

// ── Multi-device controller ─────────────────────────────────────────

/// Warns once per prompt; `watch` cannot block on a terminal mid-run.
pub struct LogPasswordPrompt;

impl PasswordCallback for LogPasswordPrompt {
    fn password_required(&self, device: &Arc<Device>, is_retry: bool) {
        if is_retry {
            warn!(device = %device.key(), "password rejected; run `rulesync config set-password`");
        } else {
            warn!(device = %device.key(), "no password stored; run `rulesync config set-password`");
        }
    }
}

/// A controller over every configured profile, paired with profile names.
/// `listeners` are registered before any device is added.
pub fn open_all(
    global: &GlobalOpts,
    cfg: &Config,
    sync: SyncConfig,
    listeners: &[Arc<dyn ModelListener>],
) -> Result<(Controller, Vec<(String, Arc<Device>)>), CliError> {
    let mut connector = ProfileConnector::new(TransportConfig::default());
    let mut specs = Vec::with_capacity(cfg.devices.len());
    for (name, profile) in &cfg.devices {
        let spec = resolve_spec(name, profile)?;
        connector.insert(spec.key(), transport_for(global, cfg, profile));
        specs.push((name.clone(), spec));
    }

    let controller = Controller::new(sync, Arc::new(connector), Arc::new(LogPasswordPrompt));
    for listener in listeners {
        controller.add_listener(Arc::clone(listener));
    }
    let mut devices = Vec::with_capacity(specs.len());
    for (name, spec) in specs {
        devices.push((name, controller.add_device(spec)?));
    }
    Ok((controller, devices))
}
