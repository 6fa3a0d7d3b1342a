//! Device listing: configured profiles, optionally refreshed live.

use serde::Serialize;
use tabled::Tabled;

use rulesync_config::Config;
use rulesync_core::{SyncConfig, SyncState};

use crate::cli::{DevicesArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;
use crate::session::{open_all, output_format};

// ── Table row ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct DeviceSummary {
    name: String,
    host: String,
    port: u16,
    username: String,
    default: bool,
    connect: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<SyncState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rules: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "")]
    marker: &'static str,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Endpoint")]
    endpoint: String,
    #[tabled(rename = "User")]
    username: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Rules")]
    rules: String,
}

impl From<&DeviceSummary> for DeviceRow {
    fn from(d: &DeviceSummary) -> Self {
        let state = match (&d.state, d.connect) {
            (Some(state), _) => state.to_string(),
            (None, true) => String::new(),
            (None, false) => "offline".into(),
        };
        Self {
            marker: if d.default { "*" } else { "" },
            name: d.name.clone(),
            endpoint: format!("{}:{}", d.host, d.port),
            username: d.username.clone(),
            state,
            version: d.version.clone().unwrap_or_default(),
            rules: d.rules.map(|n| n.to_string()).unwrap_or_default(),
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: &DevicesArgs, cfg: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let mut summaries: Vec<DeviceSummary> = cfg
        .devices
        .iter()
        .map(|(name, p)| DeviceSummary {
            name: name.clone(),
            host: p.host.clone(),
            port: p.port,
            username: p.username.clone(),
            default: cfg.default_device.as_deref() == Some(name.as_str()),
            connect: p.connect,
            state: None,
            version: None,
            rules: None,
            error: None,
        })
        .collect();

    if args.refresh && !cfg.devices.is_empty() {
        let (controller, devices) = open_all(
            global,
            cfg,
            SyncConfig {
                start_updaters: false,
                ..rulesync_config::sync_config(&cfg.defaults)
            },
            &[],
        )?;
        controller.refresh_all().await;

        for (summary, (_, device)) in summaries.iter_mut().zip(&devices) {
            summary.state = Some(device.state());
            summary.version = device.product_version();
            if device.state() == SyncState::UpToDate {
                summary.rules = Some(device.rules().len());
            }
            summary.error = device.last_error().map(|e| e.to_string());
        }
        controller.dispose().await;
    }

    let out = output::render_list(
        output_format(global, cfg),
        &summaries,
        |d| DeviceRow::from(d),
        |d| d.name.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
