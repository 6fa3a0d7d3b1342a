//! `watch`: run the background engine for every configured device and
//! print each model event until Ctrl-C.

use std::sync::Arc;

use chrono::Local;
use tracing::info;

use rulesync_config::Config;
use rulesync_core::{Entity, ModelEvent, ModelListener, SyncState};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::session::open_all;

/// Prints one line per event to stdout.
struct EventPrinter {
    quiet: bool,
}

impl EventPrinter {
    fn emit(&self, line: &str) {
        info!("{line}");
        if !self.quiet {
            println!("{} {line}", Local::now().format("%H:%M:%S"));
        }
    }
}

impl ModelListener for EventPrinter {
    fn child_added(&self, parent: &Entity, child: &Entity) {
        self.emit(&format!("{} added to {}", child.entity_ref(), parent.entity_ref()));
    }

    fn model_updated(&self, entity: &Entity, event: ModelEvent) {
        self.emit(&format!("{} {event}", entity.entity_ref()));
    }

    fn state_changed(&self, entity: &Entity, state: SyncState) {
        let suffix = match entity {
            Entity::Device(d) => d.last_error().map(|e| format!(" ({e})")),
            Entity::Rule(r) => r.last_error().map(|e| format!(" ({e})")),
            Entity::Controller => None,
        };
        self.emit(&format!(
            "{} -> {state}{}",
            entity.entity_ref(),
            suffix.unwrap_or_default()
        ));
    }
}

pub async fn handle(cfg: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    if cfg.devices.is_empty() {
        return Err(CliError::NoDevice);
    }

    let printer: Arc<dyn ModelListener> = Arc::new(EventPrinter {
        quiet: global.quiet,
    });
    let (controller, devices) = open_all(
        global,
        cfg,
        rulesync_config::sync_config(&cfg.defaults),
        &[printer],
    )?;
    info!(devices = devices.len(), "watching; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;

    info!("stopping");
    controller.dispose().await;
    Ok(())
}
