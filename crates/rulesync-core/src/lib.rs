// rulesync-core: device/rule synchronization engine between rulesync-api and consumers.

pub mod classify;
pub mod code;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod listener;
pub mod rule;
pub mod state;
pub mod updater;
pub mod worker;

// ── Primary re-exports ──────────────────────────────────────────────
pub use classify::{SyncFailure, classify};
pub use code::{Problem, normalize, parse_report, validate_rule_name};
pub use config::{DeviceKey, DeviceSpec, SyncConfig};
pub use controller::Controller;
pub use device::{Device, DeviceInfo};
pub use error::{EditError, EntityRef, ModelError, ModelException};
pub use listener::{
    Entity, ListenerSet, ModelEvent, ModelListener, NoPasswordPrompt, PasswordCallback,
};
pub use rule::{Rule, ViewGuard};
pub use state::{Status, SyncState};
pub use updater::{Updatable, UpdateOutcome, Updater};
pub use worker::Worker;
