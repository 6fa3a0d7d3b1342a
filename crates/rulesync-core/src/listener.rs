// ── Model observers ──
//
// Listener sets hang off every entity and are chained upwards: a rule's set
// forwards to its device's set, which forwards to the controller's. All
// callbacks run synchronously on the task that triggered them and must not
// block.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::warn;

use crate::device::Device;
use crate::error::EntityRef;
use crate::rule::Rule;
use crate::state::SyncState;

/// Content-level events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelEvent {
    Changed,
    Renamed,
    PreDelete,
    Deleted,
}

/// An entity handed to listeners.
#[derive(Clone)]
pub enum Entity {
    Controller,
    Device(Arc<Device>),
    Rule(Arc<Rule>),
}

impl Entity {
    pub fn entity_ref(&self) -> EntityRef {
        match self {
            Self::Controller => EntityRef::Controller,
            Self::Device(device) => EntityRef::Device(device.key().clone()),
            Self::Rule(rule) => rule.entity_ref(),
        }
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.entity_ref())
    }
}

/// Observer of the controller → device → rule tree.
pub trait ModelListener: Send + Sync {
    /// A device gained a rule (or the controller gained a device).
    fn child_added(&self, _parent: &Entity, _child: &Entity) {}

    fn model_updated(&self, _entity: &Entity, _event: ModelEvent) {}

    fn state_changed(&self, _entity: &Entity, _state: SyncState) {}
}

enum Notification<'a> {
    ChildAdded(&'a Entity, &'a Entity),
    Updated(&'a Entity, ModelEvent),
    State(&'a Entity, SyncState),
}

/// Listeners registered on one entity, plus the set to forward to.
pub struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn ModelListener>>>,
    parent: Option<Arc<ListenerSet>>,
}

impl ListenerSet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            listeners: RwLock::new(Vec::new()),
            parent: None,
        })
    }

    pub fn child_of(parent: &Arc<ListenerSet>) -> Arc<Self> {
        Arc::new(Self {
            listeners: RwLock::new(Vec::new()),
            parent: Some(Arc::clone(parent)),
        })
    }

    pub fn add(&self, listener: Arc<dyn ModelListener>) {
        self.listeners.write().push(listener);
    }

    /// Removes every registration of `listener` (by identity).
    pub fn remove(&self, listener: &Arc<dyn ModelListener>) {
        self.listeners
            .write()
            .retain(|l| !std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)));
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    pub(crate) fn child_added(&self, parent: &Entity, child: &Entity) {
        self.notify(&Notification::ChildAdded(parent, child));
    }

    pub(crate) fn model_updated(&self, entity: &Entity, event: ModelEvent) {
        self.notify(&Notification::Updated(entity, event));
    }

    pub(crate) fn state_changed(&self, entity: &Entity, state: SyncState) {
        self.notify(&Notification::State(entity, state));
    }

    fn notify(&self, notification: &Notification<'_>) {
        // Snapshot so listeners may (un)register from inside a callback.
        let snapshot = self.listeners.read().clone();
        for listener in &snapshot {
            match *notification {
                Notification::ChildAdded(parent, child) => listener.child_added(parent, child),
                Notification::Updated(entity, event) => listener.model_updated(entity, event),
                Notification::State(entity, state) => listener.state_changed(entity, state),
            }
        }
        if let Some(parent) = &self.parent {
            parent.notify(notification);
        }
    }
}

/// Asked for credentials when a device has none or they were rejected.
///
/// Implementations must not block; they typically schedule a prompt and
/// later call `Device::set_password`.
pub trait PasswordCallback: Send + Sync {
    fn password_required(&self, device: &Arc<Device>, is_retry: bool);
}

/// Callback for non-interactive use: logs and leaves the device waiting.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPasswordPrompt;

impl PasswordCallback for NoPasswordPrompt {
    fn password_required(&self, device: &Arc<Device>, is_retry: bool) {
        if is_retry {
            warn!(device = %device.key(), "credentials rejected; no password prompt available");
        } else {
            warn!(device = %device.key(), "no password configured; device will wait");
        }
    }
}
