// ── Controller ──
//
// Root of the model. Owns every device, keyed by admin endpoint, and the
// dependencies devices share: sync tuning, the connector and the password
// callback.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use futures_util::future::join_all;
use tracing::info;

use rulesync_api::Connector;

use crate::classify::{SyncFailure, classify};
use crate::config::{DeviceKey, DeviceSpec, SyncConfig};
use crate::device::{Device, DeviceContext};
use crate::error::{EntityRef, ModelError, ModelException};
use crate::listener::{Entity, ListenerSet, ModelListener, PasswordCallback};

/// Cheaply cloneable handle to the device tree.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    context: DeviceContext,
    devices: DashMap<DeviceKey, Arc<Device>>,
}

impl Controller {
    pub fn new(
        config: SyncConfig,
        connector: Arc<dyn Connector>,
        password_callback: Arc<dyn PasswordCallback>,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                context: DeviceContext {
                    config: Arc::new(config),
                    connector,
                    password_callback,
                    parent_listeners: ListenerSet::new(),
                },
                devices: DashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.context.config
    }

    // ── Devices ─────────────────────────────────────────────────────

    /// Start tracking a device. At most one device per `(host, port)`.
    pub fn add_device(&self, spec: DeviceSpec) -> Result<Arc<Device>, ModelException> {
        let key = spec.key();
        let device = match self.inner.devices.entry(key.clone()) {
            MapEntry::Occupied(_) => {
                return Err(ModelException::new(
                    ModelError::ElementExists,
                    format!("device {key} is already configured"),
                    EntityRef::Device(key),
                ));
            }
            MapEntry::Vacant(slot) => {
                let device = Device::new(spec, &self.inner.context);
                slot.insert(Arc::clone(&device));
                device
            }
        };

        info!(device = %key, "device added");
        self.inner
            .context
            .parent_listeners
            .child_added(&Entity::Controller, &Entity::Device(Arc::clone(&device)));
        Ok(device)
    }

    /// Stop tracking a device. Returns `false` if it was not known.
    pub async fn remove_device(&self, key: &DeviceKey) -> bool {
        let Some((_, device)) = self.inner.devices.remove(key) else {
            return false;
        };
        device.dispose().await;
        true
    }

    pub fn device(&self, key: &DeviceKey) -> Option<Arc<Device>> {
        self.inner.devices.get(key).map(|e| Arc::clone(e.value()))
    }

    /// Every device, sorted by key.
    pub fn devices(&self) -> Vec<Arc<Device>> {
        let mut devices: Vec<Arc<Device>> = self
            .inner
            .devices
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        devices.sort_by(|a, b| a.key().cmp(b.key()));
        devices
    }

    pub fn len(&self) -> usize {
        self.inner.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.devices.is_empty()
    }

    /// Refresh every device once, in parallel.
    ///
    /// Used by one-shot consumers that run without background updaters.
    pub async fn refresh_all(&self) {
        join_all(self.devices().iter().map(|d| d.refresh())).await;
    }

    /// Remove every device.
    pub async fn dispose(&self) {
        let keys: Vec<DeviceKey> = self.inner.devices.iter().map(|e| e.key().clone()).collect();
        let removed: Vec<Arc<Device>> = keys
            .iter()
            .filter_map(|key| self.inner.devices.remove(key).map(|(_, d)| d))
            .collect();
        join_all(removed.iter().map(|d| d.dispose())).await;
        info!(count = removed.len(), "controller disposed");
    }

    // ── Errors & listeners ──────────────────────────────────────────

    /// Turn any failure into a user-facing `ModelException`.
    pub fn describe_error(
        &self,
        failure: impl Into<SyncFailure>,
        entity: &EntityRef,
    ) -> ModelException {
        classify(failure, entity)
    }

    /// Listeners here see events from every device and rule.
    pub fn listeners(&self) -> &Arc<ListenerSet> {
        &self.inner.context.parent_listeners
    }

    pub fn add_listener(&self, listener: Arc<dyn ModelListener>) {
        self.listeners().add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ModelListener>) {
        self.listeners().remove(listener);
    }
}
