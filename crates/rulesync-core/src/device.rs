// ── Device ──
//
// One rule-hosting appliance: credentials, endpoint, cached rule map and the
// updater that keeps them fresh. The sync lock serializes refreshes and
// structural edits; the rule map is only mutated while it is held.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use secrecy::SecretString;
use serde::Serialize;
use tracing::{debug, info, warn};

use rulesync_api::{Connector, Endpoint, RemoteClient};

use crate::classify::{SyncFailure, classify};
use crate::code::{self, Problem};
use crate::config::{DEVICE_PRIORITY, DeviceKey, DeviceSpec, SyncConfig};
use crate::error::{EditError, EntityRef, ModelError, ModelException};
use crate::listener::{Entity, ListenerSet, ModelEvent, PasswordCallback};
use crate::rule::Rule;
use crate::state::{StateCell, Status, SyncState, Transition};
use crate::updater::{Updatable, UpdateOutcome, Updater};

/// Metadata fetched on every successful refresh.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceInfo {
    pub product_version: Option<String>,
    /// `(major, minor)` parsed from the product version.
    pub version: Option<(u32, u32)>,
    pub capabilities: Vec<String>,
    pub last_refresh: Option<DateTime<Utc>>,
}

/// Dependencies a device shares with its controller.
pub(crate) struct DeviceContext {
    pub config: Arc<SyncConfig>,
    pub connector: Arc<dyn Connector>,
    pub password_callback: Arc<dyn PasswordCallback>,
    pub parent_listeners: Arc<ListenerSet>,
}

pub struct Device {
    this: Weak<Device>,
    key: DeviceKey,
    username: String,
    password: RwLock<Option<SecretString>>,
    /// Set once the password callback has been asked for the current gap.
    password_requested: AtomicBool,
    connected: AtomicBool,
    deleted: AtomicBool,
    state: StateCell,
    info: RwLock<DeviceInfo>,
    rules: DashMap<String, Arc<Rule>>,
    sync_lock: tokio::sync::Mutex<()>,
    client: RwLock<Option<Arc<dyn RemoteClient>>>,
    connector: Arc<dyn Connector>,
    password_callback: Arc<dyn PasswordCallback>,
    listeners: Arc<ListenerSet>,
    updater: Updater,
    config: Arc<SyncConfig>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("key", &self.key)
            .field("username", &self.username)
            .field("state", &self.state.state())
            .field("rules", &self.rules.len())
            .finish_non_exhaustive()
    }
}

impl Device {
    pub(crate) fn new(spec: DeviceSpec, ctx: &DeviceContext) -> Arc<Self> {
        let key = spec.key();
        let initial = if spec.online {
            SyncState::WaitingForFirstUpdate
        } else {
            SyncState::Disconnected
        };

        let device = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            updater: Updater::new(key.to_string(), &ctx.config),
            key,
            username: spec.username,
            password: RwLock::new(spec.password),
            password_requested: AtomicBool::new(false),
            connected: AtomicBool::new(spec.online),
            deleted: AtomicBool::new(false),
            state: StateCell::new(initial),
            info: RwLock::new(DeviceInfo::default()),
            rules: DashMap::new(),
            sync_lock: tokio::sync::Mutex::new(()),
            client: RwLock::new(None),
            connector: Arc::clone(&ctx.connector),
            password_callback: Arc::clone(&ctx.password_callback),
            listeners: ListenerSet::child_of(&ctx.parent_listeners),
            config: Arc::clone(&ctx.config),
        });

        device.updater.add(Arc::clone(&device) as Arc<dyn Updatable>);
        if device.config.start_updaters {
            device.updater.start();
        }
        device
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn key(&self) -> &DeviceKey {
        &self.key
    }

    pub fn host(&self) -> &str {
        &self.key.host
    }

    pub fn port(&self) -> u16 {
        self.key.port
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::Device(self.key.clone())
    }

    pub fn state(&self) -> SyncState {
        self.state.state()
    }

    pub fn status(&self) -> Arc<Status> {
        self.state.status()
    }

    pub fn last_error(&self) -> Option<ModelException> {
        self.state.status().error.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }

    pub fn has_password(&self) -> bool {
        self.password.read().is_some()
    }

    pub fn info(&self) -> DeviceInfo {
        self.info.read().clone()
    }

    pub fn version(&self) -> Option<(u32, u32)> {
        self.info.read().version
    }

    pub fn product_version(&self) -> Option<String> {
        self.info.read().product_version.clone()
    }

    pub fn capabilities(&self) -> Vec<String> {
        self.info.read().capabilities.clone()
    }

    /// Cached rules, sorted by name.
    pub fn rules(&self) -> Vec<Arc<Rule>> {
        let mut rules: Vec<Arc<Rule>> = self.rules.iter().map(|e| Arc::clone(e.value())).collect();
        rules.sort_by_key(|r| r.name());
        rules
    }

    pub fn rule(&self, name: &str) -> Option<Arc<Rule>> {
        self.rules.get(name).map(|e| Arc::clone(e.value()))
    }

    pub fn rule_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rules.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn listeners(&self) -> &Arc<ListenerSet> {
        &self.listeners
    }

    pub fn updater(&self) -> &Updater {
        &self.updater
    }

    // ── Crate-internal plumbing for rules ───────────────────────────

    pub(crate) fn weak(&self) -> Weak<Device> {
        self.this.clone()
    }

    pub(crate) fn sync_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.sync_lock
    }

    pub(crate) fn has_rule(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// Drop `rule` from the map and updater. Caller holds the sync lock.
    pub(crate) fn forget_rule(&self, rule: &Rule) {
        self.updater.remove(rule);
        let name = rule.name();
        self.rules
            .remove_if(&name, |_, cached| std::ptr::eq(Arc::as_ptr(cached), rule));
    }

    /// Move `rule` from `old_name` to its current name. Caller holds the sync lock.
    pub(crate) fn rekey_rule(&self, old_name: &str, rule: Arc<Rule>) {
        self.rules.remove(old_name);
        self.rules.insert(rule.name(), rule);
    }

    /// Cached client, built through the connector on first use.
    ///
    /// Fails while the user has disconnected the device, so no remote call
    /// goes out until it is reconnected.
    pub(crate) fn client(&self) -> Result<Arc<dyn RemoteClient>, ModelException> {
        if !self.is_connected() {
            return Err(ModelException::internal(
                "device is disconnected",
                self.entity_ref(),
            ));
        }
        if let Some(client) = self.client.read().as_ref() {
            return Ok(Arc::clone(client));
        }

        let password = self.password.read().clone().ok_or_else(|| {
            ModelException::new(
                ModelError::AuthFailed,
                "no password set for device",
                self.entity_ref(),
            )
        })?;
        let endpoint = Endpoint {
            host: self.key.host.clone(),
            port: self.key.port,
            username: self.username.clone(),
            password,
        };
        let client = self
            .connector
            .connect(&endpoint)
            .map_err(|e| classify(e, &self.entity_ref()))?;

        *self.client.write() = Some(Arc::clone(&client));
        Ok(client)
    }

    fn entity(&self) -> Option<Entity> {
        self.this.upgrade().map(Entity::Device)
    }

    fn set_state(&self, next: SyncState, error: Option<ModelException>) {
        if let Transition::Changed(_) = self.state.transition(next, error, &self.entity_ref()) {
            if let Some(entity) = self.entity() {
                self.listeners.state_changed(&entity, next);
            }
        }
    }

    fn request_password(&self, is_retry: bool) {
        if !is_retry && self.password_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(me) = self.this.upgrade() {
            self.password_callback.password_required(&me, is_retry);
        }
    }

    // ── Credentials & connectivity ──────────────────────────────────

    /// Store a new password; the next refresh reconnects with it.
    pub fn set_password(&self, password: SecretString) {
        *self.password.write() = Some(password);
        *self.client.write() = None;
        self.password_requested.store(false, Ordering::SeqCst);
        debug!(device = %self.key, "password updated");
    }

    pub fn clear_password(&self) {
        *self.password.write() = None;
        *self.client.write() = None;
        self.password_requested.store(false, Ordering::SeqCst);
    }

    /// User-initiated disconnect or reconnect.
    pub fn set_connected(&self, connected: bool) {
        if self.is_deleted() {
            return;
        }
        let was = self.connected.swap(connected, Ordering::SeqCst);
        if was == connected {
            return;
        }

        if connected {
            info!(device = %self.key, "device reconnected");
            self.set_state(SyncState::WaitingForFirstUpdate, None);
        } else {
            info!(device = %self.key, "device disconnected");
            *self.client.write() = None;
            self.set_state(SyncState::Disconnected, None);
            for rule in self.rules() {
                rule.set_state(SyncState::Disconnected, None);
            }
        }
    }

    // ── Refresh ─────────────────────────────────────────────────────

    /// Reconcile the cached rule set and metadata with the device.
    ///
    /// Failures are recorded in the device's state, never returned.
    pub async fn refresh(&self) -> UpdateOutcome {
        if self.is_deleted() {
            return UpdateOutcome::Retire;
        }
        let _guard = self.sync_lock.lock().await;
        if self.is_deleted() {
            return UpdateOutcome::Retire;
        }

        if !self.is_connected() {
            self.set_state(SyncState::Disconnected, None);
            return UpdateOutcome::Keep;
        }

        if !self.has_password() {
            self.set_state(SyncState::WaitingForFirstUpdate, None);
            self.request_password(false);
            return UpdateOutcome::Keep;
        }

        debug!(device = %self.key, "refreshing device");
        match self.synchronize().await {
            Ok(added) => {
                if self.is_deleted() {
                    return UpdateOutcome::Retire;
                }
                self.set_state(SyncState::UpToDate, None);
                if let Some(parent) = self.entity() {
                    for rule in added {
                        self.listeners.child_added(&parent, &Entity::Rule(rule));
                    }
                }
            }
            Err(failure) => {
                let err = classify(failure, &self.entity_ref());
                warn!(device = %self.key, kind = %err.kind(), error = %err, "device refresh failed");

                if err.kind() == ModelError::AuthFailed {
                    *self.client.write() = None;
                    self.request_password(true);
                }
                self.retire_all_rules();
                self.set_state(SyncState::CannotSync, Some(err));
            }
        }

        if self.is_deleted() {
            UpdateOutcome::Retire
        } else {
            UpdateOutcome::Keep
        }
    }

    /// One round of capability check, rule diff and version fetch.
    /// Returns rules created during this round.
    async fn synchronize(&self) -> Result<Vec<Arc<Rule>>, SyncFailure> {
        let client = self.client()?;

        let capabilities = client.get_capabilities().await?;
        if !capabilities
            .iter()
            .any(|c| c == &self.config.scripting_capability)
        {
            return Err(ModelException::new(
                ModelError::NoCapability,
                format!(
                    "device does not support '{}'",
                    self.config.scripting_capability
                ),
                self.entity_ref(),
            )
            .into());
        }

        let names = client.list_rule_names().await?;
        let live: HashSet<&str> = names.iter().map(String::as_str).collect();

        let vanished: Vec<Arc<Rule>> = self
            .rules
            .iter()
            .filter(|e| !live.contains(e.key().as_str()))
            .map(|e| Arc::clone(e.value()))
            .collect();
        for rule in vanished {
            debug!(device = %self.key, rule = %rule.name(), "rule vanished");
            self.forget_rule(&rule);
            rule.retire();
        }

        // New rules stay staged until the whole round succeeds, so a failure
        // below never retires a rule that was not announced.
        let mut added = Vec::new();
        for name in names {
            if self.rules.contains_key(&name) {
                continue;
            }
            let rule = Rule::new(self, name);
            if rule.refresh().await == UpdateOutcome::Retire {
                continue;
            }
            added.push(rule);
        }

        let product_version = client.get_product_version().await?;
        for rule in &added {
            self.updater.add(Arc::clone(rule) as Arc<dyn Updatable>);
            self.rules.insert(rule.name(), Arc::clone(rule));
        }
        {
            let mut info = self.info.write();
            info.version = parse_version(&product_version);
            info.product_version = Some(product_version);
            info.capabilities = capabilities;
            info.last_refresh = Some(Utc::now());
        }

        Ok(added)
    }

    fn retire_all_rules(&self) {
        let rules: Vec<Arc<Rule>> = self.rules.iter().map(|e| Arc::clone(e.value())).collect();
        self.rules.clear();
        for rule in rules {
            self.updater.remove(&*rule);
            rule.retire();
        }
    }

    // ── Edits ───────────────────────────────────────────────────────

    /// Create a rule on the device and start tracking it.
    pub async fn create_rule(&self, name: &str, text: &str) -> Result<Arc<Rule>, EditError> {
        if let Some(reason) = code::validate_rule_name(name) {
            return Err(EditError::InvalidName {
                name: name.to_owned(),
                reason: reason.to_owned(),
            });
        }

        let _guard = self.sync_lock.lock().await;
        self.ensure_live()?;
        if self.rules.contains_key(name) {
            return Err(ModelException::new(
                ModelError::ElementExists,
                format!("a rule named '{name}' already exists"),
                self.entity_ref(),
            )
            .into());
        }

        let problems = self.check_syntax(text).await?;
        if code::has_errors(&problems) {
            return Err(EditError::ErrorsInCode { problems });
        }

        let entity = self.entity_ref();
        self.client()?
            .add_rule(&[name.to_owned()], &[text.to_owned()])
            .await
            .map_err(|e| classify(e, &entity))?;
        info!(device = %self.key, rule = %name, "rule created");

        let rule = Rule::new(self, name.to_owned());
        rule.refresh().await;
        self.rules.insert(name.to_owned(), Arc::clone(&rule));
        self.updater.add(Arc::clone(&rule) as Arc<dyn Updatable>);
        if let Some(parent) = self.entity() {
            self.listeners
                .child_added(&parent, &Entity::Rule(Arc::clone(&rule)));
        }
        Ok(rule)
    }

    pub async fn delete_rule(&self, name: &str) -> Result<(), ModelException> {
        let rule = self.existing_rule(name)?;
        rule.delete().await
    }

    pub async fn rename_rule(&self, old_name: &str, new_name: &str) -> Result<(), EditError> {
        let rule = self.existing_rule(old_name)?;
        rule.rename(new_name).await
    }

    /// Check `text` on the device without storing it.
    pub async fn check_syntax(&self, text: &str) -> Result<Vec<Problem>, ModelException> {
        let entity = self.entity_ref();
        let reports = self
            .client()?
            .check_syntax(&[text.to_owned()])
            .await
            .map_err(|e| classify(e, &entity))?;
        Ok(reports
            .first()
            .map(|report| code::parse_report(report, text))
            .unwrap_or_default())
    }

    fn existing_rule(&self, name: &str) -> Result<Arc<Rule>, ModelException> {
        self.ensure_live()?;
        self.rule(name).ok_or_else(|| {
            ModelException::internal(format!("no rule named '{name}'"), self.entity_ref())
        })
    }

    fn ensure_live(&self) -> Result<(), ModelException> {
        if self.is_deleted() {
            Err(ModelException::internal(
                "device has been removed",
                self.entity_ref(),
            ))
        } else {
            Ok(())
        }
    }

    // ── Removal ─────────────────────────────────────────────────────

    /// Stop the updater, retire every rule and move to DELETED.
    pub(crate) async fn dispose(&self) {
        if self.deleted.swap(true, Ordering::SeqCst) {
            return;
        }
        let entity = self.entity();
        if let Some(entity) = &entity {
            self.listeners.model_updated(entity, ModelEvent::PreDelete);
        }

        self.updater.stop();
        {
            let _guard = self.sync_lock.lock().await;
            self.retire_all_rules();
        }
        if !self.updater.stop_and_wait(self.config.stop_timeout).await {
            warn!(device = %self.key, "updater still busy after removal");
        }
        self.updater.clear();
        *self.client.write() = None;

        self.set_state(SyncState::Deleted, None);
        if let Some(entity) = &entity {
            self.listeners.model_updated(entity, ModelEvent::Deleted);
        }
        info!(device = %self.key, "device removed");
    }
}

#[async_trait]
impl Updatable for Device {
    async fn update(&self) -> Result<UpdateOutcome, ModelException> {
        Ok(self.refresh().await)
    }

    fn base_priority(&self) -> i64 {
        DEVICE_PRIORITY
    }

    fn label(&self) -> String {
        format!("device {}", self.key)
    }
}

/// First `N.M` in a product version string, e.g. `"4.2r1"` → `(4, 2)`.
pub fn parse_version(version: &str) -> Option<(u32, u32)> {
    let bytes = version.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let major_end = digits_end(bytes, i);
        if bytes.get(major_end) == Some(&b'.') {
            let minor_end = digits_end(bytes, major_end + 1);
            if minor_end > major_end + 1 {
                let major = version[i..major_end].parse().ok()?;
                let minor = version[major_end + 1..minor_end].parse().ok()?;
                return Some((major, minor));
            }
        }
        i = major_end;
    }
    None
}

fn digits_end(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|b| !b.is_ascii_digit())
        .map_or(bytes.len(), |p| start + p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_parsing() {
        assert_eq!(parse_version("4.2r1"), Some((4, 2)));
        assert_eq!(parse_version("Traffic Manager 11.6.0"), Some((11, 6)));
        assert_eq!(parse_version("v10"), None);
        assert_eq!(parse_version("build 7. 3.1"), Some((3, 1)));
        assert_eq!(parse_version(""), None);
    }
}
