// ── Rule ──
//
// Cached copy of one rule's code on a device. Created and retired only by
// the owning device. The sync lock serializes refreshes and edits of this
// rule; when both are needed the device lock is taken first.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::classify::{SyncFailure, classify};
use crate::code::{self, Problem};
use crate::config::{DeviceKey, RULE_PRIORITY};
use crate::device::Device;
use crate::error::{EditError, EntityRef, ModelError, ModelException};
use crate::listener::{Entity, ListenerSet, ModelEvent};
use crate::state::{Status, StateCell, SyncState, Transition};
use crate::updater::{Updatable, UpdateOutcome};

#[derive(Debug, Default)]
struct RuleContent {
    /// `None` until the first successful fetch.
    text: Option<String>,
    raw: Option<String>,
    foreign: bool,
    problems: Vec<Problem>,
}

enum Fetch {
    Loaded,
    Gone,
}

pub struct Rule {
    this: Weak<Rule>,
    device: Weak<Device>,
    device_key: DeviceKey,
    name: RwLock<String>,
    content: RwLock<RuleContent>,
    state: StateCell,
    viewers: AtomicUsize,
    retired: AtomicBool,
    sync_lock: tokio::sync::Mutex<()>,
    listeners: Arc<ListenerSet>,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("device", &self.device_key)
            .field("name", &*self.name.read())
            .field("state", &self.state.state())
            .finish_non_exhaustive()
    }
}

impl Rule {
    pub(crate) fn new(device: &Device, name: String) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            device: device.weak(),
            device_key: device.key().clone(),
            name: RwLock::new(name),
            content: RwLock::new(RuleContent::default()),
            state: StateCell::new(SyncState::WaitingForFirstUpdate),
            viewers: AtomicUsize::new(0),
            retired: AtomicBool::new(false),
            sync_lock: tokio::sync::Mutex::new(()),
            listeners: ListenerSet::child_of(device.listeners()),
        })
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn device_key(&self) -> &DeviceKey {
        &self.device_key
    }

    /// The owning device, unless it has been dropped.
    pub fn device(&self) -> Option<Arc<Device>> {
        self.device.upgrade()
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::Rule {
            device: self.device_key.clone(),
            name: self.name(),
        }
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

    pub fn is_deleted(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Normalized code, or `None` before the first successful fetch.
    pub fn text(&self) -> Result<Option<String>, ModelException> {
        self.ensure_live()?;
        Ok(self.content.read().text.clone())
    }

    /// Code exactly as the device returned it.
    pub fn raw_text(&self) -> Result<Option<String>, ModelException> {
        self.ensure_live()?;
        Ok(self.content.read().raw.clone())
    }

    pub fn is_foreign(&self) -> bool {
        self.content.read().foreign
    }

    pub fn problems(&self) -> Result<Vec<Problem>, ModelException> {
        self.ensure_live()?;
        Ok(self.content.read().problems.clone())
    }

    pub fn listeners(&self) -> &Arc<ListenerSet> {
        &self.listeners
    }

    /// Mark the rule as being viewed until the guard is dropped.
    pub fn watch(&self) -> ViewGuard {
        self.viewers.fetch_add(1, Ordering::SeqCst);
        ViewGuard {
            rule: self.this.clone(),
        }
    }

    pub fn is_viewed(&self) -> bool {
        self.viewers.load(Ordering::SeqCst) > 0
    }

    fn ensure_live(&self) -> Result<(), ModelException> {
        if self.is_deleted() {
            Err(ModelException::internal(
                "rule has been deleted",
                self.entity_ref(),
            ))
        } else {
            Ok(())
        }
    }

    fn owner(&self) -> Result<Arc<Device>, ModelException> {
        self.device
            .upgrade()
            .filter(|d| !d.is_deleted())
            .ok_or_else(|| ModelException::internal("device has been removed", self.entity_ref()))
    }

    fn entity(&self) -> Option<Entity> {
        self.this.upgrade().map(Entity::Rule)
    }

    // ── State ───────────────────────────────────────────────────────

    pub(crate) fn set_state(&self, next: SyncState, error: Option<ModelException>) {
        let owner = self.entity_ref();
        if let Transition::Changed(_) = self.state.transition(next, error, &owner) {
            if let Some(entity) = self.entity() {
                self.listeners.state_changed(&entity, next);
            }
        }
    }

    /// PRE_DELETE, clear content, DELETED. Runs once.
    pub(crate) fn retire(&self) {
        if self.retired.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(device = %self.device_key, rule = %self.name(), "retiring rule");

        let entity = self.entity();
        if let Some(entity) = &entity {
            self.listeners.model_updated(entity, ModelEvent::PreDelete);
        }
        *self.content.write() = RuleContent::default();
        self.set_state(SyncState::Deleted, None);
        if let Some(entity) = &entity {
            self.listeners.model_updated(entity, ModelEvent::Deleted);
        }
    }

    // ── Refresh ─────────────────────────────────────────────────────

    /// Reconcile the cached code with the device.
    ///
    /// Failures are recorded in the rule's state, never returned.
    pub async fn refresh(&self) -> UpdateOutcome {
        let _guard = self.sync_lock.lock().await;
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> UpdateOutcome {
        if self.is_deleted() {
            return UpdateOutcome::Retire;
        }

        let device = match self.device.upgrade() {
            Some(device) if !device.is_deleted() => device,
            _ => {
                self.retire();
                return UpdateOutcome::Retire;
            }
        };

        if !device.is_connected() {
            self.set_state(SyncState::Disconnected, None);
            return UpdateOutcome::Keep;
        }
        if self.state() == SyncState::Disconnected {
            self.set_state(SyncState::WaitingForFirstUpdate, None);
        }

        match self.fetch(&device).await {
            Ok(Fetch::Loaded) => UpdateOutcome::Keep,
            Ok(Fetch::Gone) => {
                info!(device = %self.device_key, rule = %self.name(), "rule no longer exists on device");
                self.retire();
                UpdateOutcome::Retire
            }
            Err(failure) => {
                let err = classify(failure, &self.entity_ref());
                debug!(device = %self.device_key, rule = %self.name(), error = %err, "rule refresh failed");
                self.set_state(SyncState::CannotSync, Some(err));
                UpdateOutcome::Keep
            }
        }
    }

    async fn fetch(&self, device: &Device) -> Result<Fetch, SyncFailure> {
        let client = device.client()?;
        let name = self.name();

        let raw = match client.get_rule_text(std::slice::from_ref(&name)).await {
            Ok(texts) => texts.into_iter().next().ok_or_else(|| {
                ModelException::new(
                    ModelError::BadResponse,
                    "device returned no text for the rule",
                    self.entity_ref(),
                )
            })?,
            Err(e) if e.is_unknown_object() => return Ok(Fetch::Gone),
            Err(e) => return Err(e.into()),
        };

        let normalized = code::normalize(&raw);
        let first_load = {
            let content = self.content.read();
            if content.text.as_deref() == Some(normalized.text.as_str())
                && content.foreign == normalized.is_foreign
            {
                drop(content);
                self.set_state(SyncState::UpToDate, None);
                return Ok(Fetch::Loaded);
            }
            content.text.is_none()
        };

        let reports = client
            .check_syntax(std::slice::from_ref(&normalized.text))
            .await?;
        let problems = reports
            .first()
            .map(|report| code::parse_report(report, &normalized.text))
            .unwrap_or_default();

        {
            let mut content = self.content.write();
            content.text = Some(normalized.text);
            content.raw = Some(raw);
            content.foreign = normalized.is_foreign;
            content.problems = problems;
        }

        if !first_load {
            if let Some(entity) = self.entity() {
                self.listeners.model_updated(&entity, ModelEvent::Changed);
            }
        }
        self.set_state(SyncState::UpToDate, None);
        Ok(Fetch::Loaded)
    }

    /// Drop this rule from the device's map and updater if it was retired.
    async fn forget_if_retired(&self) {
        if !self.is_deleted() {
            return;
        }
        if let Some(device) = self.device.upgrade() {
            let _guard = device.sync_lock().lock().await;
            device.forget_rule(self);
        }
    }

    // ── Edits ───────────────────────────────────────────────────────

    /// Replace the rule's code.
    ///
    /// The code is syntax-checked first; error-level problems reject the
    /// edit without writing anything.
    pub async fn set_code(&self, text: &str) -> Result<(), EditError> {
        {
            let _guard = self.sync_lock.lock().await;
            self.ensure_live()?;
            let device = self.owner()?;
            let client = device.client()?;
            let entity = self.entity_ref();

            let text = text.to_owned();
            let reports = client
                .check_syntax(std::slice::from_ref(&text))
                .await
                .map_err(|e| classify(e, &entity))?;
            let problems = reports
                .first()
                .map(|report| code::parse_report(report, &text))
                .unwrap_or_default();
            if code::has_errors(&problems) {
                return Err(EditError::ErrorsInCode { problems });
            }

            client
                .set_rule_text(&[self.name()], std::slice::from_ref(&text))
                .await
                .map_err(|e| classify(e, &entity))?;
            info!(device = %self.device_key, rule = %self.name(), "rule code written");

            self.refresh_locked().await;
        }
        self.forget_if_retired().await;
        Ok(())
    }

    /// Rename on the device, then rekey locally and fire RENAMED.
    pub async fn rename(&self, new_name: &str) -> Result<(), EditError> {
        if let Some(reason) = code::validate_rule_name(new_name) {
            return Err(EditError::InvalidName {
                name: new_name.to_owned(),
                reason: reason.to_owned(),
            });
        }

        let device = self.owner()?;
        let _device_guard = device.sync_lock().lock().await;
        let _guard = self.sync_lock.lock().await;
        self.ensure_live()?;

        let old_name = self.name();
        if old_name == new_name {
            return Ok(());
        }
        if device.has_rule(new_name) {
            return Err(ModelException::new(
                ModelError::ElementExists,
                format!("a rule named '{new_name}' already exists"),
                EntityRef::Device(self.device_key.clone()),
            )
            .into());
        }

        let entity = self.entity_ref();
        device
            .client()?
            .rename_rule(&[old_name.clone()], &[new_name.to_owned()])
            .await
            .map_err(|e| classify(e, &entity))?;

        *self.name.write() = new_name.to_owned();
        if let Some(me) = self.this.upgrade() {
            device.rekey_rule(&old_name, me);
        }
        info!(device = %self.device_key, from = %old_name, to = %new_name, "rule renamed");

        if let Some(entity) = self.entity() {
            self.listeners.model_updated(&entity, ModelEvent::Renamed);
        }
        Ok(())
    }

    /// Delete on the device, then retire locally.
    pub async fn delete(&self) -> Result<(), ModelException> {
        let device = self.owner()?;
        let _device_guard = device.sync_lock().lock().await;
        let _guard = self.sync_lock.lock().await;
        self.ensure_live()?;

        let entity = self.entity_ref();
        device
            .client()?
            .delete_rule(&[self.name()])
            .await
            .map_err(|e| classify(e, &entity))?;

        device.forget_rule(self);
        self.retire();
        info!(device = %self.device_key, rule = %self.name(), "rule deleted");
        Ok(())
    }
}

#[async_trait]
impl Updatable for Rule {
    async fn update(&self) -> Result<UpdateOutcome, ModelException> {
        let outcome = self.refresh().await;
        if outcome == UpdateOutcome::Retire {
            self.forget_if_retired().await;
        }
        Ok(outcome)
    }

    fn base_priority(&self) -> i64 {
        RULE_PRIORITY
    }

    fn is_viewed(&self) -> bool {
        Rule::is_viewed(self)
    }

    fn label(&self) -> String {
        format!("rule '{}' on {}", self.name(), self.device_key)
    }
}

/// Applies the view bonus to a rule while alive.
#[derive(Debug)]
pub struct ViewGuard {
    rule: Weak<Rule>,
}

impl Drop for ViewGuard {
    fn drop(&mut self) {
        if let Some(rule) = self.rule.upgrade() {
            rule.viewers.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
