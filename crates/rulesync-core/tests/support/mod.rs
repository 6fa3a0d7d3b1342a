#![allow(dead_code, clippy::unwrap_used)]
// Shared fixtures: an in-memory device and recording observers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};

use rulesync_api::{Connector, Endpoint, Error, RemoteClient, SyntaxReport};
use rulesync_core::{
    Controller, Device, DeviceSpec, Entity, EntityRef, ModelEvent, ModelListener,
    PasswordCallback, SyncConfig, SyncState,
};

pub const HOST: &str = "lb1.example.com";
pub const PORT: u16 = 9090;
pub const PASSWORD: &str = "secret";

// ── Fake device ─────────────────────────────────────────────────────

/// Failure the fake answers every call with.
#[derive(Debug, Clone)]
pub enum Failure {
    Refused,
    Unresolvable,
    Fault(String),
}

impl Failure {
    fn to_error(&self) -> Error {
        match self {
            Self::Refused => {
                std::io::Error::from(std::io::ErrorKind::ConnectionRefused).into()
            }
            Self::Unresolvable => {
                std::io::Error::other("dns error: failed to lookup address information").into()
            }
            Self::Fault(reason) => Error::Fault {
                status: 500,
                reason: reason.clone(),
                body: String::new(),
            },
        }
    }
}

/// In-memory rule store behaving like a device's management endpoint.
///
/// Code containing `ERROR` fails the syntax check on that line; code
/// containing `WARN` produces a warning.
pub struct FakeRemote {
    rules: Mutex<BTreeMap<String, String>>,
    capabilities: Mutex<Vec<String>>,
    version: Mutex<String>,
    password: Mutex<String>,
    failure: Mutex<Option<Failure>>,
    version_failure: Mutex<Option<Failure>>,
    pub writes: AtomicUsize,
    pub text_fetches: AtomicUsize,
}

impl FakeRemote {
    pub fn new(rules: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            rules: Mutex::new(
                rules
                    .iter()
                    .map(|(n, t)| ((*n).to_string(), (*t).to_string()))
                    .collect(),
            ),
            capabilities: Mutex::new(vec!["scripting".into(), "ssl-offload".into()]),
            version: Mutex::new("4.2r1".into()),
            password: Mutex::new(PASSWORD.into()),
            failure: Mutex::new(None),
            version_failure: Mutex::new(None),
            writes: AtomicUsize::new(0),
            text_fetches: AtomicUsize::new(0),
        })
    }

    /// Change a rule behind the engine's back.
    pub fn put(&self, name: &str, text: &str) {
        self.rules.lock().insert(name.into(), text.into());
    }

    pub fn drop_rule(&self, name: &str) {
        self.rules.lock().remove(name);
    }

    pub fn text(&self, name: &str) -> Option<String> {
        self.rules.lock().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.rules.lock().keys().cloned().collect()
    }

    pub fn set_capabilities(&self, caps: &[&str]) {
        *self.capabilities.lock() = caps.iter().map(|c| (*c).to_string()).collect();
    }

    pub fn set_password(&self, password: &str) {
        *self.password.lock() = password.into();
    }

    pub fn fail_with(&self, failure: Option<Failure>) {
        *self.failure.lock() = failure;
    }

    /// Fail only the product version call.
    pub fn fail_version_with(&self, failure: Option<Failure>) {
        *self.version_failure.lock() = failure;
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check(&self, password: &str) -> Result<(), Error> {
        if let Some(failure) = self.failure.lock().as_ref() {
            return Err(failure.to_error());
        }
        if *self.password.lock() != password {
            return Err(Error::Fault {
                status: 401,
                reason: "Unauthorized".into(),
                body: String::new(),
            });
        }
        Ok(())
    }
}

fn unknown(name: &str) -> Error {
    Error::UnknownObject {
        message: format!("no rule named '{name}'"),
    }
}

fn syntax_report(text: &str) -> SyntaxReport {
    let mut report = SyntaxReport::default();
    for (idx, line) in text.lines().enumerate() {
        if line.contains("ERROR") {
            report
                .errors
                .push_str(&format!("Error: line {}: syntax error\n", idx + 1));
        }
        if line.contains("WARN") {
            report
                .warnings
                .push_str(&format!("Warning: line {}: questionable\n", idx + 1));
        }
    }
    report
}

/// One connection to the fake, authenticated with a given password.
pub struct FakeSession {
    remote: Arc<FakeRemote>,
    password: String,
}

#[async_trait]
impl RemoteClient for FakeSession {
    async fn list_rule_names(&self) -> Result<Vec<String>, Error> {
        self.remote.check(&self.password)?;
        Ok(self.remote.names())
    }

    async fn get_rule_text(&self, names: &[String]) -> Result<Vec<String>, Error> {
        self.remote.check(&self.password)?;
        self.remote.text_fetches.fetch_add(1, Ordering::SeqCst);
        let rules = self.remote.rules.lock();
        names
            .iter()
            .map(|n| rules.get(n).cloned().ok_or_else(|| unknown(n)))
            .collect()
    }

    async fn set_rule_text(&self, names: &[String], texts: &[String]) -> Result<(), Error> {
        self.remote.check(&self.password)?;
        let mut rules = self.remote.rules.lock();
        for (name, text) in names.iter().zip(texts) {
            let slot = rules.get_mut(name).ok_or_else(|| unknown(name))?;
            slot.clone_from(text);
            self.remote.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn add_rule(&self, names: &[String], texts: &[String]) -> Result<(), Error> {
        self.remote.check(&self.password)?;
        let mut rules = self.remote.rules.lock();
        for (name, text) in names.iter().zip(texts) {
            if rules.contains_key(name) {
                return Err(Error::Fault {
                    status: 500,
                    reason: format!("rule '{name}' already exists"),
                    body: String::new(),
                });
            }
            rules.insert(name.clone(), text.clone());
            self.remote.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn delete_rule(&self, names: &[String]) -> Result<(), Error> {
        self.remote.check(&self.password)?;
        let mut rules = self.remote.rules.lock();
        for name in names {
            rules.remove(name).ok_or_else(|| unknown(name))?;
            self.remote.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn rename_rule(&self, old_names: &[String], new_names: &[String]) -> Result<(), Error> {
        self.remote.check(&self.password)?;
        let mut rules = self.remote.rules.lock();
        for (old, new) in old_names.iter().zip(new_names) {
            let text = rules.remove(old).ok_or_else(|| unknown(old))?;
            rules.insert(new.clone(), text);
            self.remote.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn check_syntax(&self, texts: &[String]) -> Result<Vec<SyntaxReport>, Error> {
        self.remote.check(&self.password)?;
        Ok(texts.iter().map(|t| syntax_report(t)).collect())
    }

    async fn get_capabilities(&self) -> Result<Vec<String>, Error> {
        self.remote.check(&self.password)?;
        Ok(self.remote.capabilities.lock().clone())
    }

    async fn get_product_version(&self) -> Result<String, Error> {
        self.remote.check(&self.password)?;
        if let Some(failure) = self.remote.version_failure.lock().as_ref() {
            return Err(failure.to_error());
        }
        Ok(self.remote.version.lock().clone())
    }
}

pub struct FakeConnector {
    pub remote: Arc<FakeRemote>,
    pub connects: AtomicUsize,
}

impl FakeConnector {
    pub fn new(remote: Arc<FakeRemote>) -> Arc<Self> {
        Arc::new(Self {
            remote,
            connects: AtomicUsize::new(0),
        })
    }
}

impl Connector for FakeConnector {
    fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn RemoteClient>, Error> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeSession {
            remote: Arc::clone(&self.remote),
            password: endpoint.password.expose_secret().to_owned(),
        }))
    }
}

// ── Observers ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    ChildAdded { parent: EntityRef, child: EntityRef },
    Updated { entity: EntityRef, event: ModelEvent },
    State { entity: EntityRef, state: SyncState },
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Recorded>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take(&self) -> Vec<Recorded> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn count(&self, event: ModelEvent) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|r| matches!(r, Recorded::Updated { event: e, .. } if *e == event))
            .count()
    }

    pub fn updates(&self) -> Vec<(EntityRef, ModelEvent)> {
        self.events
            .lock()
            .iter()
            .filter_map(|r| match r {
                Recorded::Updated { entity, event } => Some((entity.clone(), *event)),
                _ => None,
            })
            .collect()
    }

    pub fn children_added(&self) -> Vec<EntityRef> {
        self.events
            .lock()
            .iter()
            .filter_map(|r| match r {
                Recorded::ChildAdded { child, .. } => Some(child.clone()),
                _ => None,
            })
            .collect()
    }
}

impl ModelListener for RecordingListener {
    fn child_added(&self, parent: &Entity, child: &Entity) {
        self.events.lock().push(Recorded::ChildAdded {
            parent: parent.entity_ref(),
            child: child.entity_ref(),
        });
    }

    fn model_updated(&self, entity: &Entity, event: ModelEvent) {
        self.events.lock().push(Recorded::Updated {
            entity: entity.entity_ref(),
            event,
        });
    }

    fn state_changed(&self, entity: &Entity, state: SyncState) {
        self.events.lock().push(Recorded::State {
            entity: entity.entity_ref(),
            state,
        });
    }
}

#[derive(Default)]
pub struct RecordingPrompt {
    pub calls: Mutex<Vec<bool>>,
}

impl PasswordCallback for RecordingPrompt {
    fn password_required(&self, _device: &Arc<Device>, is_retry: bool) {
        self.calls.lock().push(is_retry);
    }
}

// ── Fixture ─────────────────────────────────────────────────────────

pub struct Fixture {
    pub controller: Controller,
    pub remote: Arc<FakeRemote>,
    pub connector: Arc<FakeConnector>,
    pub listener: Arc<RecordingListener>,
    pub prompt: Arc<RecordingPrompt>,
}

impl Fixture {
    /// Controller without background updaters; tests drive refreshes.
    pub fn new(rules: &[(&str, &str)]) -> Self {
        Self::with_config(
            rules,
            SyncConfig {
                start_updaters: false,
                ..SyncConfig::default()
            },
        )
    }

    pub fn with_config(rules: &[(&str, &str)], config: SyncConfig) -> Self {
        let remote = FakeRemote::new(rules);
        let connector = FakeConnector::new(Arc::clone(&remote));
        let prompt = Arc::new(RecordingPrompt::default());
        let controller = Controller::new(
            config,
            Arc::clone(&connector) as Arc<dyn Connector>,
            Arc::clone(&prompt) as Arc<dyn PasswordCallback>,
        );
        let listener = RecordingListener::new();
        controller.add_listener(Arc::clone(&listener) as Arc<dyn ModelListener>);
        Self {
            controller,
            remote,
            connector,
            listener,
            prompt,
        }
    }

    pub fn spec() -> DeviceSpec {
        DeviceSpec::new(HOST, PORT, "admin").with_password(SecretString::from(PASSWORD.to_string()))
    }

    pub fn add_device(&self) -> Arc<Device> {
        self.controller.add_device(Self::spec()).unwrap()
    }

    /// Add the device and run its first refresh.
    pub async fn synced_device(&self) -> Arc<Device> {
        let device = self.add_device();
        device.refresh().await;
        assert_eq!(device.state(), SyncState::UpToDate, "{:?}", device.last_error());
        self.listener.take();
        device
    }
}

pub fn rule_ref(name: &str) -> EntityRef {
    EntityRef::Rule {
        device: rulesync_core::DeviceKey::new(HOST, PORT),
        name: name.into(),
    }
}

pub fn device_ref() -> EntityRef {
    EntityRef::Device(rulesync_core::DeviceKey::new(HOST, PORT))
}
