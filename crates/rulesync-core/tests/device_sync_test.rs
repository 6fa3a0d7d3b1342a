#![allow(clippy::unwrap_used)]
// Device and rule refresh behaviour against an in-memory device.

mod support;

use pretty_assertions::assert_eq;
use secrecy::SecretString;

use rulesync_core::{DeviceSpec, ModelError, ModelEvent, SyncState, Updatable, UpdateOutcome};

use support::{Failure, Fixture, HOST, PORT, Recorded, device_ref, rule_ref};

// ── First sync ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_first_sync_loads_rules_and_metadata() {
    let fx = Fixture::new(&[("a", "x = 1;"), ("b", "y = 2;")]);
    let device = fx.add_device();
    assert_eq!(device.state(), SyncState::WaitingForFirstUpdate);

    assert_eq!(device.refresh().await, UpdateOutcome::Keep);

    assert_eq!(device.state(), SyncState::UpToDate);
    assert_eq!(device.rule_names(), vec!["a", "b"]);
    assert_eq!(device.version(), Some((4, 2)));
    assert_eq!(device.product_version().as_deref(), Some("4.2r1"));
    assert!(device.capabilities().contains(&"scripting".to_string()));
    assert!(device.info().last_refresh.is_some());

    let a = device.rule("a").unwrap();
    assert_eq!(a.state(), SyncState::UpToDate);
    assert_eq!(a.text().unwrap().as_deref(), Some("x = 1;"));

    // First load is not a content change.
    assert_eq!(fx.listener.count(ModelEvent::Changed), 0);
    assert_eq!(
        fx.listener.children_added(),
        vec![device_ref(), rule_ref("a"), rule_ref("b")]
    );
}

#[tokio::test]
async fn test_rules_are_scheduled_with_the_device() {
    let fx = Fixture::new(&[("a", "x;")]);
    let device = fx.synced_device().await;
    let a = device.rule("a").unwrap();

    assert!(device.updater().contains(&*device));
    assert!(device.updater().contains(&*a));
}

// ── Change detection ────────────────────────────────────────────────

#[tokio::test]
async fn test_unchanged_remote_fires_no_events() {
    let fx = Fixture::new(&[("a", "x = 1;"), ("b", "y = 2;")]);
    let device = fx.synced_device().await;
    let before = device.rule_names();

    for _ in 0..2 {
        device.refresh().await;
        for rule in device.rules() {
            assert_eq!(rule.refresh().await, UpdateOutcome::Keep);
        }
    }

    assert_eq!(fx.listener.count(ModelEvent::Changed), 0);
    assert!(fx.listener.children_added().is_empty());
    assert_eq!(device.rule_names(), before);
}

#[tokio::test]
async fn test_remote_change_fires_exactly_one_changed() {
    let fx = Fixture::new(&[("a", "x = 1;")]);
    let device = fx.synced_device().await;
    let a = device.rule("a").unwrap();

    fx.remote.put("a", "x = 2;\nERROR");
    a.refresh().await;

    assert_eq!(fx.listener.updates(), vec![(rule_ref("a"), ModelEvent::Changed)]);
    assert_eq!(a.text().unwrap().as_deref(), Some("x = 2;\nERROR"));
    let problems = a.problems().unwrap();
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].line, 2);
    assert!(problems[0].is_error);

    a.refresh().await;
    assert_eq!(fx.listener.count(ModelEvent::Changed), 1);
}

#[tokio::test]
async fn test_foreign_marker_lines_are_stripped() {
    let fx = Fixture::new(&[("legacy", "#@ format=v1\nx = 1;")]);
    let device = fx.synced_device().await;
    let rule = device.rule("legacy").unwrap();

    assert!(rule.is_foreign());
    assert_eq!(rule.text().unwrap().as_deref(), Some("x = 1;"));
    assert_eq!(
        rule.raw_text().unwrap().as_deref(),
        Some("#@ format=v1\nx = 1;")
    );
}

// ── Rule set diffing ────────────────────────────────────────────────

#[tokio::test]
async fn test_vanished_rule_is_retired() {
    let fx = Fixture::new(&[("a", "x;"), ("b", "y;")]);
    let device = fx.synced_device().await;
    let b = device.rule("b").unwrap();

    fx.remote.drop_rule("b");
    device.refresh().await;

    assert_eq!(
        fx.listener.updates(),
        vec![
            (rule_ref("b"), ModelEvent::PreDelete),
            (rule_ref("b"), ModelEvent::Deleted),
        ]
    );
    assert_eq!(device.rule_names(), vec!["a"]);
    assert!(!device.updater().contains(&*b));
    assert_eq!(b.state(), SyncState::Deleted);
    assert_eq!(b.text().unwrap_err().kind(), ModelError::Internal);
    assert_eq!(b.problems().unwrap_err().kind(), ModelError::Internal);
}

#[tokio::test]
async fn test_one_refresh_applies_adds_and_removes() {
    let fx = Fixture::new(&[("a", "x;"), ("b", "y;")]);
    let device = fx.synced_device().await;

    fx.remote.drop_rule("b");
    fx.remote.put("c", "z;");
    device.refresh().await;

    assert_eq!(device.rule_names(), vec!["a", "c"]);
    assert_eq!(device.state(), SyncState::UpToDate);
    assert_eq!(
        fx.listener.updates(),
        vec![
            (rule_ref("b"), ModelEvent::PreDelete),
            (rule_ref("b"), ModelEvent::Deleted),
        ]
    );
    assert_eq!(fx.listener.children_added(), vec![rule_ref("c")]);
}

#[tokio::test]
async fn test_failed_round_does_not_retire_unannounced_rules() {
    let fx = Fixture::new(&[("a", "x;")]);
    let device = fx.synced_device().await;

    fx.remote.put("c", "z;");
    fx.remote.fail_version_with(Some(Failure::Fault("busy".into())));
    device.refresh().await;

    assert_eq!(device.state(), SyncState::CannotSync);
    assert!(device.rules().is_empty());
    assert!(fx.listener.children_added().is_empty());
    assert_eq!(
        fx.listener.updates(),
        vec![
            (rule_ref("a"), ModelEvent::PreDelete),
            (rule_ref("a"), ModelEvent::Deleted),
        ]
    );
    assert_eq!(device.updater().len(), 1);
    assert!(device.updater().contains(&*device));

    fx.listener.take();
    fx.remote.fail_version_with(None);
    device.refresh().await;

    assert_eq!(device.state(), SyncState::UpToDate);
    assert_eq!(device.rule_names(), vec!["a", "c"]);
    assert_eq!(
        fx.listener.children_added(),
        vec![rule_ref("a"), rule_ref("c")]
    );
}

#[tokio::test]
async fn test_rule_missing_on_own_refresh_is_forgotten() {
    let fx = Fixture::new(&[("a", "x;"), ("b", "y;")]);
    let device = fx.synced_device().await;
    let a = device.rule("a").unwrap();

    fx.remote.drop_rule("a");
    let outcome = Updatable::update(&*a).await.unwrap();

    assert_eq!(outcome, UpdateOutcome::Retire);
    assert_eq!(a.state(), SyncState::Deleted);
    assert_eq!(device.rule_names(), vec!["b"]);
    assert!(!device.updater().contains(&*a));
    assert_eq!(fx.listener.count(ModelEvent::Deleted), 1);
}

// ── Failures ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_connection_refused_moves_to_cannot_sync_and_recovers() {
    let fx = Fixture::new(&[("a", "x;")]);
    let device = fx.synced_device().await;
    let a = device.rule("a").unwrap();

    fx.remote.fail_with(Some(Failure::Refused));
    assert_eq!(device.refresh().await, UpdateOutcome::Keep);

    assert_eq!(device.state(), SyncState::CannotSync);
    let err = device.last_error().unwrap();
    assert_eq!(err.kind(), ModelError::ConnectionRefused);
    assert_eq!(err.entity(), &device_ref());
    // The cached rule map is cleared on failure.
    assert!(device.rules().is_empty());
    assert_eq!(a.state(), SyncState::Deleted);

    fx.remote.fail_with(None);
    device.refresh().await;
    assert_eq!(device.state(), SyncState::UpToDate);
    assert!(device.last_error().is_none());
    assert_eq!(device.rule_names(), vec!["a"]);
}

#[tokio::test]
async fn test_unresolvable_host() {
    let fx = Fixture::new(&[]);
    let device = fx.add_device();
    fx.remote.fail_with(Some(Failure::Unresolvable));

    device.refresh().await;
    assert_eq!(
        device.last_error().unwrap().kind(),
        ModelError::CannotResolve
    );
}

#[tokio::test]
async fn test_rule_refresh_failure_is_recorded_on_rule() {
    let fx = Fixture::new(&[("a", "x;")]);
    let device = fx.synced_device().await;
    let a = device.rule("a").unwrap();

    fx.remote
        .fail_with(Some(Failure::Fault("rule store locked".into())));
    assert_eq!(a.refresh().await, UpdateOutcome::Keep);

    assert_eq!(a.state(), SyncState::CannotSync);
    let err = a.last_error().unwrap();
    assert_eq!(err.kind(), ModelError::BadResponse);
    assert_eq!(err.message(), "rule store locked");
    assert_eq!(err.entity(), &rule_ref("a"));
    // Cached text survives a failed refresh.
    assert_eq!(a.text().unwrap().as_deref(), Some("x;"));
}

#[tokio::test]
async fn test_missing_capability() {
    let fx = Fixture::new(&[("a", "x;")]);
    fx.remote.set_capabilities(&["ssl-offload"]);
    let device = fx.add_device();

    device.refresh().await;

    assert_eq!(device.state(), SyncState::CannotSync);
    assert_eq!(device.last_error().unwrap().kind(), ModelError::NoCapability);
    assert!(device.rules().is_empty());
}

// ── Credentials ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_missing_password_waits_and_prompts_once() {
    let fx = Fixture::new(&[("a", "x;")]);
    let device = fx
        .controller
        .add_device(DeviceSpec::new(HOST, PORT, "admin"))
        .unwrap();

    device.refresh().await;
    device.refresh().await;

    assert_eq!(device.state(), SyncState::WaitingForFirstUpdate);
    assert_eq!(*fx.prompt.calls.lock(), vec![false]);
    assert_eq!(fx.connector.connects.load(std::sync::atomic::Ordering::SeqCst), 0);

    device.set_password(SecretString::from(support::PASSWORD.to_string()));
    device.refresh().await;
    assert_eq!(device.state(), SyncState::UpToDate);
}

#[tokio::test]
async fn test_rejected_password_reprompts_and_recovers() {
    let fx = Fixture::new(&[("a", "x;")]);
    let device = fx.synced_device().await;

    fx.remote.set_password("rotated");
    device.refresh().await;

    assert_eq!(device.state(), SyncState::CannotSync);
    assert_eq!(device.last_error().unwrap().kind(), ModelError::AuthFailed);
    assert_eq!(*fx.prompt.calls.lock(), vec![true]);

    device.set_password(SecretString::from("rotated".to_string()));
    device.refresh().await;
    assert_eq!(device.state(), SyncState::UpToDate);
    assert_eq!(device.rule_names(), vec!["a"]);
}

// ── Connectivity ────────────────────────────────────────────────────

#[tokio::test]
async fn test_disconnect_and_reconnect() {
    let fx = Fixture::new(&[("a", "x;")]);
    let device = fx.synced_device().await;
    let a = device.rule("a").unwrap();

    device.set_connected(false);
    assert_eq!(device.state(), SyncState::Disconnected);
    assert_eq!(a.state(), SyncState::Disconnected);

    let fetches = fx.remote.text_fetches.load(std::sync::atomic::Ordering::SeqCst);
    assert_eq!(device.refresh().await, UpdateOutcome::Keep);
    assert_eq!(a.refresh().await, UpdateOutcome::Keep);
    assert_eq!(device.state(), SyncState::Disconnected);
    assert_eq!(
        fx.remote.text_fetches.load(std::sync::atomic::Ordering::SeqCst),
        fetches
    );

    device.set_connected(true);
    assert_eq!(device.state(), SyncState::WaitingForFirstUpdate);
    device.refresh().await;
    a.refresh().await;
    assert_eq!(device.state(), SyncState::UpToDate);
    assert_eq!(a.state(), SyncState::UpToDate);

    let states: Vec<SyncState> = fx
        .listener
        .take()
        .into_iter()
        .filter_map(|r| match r {
            Recorded::State { entity, state } if entity == rule_ref("a") => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            SyncState::Disconnected,
            SyncState::WaitingForFirstUpdate,
            SyncState::UpToDate,
        ]
    );
}

#[tokio::test]
async fn test_offline_device_starts_disconnected() {
    let fx = Fixture::new(&[("a", "x;")]);
    let device = fx.controller.add_device(Fixture::spec().offline()).unwrap();

    assert_eq!(device.state(), SyncState::Disconnected);
    device.refresh().await;
    assert_eq!(device.state(), SyncState::Disconnected);
    assert!(device.rules().is_empty());

    device.set_connected(true);
    device.refresh().await;
    assert_eq!(device.state(), SyncState::UpToDate);
}
