use std::{sync::Arc, time::Duration};

use shared::{domain::DeviceId, error::EngineError};
use storage::LocalStateStore;

use super::*;
use crate::test_support::{FakeRemoteStore, VALID_CSRF, VALID_RECOVERY_CODE};

async fn manager_with(remote: Arc<FakeRemoteStore>) -> DeviceIdentityManager {
    let store = LocalStateStore::new("sqlite::memory:").await.expect("db");
    DeviceIdentityManager::new(remote, store, DEFAULT_RESTORE_MIN_INTERVAL)
}

#[tokio::test]
async fn bootstrap_establishes_identity_and_surfaces_code_once() {
    let remote = Arc::new(FakeRemoteStore::new());
    let manager = manager_with(Arc::clone(&remote)).await;

    let first = manager.bootstrap().await.expect("bootstrap");
    assert_eq!(first.identity.device_id, DeviceId::from("dev-fake"));
    assert_eq!(first.recovery_code.as_deref(), Some(VALID_RECOVERY_CODE));
    assert_eq!(
        first.identity.recovery_code_fingerprint,
        fingerprint(VALID_RECOVERY_CODE)
    );
    assert_eq!(remote.current_device_id(), Some(DeviceId::from("dev-fake")));

    // Second call is served from storage; the code is never shown again.
    let second = manager.bootstrap().await.expect("bootstrap again");
    assert_eq!(second.identity, first.identity);
    assert_eq!(second.recovery_code, None);
    assert_eq!(*remote.bootstrap_calls.lock().expect("calls"), 1);
}

#[tokio::test]
async fn restore_swaps_identity_on_valid_code() {
    let remote = Arc::new(FakeRemoteStore::new());
    let manager = manager_with(Arc::clone(&remote)).await;
    manager.bootstrap().await.expect("bootstrap");

    let restored = manager
        .restore(VALID_RECOVERY_CODE)
        .await
        .expect("restore");
    assert_eq!(restored.device_id, DeviceId::from("dev-restored"));
    assert_eq!(
        manager.current().await.expect("current"),
        Some(restored.clone())
    );
    assert_eq!(remote.current_device_id(), Some(restored.device_id));
}

#[tokio::test]
async fn restore_with_wrong_code_is_invalid_and_keeps_identity() {
    let remote = Arc::new(FakeRemoteStore::new());
    let manager = manager_with(Arc::clone(&remote)).await;
    let original = manager.bootstrap().await.expect("bootstrap").identity;

    let err = manager.restore("wrong-code-0000").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidRecoveryCode));
    assert_eq!(manager.current().await.expect("current"), Some(original));
}

#[tokio::test]
async fn restore_attempts_are_throttled_locally() {
    let remote = Arc::new(FakeRemoteStore::new());
    let store = LocalStateStore::new("sqlite::memory:").await.expect("db");
    let throttled_remote = Arc::clone(&remote);
    let manager = DeviceIdentityManager::new(throttled_remote, store, Duration::from_secs(3600));

    let _ = manager.restore("wrong-code-0000").await;
    let err = manager.restore(VALID_RECOVERY_CODE).await.unwrap_err();
    assert!(matches!(err, EngineError::RateLimited(_)));
}

#[tokio::test]
async fn rotate_updates_stored_fingerprint() {
    let remote = Arc::new(FakeRemoteStore::new());
    let manager = manager_with(Arc::clone(&remote)).await;
    let before = manager.bootstrap().await.expect("bootstrap").identity;

    let rotated = manager.rotate(VALID_CSRF).await.expect("rotate");
    assert_eq!(rotated.recovery_code, "rotated-code-7777");

    let after = manager.current().await.expect("current").expect("identity");
    assert_eq!(after.device_id, before.device_id);
    assert_ne!(
        after.recovery_code_fingerprint,
        before.recovery_code_fingerprint
    );
    assert_eq!(
        after.recovery_code_fingerprint,
        fingerprint(&rotated.recovery_code)
    );
}

#[tokio::test]
async fn rotate_without_csrf_token_is_rejected() {
    let remote = Arc::new(FakeRemoteStore::new());
    let manager = manager_with(remote).await;
    manager.bootstrap().await.expect("bootstrap");

    let err = manager.rotate("stale-token").await.unwrap_err();
    assert!(matches!(err, EngineError::Auth(_)));
}

#[test]
fn fingerprint_is_stable_and_short() {
    let fp = fingerprint("  otter-velvet-9431 ");
    assert_eq!(fp, fingerprint("otter-velvet-9431"));
    assert_eq!(fp.len(), 16);
    assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
}
