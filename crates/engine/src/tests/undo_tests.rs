use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use super::*;

const WINDOW: Duration = Duration::from_secs(600);

fn counting_manager() -> (UndoManager<String>, Arc<AtomicUsize>) {
    let expirations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&expirations);
    let manager = UndoManager::new(WINDOW, move |_id, _meta: String| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (manager, expirations)
}

#[tokio::test(start_paused = true)]
async fn undo_within_window_returns_meta_and_disarms_timer() {
    let (manager, expirations) = counting_manager();
    manager.schedule("n1", "payload".to_string()).await;

    tokio::time::sleep(WINDOW / 2).await;
    assert!(manager.is_pending("n1").await);
    assert_eq!(manager.undo("n1").await.as_deref(), Some("payload"));

    // Past the original deadline: the disarmed timer must not fire.
    tokio::time::sleep(WINDOW).await;
    assert_eq!(expirations.load(Ordering::SeqCst), 0);
    assert!(!manager.is_pending("n1").await);
}

#[tokio::test(start_paused = true)]
async fn expiry_fires_exactly_once_and_clears_entry() {
    let (manager, expirations) = counting_manager();
    manager.schedule("n1", "payload".to_string()).await;

    tokio::time::sleep(WINDOW + Duration::from_secs(1)).await;
    assert_eq!(expirations.load(Ordering::SeqCst), 1);
    assert!(!manager.is_pending("n1").await);
    assert_eq!(manager.undo("n1").await, None);

    tokio::time::sleep(WINDOW).await;
    assert_eq!(expirations.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn reschedule_replaces_timer_and_meta() {
    let (manager, expirations) = counting_manager();
    manager.schedule("n1", "first".to_string()).await;

    // Near the deadline, the same id is scheduled again (delete, undo,
    // delete again): the clock restarts and the old meta is gone.
    tokio::time::sleep(WINDOW - Duration::from_secs(1)).await;
    manager.schedule("n1", "second".to_string()).await;

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(expirations.load(Ordering::SeqCst), 0);
    assert_eq!(manager.undo("n1").await.as_deref(), Some("second"));
}

#[tokio::test(start_paused = true)]
async fn ids_expire_independently() {
    let expired: Arc<StdMutex<Vec<String>>> = Arc::default();
    let sink = Arc::clone(&expired);
    let manager = UndoManager::new(WINDOW, move |id, _meta: String| {
        sink.lock().expect("expired ids").push(id);
    });

    manager.schedule("n1", "a".to_string()).await;
    tokio::time::sleep(WINDOW / 2).await;
    manager.schedule("n2", "b".to_string()).await;

    tokio::time::sleep(WINDOW / 2 + Duration::from_secs(1)).await;
    assert_eq!(expired.lock().expect("expired ids").as_slice(), ["n1".to_string()]);
    assert!(manager.is_pending("n2").await);

    tokio::time::sleep(WINDOW).await;
    assert_eq!(
        expired.lock().expect("expired ids").as_slice(),
        ["n1".to_string(), "n2".to_string()]
    );
}
