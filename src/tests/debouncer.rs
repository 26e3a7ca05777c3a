use crate::debouncer::{PendingEvents, RawKind};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn create_then_delete_should_cancel_out() {
    let mut pending = PendingEvents::new();
    let deadline = Instant::now() + Duration::from_millis(300);
    pending.push("foo.txt".to_string(), RawKind::Create, deadline);
    pending.push("foo.txt".to_string(), RawKind::Delete, deadline);

    assert!(pending.is_empty());
}

#[tokio::test(start_paused = true)]
async fn delete_then_create_should_become_modify() {
    let mut pending = PendingEvents::new();
    let deadline = Instant::now() + Duration::from_millis(300);
    // Vim-style save: the file is replaced wholesale
    pending.push("foo.txt".to_string(), RawKind::Delete, deadline);
    pending.push("foo.txt".to_string(), RawKind::Create, deadline);

    assert_eq!(pending.kind_for("foo.txt"), Some(RawKind::Modify));
}

#[tokio::test(start_paused = true)]
async fn create_then_modify_should_stay_a_create() {
    let mut pending = PendingEvents::new();
    let deadline = Instant::now() + Duration::from_millis(300);
    pending.push("foo.txt".to_string(), RawKind::Create, deadline);
    pending.push("foo.txt".to_string(), RawKind::Modify, deadline);

    assert_eq!(pending.kind_for("foo.txt"), Some(RawKind::Create));
}

#[tokio::test(start_paused = true)]
async fn modify_then_delete_should_become_delete() {
    let mut pending = PendingEvents::new();
    let deadline = Instant::now() + Duration::from_millis(300);
    pending.push("foo.txt".to_string(), RawKind::Modify, deadline);
    pending.push("foo.txt".to_string(), RawKind::Delete, deadline);

    assert_eq!(pending.kind_for("foo.txt"), Some(RawKind::Delete));
}

#[tokio::test(start_paused = true)]
async fn new_notifications_should_push_the_deadline_out() {
    let mut pending = PendingEvents::new();
    let first = Instant::now() + Duration::from_millis(300);
    pending.push("foo.txt".to_string(), RawKind::Create, first);

    tokio::time::advance(Duration::from_millis(200)).await;
    let second = Instant::now() + Duration::from_millis(300);
    pending.push("foo.txt".to_string(), RawKind::Modify, second);

    // At the original deadline nothing is due yet
    tokio::time::advance(Duration::from_millis(150)).await;
    assert!(pending.take_expired(Instant::now()).is_empty());

    tokio::time::advance(Duration::from_millis(200)).await;
    let expired = pending.take_expired(Instant::now());
    assert_eq!(expired, vec![("foo.txt".to_string(), RawKind::Create)]);
    assert!(pending.is_empty());
}

#[tokio::test(start_paused = true)]
async fn take_expired_should_only_take_whats_due() {
    let mut pending = PendingEvents::new();
    let now = Instant::now();
    pending.push(
        "early.txt".to_string(),
        RawKind::Create,
        now + Duration::from_millis(100),
    );
    pending.push(
        "late.txt".to_string(),
        RawKind::Create,
        now + Duration::from_millis(500),
    );

    tokio::time::advance(Duration::from_millis(200)).await;
    let expired = pending.take_expired(Instant::now());
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].0, "early.txt");
    assert_eq!(
        pending.next_deadline(),
        Some(now + Duration::from_millis(500))
    );
}

#[tokio::test(start_paused = true)]
async fn discard_should_drop_without_emitting() {
    let mut pending = PendingEvents::new();
    let deadline = Instant::now() + Duration::from_millis(300);
    pending.push("foo.txt".to_string(), RawKind::Create, deadline);

    assert!(pending.discard("foo.txt"));
    assert!(!pending.discard("foo.txt"));
    assert!(pending.is_empty());
}
