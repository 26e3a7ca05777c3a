use crate::error::WatchError;
use crate::protocol::{FsAction, FsEvent};
use crate::tests::setup_config;
use crate::watcher::WorkspaceWatcher;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

async fn started_watcher() -> (
    Arc<WorkspaceWatcher>,
    mpsc::UnboundedReceiver<Vec<FsEvent>>,
    tempfile::TempDir,
) {
    setup_config();
    let tmp = tempfile::tempdir().unwrap();
    let watcher = Arc::new(WorkspaceWatcher::new(tmp.path().join("canvas")));
    watcher.ensure_workspace().await.unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    watcher.start(tx).unwrap();
    // Give the notify backend a beat to arm
    tokio::time::sleep(Duration::from_millis(200)).await;
    (watcher, rx, tmp)
}

async fn next_batch(
    rx: &mut mpsc::UnboundedReceiver<Vec<FsEvent>>,
    timeout_ms: u64,
) -> Option<Vec<FsEvent>> {
    tokio::time::timeout(Duration::from_millis(timeout_ms), rx.recv())
        .await
        .ok()
        .flatten()
}

#[tokio::test(flavor = "multi_thread")]
async fn second_start_should_fail() {
    let (watcher, _rx, _tmp) = started_watcher().await;
    let (tx, _rx2) = mpsc::unbounded_channel();
    assert!(matches!(
        watcher.start(tx),
        Err(WatchError::AlreadyStarted)
    ));
    watcher.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn external_create_should_emit_enriched_event() {
    let (watcher, mut rx, _tmp) = started_watcher().await;
    std::fs::write(watcher.root().join("note.txt"), "hello").unwrap();

    let batch = next_batch(&mut rx, 3_000).await.expect("no event arrived");
    assert_eq!(batch.len(), 1);
    let event = &batch[0];
    assert_eq!(event.action, FsAction::Created);
    assert_eq!(event.path, "note.txt");
    assert!(!event.is_directory);
    assert_eq!(event.content.as_deref(), Some("hello"));
    assert_eq!(event.size, Some(5));
    watcher.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn self_writes_should_be_suppressed() {
    let (watcher, mut rx, _tmp) = started_watcher().await;
    watcher.write_text("self.txt", "from inside").await.unwrap();

    assert!(
        next_batch(&mut rx, 1_000).await.is_none(),
        "self-inflicted write must not re-emerge as an event"
    );
    watcher.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn reserved_paths_should_be_filtered() {
    let (watcher, mut rx, _tmp) = started_watcher().await;
    std::fs::write(watcher.root().join(".canvas.json"), "{}").unwrap();
    std::fs::write(watcher.root().join(".secret"), "shh").unwrap();
    std::fs::write(watcher.root().join("pic_annotated.png"), "png").unwrap();

    assert!(next_batch(&mut rx, 1_000).await.is_none());
    watcher.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_should_classify_with_extension_heuristic() {
    let (watcher, mut rx, _tmp) = started_watcher().await;
    std::fs::write(watcher.root().join("gone.txt"), "x").unwrap();
    next_batch(&mut rx, 3_000).await.expect("create not seen");

    std::fs::remove_file(watcher.root().join("gone.txt")).unwrap();
    let batch = next_batch(&mut rx, 3_000).await.expect("delete not seen");
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].action, FsAction::Deleted);
    assert_eq!(batch[0].path, "gone.txt");
    assert!(!batch[0].is_directory);
    watcher.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn rename_should_surface_as_delete_plus_create() {
    let (watcher, mut rx, _tmp) = started_watcher().await;
    std::fs::write(watcher.root().join("a.txt"), "body").unwrap();
    next_batch(&mut rx, 3_000).await.expect("create not seen");

    std::fs::rename(watcher.root().join("a.txt"), watcher.root().join("b.txt")).unwrap();
    let batch = next_batch(&mut rx, 3_000).await.expect("rename not seen");
    let deleted: Vec<&FsEvent> = batch
        .iter()
        .filter(|e| e.action == FsAction::Deleted)
        .collect();
    let created: Vec<&FsEvent> = batch
        .iter()
        .filter(|e| e.action == FsAction::Created)
        .collect();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].path, "a.txt");
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].path, "b.txt");
    assert_eq!(created[0].content.as_deref(), Some("body"));
    watcher.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn mutating_ops_should_mark_their_paths() {
    let (watcher, mut rx, _tmp) = started_watcher().await;
    watcher.mkdir("folder").await.unwrap();
    watcher.write_text("folder/a.txt", "1").await.unwrap();
    watcher.rename("folder/a.txt", "folder/b.txt").await.unwrap();
    watcher.delete("folder/b.txt").await.unwrap();

    assert!(
        next_batch(&mut rx, 1_000).await.is_none(),
        "the watcher's own operations must all be suppressed"
    );
    watcher.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn scan_should_filter_and_put_directories_first() {
    setup_config();
    let tmp = tempfile::tempdir().unwrap();
    let watcher = WorkspaceWatcher::new(tmp.path().join("canvas"));
    watcher.ensure_workspace().await.unwrap();
    let root = watcher.root();
    std::fs::create_dir_all(root.join("folder")).unwrap();
    std::fs::write(root.join("folder/a.txt"), "a").unwrap();
    std::fs::write(root.join("note.txt"), "n").unwrap();
    std::fs::write(root.join(".canvas.json"), "{}").unwrap();
    std::fs::write(root.join(".hidden"), "h").unwrap();
    std::fs::write(root.join("pic_annotated.png"), "p").unwrap();

    let files = watcher.scan_workspace().await;
    let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["folder", "folder/a.txt", "note.txt"]);
    assert!(files[0].is_directory);
    assert_eq!(files[1].content.as_deref(), Some("a"));
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_should_silence_the_stream() {
    let (watcher, mut rx, _tmp) = started_watcher().await;
    watcher.stop();
    tokio::time::sleep(Duration::from_millis(100)).await;

    std::fs::write(watcher.root().join("late.txt"), "x").unwrap();
    assert!(next_batch(&mut rx, 1_000).await.is_none());
}
