use crate::session::LocalSession;
use crate::shape::{ShapeId, ShapeRecord, ShapeType};
use crate::tests::setup_config;
use std::time::Duration;

fn shapes_of(session: &LocalSession, ty: ShapeType) -> Vec<ShapeRecord> {
    session.store.lock().shapes_of_type(&ty).cloned().collect()
}

fn only_shape(session: &LocalSession, ty: ShapeType) -> ShapeRecord {
    let shapes = shapes_of(session, ty.clone());
    assert_eq!(shapes.len(), 1, "expected exactly one {ty:?} shape");
    shapes.into_iter().next().unwrap()
}

/// Scenario: the user creates a text shape named `hello` with body `world`; the workspace gains
/// `hello.txt`, the sentinel updates, and nothing echoes back into a duplicate.
#[tokio::test(flavor = "multi_thread")]
async fn text_create_from_canvas_should_reach_disk() {
    setup_config();
    let tmp = tempfile::tempdir().unwrap();
    let mut session = LocalSession::start(tmp.path().join("canvas"))
        .await
        .unwrap();

    session.user_transact(|txn| {
        let mut shape = ShapeRecord::new(ShapeId::from("shape:hello"), ShapeType::NamedText);
        shape.props.name = Some("hello".to_string());
        shape.props.text = Some("world".to_string());
        txn.put_shape(shape);
    });
    session.run_for(Duration::from_millis(1_500)).await;

    let on_disk = std::fs::read_to_string(session.watcher.root().join("hello.txt")).unwrap();
    assert_eq!(on_disk, "world");
    assert_eq!(
        session
            .controller
            .path_map()
            .path_for(&ShapeId::from("shape:hello")),
        Some("hello.txt")
    );
    // Snapshot persisted after the debounce
    assert!(session.watcher.root().join(".canvas.json").exists());
    // The write we provoked was suppressed: still exactly one shape
    assert_eq!(shapes_of(&session, ShapeType::NamedText).len(), 1);
    session.shutdown();
}

/// Scenario: an agent overwrites a mapped file; the shape's text follows the disk without any
/// forward re-emission (the file keeps the agent's bytes).
#[tokio::test(flavor = "multi_thread")]
async fn fs_modify_should_update_the_shape() {
    setup_config();
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("canvas");
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(root.join("note.txt"), "a").unwrap();

    let mut session = LocalSession::start(root.clone()).await.unwrap();
    let shape = only_shape(&session, ShapeType::NamedText);
    assert_eq!(shape.props.text.as_deref(), Some("a"));

    std::fs::write(root.join("note.txt"), "b").unwrap();
    session.run_for(Duration::from_millis(1_500)).await;

    let updated = only_shape(&session, ShapeType::NamedText);
    assert_eq!(updated.id, shape.id);
    assert_eq!(updated.props.text.as_deref(), Some("b"));
    assert_eq!(std::fs::read_to_string(root.join("note.txt")).unwrap(), "b");
    session.shutdown();
}

/// Scenario: `mv canvas/a.txt canvas/folder/a.txt` at the filesystem layer moves the existing
/// shape into the frame, preserving its identity.
#[tokio::test(flavor = "multi_thread")]
async fn fs_move_should_reparent_the_existing_shape() {
    setup_config();
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("canvas");
    std::fs::create_dir_all(root.join("folder")).unwrap();
    std::fs::write(root.join("a.txt"), "body").unwrap();

    let mut session = LocalSession::start(root.clone()).await.unwrap();
    let text = only_shape(&session, ShapeType::NamedText);
    let frame = only_shape(&session, ShapeType::Frame);
    assert_eq!(text.parent_id, None);

    std::fs::rename(root.join("a.txt"), root.join("folder/a.txt")).unwrap();
    session.run_for(Duration::from_millis(1_500)).await;

    let moved = only_shape(&session, ShapeType::NamedText);
    assert_eq!(moved.id, text.id, "the move must not recreate the shape");
    assert_eq!(moved.parent_id, Some(frame.id));
    assert_eq!(
        session.controller.path_map().path_for(&moved.id),
        Some("folder/a.txt")
    );
    session.shutdown();
}

/// Discarding the client and reconstructing from snapshot + files yields an isomorphic canvas.
#[tokio::test(flavor = "multi_thread")]
async fn restart_should_restore_an_isomorphic_canvas() {
    setup_config();
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("canvas");

    let mut session = LocalSession::start(root.clone()).await.unwrap();
    session.user_transact(|txn| {
        let mut shape = ShapeRecord::new(ShapeId::from("shape:hello"), ShapeType::NamedText);
        shape.props.name = Some("hello".to_string());
        shape.props.text = Some("world".to_string());
        txn.put_shape(shape);
    });
    session.run_for(Duration::from_millis(1_500)).await;
    session.shutdown();
    drop(session);

    let mut revived = LocalSession::start(root).await.unwrap();
    revived.run_for(Duration::from_millis(500)).await;

    let shape = only_shape(&revived, ShapeType::NamedText);
    assert_eq!(shape.id, ShapeId::from("shape:hello"));
    assert_eq!(shape.props.name.as_deref(), Some("hello"));
    assert_eq!(shape.props.text.as_deref(), Some("world"));
    assert_eq!(
        revived.controller.path_map().path_for(&shape.id),
        Some("hello.txt")
    );
    revived.shutdown();
}

/// Duplicate desired names dedupe on disk and the second shape's display name follows.
#[tokio::test(flavor = "multi_thread")]
async fn duplicate_names_should_land_as_deduped_files() {
    setup_config();
    let tmp = tempfile::tempdir().unwrap();
    let mut session = LocalSession::start(tmp.path().join("canvas"))
        .await
        .unwrap();

    session.user_transact(|txn| {
        let mut shape = ShapeRecord::new(ShapeId::from("shape:one"), ShapeType::NamedText);
        shape.props.name = Some("hello".to_string());
        shape.props.text = Some("first".to_string());
        txn.put_shape(shape);
    });
    session.drain().await;
    session.user_transact(|txn| {
        let mut shape = ShapeRecord::new(ShapeId::from("shape:two"), ShapeType::NamedText);
        shape.props.name = Some("hello".to_string());
        shape.props.text = Some("second".to_string());
        txn.put_shape(shape);
    });
    session.run_for(Duration::from_millis(800)).await;

    let root = session.watcher.root();
    assert_eq!(
        std::fs::read_to_string(root.join("hello.txt")).unwrap(),
        "first"
    );
    assert_eq!(
        std::fs::read_to_string(root.join("hello-1.txt")).unwrap(),
        "second"
    );
    let store = session.store.lock();
    assert_eq!(
        store
            .shape(&ShapeId::from("shape:two"))
            .unwrap()
            .props
            .name
            .as_deref(),
        Some("hello-1")
    );
    drop(store);
    session.shutdown();
}
