use crate::path_map::{KnownMeta, PathMap};
use crate::shape::ShapeId;

fn sid(s: &str) -> ShapeId {
    ShapeId::from(s)
}

#[test]
fn assign_should_maintain_bijection() {
    let mut map = PathMap::new();
    map.assign(sid("shape:a"), "a.txt".to_string()).unwrap();
    map.assign(sid("shape:b"), "b.txt".to_string()).unwrap();

    assert_eq!(map.path_for(&sid("shape:a")), Some("a.txt"));
    assert_eq!(map.shape_for("b.txt"), Some(&sid("shape:b")));

    // A second shape claiming a taken path is refused outright
    assert!(map.assign(sid("shape:c"), "a.txt".to_string()).is_err());
    assert_eq!(map.shape_for("a.txt"), Some(&sid("shape:a")));
}

#[test]
fn reassign_should_move_the_shape() {
    let mut map = PathMap::new();
    map.assign(sid("shape:a"), "a.txt".to_string()).unwrap();
    map.assign(sid("shape:a"), "b.txt".to_string()).unwrap();

    assert_eq!(map.path_for(&sid("shape:a")), Some("b.txt"));
    assert_eq!(map.shape_for("a.txt"), None);
    assert_eq!(map.len(), 1);
}

#[test]
fn forget_should_clear_both_directions() {
    let mut map = PathMap::new();
    map.assign(sid("shape:a"), "a.txt".to_string()).unwrap();
    map.forget(&sid("shape:a"));
    assert!(map.is_empty());
    // Forgetting an unknown shape is fine
    map.forget(&sid("shape:zzz"));
}

#[test]
fn rename_should_update_both_maps() {
    let mut map = PathMap::new();
    map.assign(sid("shape:a"), "old.txt".to_string()).unwrap();
    map.rename("old.txt", "new.txt".to_string());

    assert_eq!(map.path_for(&sid("shape:a")), Some("new.txt"));
    assert_eq!(map.shape_for("old.txt"), None);
    assert_eq!(map.shape_for("new.txt"), Some(&sid("shape:a")));
}

#[test]
fn frame_renamed_should_cascade_consistently() {
    let mut map = PathMap::new();
    map.assign(sid("shape:f"), "folder".to_string()).unwrap();
    map.assign(sid("shape:a"), "folder/a.txt".to_string())
        .unwrap();
    map.assign(sid("shape:b"), "folder/b.txt".to_string())
        .unwrap();
    map.assign(sid("shape:x"), "other/x.txt".to_string())
        .unwrap();
    map.record_known("folder".to_string(), KnownMeta::default());
    map.record_known("folder/a.txt".to_string(), KnownMeta::default());

    map.rename("folder", "stuff".to_string());
    map.frame_renamed("folder", "stuff");

    assert_eq!(map.path_for(&sid("shape:a")), Some("stuff/a.txt"));
    assert_eq!(map.path_for(&sid("shape:b")), Some("stuff/b.txt"));
    // Unrelated paths untouched
    assert_eq!(map.path_for(&sid("shape:x")), Some("other/x.txt"));
    // Known set carried along
    assert!(map.is_known("stuff/a.txt"));
    assert!(!map.is_known("folder/a.txt"));
}

#[test]
fn ensure_unique_should_count_up_preserving_directory() {
    let mut map = PathMap::new();
    assert_eq!(map.ensure_unique_path("foo.txt", None), "foo.txt");

    map.assign(sid("shape:a"), "foo.txt".to_string()).unwrap();
    assert_eq!(map.ensure_unique_path("foo.txt", None), "foo-1.txt");

    map.assign(sid("shape:b"), "foo-1.txt".to_string()).unwrap();
    assert_eq!(map.ensure_unique_path("foo.txt", None), "foo-2.txt");

    map.assign(sid("shape:c"), "dir/foo.txt".to_string())
        .unwrap();
    assert_eq!(map.ensure_unique_path("dir/foo.txt", None), "dir/foo-1.txt");

    // Extensionless paths (directories) count up too
    map.assign(sid("shape:d"), "folder".to_string()).unwrap();
    assert_eq!(map.ensure_unique_path("folder", None), "folder-1");
}

#[test]
fn ensure_unique_should_consider_known_paths() {
    let mut map = PathMap::new();
    map.record_known("foo.txt".to_string(), KnownMeta::default());
    assert_eq!(map.ensure_unique_path("foo.txt", None), "foo-1.txt");
}

#[test]
fn reserved_path_should_not_dedupe_against_itself() {
    let mut map = PathMap::new();
    map.assign(sid("shape:a"), "foo.txt".to_string()).unwrap();
    map.record_known("foo.txt".to_string(), KnownMeta::default());
    // A shape renaming onto its own current path shouldn't shift to foo-1
    assert_eq!(
        map.ensure_unique_path("foo.txt", Some("foo.txt")),
        "foo.txt"
    );
}

#[test]
fn import_should_drop_entries_that_break_the_bijection() {
    let mut map = PathMap::new();
    let mut table = std::collections::HashMap::new();
    table.insert(sid("shape:a"), "same.txt".to_string());
    table.insert(sid("shape:b"), "same.txt".to_string());
    table.insert(sid("shape:c"), "other.txt".to_string());
    map.import(table);

    assert_eq!(map.len(), 2);
    assert_eq!(map.path_for(&sid("shape:c")), Some("other.txt"));
    // Deterministic survivor: lowest shape id wins
    assert_eq!(map.shape_for("same.txt"), Some(&sid("shape:a")));
}
