use crate::path_map::{KnownMeta, PathMap};
use crate::reverse::detect_moves;
use crate::shape::ShapeId;
use crate::tests::{fs_created, fs_deleted, fs_dir_created};

fn mapped(entries: &[(&str, &str)]) -> PathMap {
    let mut map = PathMap::new();
    for (shape, path) in entries {
        map.assign(ShapeId::from(*shape), path.to_string()).unwrap();
        map.record_known(path.to_string(), KnownMeta::default());
    }
    map
}

#[test]
fn tier1_should_pair_same_basename_across_directories() {
    let map = mapped(&[("shape:a", "a.txt")]);
    let mut deletes = vec![fs_deleted("a.txt", false)];
    let mut creates = vec![fs_created("folder/a.txt", "hello")];

    let pairs = detect_moves(&mut deletes, &mut creates, &map);

    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].from.path, "a.txt");
    assert_eq!(pairs[0].to.path, "folder/a.txt");
    assert!(deletes.is_empty());
    assert!(creates.is_empty());
}

#[test]
fn tier1_should_not_pair_within_the_same_directory() {
    let map = mapped(&[("shape:a", "a.txt")]);
    let mut deletes = vec![fs_deleted("a.txt", false)];
    let mut creates = vec![fs_created("a.txt", "hello")];

    let pairs = detect_moves(&mut deletes, &mut creates, &map);
    assert!(pairs.is_empty());
    assert_eq!(deletes.len(), 1);
    assert_eq!(creates.len(), 1);
}

#[test]
fn tier1_should_be_greedy_first_match() {
    let map = mapped(&[("shape:a", "x/a.txt"), ("shape:b", "y/a.txt")]);
    let mut deletes = vec![fs_deleted("x/a.txt", false), fs_deleted("y/a.txt", false)];
    let mut creates = vec![fs_created("z/a.txt", "1")];

    let pairs = detect_moves(&mut deletes, &mut creates, &map);
    // Each create may match at most one delete; the first delete in order wins
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].from.path, "x/a.txt");
    assert_eq!(deletes, vec![fs_deleted("y/a.txt", false)]);
}

#[test]
fn tier2_should_pair_on_equal_content() {
    let mut map = mapped(&[("shape:a", "old.txt")]);
    map.record_known(
        "old.txt".to_string(),
        KnownMeta {
            content: Some("same body".to_string()),
            ..KnownMeta::default()
        },
    );
    let mut deletes = vec![fs_deleted("old.txt", false)];
    let mut creates = vec![fs_created("renamed.txt", "same body")];

    let pairs = detect_moves(&mut deletes, &mut creates, &map);
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].to.path, "renamed.txt");
}

#[test]
fn tier2_should_pair_on_size_and_mtime() {
    let mut map = mapped(&[("shape:a", "old.png")]);
    map.record_known(
        "old.png".to_string(),
        KnownMeta {
            size: Some(5),
            mtime_ms: Some(1_000),
            ..KnownMeta::default()
        },
    );
    let mut deletes = vec![fs_deleted("old.png", false)];
    // `fs_created` stamps size = len, mtime = 1000
    let mut creates = vec![fs_created("fresh.png", "12345")];

    let pairs = detect_moves(&mut deletes, &mut creates, &map);
    assert_eq!(pairs.len(), 1);
}

#[test]
fn tier2_should_reject_ambiguous_matches() {
    let mut map = mapped(&[("shape:a", "old.txt")]);
    map.record_known(
        "old.txt".to_string(),
        KnownMeta {
            content: Some("same".to_string()),
            ..KnownMeta::default()
        },
    );
    let mut deletes = vec![fs_deleted("old.txt", false)];
    let mut creates = vec![
        fs_created("one.txt", "same"),
        fs_created("two.txt", "same"),
    ];

    let pairs = detect_moves(&mut deletes, &mut creates, &map);
    assert!(pairs.is_empty());
    assert_eq!(creates.len(), 2);
}

#[test]
fn tier2_should_require_matching_extension() {
    let mut map = mapped(&[("shape:a", "old.txt")]);
    map.record_known(
        "old.txt".to_string(),
        KnownMeta {
            content: Some("same".to_string()),
            ..KnownMeta::default()
        },
    );
    let mut deletes = vec![fs_deleted("old.txt", false)];
    let mut creates = vec![fs_created("new.md", "same")];

    let pairs = detect_moves(&mut deletes, &mut creates, &map);
    assert!(pairs.is_empty());
}

#[test]
fn directories_should_never_participate() {
    let map = mapped(&[("shape:f", "folder")]);
    let mut deletes = vec![fs_deleted("folder", true)];
    let mut creates = vec![fs_dir_created("elsewhere/folder")];

    let pairs = detect_moves(&mut deletes, &mut creates, &map);
    assert!(pairs.is_empty());
}

#[test]
fn unmapped_deletes_should_never_pair() {
    let map = PathMap::new();
    let mut deletes = vec![fs_deleted("a.txt", false)];
    let mut creates = vec![fs_created("folder/a.txt", "hello")];

    let pairs = detect_moves(&mut deletes, &mut creates, &map);
    assert!(pairs.is_empty());
}
