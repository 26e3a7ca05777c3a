use crate::images::display_size;
use crate::shape::*;

#[test]
fn extensions_should_classify_paths() {
    assert!(is_text_path("note.txt"));
    assert!(is_text_path("folder/readme.md"));
    assert!(!is_text_path("pic.png"));
    assert!(is_image_path("pic.png"));
    assert!(is_image_path("folder/photo.JPEG"));
    assert!(!is_image_path("archive.tar"));
    // Dotfiles have no extension
    assert!(!is_text_path(".hidden"));
}

#[test]
fn kind_for_path_should_respect_the_one_level_rule() {
    assert_eq!(kind_for_path("folder", true), Some(ShapeKind::Frame));
    assert_eq!(kind_for_path("a/b", true), None);
    assert_eq!(kind_for_path("note.txt", false), Some(ShapeKind::NamedText));
    assert_eq!(
        kind_for_path("folder/note.txt", false),
        Some(ShapeKind::NamedText)
    );
    assert_eq!(kind_for_path("a/b/too-deep.txt", false), None);
    assert_eq!(kind_for_path("pic.webp", false), Some(ShapeKind::Image));
    assert_eq!(kind_for_path("data.json", false), None);
}

#[test]
fn name_and_path_conversions_should_round_trip() {
    assert_eq!(name_to_txt("foo", None), "foo.txt");
    assert_eq!(name_to_txt("foo", Some("frame")), "frame/foo.txt");
    assert_eq!(path_to_name("frame/foo.txt"), "foo");
    assert_eq!(path_to_name("foo.txt"), "foo");
}

#[test]
fn annotated_paths_should_be_reserved() {
    assert_eq!(annotated_path("pic.png"), "pic_annotated.png");
    assert_eq!(annotated_path("folder/pic.jpeg"), "folder/pic_annotated.png");
    assert!(is_annotated_path("pic_annotated.png"));
    assert!(is_annotated_path("folder/pic_annotated.png"));
    assert!(!is_annotated_path("pic.png"));
    assert!(!is_annotated_path("annotated.txt"));
}

#[test]
fn prompt_paths_should_follow_the_conventions() {
    assert_eq!(prompt_path_for_image("shot.png"), "shot-prompt.txt");
    assert_eq!(
        prompt_path_for_image("folder/shot.webp"),
        "folder/shot-prompt.txt"
    );
    let stamped = timestamped_prompt_path();
    assert!(stamped.starts_with("prompt-"));
    assert!(stamped.ends_with(".txt"));
    // Filename-safe: no colons from the timestamp
    assert!(!stamped.contains(':'));
}

#[test]
fn hidden_paths_should_be_detected_at_any_segment() {
    assert!(is_hidden(".git"));
    assert!(is_hidden("folder/.DS_Store"));
    assert!(!is_hidden("folder/file.txt"));
}

#[test]
fn display_size_should_clamp_preserving_aspect() {
    assert_eq!(display_size(100.0, 50.0), (100.0, 50.0));
    assert_eq!(display_size(960.0, 480.0), (480.0, 240.0));
    assert_eq!(display_size(480.0, 960.0), (240.0, 480.0));
    assert_eq!(display_size(480.0, 480.0), (480.0, 480.0));
}

#[test]
fn rects_should_intersect_and_union() {
    let a = Rect {
        x: 0.0,
        y: 0.0,
        w: 10.0,
        h: 10.0,
    };
    let b = Rect {
        x: 5.0,
        y: 5.0,
        w: 10.0,
        h: 10.0,
    };
    let c = Rect {
        x: 20.0,
        y: 20.0,
        w: 5.0,
        h: 5.0,
    };
    assert!(a.intersects(&b));
    assert!(!a.intersects(&c));
    let u = a.union(&c);
    assert_eq!((u.x, u.y, u.w, u.h), (0.0, 0.0, 25.0, 25.0));
}
