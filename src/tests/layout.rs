use crate::layout::{place_in_frame, place_root, place_root_avoiding};
use crate::shape::{
    Rect, ShapeId, ShapeRecord, ShapeType, FRAME_HEADER_OFFSET, FRAME_INNER_PADDING, SHAPE_SPACING,
};
use crate::store::{CanvasStore, Source};

fn add_shape(store: &mut CanvasStore, id: &str, ty: ShapeType, x: f64, y: f64, w: f64, h: f64) {
    let mut shape = ShapeRecord::new(ShapeId::from(id), ty);
    shape.x = x;
    shape.y = y;
    shape.props.w = w;
    shape.props.h = h;
    store.transact(Source::Remote, |txn| txn.put_shape(shape));
}

fn add_child(store: &mut CanvasStore, id: &str, parent: &str, x: f64, y: f64, w: f64, h: f64) {
    let mut shape = ShapeRecord::new(ShapeId::from(id), ShapeType::NamedText);
    shape.parent_id = Some(ShapeId::from(parent));
    shape.x = x;
    shape.y = y;
    shape.props.w = w;
    shape.props.h = h;
    store.transact(Source::Remote, |txn| txn.put_shape(shape));
}

#[test]
fn empty_canvas_should_center_on_viewport() {
    let store = CanvasStore::new();
    let cam = store.camera();
    let (x, y) = place_root(&store, (200.0, 100.0));
    assert_eq!(x, cam.x + (cam.w - 200.0) / 2.0);
    assert_eq!(y, cam.y + (cam.h - 100.0) / 2.0);
}

#[test]
fn root_placement_should_go_right_of_the_visible_cluster() {
    let mut store = CanvasStore::new();
    add_shape(&mut store, "shape:a", ShapeType::NamedText, 0.0, 50.0, 200.0, 200.0);
    add_shape(&mut store, "shape:b", ShapeType::NamedText, 220.0, 10.0, 200.0, 200.0);

    let (x, y) = place_root(&store, (200.0, 200.0));
    // To the right of the rightmost visible shape, at the top y of the cluster
    assert_eq!(x, 420.0 + SHAPE_SPACING);
    assert_eq!(y, 10.0);
}

#[test]
fn root_placement_should_avoid_batch_reservations() {
    let mut store = CanvasStore::new();
    add_shape(&mut store, "shape:a", ShapeType::NamedText, 0.0, 0.0, 200.0, 200.0);
    let reserved = Rect {
        x: 220.0,
        y: 0.0,
        w: 200.0,
        h: 200.0,
    };
    let (x, y) = place_root_avoiding(&store, (200.0, 200.0), &[reserved]);
    assert!(x >= 420.0);
    assert_eq!(y, 0.0);
}

#[test]
fn shapes_outside_the_viewport_should_not_anchor_placement() {
    let mut store = CanvasStore::new();
    store.set_camera(Rect {
        x: 0.0,
        y: 0.0,
        w: 1280.0,
        h: 720.0,
    });
    // Far off-screen shape; the visible one should anchor the row
    add_shape(
        &mut store,
        "shape:far",
        ShapeType::NamedText,
        10_000.0,
        10_000.0,
        200.0,
        200.0,
    );
    add_shape(&mut store, "shape:near", ShapeType::NamedText, 0.0, 0.0, 200.0, 200.0);

    let (x, y) = place_root(&store, (200.0, 200.0));
    assert_eq!(x, 200.0 + SHAPE_SPACING);
    assert_eq!(y, 0.0);
}

#[test]
fn first_frame_child_should_start_at_the_grid_origin() {
    let mut store = CanvasStore::new();
    add_shape(&mut store, "shape:f", ShapeType::Frame, 0.0, 0.0, 320.0, 200.0);

    let (x, y) = place_in_frame(&store, &ShapeId::from("shape:f"), (100.0, 80.0), &[]);
    assert_eq!(x, FRAME_INNER_PADDING);
    assert_eq!(y, FRAME_HEADER_OFFSET);
}

#[test]
fn frame_grid_should_fill_rows_of_five() {
    let mut store = CanvasStore::new();
    add_shape(&mut store, "shape:f", ShapeType::Frame, 0.0, 0.0, 2000.0, 2000.0);
    let frame = ShapeId::from("shape:f");
    let cell = 100.0 + SHAPE_SPACING;

    for i in 0..5 {
        let (x, y) = place_in_frame(&store, &frame, (100.0, 100.0), &[]);
        assert_eq!(x, FRAME_INNER_PADDING + i as f64 * cell);
        assert_eq!(y, FRAME_HEADER_OFFSET);
        add_child(
            &mut store,
            &format!("shape:c{i}"),
            "shape:f",
            x,
            y,
            100.0,
            100.0,
        );
    }

    // The sixth child wraps to the second row
    let (x, y) = place_in_frame(&store, &frame, (100.0, 100.0), &[]);
    assert_eq!(x, FRAME_INNER_PADDING);
    assert_eq!(y, FRAME_HEADER_OFFSET + cell);
}

#[test]
fn frame_cell_size_should_track_the_largest_child() {
    let mut store = CanvasStore::new();
    add_shape(&mut store, "shape:f", ShapeType::Frame, 0.0, 0.0, 2000.0, 2000.0);
    add_child(
        &mut store,
        "shape:big",
        "shape:f",
        FRAME_INNER_PADDING,
        FRAME_HEADER_OFFSET,
        300.0,
        250.0,
    );

    let (x, y) = place_in_frame(&store, &ShapeId::from("shape:f"), (100.0, 100.0), &[]);
    assert_eq!(x, FRAME_INNER_PADDING + 300.0 + SHAPE_SPACING);
    assert_eq!(y, FRAME_HEADER_OFFSET);
}
