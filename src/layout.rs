use crate::{
    controller::{SyncController, ORGANIZE_MS},
    shape::{
        Rect, ShapeId, ShapeType, FRAME_GRID_COLS, FRAME_HEADER_OFFSET, FRAME_INNER_PADDING,
        SHAPE_SPACING,
    },
    store::{CanvasStore, Source},
};
use tracing::info;

/// Chooses a position for a new top-level shape: the first non-overlapping spot on a row to the
/// right of the viewport-visible cluster, at the top y-coordinate of the visible shapes. On an
/// empty canvas the shape is centered on the current viewport.
///
/// `extra` carries page-space rectangles already promised to other shapes in the same batch but
/// not yet committed to the store.
pub fn place_root_avoiding(store: &CanvasStore, size: (f64, f64), extra: &[Rect]) -> (f64, f64) {
    let (w, h) = size;
    let mut occupied: Vec<Rect> = store.top_level().map(|s| s.bounds()).collect();
    occupied.extend_from_slice(extra);

    if occupied.is_empty() {
        let cam = store.camera();
        return (cam.x + (cam.w - w) / 2.0, cam.y + (cam.h - h) / 2.0);
    }

    let cam = store.camera();
    let visible: Vec<&Rect> = occupied.iter().filter(|r| r.intersects(&cam)).collect();
    let cluster: Vec<&Rect> = if visible.is_empty() {
        occupied.iter().collect()
    } else {
        visible
    };

    let top_y = cluster.iter().map(|r| r.y).fold(f64::INFINITY, f64::min);
    let right = cluster
        .iter()
        .map(|r| r.x + r.w)
        .fold(f64::NEG_INFINITY, f64::max);

    let mut x = right + SHAPE_SPACING;
    for _ in 0..50 {
        let candidate = Rect { x, y: top_y, w, h };
        if !occupied.iter().any(|r| r.intersects(&candidate)) {
            return (x, top_y);
        }
        x += SHAPE_SPACING;
    }
    // Out of patience: the last candidate scanned is as good a spot as any
    (x, top_y)
}

pub fn place_root(store: &CanvasStore, size: (f64, f64)) -> (f64, f64) {
    place_root_avoiding(store, size, &[])
}

/// Chooses a position for a new child inside a frame: a grid of at most
/// [`FRAME_GRID_COLS`] cells per row, cell size derived from the largest child, first empty
/// cell wins. `extra` carries frame-local rectangles promised in the same batch.
pub fn place_in_frame(
    store: &CanvasStore,
    frame: &ShapeId,
    size: (f64, f64),
    extra: &[Rect],
) -> (f64, f64) {
    let (w, h) = size;
    let mut children: Vec<Rect> = store.children_of(frame).map(|s| s.bounds()).collect();
    children.extend_from_slice(extra);

    let cell_w = children
        .iter()
        .map(|r| r.w)
        .fold(w, f64::max)
        + SHAPE_SPACING;
    let cell_h = children
        .iter()
        .map(|r| r.h)
        .fold(h, f64::max)
        + SHAPE_SPACING;

    for probe in 0..100 {
        let col = probe % FRAME_GRID_COLS;
        let row = probe / FRAME_GRID_COLS;
        let x = FRAME_INNER_PADDING + col as f64 * cell_w;
        let y = FRAME_HEADER_OFFSET + row as f64 * cell_h;
        let candidate = Rect { x, y, w, h };
        if !children.iter().any(|r| r.intersects(&candidate)) {
            return (x, y);
        }
    }
    // Append a fresh row below everything
    let bottom = children
        .iter()
        .map(|r| r.y + r.h)
        .fold(FRAME_HEADER_OFFSET, f64::max);
    (FRAME_INNER_PADDING, bottom + SHAPE_SPACING)
}

/// Sort priority at the top level: frames, then text, then images.
fn top_priority(ty: &ShapeType) -> u8 {
    match ty {
        ShapeType::Frame => 0,
        ShapeType::NamedText => 1,
        ShapeType::Image => 2,
        _ => 3,
    }
}
/// Sort priority inside a frame: text before image (frames contain no frames).
fn frame_priority(ty: &ShapeType) -> u8 {
    match ty {
        ShapeType::NamedText => 0,
        ShapeType::Image => 1,
        _ => 2,
    }
}

impl SyncController {
    /// Rearranges the whole canvas: children grid-sorted within each frame, top-level shapes
    /// sorted frame > text > image then by name and packed into rows around three median item
    /// widths. The transition animates, then the viewport zooms to fit.
    #[tracing::instrument(skip_all)]
    pub fn organize(&mut self) {
        let mut store = self.store.lock();

        // Inside each frame: grid-sort by type priority then name
        let frames: Vec<ShapeId> = store
            .shapes_of_type(&ShapeType::Frame)
            .map(|f| f.id.clone())
            .collect();
        let mut frame_moves: Vec<(ShapeId, f64, f64)> = Vec::new();
        for frame in &frames {
            let mut children: Vec<(ShapeId, ShapeType, String, f64, f64)> = store
                .children_of(frame)
                .map(|c| {
                    let (w, h) = c.size();
                    (
                        c.id.clone(),
                        c.ty.clone(),
                        c.props.name.clone().unwrap_or_default(),
                        w,
                        h,
                    )
                })
                .collect();
            if children.is_empty() {
                continue;
            }
            children.sort_by(|a, b| {
                frame_priority(&a.1)
                    .cmp(&frame_priority(&b.1))
                    .then_with(|| a.2.cmp(&b.2))
            });
            let cell_w = children.iter().map(|c| c.3).fold(0.0, f64::max) + SHAPE_SPACING;
            let cell_h = children.iter().map(|c| c.4).fold(0.0, f64::max) + SHAPE_SPACING;
            for (idx, (id, _, _, _, _)) in children.iter().enumerate() {
                let col = idx % FRAME_GRID_COLS;
                let row = idx / FRAME_GRID_COLS;
                frame_moves.push((
                    id.clone(),
                    FRAME_INNER_PADDING + col as f64 * cell_w,
                    FRAME_HEADER_OFFSET + row as f64 * cell_h,
                ));
            }
        }

        // Top level: frame > text > image, then alphabetical, packed greedily into rows
        let mut items: Vec<(ShapeId, ShapeType, String, f64, f64)> = store
            .top_level()
            .filter(|s| s.ty.file_kind().is_some())
            .map(|s| {
                let (w, h) = s.size();
                (
                    s.id.clone(),
                    s.ty.clone(),
                    s.props.name.clone().unwrap_or_default(),
                    w,
                    h,
                )
            })
            .collect();
        let mut top_moves: Vec<(ShapeId, f64, f64)> = Vec::new();
        if !items.is_empty() {
            items.sort_by(|a, b| {
                top_priority(&a.1)
                    .cmp(&top_priority(&b.1))
                    .then_with(|| a.2.cmp(&b.2))
            });
            let mut widths: Vec<f64> = items.iter().map(|i| i.3).collect();
            widths.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let median = widths[widths.len() / 2];
            let target_width = 3.0 * median;

            // Anchor the arrangement at the cluster's current top-left corner
            let origin = store
                .top_level()
                .map(|s| s.bounds())
                .reduce(|a, b| a.union(&b))
                .map(|r| (r.x, r.y))
                .unwrap_or((0.0, 0.0));

            let mut x = origin.0;
            let mut y = origin.1;
            let mut row_h = 0.0f64;
            for (id, _, _, w, h) in &items {
                if x > origin.0 && x - origin.0 + w > target_width {
                    x = origin.0;
                    y += row_h + SHAPE_SPACING;
                    row_h = 0.0;
                }
                top_moves.push((id.clone(), x, y));
                x += w + SHAPE_SPACING;
                row_h = row_h.max(*h);
            }
        }

        if frame_moves.is_empty() && top_moves.is_empty() {
            return;
        }
        info!(
            "organizing canvas: {} top-level moves, {} in-frame moves",
            top_moves.len(),
            frame_moves.len()
        );
        store.transact(Source::Remote, |txn| {
            for (id, x, y) in frame_moves.iter().chain(top_moves.iter()) {
                txn.update_shape(id, |s| {
                    s.x = *x;
                    s.y = *y;
                });
            }
        });
        drop(store);
        self.schedule_zoom_to_fit(ORGANIZE_MS);
        self.schedule_snapshot();
    }
}
