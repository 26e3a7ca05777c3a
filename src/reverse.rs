use crate::{
    controller::{SyncController, TimerAction, DELETE_FINALIZE_MS, FADE_IN_MS, ZOOM_DELAY_MS},
    images,
    layout,
    path_map::{KnownMeta, PathMap},
    protocol::{ClientMessage, FsAction, FsEvent},
    shape::{
        basename, extension, is_annotated_path, is_image_path, kind_for_path, parent_dir,
        path_to_name, Rect, ShapeId, ShapeKind, ShapeRecord, ShapeType, DEFAULT_FRAME_HEIGHT,
        DEFAULT_FRAME_WIDTH, DEFAULT_TEXT_HEIGHT, DEFAULT_WIDTH,
    },
    store::Source,
};
use tracing::{debug, info, warn};

/// A delete/create pair the move detector has decided are the same file changing address.
#[derive(Debug)]
pub(crate) struct MovePair {
    pub from: FsEvent,
    pub to: FsEvent,
}

/// Pairs deletions with creations that look like the two halves of a move, consuming both from
/// the batch. Requires an existing mapping for the deleted path; directories never participate.
///
/// Tier 1 pairs on identical basename in a different directory (greedy, first match). Tier 2
/// pairs on matching metadata: same extension, unclaimed target path, and either equal text
/// content or equal size plus mtime; an ambiguous tier-2 match (several candidate creations)
/// rejects pairing for that deletion.
pub(crate) fn detect_moves(
    deletes: &mut Vec<FsEvent>,
    creates: &mut Vec<FsEvent>,
    map: &PathMap,
) -> Vec<MovePair> {
    let mut pairs = Vec::new();
    let mut used_creates = vec![false; creates.len()];
    let mut used_deletes = vec![false; deletes.len()];

    // Tier 1: filename match
    for (di, del) in deletes.iter().enumerate() {
        if del.is_directory || !map.contains_path(&del.path) {
            continue;
        }
        for (ci, create) in creates.iter().enumerate() {
            if used_creates[ci] || create.is_directory || map.contains_path(&create.path) {
                continue;
            }
            if basename(&create.path) == basename(&del.path)
                && parent_dir(&create.path) != parent_dir(&del.path)
            {
                used_creates[ci] = true;
                used_deletes[di] = true;
                pairs.push(MovePair {
                    from: del.clone(),
                    to: create.clone(),
                });
                break;
            }
        }
    }

    // Tier 2: metadata match against what we knew about the deleted path
    for (di, del) in deletes.iter().enumerate() {
        if used_deletes[di] || del.is_directory || !map.contains_path(&del.path) {
            continue;
        }
        let Some(meta) = map.known_meta(&del.path) else {
            continue;
        };
        let del_ext = extension(&del.path);
        let candidates: Vec<usize> = creates
            .iter()
            .enumerate()
            .filter(|(ci, create)| {
                !used_creates[*ci]
                    && !create.is_directory
                    && !map.contains_path(&create.path)
                    && extension(&create.path) == del_ext
                    && metadata_matches(meta, create)
            })
            .map(|(ci, _)| ci)
            .collect();
        // Ambiguity rejects: we'd rather create a duplicate than move the wrong shape
        if let [ci] = candidates[..] {
            used_creates[ci] = true;
            used_deletes[di] = true;
            pairs.push(MovePair {
                from: del.clone(),
                to: creates[ci].clone(),
            });
        }
    }

    let mut ci = 0;
    creates.retain(|_| {
        let keep = !used_creates[ci];
        ci += 1;
        keep
    });
    let mut di = 0;
    deletes.retain(|_| {
        let keep = !used_deletes[di];
        di += 1;
        keep
    });
    pairs
}

/// Either equal content (when both sides carry it, as for text files) or equal size and mtime.
fn metadata_matches(known: &KnownMeta, create: &FsEvent) -> bool {
    if let (Some(a), Some(b)) = (&known.content, &create.content) {
        if a == b {
            return true;
        }
    }
    known.size.is_some()
        && known.size == create.size
        && known.mtime_ms.is_some()
        && known.mtime_ms == create.mtime_ms
}

impl SyncController {
    /// Applies one batch of filesystem events to the editor. Partitioning and move detection
    /// are atomic within the call; everything the batch does to the store happens in remote
    /// batches, invisible to the forward path.
    #[tracing::instrument(skip_all, fields(n = changes.len()))]
    pub async fn handle_fs_changes(&mut self, changes: Vec<FsEvent>) {
        if self.is_disposed() {
            return;
        }

        // Intake filter: reserved annotation exports are managed internally, and events aimed
        // at shapes mid-deletion have lost their race
        let changes: Vec<FsEvent> = changes
            .into_iter()
            .filter(|c| !is_annotated_path(&c.path))
            .filter(|c| !self.targets_pending_delete(c))
            .collect();
        if changes.is_empty() {
            return;
        }

        let mut creates = Vec::new();
        let mut modifies = Vec::new();
        let mut deletes = Vec::new();
        for change in changes {
            match change.action {
                // A "modification" of a path we've never mapped is a creation from our
                // perspective (the watcher can only classify so much)
                FsAction::Modified if !self.map.contains_path(&change.path) => {
                    creates.push(change)
                }
                FsAction::Created if self.map.contains_path(&change.path) => {
                    modifies.push(change)
                }
                FsAction::Created => creates.push(change),
                FsAction::Modified => modifies.push(change),
                FsAction::Deleted => deletes.push(change),
            }
        }

        let any_dir_change = creates.iter().chain(deletes.iter()).any(|c| c.is_directory);

        // Re-pair deletions and creations that are really moves
        let moves = detect_moves(&mut deletes, &mut creates, &self.map);

        // Annotation exports depend on image bounds, and this batch may change them: an image
        // arriving, moving, growing under a rebind, or disappearing all warrant a recompute
        let annotation_relevant = moves.iter().any(|p| is_image_path(&p.to.path))
            || creates
                .iter()
                .chain(modifies.iter())
                .chain(deletes.iter())
                .any(|c| !c.is_directory && is_image_path(&c.path));

        // Update the known mirror now that pairing has used the old metadata
        for pair in &moves {
            self.map
                .rename_known(&pair.from.path, pair.to.path.clone());
        }
        for event in creates.iter().chain(modifies.iter()) {
            self.map.record_known(
                event.path.clone(),
                KnownMeta {
                    size: event.size,
                    mtime_ms: event.mtime_ms,
                    content: event.content.clone(),
                    is_directory: event.is_directory,
                },
            );
        }
        for event in &deletes {
            self.map.forget_known(&event.path);
        }

        for pair in moves {
            self.apply_move(pair);
        }

        // Split creations by how much work they need: images must decode before they can size
        let (image_creates, sync_creates): (Vec<_>, Vec<_>) = creates
            .into_iter()
            .partition(|c| !c.is_directory && is_image_path(&c.path));

        self.apply_sync_batch(sync_creates, modifies).await;
        self.apply_deletes(deletes);
        if !image_creates.is_empty() {
            self.apply_image_creates(image_creates).await;
        }

        self.schedule_snapshot();
        if annotation_relevant {
            self.schedule_annotation_scan();
        }
        if any_dir_change {
            self.schedule_zoom_to_fit(ZOOM_DELAY_MS);
        }
    }

    /// Moves an existing shape to its new address: reparent, reposition, remap. The shape's
    /// identity is preserved.
    fn apply_move(&mut self, pair: MovePair) {
        let Some(shape_id) = self.map.shape_for(&pair.from.path).cloned() else {
            return;
        };
        if self.map.contains_path(&pair.to.path) {
            warn!(
                "move target '{}' already mapped, leaving '{}' alone",
                pair.to.path, pair.from.path
            );
            return;
        }
        info!("moving '{}' -> '{}'", pair.from.path, pair.to.path);

        let new_parent = self.ensure_frame_for(&pair.to.path);
        let mut store = self.store.lock();
        let size = store
            .shape(&shape_id)
            .map(|s| s.size())
            .unwrap_or((DEFAULT_WIDTH, DEFAULT_TEXT_HEIGHT));
        let (x, y) = match &new_parent {
            Some(frame) => layout::place_in_frame(&store, frame, size, &[]),
            None => layout::place_root(&store, size),
        };
        let new_name = path_to_name(&pair.to.path).to_string();
        store.transact(Source::Remote, |txn| {
            txn.update_shape(&shape_id, |s| {
                s.parent_id = new_parent.clone();
                s.x = x;
                s.y = y;
                if s.ty == ShapeType::NamedText {
                    s.props.name = Some(new_name.clone());
                }
            });
        });
        drop(store);
        // Any export still points at the vacated path; retire it and let the scheduled scan
        // re-export at the new address if the strokes still overlap
        if let Some(change) = self.retire_annotation(&pair.from.path) {
            let _ = self
                .outbound
                .send(ClientMessage::CanvasSync {
                    changes: vec![change],
                });
        }
        self.map.rename(&pair.from.path, pair.to.path);
    }

    /// Applies non-image creations and all modifications inside a single remote batch. New
    /// shapes start transparent and fade in.
    async fn apply_sync_batch(&mut self, creates: Vec<FsEvent>, modifies: Vec<FsEvent>) {
        if creates.is_empty() && modifies.is_empty() {
            return;
        }
        // Directories first, so files landing inside them find their frame
        let mut creates = creates;
        creates.sort_by_key(|c| (!c.is_directory, c.path.clone()));

        let mut created_ids = Vec::new();
        let mut image_rebinds = Vec::new();
        let mut prepared: Vec<(ShapeRecord, String)> = Vec::new();
        // Spots promised within this batch but not yet committed, per coordinate space
        let mut placed_root: Vec<Rect> = Vec::new();
        let mut placed_frames: std::collections::HashMap<ShapeId, Vec<Rect>> =
            std::collections::HashMap::new();

        for event in &creates {
            let Some(kind) = kind_for_path(&event.path, event.is_directory) else {
                continue;
            };
            if self.map.contains_path(&event.path) {
                continue;
            }
            match kind {
                ShapeKind::Frame => {
                    let id = ShapeId::mint();
                    let mut shape = ShapeRecord::new(id, ShapeType::Frame);
                    shape.props.name = Some(event.path.clone());
                    shape.props.w = DEFAULT_FRAME_WIDTH;
                    shape.props.h = DEFAULT_FRAME_HEIGHT;
                    shape.opacity = 0.0;
                    let store = self.store.lock();
                    let (x, y) = layout::place_root_avoiding(&store, shape.size(), &placed_root);
                    drop(store);
                    shape.x = x;
                    shape.y = y;
                    placed_root.push(shape.bounds());
                    prepared.push((shape, event.path.clone()));
                }
                ShapeKind::NamedText => {
                    let parent = self.ensure_frame_for(&event.path);
                    let id = ShapeId::mint();
                    let mut shape = ShapeRecord::new(id, ShapeType::NamedText);
                    shape.props.name = Some(path_to_name(&event.path).to_string());
                    shape.props.text = Some(event.content.clone().unwrap_or_default());
                    shape.props.w = DEFAULT_WIDTH;
                    shape.props.h = DEFAULT_TEXT_HEIGHT;
                    shape.opacity = 0.0;
                    shape.parent_id = parent.clone();
                    let store = self.store.lock();
                    let (x, y) = match &parent {
                        Some(frame) => layout::place_in_frame(
                            &store,
                            frame,
                            shape.size(),
                            placed_frames.get(frame).map(|v| v.as_slice()).unwrap_or(&[]),
                        ),
                        None => layout::place_root_avoiding(&store, shape.size(), &placed_root),
                    };
                    drop(store);
                    shape.x = x;
                    shape.y = y;
                    match &parent {
                        Some(frame) => placed_frames
                            .entry(frame.clone())
                            .or_default()
                            .push(shape.bounds()),
                        None => placed_root.push(shape.bounds()),
                    }
                    prepared.push((shape, event.path.clone()));
                }
                // Image creations are handled asynchronously elsewhere
                ShapeKind::Image => continue,
            }
        }

        let mut text_updates: Vec<(ShapeId, String)> = Vec::new();
        for event in &modifies {
            let Some(shape_id) = self.map.shape_for(&event.path).cloned() else {
                continue;
            };
            let is_image = {
                let store = self.store.lock();
                store
                    .shape(&shape_id)
                    .is_some_and(|s| s.ty == ShapeType::Image)
            };
            if is_image {
                image_rebinds.push((shape_id, event.clone()));
            } else if let Some(content) = &event.content {
                text_updates.push((shape_id, content.clone()));
            }
            // A metadata-only event on a text shape changes nothing we hold
        }

        {
            let mut store = self.store.lock();
            store.transact(Source::Remote, |txn| {
                for (shape, _) in &prepared {
                    txn.put_shape(shape.clone());
                }
                for (id, content) in &text_updates {
                    txn.update_shape(id, |s| s.props.text = Some(content.clone()));
                }
            });
        }
        for (shape, path) in prepared {
            created_ids.push(shape.id.clone());
            if let Err(err) = self.map.assign(shape.id, path.clone()) {
                warn!("couldn't map created shape for '{path}': {err}");
            }
        }
        if !created_ids.is_empty() {
            debug!("created {} shapes, fading in", created_ids.len());
            self.schedule(FADE_IN_MS, TimerAction::FadeIn(created_ids));
        }

        // Modified images reload their dimensions and rebind with a cache-buster
        for (shape_id, event) in image_rebinds {
            images::rebind_modified_image(self, &shape_id, &event).await;
        }
    }

    /// Starts the fade-out for deleted shapes; the finalizer removes them (and cascades) once
    /// the animation has finished.
    fn apply_deletes(&mut self, deletes: Vec<FsEvent>) {
        let mut doomed = Vec::new();
        for event in &deletes {
            if let Some(shape_id) = self.map.shape_for(&event.path).cloned() {
                doomed.push(shape_id);
            }
        }
        if doomed.is_empty() {
            return;
        }
        info!("fading out {} deleted shapes", doomed.len());
        let mut store = self.store.lock();
        store.transact(Source::Remote, |txn| {
            for id in &doomed {
                txn.update_shape(id, |s| s.opacity = 0.0);
            }
        });
        drop(store);
        for id in &doomed {
            self.pending_deletes.insert(id.clone());
        }
        self.schedule(DELETE_FINALIZE_MS, TimerAction::FinalizeDelete(doomed));
    }

    /// Creates image shapes for new image files: decode dimensions, size for display, asset plus
    /// shape in one remote batch each, fade in.
    pub(crate) async fn apply_image_creates(&mut self, creates: Vec<FsEvent>) {
        let mut created_ids = Vec::new();
        for event in creates {
            if self.map.contains_path(&event.path) {
                continue;
            }
            if kind_for_path(&event.path, false) != Some(ShapeKind::Image) {
                continue;
            }
            if let Some(id) = images::create_image_shape(self, &event).await {
                created_ids.push(id);
            }
        }
        if !created_ids.is_empty() {
            self.schedule(FADE_IN_MS, TimerAction::FadeIn(created_ids));
        }
    }

    /// Creations arriving outside the event stream (startup reconciliation/bootstrap) reuse the
    /// same machinery: frames and text synchronously, images through the decode pipeline.
    pub(crate) async fn apply_fs_creates(&mut self, creates: Vec<FsEvent>) {
        let (image_creates, sync_creates): (Vec<_>, Vec<_>) = creates
            .into_iter()
            .partition(|c| !c.is_directory && is_image_path(&c.path));
        self.apply_sync_batch(sync_creates, Vec::new()).await;
        if !image_creates.is_empty() {
            self.apply_image_creates(image_creates).await;
        }
    }
}
