use crate::{
    config::EASEL_CONFIG,
    images::{self, AssetUploader},
    path_map::{KnownMeta, PathMap},
    protocol::{CanvasSyncChange, ClientMessage, FsEvent, SyncAction, SyncShapeType},
    shape::{annotated_path, kind_for_path, parent_dir, ShapeId, ShapeKind, ShapeRecord, ShapeType},
    store::{CanvasStore, SourcedDelta, Subscription},
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap, HashSet},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, info, warn};

/// How long a newly created shape fades in for.
pub const FADE_IN_MS: u64 = 300;
/// How long a deleted shape fades out for.
pub const FADE_OUT_MS: u64 = 200;
/// When the post-delete finalizer actually removes the shape (fade-out plus 50 ms).
pub const DELETE_FINALIZE_MS: u64 = FADE_OUT_MS + 50;
/// Headroom added after the longest animation before a queued zoom-to-fit runs.
pub const ZOOM_DELAY_MS: u64 = FADE_IN_MS + 100;
/// Interval between asset-src binding polls.
pub const ASSET_POLL_MS: u64 = 500;
/// Number of asset-src polls before giving up silently.
pub const ASSET_POLL_MAX: u32 = 20;
/// Duration of the organize transition.
pub const ORGANIZE_MS: u64 = 300;

/// A deferred piece of controller work. Every one of these is a single-fire timer; `dispose`
/// clears them all.
#[derive(Debug)]
pub(crate) enum TimerAction {
    /// Bring freshly created shapes to full opacity.
    FadeIn(Vec<ShapeId>),
    /// Remove faded-out shapes and their map entries.
    FinalizeDelete(Vec<ShapeId>),
    ZoomToFit { gen: u64 },
    SnapshotFlush { gen: u64 },
    AnnotationScan { gen: u64 },
    /// Check whether an upload-originated asset has been bound to a src yet.
    AssetSrcPoll {
        asset: crate::shape::AssetId,
        shape: ShapeId,
        attempt: u32,
    },
}

struct TimerEntry {
    at: Instant,
    seq: u64,
    action: TimerAction,
}
// Min-heap on (deadline, insertion order)
impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}
impl Eq for TimerEntry {}
impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// One canvas entry as reported to the agent: the file it mirrors plus the derived facts the
/// canvas adds on top (its frame, and any arrow connections to other mapped items).
#[derive(Clone, Debug, Serialize)]
pub struct CanvasItem {
    pub path: String,
    pub kind: &'static str,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<String>,
    /// Paths of items this one is connected to by arrows, in either direction.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<String>,
}

/// The client-side heart of the synchronization engine. Holds the shape↔path map, translates
/// user edits into filesystem operations, applies remote filesystem events to the editor store,
/// and persists the reconciliation snapshot bridging the two identity spaces.
///
/// All state transitions are synchronous within a handler; suspension points are confined to
/// I/O (file reads arrive pre-resolved in events, image decodes, uploads). Loop suppression
/// rests on two mechanisms: every store mutation made here is a remote batch (invisible to the
/// user-delta subscription), and every filesystem write requested lands in the watcher's ignore
/// set on the other side.
pub struct SyncController {
    pub(crate) store: Arc<Mutex<CanvasStore>>,
    pub(crate) map: PathMap,
    pub(crate) outbound: mpsc::UnboundedSender<ClientMessage>,
    pub(crate) uploader: Arc<dyn AssetUploader>,
    /// Absolute workspace root, used to decode image files the watcher announced.
    pub(crate) workspace_root: PathBuf,

    timers: BinaryHeap<TimerEntry>,
    timer_seq: u64,
    /// Shapes mid-deletion: any racing event targeting them is ignored.
    pub(crate) pending_deletes: HashSet<ShapeId>,
    /// Image paths that currently have an `_annotated.png` export on disk.
    pub(crate) annotated: HashSet<String>,
    snapshot_gen: u64,
    annotation_gen: u64,
    zoom_gen: u64,
    subscription: Option<Subscription>,
    delta_rx: Option<mpsc::UnboundedReceiver<SourcedDelta>>,
    disposed: bool,
}

impl SyncController {
    /// Creates a controller over the given store, registering its delta subscription. Outbound
    /// messages (sync changes, snapshot saves, screenshot replies) go to `outbound`.
    pub fn new(
        store: Arc<Mutex<CanvasStore>>,
        outbound: mpsc::UnboundedSender<ClientMessage>,
        uploader: Arc<dyn AssetUploader>,
        workspace_root: PathBuf,
    ) -> Self {
        let (subscription, delta_rx) = store.lock().subscribe();
        Self {
            store,
            map: PathMap::new(),
            outbound,
            uploader,
            workspace_root,
            timers: BinaryHeap::new(),
            timer_seq: 0,
            pending_deletes: HashSet::new(),
            annotated: HashSet::new(),
            snapshot_gen: 0,
            annotation_gen: 0,
            zoom_gen: 0,
            subscription: Some(subscription),
            delta_rx: Some(delta_rx),
            disposed: false,
        }
    }

    /// Takes the receiver of store deltas for an external run loop. The loop must feed each
    /// delta back through [`Self::handle_store_delta`].
    pub fn take_delta_rx(&mut self) -> Option<mpsc::UnboundedReceiver<SourcedDelta>> {
        self.delta_rx.take()
    }

    pub fn path_map(&self) -> &PathMap {
        &self.map
    }

    // ----- timers -----

    pub(crate) fn schedule(&mut self, delay_ms: u64, action: TimerAction) {
        let seq = self.timer_seq;
        self.timer_seq += 1;
        self.timers.push(TimerEntry {
            at: Instant::now() + Duration::from_millis(delay_ms),
            seq,
            action,
        });
    }
    /// (Re)schedules the debounced snapshot persist. Every call pushes the window out.
    pub(crate) fn schedule_snapshot(&mut self) {
        self.snapshot_gen += 1;
        let gen = self.snapshot_gen;
        let delay = EASEL_CONFIG.get().snapshot_debounce;
        self.schedule(delay, TimerAction::SnapshotFlush { gen });
    }
    /// (Re)schedules the debounced annotation scan.
    pub(crate) fn schedule_annotation_scan(&mut self) {
        self.annotation_gen += 1;
        let gen = self.annotation_gen;
        let delay = EASEL_CONFIG.get().annotation_debounce;
        self.schedule(delay, TimerAction::AnnotationScan { gen });
    }
    /// Queues a zoom-to-fit after the longest running animation completes. Coalesces.
    pub(crate) fn schedule_zoom_to_fit(&mut self, delay_ms: u64) {
        self.zoom_gen += 1;
        let gen = self.zoom_gen;
        self.schedule(delay_ms, TimerAction::ZoomToFit { gen });
    }

    /// The deadline of the next pending timer, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.peek().map(|e| e.at)
    }
    pub fn has_timers(&self) -> bool {
        !self.timers.is_empty()
    }

    /// Fires every timer due as of now. Returns how many fired.
    pub async fn fire_due_timers(&mut self) -> usize {
        let now = Instant::now();
        let mut fired = 0;
        while self
            .timers
            .peek()
            .is_some_and(|e| e.at <= now && !self.disposed)
        {
            let entry = self.timers.pop().unwrap();
            self.handle_timer(entry.action).await;
            fired += 1;
        }
        fired
    }

    /// Waits for the next timer to come due and fires everything due then. Returns `false` when
    /// no timers remain. Tests under paused time can drive the controller to quiescence with
    /// `while ctrl.tick().await {}`.
    pub async fn tick(&mut self) -> bool {
        let Some(deadline) = self.next_deadline() else {
            return false;
        };
        tokio::time::sleep_until(deadline).await;
        self.fire_due_timers().await;
        true
    }

    async fn handle_timer(&mut self, action: TimerAction) {
        match action {
            TimerAction::FadeIn(ids) => {
                let mut store = self.store.lock();
                store.transact(crate::store::Source::Remote, |txn| {
                    for id in &ids {
                        txn.update_shape(id, |s| s.opacity = 1.0);
                    }
                });
            }
            TimerAction::FinalizeDelete(ids) => {
                self.finalize_deletes(&ids);
            }
            TimerAction::ZoomToFit { gen } => {
                if gen == self.zoom_gen {
                    self.store.lock().zoom_to_fit();
                }
            }
            TimerAction::SnapshotFlush { gen } => {
                if gen == self.snapshot_gen {
                    self.flush_snapshot();
                }
            }
            TimerAction::AnnotationScan { gen } => {
                if gen == self.annotation_gen {
                    self.run_annotation_scan().await;
                }
            }
            TimerAction::AssetSrcPoll {
                asset,
                shape,
                attempt,
            } => {
                self.poll_asset_src(asset, shape, attempt);
            }
        }
    }

    /// Drops the annotation bookkeeping for an image path whose export no longer applies (the
    /// image moved or is gone), returning the delete for its `_annotated.png` if one existed.
    /// The export lives and dies with its image no matter which side removed it.
    pub(crate) fn retire_annotation(&mut self, image_path: &str) -> Option<CanvasSyncChange> {
        self.annotated.remove(image_path).then(|| CanvasSyncChange {
            action: SyncAction::Delete,
            shape_type: SyncShapeType::Image,
            path: annotated_path(image_path),
            old_path: None,
            content: None,
        })
    }

    /// Removes shapes whose fade-out has completed, cascading through frame children, and drops
    /// their map entries.
    fn finalize_deletes(&mut self, ids: &[ShapeId]) {
        // A deleted frame takes its children with it. Gather them (by parent linkage and by
        // path prefix, for any mapping the editor's own cascade left behind) before mutating.
        let mut doomed: Vec<ShapeId> = ids.to_vec();
        {
            let store = self.store.lock();
            for id in ids {
                if store.shape(id).is_some_and(|s| s.ty == ShapeType::Frame) {
                    doomed.extend(store.children_of(id).map(|c| c.id.clone()));
                }
            }
        }
        for id in ids {
            if let Some(path) = self.map.path_for(id).map(|p| p.to_string()) {
                let prefix = format!("{path}/");
                doomed.extend(
                    self.map
                        .iter()
                        .filter(|(_, p)| p.starts_with(&prefix))
                        .map(|(s, _)| s.clone()),
                );
            }
        }
        doomed.sort();
        doomed.dedup();

        let mut store = self.store.lock();
        // Assets backing doomed image shapes go with them
        let orphaned_assets: Vec<crate::shape::AssetId> = doomed
            .iter()
            .filter_map(|id| store.shape(id))
            .filter_map(|s| s.props.asset_id.clone())
            .collect();
        store.transact(crate::store::Source::Remote, |txn| {
            for id in &doomed {
                txn.remove_shape(id);
            }
            for asset in &orphaned_assets {
                txn.remove_asset(asset);
            }
        });
        drop(store);
        let mut annotation_deletes = Vec::new();
        for id in &doomed {
            if let Some(path) = self.map.path_for(id).map(|p| p.to_string()) {
                if let Some(change) = self.retire_annotation(&path) {
                    annotation_deletes.push(change);
                }
            }
            self.map.forget(id);
            self.pending_deletes.remove(id);
        }
        if !annotation_deletes.is_empty() {
            let _ = self.outbound.send(ClientMessage::CanvasSync {
                changes: annotation_deletes,
            });
        }
        self.schedule_snapshot();
    }

    /// Sends the converged snapshot + mapping for persistence.
    fn flush_snapshot(&mut self) {
        let snapshot = self.store.lock().snapshot();
        let _ = self.outbound.send(ClientMessage::CanvasSave {
            snapshot,
            shape_to_file: self.map.export(),
        });
    }

    // ----- startup -----

    /// Initializes the controller from the server's `canvas_state`: seed known paths, restore
    /// the snapshot and reconcile against the filesystem, or bootstrap from files alone.
    #[tracing::instrument(skip_all)]
    pub async fn init(
        &mut self,
        snapshot: Option<Value>,
        shape_to_file: HashMap<ShapeId, String>,
        files: Vec<FsEvent>,
    ) {
        // Seed known paths and metadata from the scan
        for file in &files {
            self.map.record_known(
                file.path.clone(),
                KnownMeta {
                    size: file.size,
                    mtime_ms: file.mtime_ms,
                    content: file.content.clone(),
                    is_directory: file.is_directory,
                },
            );
        }

        let restored = if let Some(snapshot) = &snapshot {
            // Restoring is inherently a remote mutation: nothing here reaches the forward path
            self.store.lock().load_snapshot(snapshot)
        } else {
            false
        };

        if restored {
            info!("restored editor snapshot, reconciling against {} files", files.len());
            self.map.import(shape_to_file);
            self.reconcile(&files).await;
        } else if !files.is_empty() {
            info!("no usable snapshot, bootstrapping from {} files", files.len());
            self.bootstrap(&files).await;
        }

        // Size images that were never scaled down to their display size
        self.clamp_restored_images();
        self.schedule_zoom_to_fit(ZOOM_DELAY_MS);
        self.schedule_snapshot();
    }

    /// Brings a restored canvas and the current filesystem into agreement. Disk wins.
    async fn reconcile(&mut self, files: &[FsEvent]) {
        let on_disk: HashMap<&str, &FsEvent> =
            files.iter().map(|f| (f.path.as_str(), f)).collect();

        // Mapped paths whose file has vanished: drop the shape and the mapping
        let stale: Vec<(ShapeId, String)> = self
            .map
            .iter()
            .filter(|(_, path)| !on_disk.contains_key(*path))
            .map(|(shape, path)| (shape.clone(), path.to_string()))
            .collect();
        if !stale.is_empty() {
            debug!("removing {} mapped shapes with no backing file", stale.len());
            let mut store = self.store.lock();
            store.transact(crate::store::Source::Remote, |txn| {
                for (shape, _) in &stale {
                    txn.remove_shape(shape);
                }
            });
            drop(store);
            for (shape, _) in stale {
                self.map.forget(&shape);
            }
        }

        // Drop restored shapes that claim a file-mapped type but have no mapping at all (the
        // sentinel lost them); they'd otherwise shadow the recreate below
        let unmapped_stale: Vec<ShapeId> = {
            let store = self.store.lock();
            store
                .shapes()
                .filter(|s| s.ty.file_kind().is_some())
                .filter(|s| self.map.path_for(&s.id).is_none())
                .map(|s| s.id.clone())
                .collect()
        };
        if !unmapped_stale.is_empty() {
            let mut store = self.store.lock();
            store.transact(crate::store::Source::Remote, |txn| {
                for id in &unmapped_stale {
                    txn.remove_shape(id);
                }
            });
        }

        // Files with no shape: create through the normal FS-created path
        let missing: Vec<FsEvent> = files
            .iter()
            .filter(|f| !self.map.contains_path(&f.path))
            .filter(|f| kind_for_path(&f.path, f.is_directory).is_some())
            .cloned()
            .collect();
        if !missing.is_empty() {
            debug!("creating {} shapes for unmapped files", missing.len());
            self.apply_fs_creates(missing).await;
        }

        // Text shapes whose on-disk content differs: update the shape to disk
        let mut text_fixes: Vec<(ShapeId, String)> = Vec::new();
        {
            let store = self.store.lock();
            for (shape_id, path) in self.map.iter() {
                let Some(file) = on_disk.get(path) else {
                    continue;
                };
                let Some(disk_content) = &file.content else {
                    continue;
                };
                if let Some(shape) = store.shape(shape_id) {
                    if shape.ty == ShapeType::NamedText
                        && shape.props.text.as_deref() != Some(disk_content.as_str())
                    {
                        text_fixes.push((shape_id.clone(), disk_content.clone()));
                    }
                }
            }
        }
        if !text_fixes.is_empty() {
            debug!("updating {} text shapes to disk contents", text_fixes.len());
            let mut store = self.store.lock();
            store.transact(crate::store::Source::Remote, |txn| {
                for (id, content) in &text_fixes {
                    txn.update_shape(id, |s| s.props.text = Some(content.clone()));
                }
            });
        }
    }

    /// Builds the canvas from scratch off a file listing: frames for top-level directories
    /// first, then text files, then image loads.
    async fn bootstrap(&mut self, files: &[FsEvent]) {
        let representable: Vec<FsEvent> = files
            .iter()
            .filter(|f| kind_for_path(&f.path, f.is_directory).is_some())
            .cloned()
            .collect();
        self.apply_fs_creates(representable).await;
    }

    /// After a snapshot restore, any image shape still at its asset's native size was never
    /// scaled; clamp it to display size.
    fn clamp_restored_images(&mut self) {
        let mut store = self.store.lock();
        let fixes: Vec<(ShapeId, f64, f64)> = store
            .shapes()
            .filter(|s| s.ty == ShapeType::Image)
            .filter_map(|s| {
                let asset = s.props.asset_id.as_ref().and_then(|id| store.asset(id))?;
                if asset.native_w > 0.0
                    && s.props.w == asset.native_w
                    && s.props.h == asset.native_h
                {
                    let (w, h) = images::display_size(asset.native_w, asset.native_h);
                    (w != s.props.w || h != s.props.h).then(|| (s.id.clone(), w, h))
                } else {
                    None
                }
            })
            .collect();
        if !fixes.is_empty() {
            store.transact(crate::store::Source::Remote, |txn| {
                for (id, w, h) in &fixes {
                    txn.update_shape(id, |s| {
                        s.props.w = *w;
                        s.props.h = *h;
                    });
                }
            });
        }
    }

    // ----- shared helpers -----

    /// Resolves the frame shape a nested path's parent directory maps to, creating the frame on
    /// demand when the directory exists but was never surfaced (files can arrive before their
    /// directory's event).
    pub(crate) fn ensure_frame_for(&mut self, path: &str) -> Option<ShapeId> {
        let dir = parent_dir(path)?;
        if let Some(existing) = self.map.shape_for(dir) {
            return Some(existing.clone());
        }
        if kind_for_path(dir, true) != Some(ShapeKind::Frame) {
            return None;
        }
        let id = ShapeId::mint();
        let mut shape = ShapeRecord::new(id.clone(), ShapeType::Frame);
        shape.props.name = Some(dir.to_string());
        shape.props.w = crate::shape::DEFAULT_FRAME_WIDTH;
        shape.props.h = crate::shape::DEFAULT_FRAME_HEIGHT;
        let mut store = self.store.lock();
        let (x, y) = crate::layout::place_root(&store, shape.size());
        shape.x = x;
        shape.y = y;
        store.transact(crate::store::Source::Remote, |txn| {
            txn.put_shape(shape);
        });
        drop(store);
        if let Err(err) = self.map.assign(id.clone(), dir.to_string()) {
            warn!("couldn't map implicit frame for '{dir}': {err}");
        }
        Some(id)
    }

    /// Retrieves every mapped item with its canvas-derived facts.
    pub fn get_all_canvas_items(&self) -> Vec<CanvasItem> {
        let store = self.store.lock();

        // Arrow-derived connections between mapped shapes, both directions
        let mut connections: HashMap<ShapeId, Vec<String>> = HashMap::new();
        for arrow in store.shapes_of_type(&ShapeType::Arrow) {
            let (Some(a), Some(b)) = (&arrow.props.start_bind, &arrow.props.end_bind) else {
                continue;
            };
            let (Some(path_a), Some(path_b)) = (self.map.path_for(a), self.map.path_for(b)) else {
                continue;
            };
            connections
                .entry(a.clone())
                .or_default()
                .push(path_b.to_string());
            connections
                .entry(b.clone())
                .or_default()
                .push(path_a.to_string());
        }

        let mut items: Vec<CanvasItem> = self
            .map
            .iter()
            .filter_map(|(shape_id, path)| {
                let shape = store.shape(shape_id)?;
                let kind = match shape.ty.file_kind()? {
                    ShapeKind::NamedText => "text",
                    ShapeKind::Image => "image",
                    ShapeKind::Frame => "frame",
                };
                let mut conns = connections.remove(shape_id).unwrap_or_default();
                conns.sort();
                conns.dedup();
                Some(CanvasItem {
                    path: path.to_string(),
                    kind,
                    name: shape
                        .props
                        .name
                        .clone()
                        .unwrap_or_else(|| crate::shape::path_to_name(path).to_string()),
                    text: shape.props.text.clone(),
                    frame: parent_dir(path).map(|d| d.to_string()),
                    connections: conns,
                })
            })
            .collect();
        items.sort_by(|a, b| a.path.cmp(&b.path));
        items
    }

    /// Whether this batch's events should be ignored because their target is mid-deletion.
    pub(crate) fn targets_pending_delete(&self, event: &FsEvent) -> bool {
        self.map
            .shape_for(&event.path)
            .is_some_and(|shape| self.pending_deletes.contains(shape))
    }

    /// Tears the controller down: every pending timer is cleared, the store subscription is
    /// detached, and nothing will fire afterwards.
    pub fn dispose(&mut self) {
        self.disposed = true;
        self.timers.clear();
        self.pending_deletes.clear();
        if let Some(sub) = self.subscription.take() {
            self.store.lock().unsubscribe(sub);
        }
        info!("sync controller disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Annotation scan entry point, defined in `annotate.rs`.
    async fn run_annotation_scan(&mut self) {
        crate::annotate::run_scan(self).await;
    }
    fn poll_asset_src(&mut self, asset: crate::shape::AssetId, shape: ShapeId, attempt: u32) {
        crate::images::poll_asset_src(self, asset, shape, attempt);
    }
}
