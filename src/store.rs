use crate::shape::{AssetId, AssetRecord, Rect, ShapeId, ShapeRecord, ShapeType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// Where a store transaction originated. The sync controller's delta subscription only ever sees
/// user-sourced transactions; everything the controller itself does is bracketed as remote.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    /// A change the human made through the editor UI.
    User,
    /// A change applied by the sync controller (or snapshot restore) on behalf of the
    /// filesystem. Invisible to the forward path.
    Remote,
}

/// The records touched by one store transaction. Updates carry both sides so subscribers can
/// diff exactly the fields they care about.
#[derive(Clone, Debug, Default)]
pub struct StoreDelta {
    pub added: Vec<ShapeRecord>,
    pub updated: Vec<(ShapeRecord, ShapeRecord)>,
    pub removed: Vec<ShapeRecord>,
    pub asset_updates: Vec<(AssetRecord, AssetRecord)>,
}
impl StoreDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.updated.is_empty()
            && self.removed.is_empty()
            && self.asset_updates.is_empty()
    }
}

/// A delta paired with the source of the transaction that produced it.
#[derive(Clone, Debug)]
pub struct SourcedDelta {
    pub source: Source,
    pub delta: StoreDelta,
}

/// A registered delta observer. Dropping the handle (or calling [`CanvasStore::unsubscribe`])
/// stops delivery.
pub struct Subscription {
    pub(crate) id: u64,
}

/// The serialized form of the store, used as the opaque editor snapshot. Consumers other than
/// the store itself must not look inside.
#[derive(Serialize, Deserialize)]
struct StoreSnapshot {
    shapes: Vec<ShapeRecord>,
    assets: Vec<AssetRecord>,
    camera: (f64, f64, f64, f64),
}

/// An in-memory editor store: shape and asset records, a camera, and a transactional mutation
/// surface that reports deltas to subscribers tagged with their source.
///
/// This models the editor library's store for the sync core: the real UI renders from it and
/// writes user edits through [`Self::transact`] with [`Source::User`].
pub struct CanvasStore {
    shapes: HashMap<ShapeId, ShapeRecord>,
    assets: HashMap<AssetId, AssetRecord>,
    /// The visible viewport in page space.
    camera: Rect,
    subscribers: Vec<(u64, mpsc::UnboundedSender<SourcedDelta>)>,
    next_sub_id: u64,
}
impl CanvasStore {
    pub fn new() -> Self {
        Self {
            shapes: HashMap::new(),
            assets: HashMap::new(),
            camera: Rect {
                x: 0.0,
                y: 0.0,
                w: 1280.0,
                h: 720.0,
            },
            subscribers: Vec::new(),
            next_sub_id: 0,
        }
    }

    /// Registers an observer for store deltas. Every transaction's delta is delivered, tagged
    /// with its source; filtering (e.g. to user-only) is the subscriber's concern.
    pub fn subscribe(&mut self) -> (Subscription, mpsc::UnboundedReceiver<SourcedDelta>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_sub_id;
        self.next_sub_id += 1;
        self.subscribers.push((id, tx));
        (Subscription { id }, rx)
    }
    pub fn unsubscribe(&mut self, sub: Subscription) {
        self.subscribers.retain(|(id, _)| *id != sub.id);
    }

    /// Runs one transaction against the store. All mutations inside are reported as a single
    /// delta attributed to `source`; a remote batch is exactly a `transact(Source::Remote, ..)`
    /// call.
    pub fn transact<R>(&mut self, source: Source, f: impl FnOnce(&mut Txn) -> R) -> R {
        let mut txn = Txn {
            shapes: &mut self.shapes,
            assets: &mut self.assets,
            delta: StoreDelta::default(),
        };
        let out = f(&mut txn);
        let delta = txn.delta;
        if !delta.is_empty() {
            debug!(
                source = ?source,
                added = delta.added.len(),
                updated = delta.updated.len(),
                removed = delta.removed.len(),
                "store transaction committed"
            );
            self.subscribers
                .retain(|(_, tx)| tx.send(SourcedDelta { source, delta: delta.clone() }).is_ok());
        }
        out
    }

    pub fn shape(&self, id: &ShapeId) -> Option<&ShapeRecord> {
        self.shapes.get(id)
    }
    pub fn asset(&self, id: &AssetId) -> Option<&AssetRecord> {
        self.assets.get(id)
    }
    pub fn shapes(&self) -> impl Iterator<Item = &ShapeRecord> {
        self.shapes.values()
    }
    /// All shapes whose parent is the given frame.
    pub fn children_of<'a>(
        &'a self,
        frame: &'a ShapeId,
    ) -> impl Iterator<Item = &'a ShapeRecord> + 'a {
        self.shapes
            .values()
            .filter(move |s| s.parent_id.as_ref() == Some(frame))
    }
    /// All shapes directly on the page.
    pub fn top_level(&self) -> impl Iterator<Item = &ShapeRecord> {
        self.shapes.values().filter(|s| s.parent_id.is_none())
    }

    /// A shape's bounding box in page space (frame children are stored in frame-local
    /// coordinates).
    pub fn page_bounds(&self, shape: &ShapeRecord) -> Rect {
        let mut bounds = shape.bounds();
        if let Some(parent) = shape
            .parent_id
            .as_ref()
            .and_then(|id| self.shapes.get(id))
        {
            bounds.x += parent.x;
            bounds.y += parent.y;
        }
        bounds
    }

    pub fn camera(&self) -> Rect {
        self.camera
    }
    pub fn set_camera(&mut self, camera: Rect) {
        self.camera = camera;
    }
    /// Moves the camera to enclose every shape on the canvas, with a margin. No-op on an empty
    /// canvas.
    pub fn zoom_to_fit(&mut self) {
        let mut all: Option<Rect> = None;
        for shape in self.shapes.values() {
            // Children are inside their frames already
            if shape.parent_id.is_some() {
                continue;
            }
            let b = shape.bounds();
            all = Some(match all {
                Some(acc) => acc.union(&b),
                None => b,
            });
        }
        if let Some(mut bounds) = all {
            bounds.x -= 40.0;
            bounds.y -= 40.0;
            bounds.w += 80.0;
            bounds.h += 80.0;
            self.camera = bounds;
        }
    }

    /// Serializes the whole store as the opaque snapshot document.
    pub fn snapshot(&self) -> Value {
        let mut shapes: Vec<_> = self.shapes.values().cloned().collect();
        // Stable output keeps snapshot diffs meaningful
        shapes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut assets: Vec<_> = self.assets.values().cloned().collect();
        assets.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        let snap = StoreSnapshot {
            shapes,
            assets,
            camera: (self.camera.x, self.camera.y, self.camera.w, self.camera.h),
        };
        serde_json::to_value(snap).unwrap_or(Value::Null)
    }
    /// Restores the store wholesale from a snapshot document. Returns `false` (leaving the store
    /// untouched) if the document doesn't parse.
    pub fn load_snapshot(&mut self, snapshot: &Value) -> bool {
        let snap: StoreSnapshot = match serde_json::from_value(snapshot.clone()) {
            Ok(s) => s,
            Err(_) => return false,
        };
        self.shapes = snap.shapes.into_iter().map(|s| (s.id.clone(), s)).collect();
        self.assets = snap.assets.into_iter().map(|a| (a.id.clone(), a)).collect();
        let (x, y, w, h) = snap.camera;
        self.camera = Rect { x, y, w, h };
        true
    }

    /// Shapes of the given type, for scans.
    pub fn shapes_of_type<'a>(
        &'a self,
        ty: &'a ShapeType,
    ) -> impl Iterator<Item = &'a ShapeRecord> + 'a {
        self.shapes.values().filter(move |s| s.ty == *ty)
    }
}
impl Default for CanvasStore {
    fn default() -> Self {
        Self::new()
    }
}

/// The mutation surface handed to a [`CanvasStore::transact`] closure. Records everything done
/// to it into a single delta.
pub struct Txn<'a> {
    shapes: &'a mut HashMap<ShapeId, ShapeRecord>,
    assets: &'a mut HashMap<AssetId, AssetRecord>,
    delta: StoreDelta,
}
impl Txn<'_> {
    /// Inserts a shape, reporting an add (or an update if the id already existed).
    pub fn put_shape(&mut self, shape: ShapeRecord) {
        match self.shapes.insert(shape.id.clone(), shape.clone()) {
            Some(old) => self.delta.updated.push((old, shape)),
            None => self.delta.added.push(shape),
        }
    }
    /// Mutates a shape in place through a closure. Does nothing if the shape doesn't exist.
    pub fn update_shape(&mut self, id: &ShapeId, f: impl FnOnce(&mut ShapeRecord)) {
        if let Some(shape) = self.shapes.get_mut(id) {
            let old = shape.clone();
            f(shape);
            if *shape != old {
                self.delta.updated.push((old, shape.clone()));
            }
        }
    }
    pub fn remove_shape(&mut self, id: &ShapeId) {
        if let Some(old) = self.shapes.remove(id) {
            self.delta.removed.push(old);
        }
    }

    pub fn put_asset(&mut self, asset: AssetRecord) {
        if let Some(old) = self.assets.insert(asset.id.clone(), asset.clone()) {
            self.delta.asset_updates.push((old, asset));
        }
    }
    pub fn update_asset(&mut self, id: &AssetId, f: impl FnOnce(&mut AssetRecord)) {
        if let Some(asset) = self.assets.get_mut(id) {
            let old = asset.clone();
            f(asset);
            if *asset != old {
                self.delta.asset_updates.push((old, asset.clone()));
            }
        }
    }
    pub fn remove_asset(&mut self, id: &AssetId) {
        self.assets.remove(id);
    }
}
