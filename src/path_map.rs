use crate::error::SyncError;
use crate::shape::{stem_and_ext, ShapeId};
use std::collections::HashMap;
use tracing::warn;

/// Metadata remembered about a known workspace path. Used solely as a hint by the move detector;
/// nothing here is authoritative.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KnownMeta {
    pub size: Option<u64>,
    pub mtime_ms: Option<u64>,
    /// Text file contents, when the watcher enriched the event with them.
    pub content: Option<String>,
    pub is_directory: bool,
}

/// A bijection between shape identifiers and workspace-relative paths, together with the set of
/// all paths known to exist in the workspace and their metadata.
///
/// The two directional maps are kept consistent by construction: every mutation goes through a
/// method that updates both. The known-paths set is a superset of the mapped paths (files can
/// exist in the workspace without being representable on the canvas, but not vice versa).
pub struct PathMap {
    shape_to_path: HashMap<ShapeId, String>,
    path_to_shape: HashMap<String, ShapeId>,
    known: HashMap<String, KnownMeta>,
}
impl PathMap {
    pub fn new() -> Self {
        Self {
            shape_to_path: HashMap::new(),
            path_to_shape: HashMap::new(),
            known: HashMap::new(),
        }
    }

    /// Maps the given shape to the given path. The caller must have resolved any collision with
    /// [`Self::ensure_unique_path`] first; if the path is already mapped to a different shape,
    /// this fails with [`SyncError::DuplicatePath`] and changes nothing.
    pub fn assign(&mut self, shape: ShapeId, path: String) -> Result<(), SyncError> {
        if let Some(existing) = self.path_to_shape.get(&path) {
            if *existing != shape {
                return Err(SyncError::DuplicatePath { path });
            }
        }
        // Re-assigning a shape moves it: drop any stale reverse entry first
        if let Some(old_path) = self.shape_to_path.get(&shape) {
            self.path_to_shape.remove(old_path);
        }
        self.path_to_shape.insert(path.clone(), shape.clone());
        self.shape_to_path.insert(shape, path);
        self.check_invariants();
        Ok(())
    }

    /// Removes the shape from both directions. Silently succeeds if it was never mapped.
    pub fn forget(&mut self, shape: &ShapeId) {
        if let Some(path) = self.shape_to_path.remove(shape) {
            self.path_to_shape.remove(&path);
        }
        self.check_invariants();
    }

    /// Atomically updates both maps to move a mapping from `old_path` to `new_path`. Does nothing
    /// if `old_path` wasn't mapped.
    pub fn rename(&mut self, old_path: &str, new_path: String) {
        if let Some(shape) = self.path_to_shape.remove(old_path) {
            self.shape_to_path
                .insert(shape.clone(), new_path.clone());
            self.path_to_shape.insert(new_path, shape);
        }
        self.check_invariants();
    }

    /// Rewrites every mapped path starting with `old_prefix + "/"` to start with `new_prefix`
    /// instead, consistently in both directions, along with the known-paths entries for those
    /// paths and the prefix itself.
    pub fn frame_renamed(&mut self, old_prefix: &str, new_prefix: &str) {
        let old_dir = format!("{old_prefix}/");
        let affected: Vec<String> = self
            .path_to_shape
            .keys()
            .filter(|p| p.starts_with(&old_dir))
            .cloned()
            .collect();
        for old_path in affected {
            let new_path = format!("{new_prefix}/{}", &old_path[old_dir.len()..]);
            self.rename(&old_path, new_path);
        }

        // Carry the known set along too: the filesystem rename moved every entry under the old
        // prefix, and our own writes won't re-announce them
        let known_affected: Vec<String> = self
            .known
            .keys()
            .filter(|p| *p == old_prefix || p.starts_with(&old_dir))
            .cloned()
            .collect();
        for old_path in known_affected {
            let new_path = if old_path == old_prefix {
                new_prefix.to_string()
            } else {
                format!("{new_prefix}/{}", &old_path[old_dir.len()..])
            };
            if let Some(meta) = self.known.remove(&old_path) {
                self.known.insert(new_path, meta);
            }
        }
        self.check_invariants();
    }

    /// Returns `desired` if it's free, otherwise its first collision-free `stem-N.ext` variant,
    /// preserving the directory component. A path counts as taken if it's mapped to a shape or
    /// known to exist in the workspace. `reserved` lets one existing path be treated as free,
    /// so a shape renaming to its own current path doesn't dedupe against itself.
    pub fn ensure_unique_path(&self, desired: &str, reserved: Option<&str>) -> String {
        let taken = |p: &str| {
            if reserved == Some(p) {
                return false;
            }
            self.path_to_shape.contains_key(p) || self.known.contains_key(p)
        };
        if !taken(desired) {
            return desired.to_string();
        }
        let (stem, ext) = stem_and_ext(desired);
        let mut n = 1u32;
        loop {
            let candidate = match ext {
                Some(ext) => format!("{stem}-{n}.{ext}"),
                None => format!("{stem}-{n}"),
            };
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    pub fn path_for(&self, shape: &ShapeId) -> Option<&str> {
        self.shape_to_path.get(shape).map(|s| s.as_str())
    }
    pub fn shape_for(&self, path: &str) -> Option<&ShapeId> {
        self.path_to_shape.get(path)
    }
    pub fn contains_path(&self, path: &str) -> bool {
        self.path_to_shape.contains_key(path)
    }
    /// Iterates over all `(shape, path)` pairs, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&ShapeId, &str)> {
        self.shape_to_path.iter().map(|(s, p)| (s, p.as_str()))
    }
    pub fn len(&self) -> usize {
        self.shape_to_path.len()
    }
    pub fn is_empty(&self) -> bool {
        self.shape_to_path.is_empty()
    }

    /// Records that a path exists in the workspace, with whatever metadata we observed.
    pub fn record_known(&mut self, path: String, meta: KnownMeta) {
        self.known.insert(path, meta);
    }
    /// Forgets a path from the known set (it was deleted).
    pub fn forget_known(&mut self, path: &str) {
        self.known.remove(path);
    }
    /// Moves a known-path entry, preserving its metadata.
    pub fn rename_known(&mut self, old_path: &str, new_path: String) {
        if let Some(meta) = self.known.remove(old_path) {
            self.known.insert(new_path, meta);
        }
    }
    pub fn known_meta(&self, path: &str) -> Option<&KnownMeta> {
        self.known.get(path)
    }
    pub fn is_known(&self, path: &str) -> bool {
        self.known.contains_key(path)
    }
    pub fn known_paths(&self) -> impl Iterator<Item = &str> {
        self.known.keys().map(|s| s.as_str())
    }

    /// Replaces the mapping wholesale from a persisted `shapeToFile` document. Entries that would
    /// break the bijection (two shapes claiming one path) are dropped with a warning, keeping the
    /// first encountered.
    pub fn import(&mut self, mapping: HashMap<ShapeId, String>) {
        self.shape_to_path.clear();
        self.path_to_shape.clear();
        let mut entries: Vec<_> = mapping.into_iter().collect();
        // Deterministic survivor when a persisted document is damaged
        entries.sort();
        for (shape, path) in entries {
            if self.path_to_shape.contains_key(&path) {
                warn!("dropping persisted mapping for {shape}: path '{path}' already claimed");
                continue;
            }
            self.path_to_shape.insert(path.clone(), shape.clone());
            self.shape_to_path.insert(shape, path);
        }
        self.check_invariants();
    }
    /// The mapping as a plain table, for persistence.
    pub fn export(&self) -> HashMap<ShapeId, String> {
        self.shape_to_path.clone()
    }

    /// Verifies the bijection in debug builds. Production builds elide this entirely.
    pub fn check_invariants(&self) {
        #[cfg(debug_assertions)]
        {
            assert_eq!(self.shape_to_path.len(), self.path_to_shape.len());
            for (shape, path) in &self.shape_to_path {
                assert_eq!(
                    self.path_to_shape.get(path),
                    Some(shape),
                    "path map bijection broken at {shape} <-> '{path}'"
                );
            }
        }
    }
}
impl Default for PathMap {
    fn default() -> Self {
        Self::new()
    }
}
