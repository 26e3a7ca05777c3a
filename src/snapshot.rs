use crate::error::SnapshotError;
use crate::shape::ShapeId;
use crate::watcher::SENTINEL_FILE;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, warn};

/// The schema version we read and write. Anything else reads as absent.
const SENTINEL_VERSION: u32 = 1;

/// The persisted reconciliation document: the editor's opaque snapshot plus the shape↔path
/// mapping that bridges the two identity spaces.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotDoc {
    pub version: u32,
    /// The editor snapshot, opaque to everything but the store that produced it.
    pub tldraw: Value,
    #[serde(rename = "shapeToFile")]
    pub shape_to_file: HashMap<ShapeId, String>,
}
impl SnapshotDoc {
    pub fn new(tldraw: Value, shape_to_file: HashMap<ShapeId, String>) -> Self {
        Self {
            version: SENTINEL_VERSION,
            tldraw,
            shape_to_file,
        }
    }
}

/// Reads and writes the sentinel file under the workspace. The watcher filters the sentinel by
/// name, so writing it never self-triggers; debouncing of writes is the controller's concern.
pub struct SnapshotStore {
    path: PathBuf,
}
impl SnapshotStore {
    pub fn new(workspace_root: &std::path::Path) -> Self {
        Self {
            path: workspace_root.join(SENTINEL_FILE),
        }
    }

    /// Loads the persisted document. Absence, unreadability, parse failure, and version
    /// mismatch all read as [`None`]: the caller bootstraps from the filesystem as if fresh.
    pub async fn read(&self) -> Option<SnapshotDoc> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(_) => return None,
        };
        match serde_json::from_slice::<SnapshotDoc>(&bytes) {
            Ok(doc) if doc.version == SENTINEL_VERSION => Some(doc),
            Ok(doc) => {
                warn!(
                    "sentinel file at {:?} has unsupported version {}, ignoring",
                    self.path, doc.version
                );
                None
            }
            Err(err) => {
                warn!("sentinel file at {:?} is corrupt ({err}), ignoring", self.path);
                None
            }
        }
    }

    pub async fn write(&self, doc: &SnapshotDoc) -> Result<(), SnapshotError> {
        let bytes =
            serde_json::to_vec_pretty(doc).map_err(|err| SnapshotError::SerializeFailed { err })?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|err| SnapshotError::WriteFailed {
                path: self.path.clone(),
                err,
            })?;
        debug!("persisted sentinel to {:?}", self.path);
        Ok(())
    }
}
