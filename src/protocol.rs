//! Message types carried over the transport between the workspace side and the canvas side. Any
//! bidirectional, ordered, message-delimited transport works; the bundled server speaks these as
//! JSON over a websocket.

use crate::shape::ShapeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// What happened to a path, as far as the watcher can tell. Moves are *not* distinguished here:
/// a filesystem rename surfaces as a delete and a create, and the controller's move detector
/// re-pairs them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsAction {
    Created,
    Modified,
    Deleted,
}

/// A normalized filesystem change notification emitted by the watcher.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FsEvent {
    pub action: FsAction,
    /// Workspace-relative path, `/`-separated.
    pub path: String,
    pub is_directory: bool,
    /// Milliseconds since the epoch at which the watcher classified this event.
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime_ms: Option<u64>,
    /// Text file contents. Only filled for text files, and only when the read succeeded; a
    /// missing value on a text file means the event is metadata-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// The kind of filesystem operation a canvas edit requires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Create,
    Update,
    Rename,
    Move,
    Delete,
}

/// The shape kind a [`CanvasSyncChange`] concerns, as it goes over the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncShapeType {
    Text,
    Image,
    Frame,
}

/// A forward-path change: the controller observed a user edit and wants the workspace updated to
/// match.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanvasSyncChange {
    pub action: SyncAction,
    pub shape_type: SyncShapeType,
    /// The (new) workspace-relative path.
    pub path: String,
    /// For renames and moves, the path being vacated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    /// For text creates/updates, the full contents to write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Messages from the canvas side to the workspace side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask for the initial state.
    CanvasInit,
    /// Forward-path emissions, in order.
    CanvasSync { changes: Vec<CanvasSyncChange> },
    /// Debounced snapshot persistence.
    CanvasSave {
        snapshot: Value,
        shape_to_file: HashMap<ShapeId, String>,
    },
    /// The rasterized viewport a `screenshot_request` asked for.
    ScreenshotResponse {
        request_id: String,
        /// Base64 image bytes.
        data: String,
        mime_type: String,
    },
    ScreenshotError {
        request_id: String,
        message: String,
    },
}

/// Messages from the workspace side to the canvas side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once in response to `canvas_init`.
    CanvasState {
        /// The persisted editor snapshot, if a valid sentinel existed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot: Option<Value>,
        #[serde(default)]
        shape_to_file: HashMap<ShapeId, String>,
        /// One `created`-shaped record per current workspace entry.
        files: Vec<FsEvent>,
    },
    /// One or more batched filesystem events.
    CanvasFsChange { changes: Vec<FsEvent> },
    /// Asks the client to rasterize its viewport.
    ScreenshotRequest { request_id: String },
}
