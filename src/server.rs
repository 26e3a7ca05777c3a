use crate::{
    images::{AssetUploader, UploadedAsset},
    protocol::{CanvasSyncChange, ClientMessage, ServerMessage, SyncAction},
    shape::{basename, stem_and_ext},
    snapshot::{SnapshotDoc, SnapshotStore},
    watcher::WorkspaceWatcher,
};
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path as AxumPath, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use futures::{future::BoxFuture, SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How long a screenshot request waits for the client before giving up.
const SCREENSHOT_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state for the workspace side: the watcher, the sentinel store, the (single) connected
/// client, and in-flight screenshot requests.
pub struct ServerState {
    pub watcher: Arc<WorkspaceWatcher>,
    pub snapshots: SnapshotStore,
    /// Sender to the currently connected client, if any. This is a single-user system: a new
    /// connection replaces the old one.
    client_tx: Mutex<Option<mpsc::UnboundedSender<ServerMessage>>>,
    screenshots: Mutex<HashMap<String, oneshot::Sender<Result<(String, String), String>>>>,
}
impl ServerState {
    pub fn new(watcher: Arc<WorkspaceWatcher>, snapshots: SnapshotStore) -> Self {
        Self {
            watcher,
            snapshots,
            client_tx: Mutex::new(None),
            screenshots: Mutex::new(HashMap::new()),
        }
    }

    /// Forwards a message to the connected client, dropping it if nobody's listening.
    pub fn send_to_client(&self, msg: ServerMessage) {
        if let Some(tx) = self.client_tx.lock().as_ref() {
            let _ = tx.send(msg);
        }
    }

    /// Pumps watcher event batches out to the client for as long as the watcher runs. Spawn
    /// once at startup with the receiver paired to the watcher's sink.
    pub fn spawn_event_pump(
        self: &Arc<Self>,
        mut fs_rx: mpsc::UnboundedReceiver<Vec<crate::protocol::FsEvent>>,
    ) {
        let state = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(changes) = fs_rx.recv().await {
                state.send_to_client(ServerMessage::CanvasFsChange { changes });
            }
        });
    }
}

/// Creates the Axum app for serving over the network, using the given state.
pub fn make_app(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/assets", post(upload_asset))
        .route("/assets/*path", get(serve_asset))
        .route("/screenshot", get(screenshot))
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> Response {
    ws.on_upgrade(move |socket| client_session(socket, state))
}

/// One connected canvas client: replay of initial state on request, forwarding of watcher
/// batches, application of sync changes and snapshot saves.
async fn client_session(socket: WebSocket, state: Arc<ServerState>) {
    info!("canvas client connected");
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    *state.client_tx.lock() = Some(tx);

    let (mut sink, mut stream) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&msg) else {
                continue;
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        let Message::Text(text) = msg else {
            continue;
        };
        let msg: ClientMessage = match serde_json::from_str(&text) {
            Ok(msg) => msg,
            Err(err) => {
                warn!("undecodable client message: {err}");
                continue;
            }
        };
        handle_client_message(&state, msg).await;
    }

    info!("canvas client disconnected");
    *state.client_tx.lock() = None;
    writer.abort();
}

pub async fn handle_client_message(state: &ServerState, msg: ClientMessage) {
    match msg {
        ClientMessage::CanvasInit => {
            let doc = state.snapshots.read().await;
            let files = state.watcher.scan_workspace().await;
            let (snapshot, shape_to_file) = match doc {
                Some(doc) => (Some(doc.tldraw), doc.shape_to_file),
                None => (None, HashMap::new()),
            };
            state.send_to_client(ServerMessage::CanvasState {
                snapshot,
                shape_to_file,
                files,
            });
        }
        ClientMessage::CanvasSync { changes } => {
            apply_sync_changes(&state.watcher, &changes).await;
        }
        ClientMessage::CanvasSave {
            snapshot,
            shape_to_file,
        } => {
            let doc = SnapshotDoc::new(snapshot, shape_to_file);
            if let Err(err) = state.snapshots.write(&doc).await {
                warn!("couldn't persist snapshot: {err}");
            }
        }
        ClientMessage::ScreenshotResponse {
            request_id,
            data,
            mime_type,
        } => {
            if let Some(tx) = state.screenshots.lock().remove(&request_id) {
                let _ = tx.send(Ok((data, mime_type)));
            }
        }
        ClientMessage::ScreenshotError {
            request_id,
            message,
        } => {
            if let Some(tx) = state.screenshots.lock().remove(&request_id) {
                let _ = tx.send(Err(message));
            }
        }
    }
}

/// Performs the filesystem side of a batch of forward-path changes. Every operation marks the
/// watcher's ignore set, so none of this re-emerges as events.
pub async fn apply_sync_changes(watcher: &WorkspaceWatcher, changes: &[CanvasSyncChange]) {
    for change in changes {
        let res = match change.action {
            SyncAction::Create | SyncAction::Update => match change.shape_type {
                crate::protocol::SyncShapeType::Frame => watcher.mkdir(&change.path).await,
                _ => {
                    watcher
                        .write_text(&change.path, change.content.as_deref().unwrap_or(""))
                        .await
                }
            },
            SyncAction::Rename | SyncAction::Move => match &change.old_path {
                Some(old) => watcher.rename(old, &change.path).await,
                None => {
                    warn!("rename/move for '{}' without an old path", change.path);
                    continue;
                }
            },
            SyncAction::Delete => watcher.delete(&change.path).await,
        };
        if let Err(err) = res {
            warn!("sync change on '{}' failed: {err}", change.path);
        } else {
            debug!("applied {:?} on '{}'", change.action, change.path);
        }
    }
}

#[derive(Deserialize)]
struct UploadQuery {
    name: String,
}

/// The upload endpoint the editor's asset store posts image bytes to. Returns the canonical src
/// under the workspace.
async fn upload_asset(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Response {
    match store_upload(&state.watcher, &query.name, body.to_vec()).await {
        Ok(uploaded) => {
            Json(json!({ "src": uploaded.src, "path": uploaded.path })).into_response()
        }
        Err(err) => {
            warn!("asset upload '{}' failed: {err}", query.name);
            (StatusCode::INTERNAL_SERVER_ERROR, "upload failed").into_response()
        }
    }
}

/// Writes uploaded bytes under a collision-free variant of the desired name.
pub async fn store_upload(
    watcher: &WorkspaceWatcher,
    name: &str,
    bytes: Vec<u8>,
) -> std::io::Result<UploadedAsset> {
    let safe = basename(name.trim());
    let safe = if safe.is_empty() || safe.starts_with('.') {
        "image.png"
    } else {
        safe
    };
    // Dedupe against whatever is on disk right now
    let mut candidate = safe.to_string();
    let (stem, ext) = stem_and_ext(safe);
    let mut n = 1u32;
    while tokio::fs::metadata(watcher.root().join(&candidate)).await.is_ok() {
        candidate = match ext {
            Some(ext) => format!("{stem}-{n}.{ext}"),
            None => format!("{stem}-{n}"),
        };
        n += 1;
    }
    watcher
        .write_binary(&candidate, &bytes)
        .await
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))?;
    Ok(UploadedAsset {
        src: crate::images::src_for(&candidate),
        path: candidate,
    })
}

async fn serve_asset(
    State(state): State<Arc<ServerState>>,
    AxumPath(path): AxumPath<String>,
) -> Response {
    // Basic traversal hygiene; the canonical srcs we hand out are always workspace-relative
    if path.split('/').any(|seg| seg == "..") {
        return (StatusCode::BAD_REQUEST, "bad path").into_response();
    }
    match tokio::fs::read(state.watcher.root().join(&path)).await {
        Ok(bytes) => {
            let mime = match crate::shape::extension(&path).as_deref() {
                Some("png") => "image/png",
                Some("jpg") | Some("jpeg") => "image/jpeg",
                Some("gif") => "image/gif",
                Some("webp") => "image/webp",
                Some("svg") => "image/svg+xml",
                Some("txt") | Some("md") => "text/plain; charset=utf-8",
                _ => "application/octet-stream",
            };
            ([(header::CONTENT_TYPE, mime)], bytes).into_response()
        }
        Err(_) => (StatusCode::NOT_FOUND, "no such asset").into_response(),
    }
}

/// Asks the connected client to rasterize its viewport and relays the result.
async fn screenshot(State(state): State<Arc<ServerState>>) -> Response {
    if state.client_tx.lock().is_none() {
        return (StatusCode::SERVICE_UNAVAILABLE, "no canvas client connected").into_response();
    }
    let request_id = Uuid::new_v4().to_string();
    let (tx, rx) = oneshot::channel();
    state.screenshots.lock().insert(request_id.clone(), tx);
    state.send_to_client(ServerMessage::ScreenshotRequest {
        request_id: request_id.clone(),
    });

    match tokio::time::timeout(SCREENSHOT_TIMEOUT, rx).await {
        Ok(Ok(Ok((data, mime_type)))) => {
            match base64::engine::general_purpose::STANDARD.decode(data.as_bytes()) {
                Ok(bytes) => ([(header::CONTENT_TYPE, mime_type)], bytes).into_response(),
                Err(_) => (StatusCode::BAD_GATEWAY, "client sent undecodable data").into_response(),
            }
        }
        Ok(Ok(Err(message))) => (StatusCode::BAD_GATEWAY, message).into_response(),
        _ => {
            state.screenshots.lock().remove(&request_id);
            (StatusCode::GATEWAY_TIMEOUT, "screenshot timed out").into_response()
        }
    }
}

/// An [`AssetUploader`] that writes straight through the workspace watcher, used when the
/// controller runs in the same process as the workspace side.
pub struct WatcherUploader {
    watcher: Arc<WorkspaceWatcher>,
}
impl WatcherUploader {
    pub fn new(watcher: Arc<WorkspaceWatcher>) -> Self {
        Self { watcher }
    }
}
impl AssetUploader for WatcherUploader {
    fn upload(
        &self,
        name: String,
        bytes: Vec<u8>,
    ) -> BoxFuture<'static, std::io::Result<UploadedAsset>> {
        let watcher = Arc::clone(&self.watcher);
        Box::pin(async move { store_upload(&watcher, &name, bytes).await })
    }
    fn put(&self, path: String, bytes: Vec<u8>) -> BoxFuture<'static, std::io::Result<()>> {
        let watcher = Arc::clone(&self.watcher);
        Box::pin(async move {
            watcher
                .write_binary(&path, &bytes)
                .await
                .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))
        })
    }
    fn put_text(&self, path: String, content: String) -> BoxFuture<'static, std::io::Result<()>> {
        let watcher = Arc::clone(&self.watcher);
        Box::pin(async move {
            watcher
                .write_text(&path, &content)
                .await
                .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))
        })
    }
}
