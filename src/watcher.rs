use crate::{
    config::EASEL_CONFIG,
    debouncer::{PendingEvents, RawKind},
    error::WatchError,
    protocol::{FsAction, FsEvent},
    shape::{extension, is_annotated_path, is_hidden, is_text_path},
};
use notify::{
    event::{ModifyKind, RenameMode},
    EventKind as NotifyEvent, RecommendedWatcher, RecursiveMode, Watcher,
};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    select,
    sync::{mpsc, oneshot},
    time::Instant,
};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// The sentinel persistence file at the workspace root. Never surfaced as an event.
pub const SENTINEL_FILE: &str = ".canvas.json";

/// Turns raw filesystem notifications on the workspace directory into a normalized,
/// deduplicated, self-suppressing stream of [`FsEvent`] batches, and provides the mutating
/// operations the canvas side requests — each of which marks its touched paths so the
/// notification it provokes is discarded.
pub struct WorkspaceWatcher {
    /// Absolute path of the workspace root.
    root: PathBuf,
    /// Paths we've just written ourselves, with the instant their suppression expires. The next
    /// notification on such a path within the window is dropped (preventing infinite loops);
    /// entries are purged as they're hit or lazily when they expire.
    ignore: Mutex<HashMap<String, Instant>>,
    started: AtomicBool,
    /// Signals the engine task to shut down, cancelling all pending debounces.
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
}
impl WorkspaceWatcher {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            ignore: Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
            stop_tx: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Idempotently creates the workspace directory.
    pub async fn ensure_workspace(&self) -> Result<(), WatchError> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|err| {
            WatchError::WorkspaceCreateFailed {
                path: self.root.clone(),
                err,
            }
        })
    }

    /// Starts watching the workspace, delivering debounced event batches to `sink`. May be
    /// called at most once per instance.
    pub fn start(
        self: &Arc<Self>,
        sink: mpsc::UnboundedSender<Vec<FsEvent>>,
    ) -> Result<(), WatchError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(WatchError::AlreadyStarted);
        }

        // The backend reports canonicalized paths, so strip against the canonical root
        let root = self.root.canonicalize().unwrap_or_else(|_| self.root.clone());
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(
            move |ev: Result<notify::Event, notify::Error>| {
                let ev = match ev {
                    Ok(ev) => ev,
                    Err(err) => {
                        warn!("watcher backend error: {err}");
                        return;
                    }
                };
                // If sends fail, the engine has gone down, and so will we imminently
                let _ = match ev.kind {
                    NotifyEvent::Create(_) => send_raw(&raw_tx, &root, &ev.paths[0], RawKind::Create),
                    NotifyEvent::Modify(modify_kind) => match modify_kind {
                        ModifyKind::Data(_) | ModifyKind::Any | ModifyKind::Other => {
                            send_raw(&raw_tx, &root, &ev.paths[0], RawKind::Modify)
                        }
                        // We don't need to do anything for a metadata change
                        ModifyKind::Metadata(_) => Ok(()),
                        // A stitched rename carries both paths: split it into a delete and a
                        // create so move detection happens in exactly one place downstream
                        ModifyKind::Name(_) if ev.paths.len() > 1 => {
                            let _ = send_raw(&raw_tx, &root, &ev.paths[0], RawKind::Delete);
                            send_raw(&raw_tx, &root, &ev.paths[1], RawKind::Create)
                        }
                        ModifyKind::Name(RenameMode::From) => {
                            send_raw(&raw_tx, &root, &ev.paths[0], RawKind::Delete)
                        }
                        ModifyKind::Name(RenameMode::To) => {
                            send_raw(&raw_tx, &root, &ev.paths[0], RawKind::Create)
                        }
                        // Unstitched rename with no direction: resolve by existence
                        ModifyKind::Name(_) => {
                            let kind = if ev.paths[0].exists() {
                                RawKind::Create
                            } else {
                                RawKind::Delete
                            };
                            send_raw(&raw_tx, &root, &ev.paths[0], kind)
                        }
                    },
                    NotifyEvent::Remove(_) => send_raw(&raw_tx, &root, &ev.paths[0], RawKind::Delete),

                    // Non-modifying accesses don't concern us
                    NotifyEvent::Access(_) => Ok(()),
                    NotifyEvent::Any | NotifyEvent::Other => Ok(()),
                };
            },
        )
        .map_err(|err| WatchError::WatchFailed {
            path: self.root.clone(),
            err,
        })?;
        // If watching the directory fails, we'll error before spawning so the caller can handle
        // it immediately
        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|err| WatchError::WatchFailed {
                path: self.root.clone(),
                err,
            })?;

        let (stop_tx, stop_rx) = oneshot::channel();
        *self.stop_tx.lock() = Some(stop_tx);

        let this = Arc::clone(self);
        tokio::spawn(this.engine(watcher, raw_rx, stop_rx, sink));
        Ok(())
    }

    /// The debounce/classify/enrich loop. Owns the notify watcher so it stays alive exactly as
    /// long as the engine does.
    async fn engine(
        self: Arc<Self>,
        _watcher: RecommendedWatcher,
        mut raw_rx: mpsc::UnboundedReceiver<(String, RawKind)>,
        mut stop_rx: oneshot::Receiver<()>,
        sink: mpsc::UnboundedSender<Vec<FsEvent>>,
    ) {
        let debounce = Duration::from_millis(EASEL_CONFIG.get().debounce_duration);
        let mut pending = PendingEvents::new();
        info!("workspace watcher engine running on {:?}", self.root);
        loop {
            // When nothing is pending, park until a notification arrives
            let deadline = pending
                .next_deadline()
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
            select! {
                _ = tokio::time::sleep_until(deadline), if !pending.is_empty() => {
                    let now = Instant::now();
                    let mut batch = Vec::new();
                    for (path, kind) in pending.take_expired(now) {
                        if self.consume_ignored(&path) {
                            debug!("suppressed self-inflicted event on '{path}'");
                            continue;
                        }
                        if let Some(event) = self.classify(&path, kind).await {
                            batch.push(event);
                        }
                    }
                    if !batch.is_empty() {
                        debug!("emitting batch of {} fs events", batch.len());
                        if sink.send(batch).is_err() {
                            // The sink has gone down; nothing left to deliver to
                            break;
                        }
                    }
                },
                res = raw_rx.recv() => {
                    match res {
                        Some((path, kind)) => {
                            debug!("debouncing {kind:?} on '{path}'");
                            pending.push(path, kind, Instant::now() + debounce);
                        }
                        None => {
                            // The file notifying thread has gone down, which shouldn't happen
                            // without our go-ahead
                            error!("file notifier went down unexpectedly");
                            break;
                        }
                    }
                },
                _ = &mut stop_rx => {
                    pending.clear();
                    info!("workspace watcher stopped");
                    break;
                },
            };
        }
    }

    /// Cancels all pending debounces and detaches the underlying watcher.
    pub fn stop(&self) {
        if let Some(tx) = self.stop_tx.lock().take() {
            let _ = tx.send(());
        }
    }

    /// Stats and enriches a debounced notification into an [`FsEvent`]. Returns [`None`] for
    /// stat races we can't say anything useful about.
    async fn classify(&self, path: &str, kind: RawKind) -> Option<FsEvent> {
        let abs = self.root.join(path);
        let timestamp = chrono::Utc::now().timestamp_millis() as u64;
        match tokio::fs::metadata(&abs).await {
            Err(_) => {
                // Gone. Infer directory-ness from the absence of an extension (best-effort)
                Some(FsEvent {
                    action: FsAction::Deleted,
                    path: path.to_string(),
                    is_directory: extension(path).is_none(),
                    timestamp,
                    size: None,
                    mtime_ms: None,
                    content: None,
                })
            }
            Ok(meta) => {
                let action = match kind {
                    RawKind::Modify => FsAction::Modified,
                    _ => FsAction::Created,
                };
                let is_directory = meta.is_dir();
                let mtime_ms = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_millis() as u64);
                let content = if !is_directory && is_text_path(path) {
                    // A failed read leaves the event metadata-only
                    tokio::fs::read_to_string(&abs).await.ok()
                } else {
                    None
                };
                Some(FsEvent {
                    action,
                    path: path.to_string(),
                    is_directory,
                    timestamp,
                    size: (!is_directory).then_some(meta.len()),
                    mtime_ms,
                    content,
                })
            }
        }
    }

    /// Checks whether a path is currently suppressed, removing it from the ignore set if so and
    /// purging anything that has expired either way.
    fn consume_ignored(&self, path: &str) -> bool {
        let now = Instant::now();
        let mut ignore = self.ignore.lock();
        ignore.retain(|_, expiry| *expiry > now);
        ignore.remove(path).is_some()
    }

    /// Marks a path as self-inflicted for the configured TTL.
    fn mark_ignored(&self, path: &str) {
        let ttl = Duration::from_millis(EASEL_CONFIG.get().ignore_ttl);
        self.ignore
            .lock()
            .insert(path.to_string(), Instant::now() + ttl);
    }

    /// Writes a text file, suppressing the notification this provokes.
    pub async fn write_text(&self, path: &str, content: &str) -> Result<(), WatchError> {
        self.prepare_parent(path).await?;
        self.mark_ignored(path);
        tokio::fs::write(self.root.join(path), content)
            .await
            .map_err(|err| WatchError::IoFailed {
                path: path.to_string(),
                err,
            })
    }

    /// Writes raw bytes, suppressing the notification this provokes.
    pub async fn write_binary(&self, path: &str, bytes: &[u8]) -> Result<(), WatchError> {
        self.prepare_parent(path).await?;
        self.mark_ignored(path);
        tokio::fs::write(self.root.join(path), bytes)
            .await
            .map_err(|err| WatchError::IoFailed {
                path: path.to_string(),
                err,
            })
    }

    /// Deletes a file or directory (recursively), suppressing the notification.
    pub async fn delete(&self, path: &str) -> Result<(), WatchError> {
        self.mark_ignored(path);
        let abs = self.root.join(path);
        let res = match tokio::fs::metadata(&abs).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&abs).await,
            Ok(_) => tokio::fs::remove_file(&abs).await,
            // Already gone: deleting is idempotent
            Err(_) => return Ok(()),
        };
        res.map_err(|err| WatchError::IoFailed {
            path: path.to_string(),
            err,
        })
    }

    /// Creates a directory, suppressing the notification.
    pub async fn mkdir(&self, path: &str) -> Result<(), WatchError> {
        self.mark_ignored(path);
        tokio::fs::create_dir_all(self.root.join(path))
            .await
            .map_err(|err| WatchError::IoFailed {
                path: path.to_string(),
                err,
            })
    }

    /// Renames a file or directory, suppressing notifications on both ends.
    pub async fn rename(&self, old_path: &str, new_path: &str) -> Result<(), WatchError> {
        self.prepare_parent(new_path).await?;
        self.mark_ignored(old_path);
        self.mark_ignored(new_path);
        tokio::fs::rename(self.root.join(old_path), self.root.join(new_path))
            .await
            .map_err(|err| WatchError::IoFailed {
                path: old_path.to_string(),
                err,
            })
    }

    /// Makes sure the parent directory of a nested path exists, suppressing the creation event
    /// if we had to make it.
    async fn prepare_parent(&self, path: &str) -> Result<(), WatchError> {
        if let Some(parent) = crate::shape::parent_dir(path) {
            let abs = self.root.join(parent);
            if tokio::fs::metadata(&abs).await.is_err() {
                self.mark_ignored(parent);
                tokio::fs::create_dir_all(&abs)
                    .await
                    .map_err(|err| WatchError::IoFailed {
                        path: parent.to_string(),
                        err,
                    })?;
            }
        }
        Ok(())
    }

    /// Reads the sentinel persistence document, if a valid one exists.
    pub async fn read_canvas_json(&self) -> Option<crate::snapshot::SnapshotDoc> {
        crate::snapshot::SnapshotStore::new(&self.root).read().await
    }

    /// Writes the sentinel persistence document. The sentinel is filtered by name, so this
    /// never self-triggers.
    pub async fn write_canvas_json(
        &self,
        doc: &crate::snapshot::SnapshotDoc,
    ) -> Result<(), crate::error::SnapshotError> {
        crate::snapshot::SnapshotStore::new(&self.root).write(doc).await
    }

    /// One-shot recursive enumeration of the workspace, producing the same record shape the
    /// event stream emits (`created` for everything). Used for reconciliation on startup.
    pub async fn scan_workspace(&self) -> Vec<FsEvent> {
        let root = self.root.clone();
        // WalkDir is synchronous; hop off the async thread for the traversal
        let entries = tokio::task::spawn_blocking(move || {
            WalkDir::new(&root)
                .min_depth(1)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| {
                    let rel = entry.path().strip_prefix(&root).ok()?;
                    let rel = rel.to_string_lossy().replace('\\', "/");
                    if should_skip(&rel) {
                        return None;
                    }
                    Some((rel, entry.file_type().is_dir()))
                })
                .collect::<Vec<_>>()
        })
        .await
        .unwrap_or_default();

        let mut files = Vec::new();
        for (rel, _is_dir) in entries {
            if let Some(event) = self.classify(&rel, RawKind::Create).await {
                files.push(event);
            }
        }
        // Directories first so frames exist before their children are placed
        files.sort_by_key(|f| (!f.is_directory, f.path.clone()));
        files
    }
}

/// Normalizes a raw notification path and forwards it, dropping anything the canvas must never
/// hear about: the sentinel file, hidden paths, and reserved annotation exports.
fn send_raw(
    tx: &mpsc::UnboundedSender<(String, RawKind)>,
    root: &Path,
    abs: &Path,
    kind: RawKind,
) -> Result<(), mpsc::error::SendError<(String, RawKind)>> {
    let rel = match abs.strip_prefix(root) {
        Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
        // Not under the workspace at all
        Err(_) => return Ok(()),
    };
    if rel.is_empty() || should_skip(&rel) {
        return Ok(());
    }
    tx.send((rel, kind))
}

/// The watcher-level path filter: sentinel, dot-segments, annotation exports.
pub fn should_skip(rel: &str) -> bool {
    rel == SENTINEL_FILE || is_hidden(rel) || is_annotated_path(rel)
}
