use crate::{
    controller::SyncController,
    error::WatchError,
    protocol::{ClientMessage, FsEvent},
    server::{self, WatcherUploader},
    snapshot::SnapshotDoc,
    store::{CanvasStore, Source, SourcedDelta, Txn},
    watcher::WorkspaceWatcher,
};
use parking_lot::Mutex;
use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};
use tokio::{select, sync::mpsc, time::Instant};
use tracing::warn;

/// The workspace side and the canvas side wired together in one process over plain channels —
/// the same message flow as the websocket transport, without the socket. Used by the local run
/// mode and the end-to-end tests.
pub struct LocalSession {
    pub store: Arc<Mutex<CanvasStore>>,
    pub controller: SyncController,
    pub watcher: Arc<WorkspaceWatcher>,
    fs_rx: mpsc::UnboundedReceiver<Vec<FsEvent>>,
    outbound_rx: mpsc::UnboundedReceiver<ClientMessage>,
    delta_rx: mpsc::UnboundedReceiver<SourcedDelta>,
}
impl LocalSession {
    /// Boots a full session on the given workspace root: watcher started, snapshot restored or
    /// bootstrapped, controller initialized.
    pub async fn start(workspace_root: PathBuf) -> Result<Self, WatchError> {
        let watcher = Arc::new(WorkspaceWatcher::new(workspace_root.clone()));
        watcher.ensure_workspace().await?;
        let (fs_tx, fs_rx) = mpsc::unbounded_channel();
        watcher.start(fs_tx)?;

        let store = Arc::new(Mutex::new(CanvasStore::new()));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let uploader = Arc::new(WatcherUploader::new(Arc::clone(&watcher)));
        let mut controller =
            SyncController::new(Arc::clone(&store), outbound_tx, uploader, workspace_root);
        let delta_rx = controller
            .take_delta_rx()
            .expect("fresh controller always has its delta receiver");

        // The in-process equivalent of canvas_init/canvas_state
        let doc = watcher.read_canvas_json().await;
        let files = watcher.scan_workspace().await;
        let (snapshot, shape_to_file) = match doc {
            Some(doc) => (Some(doc.tldraw), doc.shape_to_file),
            None => (None, HashMap::new()),
        };
        let mut session = Self {
            store,
            controller,
            watcher,
            fs_rx,
            outbound_rx,
            delta_rx,
        };
        session.controller.init(snapshot, shape_to_file, files).await;
        session.drain().await;
        Ok(session)
    }

    /// Applies a user edit to the store, exactly as the editor UI would.
    pub fn user_transact<R>(&mut self, f: impl FnOnce(&mut Txn) -> R) -> R {
        self.store.lock().transact(Source::User, f)
    }

    /// Processes everything currently queued, without waiting for more.
    pub async fn drain(&mut self) {
        loop {
            let mut progressed = false;
            while let Ok(delta) = self.delta_rx.try_recv() {
                self.controller.handle_store_delta(delta);
                progressed = true;
            }
            while let Ok(msg) = self.outbound_rx.try_recv() {
                self.apply_client_message(msg).await;
                progressed = true;
            }
            while let Ok(batch) = self.fs_rx.try_recv() {
                self.controller.handle_fs_changes(batch).await;
                progressed = true;
            }
            if self.controller.fire_due_timers().await > 0 {
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
    }

    /// Runs the session's event loop for (at least) the given duration, then drains. Useful in
    /// tests that must wait out real debounce windows.
    pub async fn run_for(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            let timer_at = self
                .controller
                .next_deadline()
                .filter(|at| *at < deadline)
                .unwrap_or(deadline);
            select! {
                Some(delta) = self.delta_rx.recv() => {
                    self.controller.handle_store_delta(delta);
                }
                Some(msg) = self.outbound_rx.recv() => {
                    self.apply_client_message(msg).await;
                }
                Some(batch) = self.fs_rx.recv() => {
                    self.controller.handle_fs_changes(batch).await;
                }
                _ = tokio::time::sleep_until(timer_at) => {
                    self.controller.fire_due_timers().await;
                    if Instant::now() >= deadline {
                        break;
                    }
                }
            }
        }
        self.drain().await;
    }

    /// Runs forever. The local equivalent of a connected websocket client.
    pub async fn run(mut self) {
        loop {
            self.run_for(Duration::from_secs(3600)).await;
        }
    }

    async fn apply_client_message(&mut self, msg: ClientMessage) {
        match msg {
            ClientMessage::CanvasSync { changes } => {
                server::apply_sync_changes(&self.watcher, &changes).await;
            }
            ClientMessage::CanvasSave {
                snapshot,
                shape_to_file,
            } => {
                let doc = SnapshotDoc::new(snapshot, shape_to_file);
                if let Err(err) = self.watcher.write_canvas_json(&doc).await {
                    warn!("couldn't persist snapshot: {err}");
                }
            }
            // Headless: nothing to rasterize with; CanvasInit is never sent over this channel
            // (the initial state is loaded directly in `start`)
            ClientMessage::CanvasInit
            | ClientMessage::ScreenshotResponse { .. }
            | ClientMessage::ScreenshotError { .. } => {}
        }
    }

    /// Shuts the session down, clearing every pending timer on both sides.
    pub fn shutdown(&mut self) {
        self.controller.dispose();
        self.watcher.stop();
    }
}
