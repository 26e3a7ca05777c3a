mod annotate;
mod config;
mod controller;
mod debouncer;
mod error;
mod forward;
mod images;
mod layout;
mod logging;
mod path_map;
mod protocol;
mod reverse;
mod server;
mod session;
mod shape;
mod snapshot;
mod store;
#[cfg(test)]
mod tests;
mod watcher;

use crate::{
    config::{Config, EASEL_CONFIG},
    server::ServerState,
    snapshot::SnapshotStore,
    watcher::WorkspaceWatcher,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

#[tokio::main]
async fn main() {
    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(err) => {
            eprintln!("couldn't determine working directory: {err}");
            std::process::exit(1);
        }
    };
    let config = match Config::from_dir(&cwd) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };
    EASEL_CONFIG.set(config);
    logging::setup_logging();

    let workspace = cwd.join(&EASEL_CONFIG.get().workspace_dir);

    // `--local` runs a headless in-process canvas against the workspace instead of serving;
    // useful for driving the sync engine without a connected editor
    if std::env::args().any(|arg| arg == "--local") {
        match session::LocalSession::start(workspace).await {
            Ok(session) => session.run().await,
            Err(err) => {
                eprintln!("couldn't start local session: {err}");
                std::process::exit(1);
            }
        }
        return;
    }

    let watcher = Arc::new(WorkspaceWatcher::new(workspace));
    if let Err(err) = watcher.ensure_workspace().await {
        eprintln!("couldn't prepare workspace: {err}");
        std::process::exit(1);
    }
    let (fs_tx, fs_rx) = mpsc::unbounded_channel();
    if let Err(err) = watcher.start(fs_tx) {
        eprintln!("couldn't start workspace watcher: {err}");
        std::process::exit(1);
    }

    let snapshots = SnapshotStore::new(watcher.root());
    let state = Arc::new(ServerState::new(Arc::clone(&watcher), snapshots));
    state.spawn_event_pump(fs_rx);
    let app = server::make_app(state);

    let addr = {
        let config = EASEL_CONFIG.get();
        format!("{}:{}", config.host, config.port)
    };
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("couldn't bind {addr}: {err}");
            std::process::exit(1);
        }
    };
    info!("easel serving on {addr}");
    if let Err(err) = axum::serve(listener, app).await {
        eprintln!("server error: {err}");
        std::process::exit(1);
    }
}
