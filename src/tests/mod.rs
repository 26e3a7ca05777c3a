mod debouncer;
mod e2e;
mod layout;
mod moves;
mod path_map;
mod shape;
mod watcher;

use crate::config::{Config, EASEL_CONFIG};
use crate::protocol::{FsAction, FsEvent};
use std::sync::atomic::Ordering;

/// Sets up the global configuration (making sure not to do so twice, because otherwise
/// multi-threaded test interleaving can produce nasty deadlocks).
pub(crate) fn setup_config() {
    if !EASEL_CONFIG.setup.load(Ordering::SeqCst) {
        EASEL_CONFIG.set(Config::default());
    }
}

pub(crate) fn fs_created(path: &str, content: &str) -> FsEvent {
    FsEvent {
        action: FsAction::Created,
        path: path.to_string(),
        is_directory: false,
        timestamp: 0,
        size: Some(content.len() as u64),
        mtime_ms: Some(1_000),
        content: Some(content.to_string()),
    }
}

pub(crate) fn fs_dir_created(path: &str) -> FsEvent {
    FsEvent {
        action: FsAction::Created,
        path: path.to_string(),
        is_directory: true,
        timestamp: 0,
        size: None,
        mtime_ms: Some(1_000),
        content: None,
    }
}

pub(crate) fn fs_modified(path: &str, content: &str) -> FsEvent {
    FsEvent {
        action: FsAction::Modified,
        path: path.to_string(),
        is_directory: false,
        timestamp: 0,
        size: Some(content.len() as u64),
        mtime_ms: Some(2_000),
        content: Some(content.to_string()),
    }
}

pub(crate) fn fs_deleted(path: &str, is_directory: bool) -> FsEvent {
    FsEvent {
        action: FsAction::Deleted,
        path: path.to_string(),
        is_directory,
        timestamp: 0,
        size: None,
        mtime_ms: None,
        content: None,
    }
}
