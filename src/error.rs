use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when parsing the configuration for an Easel instance.
#[derive(Error, Debug)]
pub enum ConfigParseError {
    #[error("failed to read config file at '{path:?}'")]
    ReadFailed {
        path: PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("failed to parse config file at '{path:?}'")]
    ParseFailed {
        path: PathBuf,
        #[source]
        err: toml::de::Error,
    },
    #[error("configured log directory '{path:?}' is not a directory")]
    InvalidLogDir { path: PathBuf },
    #[error("failed to create default log directory at '{path:?}'")]
    CreateDefaultLogDirFailed {
        path: PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("couldn't determine a platform directory for logs (specify `log_directory` manually)")]
    NoProjectDirs,
}

/// Errors from the workspace watcher.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("watcher has already been started, `start` may only be called once per instance")]
    AlreadyStarted,
    #[error("failed to create workspace directory at '{path:?}'")]
    WorkspaceCreateFailed {
        path: PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("failed to watch workspace directory at '{path:?}'")]
    WatchFailed {
        path: PathBuf,
        #[source]
        err: notify::Error,
    },
    #[error("filesystem operation on '{path}' failed")]
    IoFailed {
        path: String,
        #[source]
        err: std::io::Error,
    },
}

/// Errors from writing the persistence sentinel. A *corrupt* or unreadable sentinel is not an
/// error on the read side (it reads as absent); these cover real write failures.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("failed to write sentinel file at '{path:?}'")]
    WriteFailed {
        path: PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("failed to serialize snapshot document")]
    SerializeFailed {
        #[source]
        err: serde_json::Error,
    },
}

/// Errors from the sync controller.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("path '{path}' is already mapped or known, refusing to break the bijection")]
    DuplicatePath { path: String },
    #[error("failed to upload image asset '{name}'")]
    UploadFailed {
        name: String,
        #[source]
        err: std::io::Error,
    },
    #[error("image data for '{name}' was not valid base64")]
    BadImageData {
        name: String,
        #[source]
        err: base64::DecodeError,
    },
}
