use crate::error::ConfigParseError;
use directories::ProjectDirs;
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use serde::Deserialize;
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::atomic::AtomicBool;

/// The live configuration shared by every part of this instance. Populated once at startup,
/// before anything else runs.
pub static EASEL_CONFIG: GlobalConfig = GlobalConfig::new();

/// Holder for the process-wide [`Config`]. Readers take a short read lock, so values pulled out
/// of two different `get()` calls must never be assumed to agree with each other: take the
/// guard once and read everything needed from it.
///
/// `parking_lot`'s lock keeps access synchronous (configuration is read from deep inside
/// non-async code) and won't let readers starve a writer installing an update.
pub struct GlobalConfig {
    inner: RwLock<Option<Config>>,
    /// Lets tests skip repeat setup; configuring twice from interleaved test threads can
    /// deadlock on the lock.
    #[cfg(test)]
    pub setup: AtomicBool,
}
impl GlobalConfig {
    const fn new() -> Self {
        Self {
            inner: RwLock::new(None),
            #[cfg(test)]
            setup: AtomicBool::new(false),
        }
    }
    /// Reads the current configuration.
    ///
    /// # Panics
    ///
    /// Panics when called before [`Self::set`] has installed one.
    pub fn get(&self) -> MappedRwLockReadGuard<Config> {
        RwLockReadGuard::map(self.inner.read(), |config| {
            config
                .as_ref()
                .expect("configuration read before it was set")
        })
    }
    /// Installs a validated configuration for the whole process.
    pub fn set(&self, config: Config) {
        #[cfg(test)]
        self.setup.store(true, std::sync::atomic::Ordering::SeqCst);
        *self.inner.write() = Some(config);
    }
}

/// File names probed, in order, for the instance configuration.
static CONFIG_FILE_NAMES: [&str; 4] =
    ["easel.toml", ".easel.toml", "config.toml", ".config.toml"];
// Serde defaults
fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_workspace_dir() -> String {
    "canvas".to_string()
}
fn default_debounce_duration() -> u64 {
    300
}
fn default_ignore_ttl() -> u64 {
    2000
}
fn default_snapshot_debounce() -> u64 {
    500
}
fn default_annotation_debounce() -> u64 {
    800
}

/// Everything tunable about an Easel instance. Parsed from TOML at startup and installed into
/// [`EASEL_CONFIG`]; changing any of it afterwards takes a restart.
#[derive(Deserialize)]
pub struct Config {
    /// The name of the workspace directory, relative to the directory the instance was started
    /// in. Everything inside it is mirrored on the canvas.
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: String,
    /// A number of milliseconds to debounce filesystem events over, per path. Updates from the
    /// filesystem sometimes come very rapidly (editors writing in several syscalls, agents
    /// rewriting a file twice), so each path waits this long after its last raw notification
    /// before its event is classified and emitted. Very short values may lead to poor
    /// performance, and very long values to poor responsiveness.
    #[serde(default = "default_debounce_duration")]
    pub debounce_duration: u64,
    /// How long, in milliseconds, a path stays in the watcher's ignore set after the system
    /// itself writes to it. The notification our own write provokes arrives well within this
    /// window and is discarded; the entry then expires so genuinely external edits to the same
    /// path aren't lost.
    #[serde(default = "default_ignore_ttl")]
    pub ignore_ttl: u64,
    /// Milliseconds to wait after the last converged change before persisting the snapshot
    /// sentinel.
    #[serde(default = "default_snapshot_debounce")]
    pub snapshot_debounce: u64,
    /// Milliseconds to wait after the last draw/image mutation before recomputing annotation
    /// exports.
    #[serde(default = "default_annotation_debounce")]
    pub annotation_debounce: u64,
    /// Where rolling daily log files go. When left unset, a platform-appropriate data
    /// directory is chosen (and created if needed) during validation.
    pub log_directory: Option<PathBuf>,
    /// Host for the Easel server to listen on.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port for the Easel server to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_dir: default_workspace_dir(),
            debounce_duration: default_debounce_duration(),
            ignore_ttl: default_ignore_ttl(),
            snapshot_debounce: default_snapshot_debounce(),
            annotation_debounce: default_annotation_debounce(),
            host: default_host(),
            port: default_port(),
            log_directory: None,
        }
    }
}
impl Config {
    /// Loads the configuration for an instance rooted at `dir`, probing the usual file names
    /// and falling back to defaults when none is present (a config file is never written out
    /// unasked). The result is always validated, which also fills in the computed defaults.
    pub fn from_dir(dir: &Path) -> Result<Self, ConfigParseError> {
        let found = CONFIG_FILE_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.exists());
        let mut config = if let Some(path) = found {
            // Plain blocking reads: this runs once, before the runtime has anything to do
            let raw = std::fs::read_to_string(&path).map_err(|err| {
                ConfigParseError::ReadFailed {
                    path: path.clone(),
                    err,
                }
            })?;
            toml::from_str::<Config>(&raw)
                .map_err(|err| ConfigParseError::ParseFailed { path, err })?
        } else {
            // Every field carries a serde default, so a missing file just means "defaults"
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }
    /// Checks the parts of the configuration serde can't, and computes the defaults whose
    /// computation can fail.
    fn validate(&mut self) -> Result<(), ConfigParseError> {
        match &self.log_directory {
            Some(dir) if dir.is_dir() => {}
            Some(dir) => {
                return Err(ConfigParseError::InvalidLogDir { path: dir.clone() });
            }
            None => {
                let proj_dirs = ProjectDirs::from("org", "easel", "easel")
                    .ok_or(ConfigParseError::NoProjectDirs)?;
                let log_dir = proj_dirs.data_dir().join("logs");
                // No-op when the directory already exists
                std::fs::create_dir_all(&log_dir).map_err(|err| {
                    ConfigParseError::CreateDefaultLogDirFailed {
                        path: log_dir.clone(),
                        err,
                    }
                })?;
                // Logging isn't up yet, so tell the terminal directly
                println!("Logging to: {log_dir:#?}");
                self.log_directory = Some(log_dir);
            }
        }
        Ok(())
    }
}
