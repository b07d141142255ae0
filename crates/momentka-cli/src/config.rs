//! CLI configuration: defaults, then an optional TOML file, then
//! `MOMENTKA_*` environment variables, each layer overriding the last.

use momentka_core::MATCH_DISTANCE_THRESHOLD;
use momentka_store::DEFAULT_FETCH_TIMEOUT_SECS;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite event database.
    pub db_path: PathBuf,
    /// Root directory of the blob host.
    pub blob_dir: PathBuf,
    /// Directory for cached media lists and viewer history.
    pub cache_dir: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// HTTP base under which blobs are published; `file://` URLs when unset.
    pub blob_base_url: Option<String>,
    /// HTTP base from which missing model files can be downloaded.
    pub model_base_url: Option<String>,
    /// V4L2 device used for reference selfies.
    pub camera_device: String,
    /// Descriptor distance below which a face counts as a match.
    pub match_threshold: f32,
    /// Per-request timeout for media downloads, in seconds.
    pub fetch_timeout_secs: u64,
}

/// On-disk config shape. Everything is optional; absent keys fall back to
/// the defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    blob_dir: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    blob_base_url: Option<String>,
    model_base_url: Option<String>,
    camera_device: Option<String>,
    match_threshold: Option<f32>,
    fetch_timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration. An explicitly given file must exist; the default
    /// location (`~/.config/momentka/config.toml`) is optional.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match explicit_path {
            Some(path) => read_file(path)?,
            None => {
                let path = default_config_path();
                if path.exists() {
                    read_file(&path)?
                } else {
                    FileConfig::default()
                }
            }
        };
        Ok(Self::from_layers(file))
    }

    fn from_layers(file: FileConfig) -> Self {
        let data_dir = default_data_dir();
        let mut config = Self {
            db_path: file.db_path.unwrap_or_else(|| data_dir.join("events.db")),
            blob_dir: file.blob_dir.unwrap_or_else(|| data_dir.join("blobs")),
            cache_dir: file.cache_dir.unwrap_or_else(|| data_dir.join("cache")),
            model_dir: file.model_dir.unwrap_or_else(|| data_dir.join("models")),
            blob_base_url: file.blob_base_url,
            model_base_url: file.model_base_url,
            camera_device: file
                .camera_device
                .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
            match_threshold: file.match_threshold.unwrap_or(MATCH_DISTANCE_THRESHOLD),
            fetch_timeout_secs: file.fetch_timeout_secs.unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS),
        };
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("MOMENTKA_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("MOMENTKA_BLOB_DIR") {
            self.blob_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("MOMENTKA_CACHE_DIR") {
            self.cache_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("MOMENTKA_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("MOMENTKA_BLOB_BASE_URL") {
            self.blob_base_url = Some(v);
        }
        if let Ok(v) = std::env::var("MOMENTKA_MODEL_BASE_URL") {
            self.model_base_url = Some(v);
        }
        if let Ok(v) = std::env::var("MOMENTKA_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        self.match_threshold = env_f32("MOMENTKA_MATCH_THRESHOLD", self.match_threshold);
        self.fetch_timeout_secs = env_u64("MOMENTKA_FETCH_TIMEOUT_SECS", self.fetch_timeout_secs);
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("momentka")
}

fn default_config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        })
        .join("momentka/config.toml")
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
