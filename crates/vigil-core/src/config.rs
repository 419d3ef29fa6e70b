//! Configuration for both daemons.
//!
//! A single TOML file configures the watch-path set, the pattern and syslog
//! paths, the shared queue file, the key material, and the mutable-name
//! label. Everything not listed here is a compile-time constant next to the
//! code that uses it. A missing config file means defaults; a malformed one
//! is an error.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Errors from loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// A required directory could not be created.
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        /// Directory path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Filesystem paths both daemons agree on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Backing file of the shared event queue.
    #[serde(default = "default_queue_file")]
    pub queue_file: PathBuf,

    /// Scratch directory for envelope files.
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,

    /// Pattern word list, one substring per line.
    #[serde(default = "default_pattern_file")]
    pub pattern_file: PathBuf,

    /// System log file the agent tails.
    #[serde(default = "default_syslog")]
    pub syslog: PathBuf,

    /// Directories watched for deletions (non-recursive).
    #[serde(default = "default_watch_paths")]
    pub watch_paths: Vec<PathBuf>,
}

fn default_queue_file() -> PathBuf {
    PathBuf::from("tmp/event_queue_shm")
}

fn default_tmp_dir() -> PathBuf {
    PathBuf::from("tmp")
}

fn default_pattern_file() -> PathBuf {
    PathBuf::from("patterns.txt")
}

fn default_syslog() -> PathBuf {
    PathBuf::from("/var/log/syslog")
}

fn default_watch_paths() -> Vec<PathBuf> {
    match std::env::var_os("HOME") {
        Some(home) => {
            let home = PathBuf::from(home);
            vec![home.join("Documents"), PathBuf::from("/etc"), home.join("Desktop")]
        }
        None => vec![PathBuf::from("/etc"), PathBuf::from("/tmp")],
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            queue_file: default_queue_file(),
            tmp_dir: default_tmp_dir(),
            pattern_file: default_pattern_file(),
            syslog: default_syslog(),
            watch_paths: default_watch_paths(),
        }
    }
}

/// Key material for the hybrid encryptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    /// PEM-encoded RSA public key used to wrap batch keys.
    #[serde(default = "default_public_key")]
    pub public_key: PathBuf,

    /// Matching private key. Never read by the daemons; kept here so
    /// verification tooling and operators find it in one place.
    #[serde(default = "default_private_key")]
    pub private_key: PathBuf,
}

fn default_public_key() -> PathBuf {
    PathBuf::from("keys/public.pem")
}

fn default_private_key() -> PathBuf {
    PathBuf::from("keys/private.pem")
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            public_key: default_public_key(),
            private_key: default_private_key(),
        }
    }
}

/// Mutable-name (IPNS) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpfsConfig {
    /// Label of the local name key the chain head is published under.
    #[serde(default = "default_key_label")]
    pub key_label: String,

    /// TTL in seconds passed to name publishes.
    #[serde(default)]
    pub publish_ttl_secs: u64,

    /// Whether publishes may proceed without DHT connectivity.
    #[serde(default = "default_allow_offline")]
    pub allow_offline: bool,

    /// Resolver timeout in seconds for the bootstrap lookup.
    #[serde(default = "default_resolve_timeout")]
    pub resolve_timeout_secs: u64,
}

fn default_key_label() -> String {
    "log-agent".to_string()
}

const fn default_allow_offline() -> bool {
    true
}

const fn default_resolve_timeout() -> u64 {
    5
}

impl Default for IpfsConfig {
    fn default() -> Self {
        Self {
            key_label: default_key_label(),
            publish_ttl_secs: 0,
            allow_offline: default_allow_offline(),
            resolve_timeout_secs: default_resolve_timeout(),
        }
    }
}

/// Top-level configuration shared by the agent and the reader.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Filesystem paths.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Key material.
    #[serde(default)]
    pub keys: KeysConfig,

    /// Mutable-name settings.
    #[serde(default)]
    pub ipfs: IpfsConfig,
}

impl Config {
    /// Loads the config file, or defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Creates the directories the daemons write into: the scratch dir and
    /// the queue file's parent.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        let mut dirs = vec![self.paths.tmp_dir.clone()];
        if let Some(parent) = self.paths.queue_file.parent() {
            if !parent.as_os_str().is_empty() {
                dirs.push(parent.to_path_buf());
            }
        }
        for dir in dirs {
            std::fs::create_dir_all(&dir).map_err(|source| ConfigError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Path of the envelope scratch file inside the tmp dir.
    #[must_use]
    pub fn envelope_path(&self) -> PathBuf {
        self.paths.tmp_dir.join("log_batch.json.enc")
    }
}
