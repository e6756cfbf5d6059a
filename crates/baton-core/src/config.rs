//! TOML configuration. Ambient process state (the encryption secret, the
//! job start time) is resolved by the caller and threaded through as
//! explicit values; nothing in the core reads the process environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use baton_storage::{BlobStore, RetryConfig};

use crate::checkpoint::{CheckpointOptions, CheckpointStrategy};
use crate::error::{BatonError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatonConfig {
    pub store: StoreConfig,
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub stages: StagesConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store URL: `http(s)://` for the REST store, `file://` or a bare path
    /// for a local directory store.
    pub url: String,
    /// Bearer token for the REST store.
    pub token: Option<String>,
    /// Advisory retention for uploaded artifacts.
    pub retention_days: Option<u32>,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Artifact base name; volumes are `{name}-vol001..` and the manifest
    /// `{name}-manifest`.
    pub name: String,
    #[serde(default = "defaults::chunk_size_limit")]
    pub chunk_size_limit: u64,
    #[serde(default = "defaults::max_volumes")]
    pub max_volumes: u32,
    #[serde(default = "defaults::compression_level")]
    pub compression_level: i32,
    #[serde(default)]
    pub strategy: CheckpointStrategy,
    /// Environment variable holding the encryption secret. Unset, or set to
    /// a variable that is absent at runtime, means no encryption.
    pub secret_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub working_dir: PathBuf,
    /// Full builds take the BUILD_DIST stage.
    pub full: bool,
    /// Paths (relative to the working dir) to checkpoint; empty means the
    /// whole working directory.
    pub checkpoint_paths: Vec<String>,
    /// Directory (relative to the working dir) uploaded as the final
    /// package on terminal success.
    pub package_dir: Option<String>,
    /// Hard wall-clock limit the platform imposes on one invocation.
    pub max_build_time_secs: u64,
    /// Wall-clock reserved for the post-stage checkpoint. Empirical per
    /// platform.
    pub safety_margin_secs: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("work"),
            full: false,
            checkpoint_paths: Vec::new(),
            package_dir: None,
            max_build_time_secs: 6 * 3600,
            safety_margin_secs: 30 * 60,
        }
    }
}

/// Shell commands for the executable stages. `PACKAGE` is terminal and has
/// no command; finalization uploads the package directory instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StagesConfig {
    pub init: Option<String>,
    pub build: Option<String>,
    pub build_dist: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
        }
    }
}

mod defaults {
    pub fn chunk_size_limit() -> u64 {
        2 * 1024 * 1024 * 1024
    }

    pub fn max_volumes() -> u32 {
        500
    }

    pub fn compression_level() -> i32 {
        3
    }
}

impl BatonConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BatonError::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        let config: BatonConfig = toml::from_str(&content)
            .map_err(|e| BatonError::Config(format!("invalid config {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.checkpoint.name.is_empty() {
            return Err(BatonError::Config("checkpoint.name must not be empty".into()));
        }
        if self.checkpoint.chunk_size_limit == 0 {
            return Err(BatonError::Config(
                "checkpoint.chunk_size_limit must be > 0".into(),
            ));
        }
        if self.checkpoint.max_volumes == 0 || self.checkpoint.max_volumes > 999 {
            return Err(BatonError::Config(
                "checkpoint.max_volumes must be in 1..=999".into(),
            ));
        }
        if self.build.max_build_time_secs <= self.build.safety_margin_secs {
            return Err(BatonError::Config(
                "build.max_build_time_secs must exceed build.safety_margin_secs".into(),
            ));
        }
        Ok(())
    }

    pub fn open_store(&self) -> Result<Box<dyn BlobStore>> {
        Ok(baton_storage::store_from_url(
            &self.store.url,
            self.store.token.as_deref(),
        )?)
    }

    pub fn checkpoint_options(&self) -> CheckpointOptions {
        CheckpointOptions {
            chunk_size_limit: self.checkpoint.chunk_size_limit,
            max_volumes: self.checkpoint.max_volumes,
            compression_level: self.checkpoint.compression_level,
            retention_days: self.store.retention_days,
            retry: self.store.retry.clone(),
        }
    }

    pub fn max_build_time(&self) -> Duration {
        Duration::from_secs(self.build.max_build_time_secs)
    }

    pub fn safety_margin(&self) -> Duration {
        Duration::from_secs(self.build.safety_margin_secs)
    }
}
