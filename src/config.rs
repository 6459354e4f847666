//! Layered configuration (A1): defaults -> `rhinobox.toml` on disk ->
//! `RHINOBOX_*` environment overrides. Follows the same
//! read-or-create-defaults discipline as the teacher's `AppConfig::load_from`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{RhinoError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineUrls {
    pub relational: Option<String>,
    pub document: Option<String>,
}

impl Default for EngineUrls {
    fn default() -> Self {
        Self {
            relational: None,
            document: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub l1_capacity: usize,
    pub l1_ttl_secs: u64,
    pub l2_expected_items: usize,
    pub l2_target_fpr: f64,
    pub schema_cache_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_capacity: 1024,
            l1_ttl_secs: 300,
            l2_expected_items: 100_000,
            l2_target_fpr: 0.01,
            schema_cache_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    pub worker_count: usize,
    pub channel_capacity: usize,
    pub max_retries: u32,
    pub retention: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus(),
            channel_capacity: 256,
            max_retries: 3,
            retention: 200,
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RhinoConfig {
    pub data_dir: PathBuf,
    pub bind_addr: String,
    pub max_upload_bytes: u64,
    pub max_versions: u32,
    pub auth_enabled: bool,
    pub log_level: String,
    pub engines: EngineUrls,
    pub cache: CacheConfig,
    pub jobs: JobsConfig,
}

impl Default for RhinoConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./rhinobox-data"),
            bind_addr: "127.0.0.1:7878".to_string(),
            max_upload_bytes: 5 * 1024 * 1024 * 1024, // 5 GiB
            max_versions: 20,
            auth_enabled: false,
            log_level: "info".to_string(),
            engines: EngineUrls::default(),
            cache: CacheConfig::default(),
            jobs: JobsConfig::default(),
        }
    }
}

impl RhinoConfig {
    /// Load from `<data_dir>/../rhinobox.toml`, applying environment
    /// overrides afterwards. Writes defaults to disk if no file exists yet.
    pub fn load(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        let config_path = Self::config_path(&data_dir);

        let mut config = if config_path.exists() {
            info!(path = %config_path.display(), "loading config");
            let raw = fs::read_to_string(&config_path)
                .map_err(|e| RhinoError::Config(format!("reading {}: {e}", config_path.display())))?;
            toml::from_str(&raw)
                .map_err(|e| RhinoError::Config(format!("parsing {}: {e}", config_path.display())))?
        } else {
            warn!(path = %config_path.display(), "no config found, writing defaults");
            let mut config = Self::default();
            config.data_dir = data_dir.clone();
            config.save()?;
            config
        };

        config.data_dir = data_dir;
        config.apply_env_overrides();
        Ok(config)
    }

    fn config_path(data_dir: &Path) -> PathBuf {
        data_dir
            .parent()
            .unwrap_or(data_dir)
            .join("rhinobox.toml")
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path(&self.data_dir);
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self)
            .map_err(|e| RhinoError::Config(format!("serializing config: {e}")))?;
        let tmp_path = config_path.with_extension("toml.tmp");
        fs::write(&tmp_path, raw)?;
        fs::rename(&tmp_path, &config_path)?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("RHINOBOX_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Ok(v) = std::env::var("RHINOBOX_MAX_UPLOAD_BYTES") {
            if let Ok(n) = v.parse() {
                self.max_upload_bytes = n;
            }
        }
        if let Ok(v) = std::env::var("RHINOBOX_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("RHINOBOX_AUTH_ENABLED") {
            self.auth_enabled = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("RHINOBOX_RELATIONAL_URL") {
            self.engines.relational = Some(v);
        }
        if let Ok(v) = std::env::var("RHINOBOX_DOCUMENT_URL") {
            self.engines.document = Some(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let config = RhinoConfig::load(&data_dir).unwrap();
        assert_eq!(config.data_dir, data_dir);
        assert!(dir.path().join("rhinobox.toml").exists());
    }

    #[test]
    fn env_override_applies() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("RHINOBOX_BIND_ADDR", "0.0.0.0:9999");
        let config = RhinoConfig::load(dir.path().join("data")).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9999");
        std::env::remove_var("RHINOBOX_BIND_ADDR");
    }
}
