//! Engine-wide configuration loaded from `~/.config/bx/config.toml`.
//!
//! Mirrors the shape of [`WifiPolicyMode`] and the holding queue caps used by
//! `Engine::configure`; no process-wide singleton holds this value, it is
//! carried explicitly by the `Engine` handle.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// WiFi requirement policy, applied by `Engine::require_wifi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WifiPolicyMode {
    /// Honor each task's own `requiresWiFi` flag.
    AsSetByTask,
    /// Require WiFi for every task regardless of its own flag.
    ForAllTasks,
    /// Never require WiFi.
    ForNoTasks,
}

impl Default for WifiPolicyMode {
    fn default() -> Self {
        WifiPolicyMode::AsSetByTask
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
}

/// Global configuration for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BxConfig {
    /// Maximum total concurrent transfers across all tasks.
    pub max_concurrent: usize,
    /// Maximum concurrent transfers per URL host.
    pub max_concurrent_by_host: usize,
    /// Maximum concurrent transfers per task group.
    pub max_concurrent_by_group: usize,
    /// Minimum/maximum segment count a ParallelDownloadTask may pick.
    pub min_segments: usize,
    pub max_segments: usize,
    /// Seconds to allow for request establishment before treating it as a
    /// retryable connection failure.
    pub request_timeout_secs: u64,
    /// Seconds to allow for a single attempt's total transfer.
    pub resource_timeout_secs: u64,
    pub proxy: Option<ProxyConfig>,
    pub bypass_tls_validation: bool,
    /// Allow `Last-Modified`-only resumability when no strong ETag is
    /// present. Default off.
    pub allow_weak_etag: bool,
    /// Skip a download entirely if the destination file already exists.
    pub skip_existing_files: bool,
    pub wifi_policy: WifiPolicyMode,
}

impl Default for BxConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 64,
            max_concurrent_by_host: 16,
            max_concurrent_by_group: 32,
            min_segments: 4,
            max_segments: 16,
            request_timeout_secs: 60,
            resource_timeout_secs: 4 * 3600,
            proxy: None,
            bypass_tls_validation: false,
            allow_weak_etag: false,
            skip_existing_files: false,
            wifi_policy: WifiPolicyMode::AsSetByTask,
        }
    }
}

impl BxConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn resource_timeout(&self) -> Duration {
        Duration::from_secs(self.resource_timeout_secs)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("bx")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<BxConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = BxConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: BxConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = BxConfig::default();
        assert_eq!(cfg.max_concurrent, 64);
        assert_eq!(cfg.max_concurrent_by_host, 16);
        assert_eq!(cfg.min_segments, 4);
        assert_eq!(cfg.max_segments, 16);
        assert!(!cfg.allow_weak_etag);
        assert_eq!(cfg.wifi_policy, WifiPolicyMode::AsSetByTask);
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = BxConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: BxConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.max_concurrent, cfg.max_concurrent);
        assert_eq!(parsed.max_concurrent_by_group, cfg.max_concurrent_by_group);
        assert_eq!(parsed.wifi_policy, cfg.wifi_policy);
    }

    #[test]
    fn config_toml_custom_values() {
        let toml = r#"
            max_concurrent = 8
            max_concurrent_by_host = 4
            max_concurrent_by_group = 4
            min_segments = 2
            max_segments = 32
            request_timeout_secs = 30
            resource_timeout_secs = 3600
            bypass_tls_validation = false
            allow_weak_etag = true
            skip_existing_files = true
            wifi_policy = "ForAllTasks"
        "#;
        let cfg: BxConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.max_concurrent, 8);
        assert_eq!(cfg.max_concurrent_by_host, 4);
        assert_eq!(cfg.min_segments, 2);
        assert_eq!(cfg.max_segments, 32);
        assert!(cfg.allow_weak_etag);
        assert_eq!(cfg.wifi_policy, WifiPolicyMode::ForAllTasks);
    }
}
