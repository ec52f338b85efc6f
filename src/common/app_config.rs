// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<SilicaConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static SilicaConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = path.as_ref().to_path_buf();
    let cfg = SilicaConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn init_from_env_or_default() -> Result<&'static SilicaConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    let cfg = SilicaConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn config() -> Result<&'static SilicaConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("SILICA_CONFIG") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }

    let candidates = [PathBuf::from("silica.toml")];
    for p in candidates {
        if p.exists() {
            return Ok(p);
        }
    }

    Err(anyhow!(
        "missing config file: set $SILICA_CONFIG or create ./silica.toml"
    ))
}

#[derive(Clone, Deserialize)]
pub struct SilicaConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "silica=debug,hyper=off"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub clone: CloneConfig,

    #[serde(default)]
    pub debug: DebugConfig,
}

impl SilicaConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let cfg: SilicaConfig =
            toml::from_str(&s).with_context(|| format!("parse toml: {}", path.display()))?;
        Ok(cfg)
    }
}

impl Default for SilicaConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            clone: CloneConfig::default(),
            debug: DebugConfig::default(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_be_port")]
    pub be_port: u16,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_be_port() -> u16 {
    9060
}

fn default_http_port() -> u16 {
    8040
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            be_port: default_be_port(),
            http_port: default_http_port(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directories holding tablet data, one per disk.
    #[serde(default)]
    pub data_dirs: Vec<String>,

    /// A disk refuses new bulk writes once usage crosses this percentage...
    #[serde(default = "default_flood_stage_usage_percent")]
    pub flood_stage_usage_percent: u32,

    /// ...and the remaining free space is below this many bytes.
    #[serde(default = "default_flood_stage_left_capacity_bytes")]
    pub flood_stage_left_capacity_bytes: u64,
}

fn default_flood_stage_usage_percent() -> u32 {
    90
}

fn default_flood_stage_left_capacity_bytes() -> u64 {
    1 << 30
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dirs: Vec::new(),
            flood_stage_usage_percent: default_flood_stage_usage_percent(),
            flood_stage_left_capacity_bytes: default_flood_stage_left_capacity_bytes(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct CloneConfig {
    /// Pull snapshot files in grouped requests when the source supports it.
    #[serde(default)]
    pub enable_batch_download: bool,

    /// Floor transfer rate used to derive per-file download timeouts.
    #[serde(default = "default_download_low_speed_limit_kbps")]
    pub download_low_speed_limit_kbps: u64,

    /// Minimum per-file download timeout in seconds.
    #[serde(default = "default_download_low_speed_time")]
    pub download_low_speed_time: u64,

    /// Bounded retry count for every HTTP operation against the source.
    #[serde(default = "default_download_file_max_retry")]
    pub download_file_max_retry: u32,

    /// Deadline for the remote directory listing request, in seconds.
    #[serde(default = "default_list_remote_file_timeout_s")]
    pub list_remote_file_timeout_s: u64,

    /// Deadline for the content-length probe, in seconds.
    #[serde(default = "default_get_length_timeout_s")]
    pub get_length_timeout_s: u64,

    /// Number of worker threads executing clone tasks.
    #[serde(default = "default_clone_worker_count")]
    pub clone_worker_count: usize,
}

fn default_download_low_speed_limit_kbps() -> u64 {
    50
}

fn default_download_low_speed_time() -> u64 {
    300
}

fn default_download_file_max_retry() -> u32 {
    3
}

fn default_list_remote_file_timeout_s() -> u64 {
    15
}

fn default_get_length_timeout_s() -> u64 {
    10
}

fn default_clone_worker_count() -> usize {
    3
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            enable_batch_download: false,
            download_low_speed_limit_kbps: default_download_low_speed_limit_kbps(),
            download_low_speed_time: default_download_low_speed_time(),
            download_file_max_retry: default_download_file_max_retry(),
            list_remote_file_timeout_s: default_list_remote_file_timeout_s(),
            get_length_timeout_s: default_get_length_timeout_s(),
            clone_worker_count: default_clone_worker_count(),
        }
    }
}

#[derive(Clone, Default, Deserialize)]
pub struct DebugConfig {
    /// Master switch for named debug injection points.
    #[serde(default)]
    pub enable_debug_points: bool,
}

#[cfg(test)]
mod tests {
    use super::SilicaConfig;

    #[test]
    fn parse_minimal_config() {
        let cfg: SilicaConfig = toml::from_str("").expect("empty config parses");
        assert_eq!(cfg.log_level, "info");
        assert!(!cfg.clone.enable_batch_download);
        assert_eq!(cfg.clone.download_low_speed_limit_kbps, 50);
        assert_eq!(cfg.storage.flood_stage_usage_percent, 90);
    }

    #[test]
    fn parse_clone_section() {
        let cfg: SilicaConfig = toml::from_str(
            r#"
            [clone]
            enable_batch_download = true
            download_file_max_retry = 5
            "#,
        )
        .expect("clone section parses");
        assert!(cfg.clone.enable_batch_download);
        assert_eq!(cfg.clone.download_file_max_retry, 5);
        assert_eq!(cfg.clone.download_low_speed_time, 300);
    }
}
