// config.rs - Launcher and engine configuration
// Purpose: Explicit settings passed into the bootstrap routine and the API server,
//          loaded from an optional netenum.toml and overridden by CLI flags

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Config file picked up from the working directory when --config is not given
pub const DEFAULT_CONFIG_FILE: &str = "netenum.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub launcher: LauncherConfig,
    pub engine: EngineConfig,
}

/// Bootstrap launcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub log_dir: PathBuf,          // Where the per-run log file is created
    pub log_prefix: String,        // Log files are named <prefix>_<timestamp>.log
    pub env_dir: PathBuf,          // Isolated Python environment
    pub manifest: PathBuf,         // Optional requirements file
    pub entry_point: PathBuf,      // Program handed off to once setup is done
    pub python: String,            // System interpreter used to create the environment
    pub runtime_dir: PathBuf,      // Scratch directory removed on exit
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("."),
            log_prefix: "netenum".to_string(),
            env_dir: PathBuf::from("venv"),
            manifest: PathBuf::from("requirements.txt"),
            entry_point: PathBuf::from("main.py"),
            python: "python3".to_string(),
            runtime_dir: std::env::temp_dir().join("netenum"),
        }
    }
}

/// Enumeration engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub host: String,
    pub port: u16,
    pub results_file: PathBuf,
    pub scans_dir: PathBuf,
    pub scan_log_file: PathBuf,
    pub token_file: PathBuf,
    pub runtime_dir: PathBuf,
    pub port_range: String,
    pub port_scan_workers: usize,
    pub http_timeout_secs: u64,
    pub rate_limit_requests: usize,
    pub rate_limit_window_secs: u64,
    pub auth_exclude_paths: Vec<String>,
    pub token_ttl_secs: Option<u64>,   // Refuse the API token this long after startup
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            results_file: PathBuf::from("scan_results.json"),
            scans_dir: PathBuf::from("scans"),
            scan_log_file: PathBuf::from("scan_log.txt"),
            token_file: PathBuf::from("api_token.txt"),
            runtime_dir: std::env::temp_dir().join("netenum"),
            port_range: "1-65535".to_string(),
            port_scan_workers: 2,
            http_timeout_secs: 5,
            rate_limit_requests: 250,
            rate_limit_window_secs: 60,
            auth_exclude_paths: vec!["/".to_string(), "/docs".to_string(), "/api/v1/".to_string()],
            token_ttl_secs: None,
        }
    }
}

impl AppConfig {
    /// Load from an explicit path, else from ./netenum.toml if present, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }
}
