use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_CONFIG: &str = "surface.yaml";
pub const DEFAULT_DATABASE: &str = "surface.sqlite";
pub const DEFAULT_FILTERS: &str = "filters.json";

#[derive(Debug, Default, Deserialize, Clone)]
pub struct CollectConfig {
    pub directories: Option<Vec<PathBuf>>,
    pub hash: Option<bool>,
    pub workers: Option<usize>,
    pub registry_keys: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct MonitorConfig {
    pub directories: Option<Vec<PathBuf>>,
    pub duration_secs: Option<u64>,
    pub interrogate: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct Config {
    pub database: Option<PathBuf>,
    pub filters: Option<PathBuf>,
    /// `text` or `json`.
    pub log_format: Option<String>,
    pub collect: Option<CollectConfig>,
    pub monitor: Option<MonitorConfig>,
}

impl Config {
    pub fn database(&self) -> PathBuf {
        self.database.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE))
    }

    pub fn filters(&self) -> PathBuf {
        self.filters.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_FILTERS))
    }
}

/// Loads the YAML config. An explicit path must exist; the default
/// `./surface.yaml` is optional.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG);
            if !p.exists() {
                return Ok(Config::default());
            }
            p.to_path_buf()
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&s).with_context(|| format!("parsing {}", path.display()))
}
