// store.rs - Scan results persistence

use crate::model::Scan;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

pub fn save_scan(scan: &Scan, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(scan)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

pub fn load_scan(path: &Path) -> Result<Scan> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid scan file {}", path.display()))
}
