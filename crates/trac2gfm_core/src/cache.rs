//! JSON files remembering what a previous run already created on GitHub.
//!
//! A configured path that is empty disables the cache: loads return `None`
//! and saves do nothing.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::CacheSection;
use crate::trac::LabelKind;

/// Trac milestone name to GitHub milestone number.
pub type MilestoneMap = BTreeMap<String, u64>;
/// Label kind to (lowercased Trac value to GitHub label name).
pub type LabelMap = BTreeMap<LabelKind, BTreeMap<String, String>>;
/// Trac ticket id to GitHub issue number.
pub type TicketMap = BTreeMap<i64, u64>;

pub fn load_mapping<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if path.as_os_str().is_empty() || !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read cache {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(None);
    }
    let mapping = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse cache {}", path.display()))?;
    debug!(path = %path.display(), "loaded mapping cache");
    Ok(Some(mapping))
}

pub fn save_mapping<T: Serialize>(path: &Path, mapping: &T) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut content =
        serde_json::to_string_pretty(mapping).context("failed to serialize mapping cache")?;
    content.push('\n');
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    debug!(path = %path.display(), "saved mapping cache");
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearCacheReport {
    pub removed: Vec<PathBuf>,
    pub missing: Vec<PathBuf>,
}

pub fn clear_cache(section: &CacheSection) -> Result<ClearCacheReport> {
    let mut report = ClearCacheReport::default();
    for path in [&section.milestones, &section.labels, &section.tickets] {
        if path.as_os_str().is_empty() {
            continue;
        }
        if path.is_file() {
            fs::remove_file(path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
            info!(path = %path.display(), "removed cache file");
            report.removed.push(path.clone());
        } else {
            report.missing.push(path.clone());
        }
    }
    Ok(report)
}
