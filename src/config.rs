use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}, time::Duration};

/// Runtime knobs. Merged: defaults -> user config dir -> explicit file.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound for one feature's cleanup.
    pub deactivation_timeout_ms: u64,
    /// Period of the scheduler's repeating timer.
    pub scheduler_tick_ms: u64,
    /// Quiet period before a selection change is acted on.
    pub debounce_ms: u64,
    /// How often the page URL is polled for navigation.
    pub navigation_poll_ms: u64,
    /// Selections of this many characters or fewer are not highlighted.
    pub min_search_len: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            deactivation_timeout_ms: 5_000,
            scheduler_tick_ms: 500,
            debounce_ms: 500,
            navigation_poll_ms: 1_000,
            min_search_len: 2,
        }
    }
}

/// Same shape with every field optional, so a file only overrides what it names.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PartialRuntimeConfig {
    deactivation_timeout_ms: Option<u64>,
    scheduler_tick_ms: Option<u64>,
    debounce_ms: Option<u64>,
    navigation_poll_ms: Option<u64>,
    min_search_len: Option<usize>,
}

fn merge(a: &mut RuntimeConfig, b: &PartialRuntimeConfig) {
    if let Some(v) = b.deactivation_timeout_ms { a.deactivation_timeout_ms = v; }
    if let Some(v) = b.scheduler_tick_ms { a.scheduler_tick_ms = v.max(1); }
    if let Some(v) = b.debounce_ms { a.debounce_ms = v; }
    if let Some(v) = b.navigation_poll_ms { a.navigation_poll_ms = v; }
    if let Some(v) = b.min_search_len { a.min_search_len = v; }
}

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "feature-runtime", "feature-runtime")
}

/// `<config dir>/config.toml`, if the platform has a config dir.
pub fn user_config_path() -> Option<PathBuf> {
    project_dirs().map(|p| p.config_dir().join("config.toml"))
}

impl RuntimeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let partial: PartialRuntimeConfig = toml::from_str(text).context("parse runtime config")?;
        let mut cfg = Self::default();
        merge(&mut cfg, &partial);
        Ok(cfg)
    }

    /// Loads the user config (if present) then `explicit` on top. A missing
    /// user file is fine; a missing explicit file is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(user) = user_config_path().filter(|p| p.exists()) {
            merge(&mut cfg, &read_partial(&user)?);
        }
        if let Some(path) = explicit {
            merge(&mut cfg, &read_partial(path)?);
        }
        Ok(cfg)
    }

    pub fn deactivation_timeout(&self) -> Duration { Duration::from_millis(self.deactivation_timeout_ms) }
    pub fn scheduler_tick(&self) -> Duration { Duration::from_millis(self.scheduler_tick_ms.max(1)) }
    pub fn debounce(&self) -> Duration { Duration::from_millis(self.debounce_ms) }
    pub fn navigation_poll(&self) -> Duration { Duration::from_millis(self.navigation_poll_ms) }
}

fn read_partial(path: &Path) -> Result<PartialRuntimeConfig> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parse {}", path.display()))
}
