//! Settings snapshots and the stores they are fetched from and persisted to.

use anyhow::{Context, Result};
use async_trait::async_trait;
use notify::{recommended_watcher, Event, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::{Path, PathBuf}};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::project_dirs;

/// Persisted state of one feature.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureSetting {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub enabled: bool,
}

impl FeatureSetting {
    pub fn enabled(enabled: bool) -> Self {
        Self { value: None, enabled }
    }

    pub fn with_value(enabled: bool, value: impl Into<String>) -> Self {
        Self { value: Some(value.into()), enabled }
    }
}

/// Feature name -> setting.
pub type SettingsSnapshot = BTreeMap<String, FeatureSetting>;

/// Where snapshots come from. `persist` receives only changed entries and
/// merges them over what is stored.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn fetch(&self) -> Result<SettingsSnapshot>;
    async fn persist(&self, changes: &SettingsSnapshot) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<SettingsSnapshot>,
}

impl MemoryStore {
    pub fn new(initial: SettingsSnapshot) -> Self {
        Self { inner: RwLock::new(initial) }
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn fetch(&self) -> Result<SettingsSnapshot> { Ok(self.inner.read().clone()) }
    async fn persist(&self, changes: &SettingsSnapshot) -> Result<()> {
        self.inner.write().extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }
    async fn clear(&self) -> Result<()> {
        self.inner.write().clear();
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct SettingsFile {
    features: SettingsSnapshot,
}

/// TOML-backed store:
///
/// ```toml
/// [features.text-highlight]
/// enabled = true
/// value = '{"excludeSelf":false}'
/// ```
///
/// [`TomlFileStore::watch`] reloads the file on change and broadcasts the new snapshot.
pub struct TomlFileStore {
    path: PathBuf,
    tx: broadcast::Sender<SettingsSnapshot>,
    watcher: Mutex<Option<notify::RecommendedWatcher>>,
}

impl TomlFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), tx: broadcast::channel(16).0, watcher: Mutex::new(None) }
    }

    /// `<data dir>/settings.toml`.
    pub fn default_path() -> Result<PathBuf> {
        let dirs = project_dirs().context("no data directory on this platform")?;
        Ok(dirs.data_dir().join("settings.toml"))
    }

    pub fn path(&self) -> &Path { &self.path }

    pub fn subscribe(&self) -> broadcast::Receiver<SettingsSnapshot> { self.tx.subscribe() }

    fn read(path: &Path) -> Result<SettingsSnapshot> {
        if !path.exists() { return Ok(SettingsSnapshot::new()); }
        let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let file: SettingsFile = toml::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
        Ok(file.features)
    }

    fn write(&self, features: SettingsSnapshot) -> Result<()> {
        if let Some(dir) = self.path.parent() { fs::create_dir_all(dir)?; }
        let text = toml::to_string_pretty(&SettingsFile { features }).context("serialize settings")?;
        fs::write(&self.path, text).with_context(|| format!("write {}", self.path.display()))?;
        Ok(())
    }

    /// Starts watching the file's directory. Idempotent.
    pub fn watch(&self) -> Result<()> {
        let mut slot = self.watcher.lock();
        if slot.is_some() { return Ok(()); }
        let path = self.path.clone();
        let tx = self.tx.clone();
        let mut watcher = recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else { return };
            if !event.paths.iter().any(|p| p.file_name() == path.file_name()) { return; }
            match TomlFileStore::read(&path) {
                Ok(snapshot) => {
                    debug!(path = %path.display(), entries = snapshot.len(), "settings reloaded");
                    let _ = tx.send(snapshot);
                }
                Err(err) => warn!(path = %path.display(), "ignoring unreadable settings: {err:#}"),
            }
        })?;
        let dir = self.path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
        fs::create_dir_all(dir)?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        *slot = Some(watcher);
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for TomlFileStore {
    async fn fetch(&self) -> Result<SettingsSnapshot> { Self::read(&self.path) }

    async fn persist(&self, changes: &SettingsSnapshot) -> Result<()> {
        let mut merged = Self::read(&self.path)?;
        merged.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.write(merged)
    }

    async fn clear(&self) -> Result<()> { self.write(SettingsSnapshot::new()) }
}
