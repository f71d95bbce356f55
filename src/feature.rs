// feature-runtime/src/feature.rs

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, page::Page};

/// Whether a feature carries a configuration value besides its on/off switch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureKind {
    Toggle,
    Configurable { default: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase { Configure, ShouldRun, Run, Cleanup }

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailureRecord {
    pub at: DateTime<Utc>,
    pub phase: Phase,
    pub message: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FeatureStats {
    pub last_run_time: Option<DateTime<Utc>>,
    pub run_times: u64,
    pub failures: Vec<FailureRecord>,
}

impl FeatureStats {
    pub fn record_failure(&mut self, phase: Phase, message: impl Into<String>) {
        self.failures.push(FailureRecord { at: Utc::now(), phase, message: message.into() });
    }
}

/// Snapshot of one registered feature, for diagnostics and the settings UI.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeatureDescriptor {
    pub name: String,
    pub description: String,
    pub kind: FeatureKind,
    pub enabled: bool,
    pub value: Option<String>,
    pub priority: i32,
    pub stats: FeatureStats,
}

/// What a feature sees when it is asked to run.
#[derive(Clone, Debug)]
pub struct FeatureContext {
    pub page: Page,
    pub value: Option<String>,
}

/// A toggleable page behavior.
///
/// `run` must register every side effect with a [`Teardown`] so that
/// `cleanup` can undo it; `cleanup` must be safe without a prior `run`.
#[async_trait]
pub trait Feature: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str { "" }
    fn kind(&self) -> FeatureKind { FeatureKind::Toggle }
    /// Lower runs first.
    fn priority(&self) -> i32 { 0 }
    fn default_enabled(&self) -> bool { true }

    /// Whether the feature applies to the current page. No side effects.
    fn should_run(&self, ctx: &FeatureContext) -> Result<bool>;
    async fn run(&self, ctx: &FeatureContext) -> Result<()>;
    async fn cleanup(&self) -> Result<()>;

    fn validate(&self, value: &str) -> Result<(), ConfigError> {
        let _ = value;
        match self.kind() {
            FeatureKind::Toggle => Err(ConfigError::NotConfigurable(self.name().into())),
            FeatureKind::Configurable { .. } => Ok(()),
        }
    }

    /// Canonical form of `value` for persistence.
    fn format(&self, value: &str) -> Result<String, ConfigError> {
        self.validate(value)?;
        Ok(value.to_string())
    }
}

type Action = Box<dyn FnOnce() + Send>;

/// Queue of undo actions. Actions run in registration order, each exactly once.
#[derive(Default)]
pub struct Teardown {
    actions: Mutex<Vec<Action>>,
}

impl Teardown {
    pub fn new() -> Self { Self::default() }

    pub fn push(&self, action: impl FnOnce() + Send + 'static) {
        self.actions.lock().push(Box::new(action));
    }

    /// Runs and forgets every queued action. Returns how many ran.
    pub fn drain(&self) -> usize {
        let actions = std::mem::take(&mut *self.actions.lock());
        let n = actions.len();
        for action in actions {
            action();
        }
        n
    }

    pub fn len(&self) -> usize { self.actions.lock().len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}
