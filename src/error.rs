use std::time::Duration;

use thiserror::Error;

/// A feature value or settings file that cannot be applied.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for feature '{feature}': {reason}")]
    InvalidValue { feature: String, reason: String },
    #[error("invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },
    #[error("feature '{0}' does not take a value")]
    NotConfigurable(String),
    #[error("settings file {path}: {reason}")]
    Settings { path: String, reason: String },
}

impl ConfigError {
    pub fn invalid_value(feature: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidValue { feature: feature.into(), reason: reason.to_string() }
    }
}

/// Failures recorded in a feature's stats. Never propagated past the runtime.
#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("should_run failed: {0:#}")]
    ShouldRun(anyhow::Error),
    #[error("run failed: {0:#}")]
    Run(anyhow::Error),
    #[error("cleanup failed: {0:#}")]
    Cleanup(anyhow::Error),
    #[error("{phase} panicked: {message}")]
    Panicked { phase: &'static str, message: String },
    #[error("cleanup did not finish within {0:?}")]
    DeactivationTimeout(Duration),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("feature '{0}' is already registered")]
    DuplicateFeature(String),
    #[error("unknown feature '{0}'")]
    UnknownFeature(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A scheduled task's work rejected. Logged per tick, never stops the scheduler.
#[derive(Debug, Error)]
#[error("scheduled task '{task}' failed: {error:#}")]
pub struct SchedulerError {
    pub task: String,
    pub error: anyhow::Error,
}

/// Renders a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".into()
    }
}
