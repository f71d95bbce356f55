// feature-runtime/src/runtime.rs

use anyhow::anyhow;
use chrono::Utc;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::{panic::AssertUnwindSafe, sync::{Arc, Weak}, time::Duration};
use tracing::{debug, info, warn};

use crate::{
    config::RuntimeConfig,
    error::{panic_message, FeatureError, RuntimeError},
    feature::{Feature, FeatureContext, FeatureDescriptor, FeatureKind, FeatureStats, Phase},
    page::Page,
    scheduler::{Scheduler, TaskHandle},
    settings::{FeatureSetting, SettingsSnapshot},
};

pub const NAVIGATION_TASK: &str = "navigation";

#[derive(Clone, Debug)]
struct FeatureState {
    enabled: bool,
    value: Option<String>,
    stats: FeatureStats,
}

#[derive(Clone)]
struct Slot {
    feature: Arc<dyn Feature>,
    state: Arc<Mutex<FeatureState>>,
}

impl Slot {
    fn name(&self) -> &'static str { self.feature.name() }

    fn fail(&self, phase: Phase, err: &FeatureError) {
        warn!(feature = self.name(), ?phase, "{err}");
        self.state.lock().stats.record_failure(phase, err.to_string());
    }
}

/// Owns every registered feature and drives their run/cleanup lifecycle.
/// Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    config: RuntimeConfig,
    page: Page,
    scheduler: Scheduler,
    slots: RwLock<Vec<Slot>>,
    // Serializes whole passes so two features never mutate the page at once.
    pass: tokio::sync::Mutex<()>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig, page: Page) -> Self {
        let scheduler = Scheduler::new(config.scheduler_tick());
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                page,
                scheduler,
                slots: RwLock::new(Vec::new()),
                pass: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig { &self.inner.config }
    pub fn page(&self) -> &Page { &self.inner.page }
    pub fn scheduler(&self) -> &Scheduler { &self.inner.scheduler }

    /// Builds a feature with access to this runtime and registers it. A second
    /// feature with an already registered name is logged and ignored.
    pub fn register_feature<F, T>(&self, constructor: F) -> Result<(), RuntimeError>
    where
        F: FnOnce(&Runtime) -> T,
        T: Feature + 'static,
    {
        let feature: Arc<dyn Feature> = Arc::new(constructor(self));
        let name = feature.name();
        let mut slots = self.inner.slots.write();
        if slots.iter().any(|s| s.name() == name) {
            tracing::error!(feature = name, "duplicate feature registration ignored");
            return Err(RuntimeError::DuplicateFeature(name.into()));
        }
        let value = match feature.kind() {
            FeatureKind::Toggle => None,
            FeatureKind::Configurable { default } => Some(default),
        };
        let state = FeatureState { enabled: feature.default_enabled(), value, stats: FeatureStats::default() };
        debug!(feature = name, priority = feature.priority(), "feature registered");
        slots.push(Slot { feature, state: Arc::new(Mutex::new(state)) });
        Ok(())
    }

    pub fn feature_names(&self) -> Vec<&'static str> {
        self.inner.slots.read().iter().map(Slot::name).collect()
    }

    fn slot(&self, name: &str) -> Option<Slot> {
        self.inner.slots.read().iter().find(|s| s.name() == name).cloned()
    }

    pub fn descriptor(&self, name: &str) -> Option<FeatureDescriptor> {
        self.slot(name).map(|s| describe(&s))
    }

    pub fn descriptors(&self) -> Vec<FeatureDescriptor> {
        self.inner.slots.read().iter().map(describe).collect()
    }

    /// Current settings of every feature, in the shape the settings store persists.
    pub fn snapshot(&self) -> SettingsSnapshot {
        self.inner
            .slots
            .read()
            .iter()
            .map(|s| {
                let st = s.state.lock();
                (s.name().to_string(), FeatureSetting { value: st.value.clone(), enabled: st.enabled })
            })
            .collect()
    }

    /// Applies `snapshot` and re-runs the features it affects: those never run,
    /// those whose enabled flag or value differs, and those the snapshot omits.
    /// With `suppress_run` the state is applied without running anything.
    /// Returns the names of the affected features.
    pub async fn reconcile(&self, snapshot: &SettingsSnapshot, suppress_run: bool) -> Vec<String> {
        let slots = self.inner.slots.read().clone();
        let mut affected = Vec::new();
        for slot in &slots {
            if apply_setting(slot, snapshot.get(slot.name())) {
                affected.push(slot.name().to_string());
            }
        }
        debug!(?affected, suppress_run, "settings reconciled");
        if !suppress_run && !affected.is_empty() {
            self.run(Some(&affected)).await;
        }
        affected
    }

    /// Re-runs every feature.
    pub async fn run_all(&self) {
        self.run(None).await;
    }

    /// Cycles the named features (all when `None`) in ascending priority:
    /// bounded cleanup, then `should_run` and `run` if enabled. Failures are
    /// recorded per feature and never stop the pass.
    pub async fn run(&self, only: Option<&[String]>) {
        let _pass = self.inner.pass.lock().await;
        let mut slots: Vec<Slot> = self
            .inner
            .slots
            .read()
            .iter()
            .filter(|s| only.is_none_or(|names| names.iter().any(|n| n == s.name())))
            .cloned()
            .collect();
        slots.sort_by_key(|s| s.feature.priority());
        for slot in &slots {
            self.cycle(slot).await;
        }
    }

    async fn cycle(&self, slot: &Slot) {
        let name = slot.name();
        self.deactivate(slot).await;

        let (enabled, value) = {
            let st = slot.state.lock();
            (st.enabled, st.value.clone())
        };
        if !enabled {
            debug!(feature = name, "disabled; cleaned up only");
            return;
        }

        let ctx = FeatureContext { page: self.inner.page.clone(), value };
        let applies = std::panic::catch_unwind(AssertUnwindSafe(|| slot.feature.should_run(&ctx)));
        match applies {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                debug!(feature = name, "not applicable to this page");
                return;
            }
            Ok(Err(e)) => return slot.fail(Phase::ShouldRun, &FeatureError::ShouldRun(e)),
            Err(p) => {
                let err = FeatureError::Panicked { phase: "should_run", message: panic_message(p.as_ref()) };
                return slot.fail(Phase::ShouldRun, &err);
            }
        }

        {
            let mut st = slot.state.lock();
            st.stats.last_run_time = Some(Utc::now());
            st.stats.run_times += 1;
        }
        match AssertUnwindSafe(slot.feature.run(&ctx)).catch_unwind().await {
            Ok(Ok(())) => info!(feature = name, "feature running"),
            Ok(Err(e)) => slot.fail(Phase::Run, &FeatureError::Run(e)),
            Err(p) => {
                let err = FeatureError::Panicked { phase: "run", message: panic_message(p.as_ref()) };
                slot.fail(Phase::Run, &err);
            }
        }
    }

    /// Cleanup bounded by the deactivation timeout. A cleanup still pending at
    /// the deadline is dropped and recorded as failed.
    async fn deactivate(&self, slot: &Slot) {
        let limit = self.inner.config.deactivation_timeout();
        let cleanup = AssertUnwindSafe(slot.feature.cleanup()).catch_unwind();
        match tokio::time::timeout(limit, cleanup).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => slot.fail(Phase::Cleanup, &FeatureError::Cleanup(e)),
            Ok(Err(p)) => {
                let err = FeatureError::Panicked { phase: "cleanup", message: panic_message(p.as_ref()) };
                slot.fail(Phase::Cleanup, &err);
            }
            Err(_) => slot.fail(Phase::Cleanup, &FeatureError::DeactivationTimeout(limit)),
        }
    }

    /// Validates, canonicalizes and applies one feature's setting, then
    /// re-runs that feature. Returns the entry to hand to the settings store.
    pub async fn update_setting(
        &self,
        name: &str,
        enabled: bool,
        value: Option<&str>,
    ) -> Result<SettingsSnapshot, RuntimeError> {
        let slot = self.slot(name).ok_or_else(|| RuntimeError::UnknownFeature(name.into()))?;
        let value = value.map(|v| slot.feature.format(v)).transpose()?;
        let setting = {
            let mut st = slot.state.lock();
            st.enabled = enabled;
            if value.is_some() {
                st.value = value;
            }
            FeatureSetting { value: st.value.clone(), enabled }
        };
        self.run(Some(&[name.to_string()])).await;
        Ok(SettingsSnapshot::from([(name.to_string(), setting)]))
    }

    /// Forgets every setting: features go back to their defaults and re-run.
    pub async fn clear_settings(&self) {
        for slot in self.inner.slots.read().iter() {
            let mut st = slot.state.lock();
            st.enabled = slot.feature.default_enabled();
            st.value = match slot.feature.kind() {
                FeatureKind::Toggle => None,
                FeatureKind::Configurable { default } => Some(default),
            };
        }
        self.run_all().await;
    }

    /// Polls the page URL every `interval` and re-runs every feature when it
    /// changes. The task holds the runtime weakly and ends with it.
    pub fn watch_navigation(&self, interval: Duration) -> TaskHandle {
        let weak: Weak<RuntimeInner> = Arc::downgrade(&self.inner);
        let gone = weak.clone();
        let last_url = Arc::new(Mutex::new(self.inner.page.url()));
        self.inner.scheduler.add(
            NAVIGATION_TASK,
            interval,
            move || {
                let weak = weak.clone();
                let last_url = last_url.clone();
                async move {
                    let inner = weak.upgrade().ok_or_else(|| anyhow!("runtime dropped"))?;
                    let runtime = Runtime { inner };
                    let url = runtime.page().url();
                    let changed = {
                        let mut last = last_url.lock();
                        let changed = *last != url;
                        *last = url.clone();
                        changed
                    };
                    if changed {
                        info!(%url, "navigation detected; re-running features");
                        runtime.run_all().await;
                    }
                    Ok(())
                }
            },
            Some(Arc::new(move || gone.strong_count() == 0)),
        )
    }

    /// Stops the scheduler and cleans up every feature.
    pub async fn shutdown(&self) {
        self.inner.scheduler.stop_all();
        let _pass = self.inner.pass.lock().await;
        let slots = self.inner.slots.read().clone();
        for slot in &slots {
            self.deactivate(slot).await;
        }
        info!(features = slots.len(), "runtime shut down");
    }
}

/// Applies one snapshot entry to a feature. Returns whether it must re-run.
fn apply_setting(slot: &Slot, setting: Option<&FeatureSetting>) -> bool {
    let Some(setting) = setting else { return true };
    let mut st = slot.state.lock();
    let mut changed = st.stats.last_run_time.is_none() || st.enabled != setting.enabled;
    st.enabled = setting.enabled;
    if let Some(value) = setting.value.as_deref() {
        match slot.feature.kind() {
            FeatureKind::Toggle => debug!(feature = slot.name(), "value ignored for toggle feature"),
            FeatureKind::Configurable { .. } if st.value.as_deref() == Some(value) => {}
            FeatureKind::Configurable { .. } => match slot.feature.validate(value) {
                Ok(()) => {
                    st.value = Some(value.to_string());
                    changed = true;
                }
                Err(err) => {
                    let err = FeatureError::from(err);
                    warn!(feature = slot.name(), "{err}; keeping previous value");
                    st.stats.record_failure(Phase::Configure, err.to_string());
                }
            },
        }
    }
    changed
}

fn describe(slot: &Slot) -> FeatureDescriptor {
    let st = slot.state.lock();
    FeatureDescriptor {
        name: slot.name().into(),
        description: slot.feature.description().into(),
        kind: slot.feature.kind(),
        enabled: st.enabled,
        value: st.value.clone(),
        priority: slot.feature.priority(),
        stats: st.stats.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy, PartialEq)]
    enum Mode { Fine, FailRun, PanicRun, FailShouldRun, HangCleanup, FailCleanup, NotApplicable }

    struct Dummy {
        name: &'static str,
        priority: i32,
        mode: Mode,
        configurable: bool,
        log: Arc<Mutex<Vec<String>>>,
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Feature for Dummy {
        fn name(&self) -> &'static str { self.name }
        fn priority(&self) -> i32 { self.priority }
        fn kind(&self) -> FeatureKind {
            if self.configurable {
                FeatureKind::Configurable { default: "0".into() }
            } else {
                FeatureKind::Toggle
            }
        }
        fn validate(&self, value: &str) -> Result<(), crate::error::ConfigError> {
            value.parse::<u32>().map(|_| ()).map_err(|e| crate::error::ConfigError::invalid_value(self.name, e))
        }
        fn should_run(&self, _: &FeatureContext) -> anyhow::Result<bool> {
            match self.mode {
                Mode::FailShouldRun => anyhow::bail!("cannot decide"),
                Mode::NotApplicable => Ok(false),
                _ => Ok(true),
            }
        }
        async fn run(&self, ctx: &FeatureContext) -> anyhow::Result<()> {
            self.log.lock().push(format!("run {} {:?}", self.name, ctx.value));
            self.runs.fetch_add(1, Ordering::SeqCst);
            match self.mode {
                Mode::FailRun => anyhow::bail!("run broke"),
                Mode::PanicRun => panic!("run exploded"),
                _ => Ok(()),
            }
        }
        async fn cleanup(&self) -> anyhow::Result<()> {
            self.log.lock().push(format!("cleanup {}", self.name));
            match self.mode {
                Mode::HangCleanup => futures::future::pending().await,
                Mode::FailCleanup => anyhow::bail!("cleanup broke"),
                _ => Ok(()),
            }
        }
    }

    struct Harness {
        rt: Runtime,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Harness {
        fn new() -> Self {
            let page = Page::new("https://example.com/", Document::new());
            Self { rt: Runtime::new(RuntimeConfig::default(), page), log: Arc::new(Mutex::new(Vec::new())) }
        }

        fn add(&self, name: &'static str, priority: i32, mode: Mode, configurable: bool) -> Arc<AtomicUsize> {
            let runs = Arc::new(AtomicUsize::new(0));
            let (log, r) = (self.log.clone(), runs.clone());
            self.rt
                .register_feature(move |_| Dummy { name, priority, mode, configurable, log, runs: r })
                .unwrap();
            runs
        }

        fn take_log(&self) -> Vec<String> { std::mem::take(&mut *self.log.lock()) }
    }

    fn setting(enabled: bool, value: Option<&str>) -> FeatureSetting {
        FeatureSetting { value: value.map(str::to_string), enabled }
    }

    #[tokio::test]
    async fn runs_in_priority_order() {
        let h = Harness::new();
        h.add("late", 5, Mode::Fine, false);
        h.add("early", -1, Mode::Fine, false);
        h.add("middle", 0, Mode::Fine, false);
        h.rt.run_all().await;
        assert_eq!(
            h.take_log(),
            ["cleanup early", "run early None", "cleanup middle", "run middle None", "cleanup late", "run late None"]
        );
    }

    #[tokio::test]
    async fn duplicate_registration_is_ignored() {
        let h = Harness::new();
        h.add("same", 0, Mode::Fine, false);
        let (log, runs) = (h.log.clone(), Arc::new(AtomicUsize::new(0)));
        let err = h
            .rt
            .register_feature(move |_| Dummy { name: "same", priority: 9, mode: Mode::Fine, configurable: false, log, runs })
            .unwrap_err();
        assert!(matches!(err, RuntimeError::DuplicateFeature(n) if n == "same"));
        assert_eq!(h.rt.feature_names(), ["same"]);
        assert_eq!(h.rt.descriptor("same").unwrap().priority, 0);
    }

    #[tokio::test]
    async fn reconcile_selects_exactly_the_changed_features() {
        let h = Harness::new();
        let keep = h.add("keep", 0, Mode::Fine, true);
        let flip = h.add("flip", 0, Mode::Fine, false);
        let revalue = h.add("revalue", 0, Mode::Fine, true);
        let absent = h.add("absent", 0, Mode::Fine, false);

        let mut snap = SettingsSnapshot::new();
        snap.insert("keep".into(), setting(true, Some("1")));
        snap.insert("flip".into(), setting(true, None));
        snap.insert("revalue".into(), setting(true, Some("1")));
        // Everything has never run, so everything is affected the first time.
        assert_eq!(h.rt.reconcile(&snap, false).await, ["keep", "flip", "revalue", "absent"]);

        snap.insert("flip".into(), setting(false, None));
        snap.insert("revalue".into(), setting(true, Some("2")));
        let affected = h.rt.reconcile(&snap, false).await;
        assert_eq!(affected, ["flip", "revalue", "absent"]);
        assert_eq!(keep.load(Ordering::SeqCst), 1);
        assert_eq!(flip.load(Ordering::SeqCst), 1);
        assert_eq!(revalue.load(Ordering::SeqCst), 2);
        assert_eq!(absent.load(Ordering::SeqCst), 2);
        assert!(!h.rt.descriptor("flip").unwrap().enabled);
        assert_eq!(h.rt.descriptor("revalue").unwrap().value.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn entry_without_value_keeps_the_current_value() {
        let h = Harness::new();
        let runs = h.add("tuned", 0, Mode::Fine, true);
        let tuned = SettingsSnapshot::from([("tuned".to_string(), setting(true, Some("5")))]);
        assert_eq!(h.rt.reconcile(&tuned, false).await, ["tuned"]);

        let bare = SettingsSnapshot::from([("tuned".to_string(), setting(true, None))]);
        assert!(h.rt.reconcile(&bare, false).await.is_empty());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(h.rt.descriptor("tuned").unwrap().value.as_deref(), Some("5"));

        // Flipping the flag still re-runs, and the value is carried along.
        let off = SettingsSnapshot::from([("tuned".to_string(), setting(false, None))]);
        assert_eq!(h.rt.reconcile(&off, false).await, ["tuned"]);
        assert_eq!(h.rt.snapshot()["tuned"], setting(false, Some("5")));
    }

    #[tokio::test]
    async fn reconcile_can_apply_without_running() {
        let h = Harness::new();
        let runs = h.add("quiet", 0, Mode::Fine, true);
        let snap = SettingsSnapshot::from([("quiet".to_string(), setting(false, Some("7")))]);
        assert_eq!(h.rt.reconcile(&snap, true).await, ["quiet"]);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(h.take_log().is_empty());
        let d = h.rt.descriptor("quiet").unwrap();
        assert!(!d.enabled);
        assert_eq!(d.value.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn invalid_value_is_rejected_and_recorded() {
        let h = Harness::new();
        h.add("strict", 0, Mode::Fine, true);
        let snap = SettingsSnapshot::from([("strict".to_string(), setting(true, Some("nope")))]);
        h.rt.reconcile(&snap, false).await;
        let d = h.rt.descriptor("strict").unwrap();
        assert_eq!(d.value.as_deref(), Some("0"));
        assert_eq!(d.stats.failures.len(), 1);
        assert_eq!(d.stats.failures[0].phase, Phase::Configure);
    }

    #[tokio::test]
    async fn failures_are_isolated_per_feature() {
        let h = Harness::new();
        h.add("a-fails", 0, Mode::FailRun, false);
        h.add("b-panics", 1, Mode::PanicRun, false);
        h.add("c-undecided", 2, Mode::FailShouldRun, false);
        h.add("d-cleanup", 3, Mode::FailCleanup, false);
        let fine = h.add("e-fine", 4, Mode::Fine, false);
        h.rt.run_all().await;
        assert_eq!(fine.load(Ordering::SeqCst), 1);

        let phases = |n: &str| -> Vec<Phase> {
            h.rt.descriptor(n).unwrap().stats.failures.iter().map(|f| f.phase).collect()
        };
        assert_eq!(phases("a-fails"), [Phase::Run]);
        assert_eq!(phases("b-panics"), [Phase::Run]);
        assert_eq!(phases("c-undecided"), [Phase::ShouldRun]);
        assert_eq!(phases("d-cleanup"), [Phase::Cleanup]);
        assert!(phases("e-fine").is_empty());
        assert_eq!(h.rt.descriptor("c-undecided").unwrap().stats.run_times, 0);
        assert_eq!(h.rt.descriptor("d-cleanup").unwrap().stats.run_times, 1);
    }

    #[tokio::test]
    async fn inapplicable_feature_is_not_counted() {
        let h = Harness::new();
        let runs = h.add("elsewhere", 0, Mode::NotApplicable, false);
        h.rt.run_all().await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        let d = h.rt.descriptor("elsewhere").unwrap();
        assert_eq!(d.stats.run_times, 0);
        assert!(d.stats.last_run_time.is_none());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn hung_cleanup_times_out_and_run_proceeds() {
        let h = Harness::new();
        let runs = h.add("stuck", 0, Mode::HangCleanup, false);
        let started = tokio::time::Instant::now();
        h.rt.run_all().await;
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(5) && waited < Duration::from_secs(6), "{waited:?}");
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let failures = h.rt.descriptor("stuck").unwrap().stats.failures;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].phase, Phase::Cleanup);
        assert!(failures[0].message.contains("5s"), "{}", failures[0].message);
    }

    #[tokio::test]
    async fn disabled_feature_is_only_cleaned_up() {
        let h = Harness::new();
        let runs = h.add("off", 0, Mode::Fine, false);
        let snap = SettingsSnapshot::from([("off".to_string(), setting(false, None))]);
        h.rt.reconcile(&snap, false).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(h.take_log(), ["cleanup off"]);
    }

    #[tokio::test]
    async fn update_setting_formats_and_returns_the_change() {
        let h = Harness::new();
        let runs = h.add("tune", 0, Mode::Fine, true);
        h.add("toggle", 0, Mode::Fine, false);
        let change = h.rt.update_setting("tune", true, Some("42")).await.unwrap();
        assert_eq!(change["tune"], setting(true, Some("42")));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(matches!(
            h.rt.update_setting("tune", true, Some("x")).await,
            Err(RuntimeError::Config(_))
        ));
        assert!(matches!(
            h.rt.update_setting("missing", true, None).await,
            Err(RuntimeError::UnknownFeature(_))
        ));
        assert_eq!(h.rt.snapshot()["toggle"], setting(true, None));

        h.rt.clear_settings().await;
        assert_eq!(h.rt.snapshot()["tune"], setting(true, Some("0")));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn navigation_triggers_a_full_rerun() {
        let h = Harness::new();
        let runs = h.add("nav", 0, Mode::Fine, false);
        h.rt.run_all().await;
        let task = h.rt.watch_navigation(Duration::from_millis(1_000));
        tokio::time::sleep(Duration::from_millis(1_200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        h.rt.page().navigate("https://example.com/next");
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        task.stop();
        h.rt.page().navigate("https://example.com/again");
        tokio::time::sleep(Duration::from_millis(3_000)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn shutdown_cleans_everything() {
        let h = Harness::new();
        h.add("x", 0, Mode::Fine, false);
        h.add("y", 1, Mode::Fine, false);
        let _task = h.rt.watch_navigation(Duration::from_secs(1));
        h.rt.shutdown().await;
        assert!(!h.rt.scheduler().is_running());
        assert_eq!(h.take_log(), ["cleanup x", "cleanup y"]);
    }
}
