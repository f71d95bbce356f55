pub mod config;
pub mod debounce;
pub mod dom;
pub mod error;
pub mod feature;
pub mod highlight;
pub mod page;
pub mod runtime;
pub mod scheduler;
pub mod selector;
pub mod settings;
pub mod walker;

pub use config::RuntimeConfig;
pub use debounce::Debouncer;
pub use dom::{Document, NodeId, NodeSpec};
pub use error::{ConfigError, FeatureError, RuntimeError, SchedulerError};
pub use feature::{Feature, FeatureContext, FeatureDescriptor, FeatureKind, FeatureStats, Phase, Teardown};
pub use highlight::{HighlightEngine, HighlightOptions, TextHighlightFeature};
pub use page::{Page, Point, Selection};
pub use runtime::Runtime;
pub use scheduler::{Scheduler, TaskHandle};
pub use selector::SelectorList;
pub use settings::{FeatureSetting, MemoryStore, SettingsSnapshot, SettingsStore, TomlFileStore};
