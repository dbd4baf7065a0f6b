//! Preflight - predictive module preloading for interactive applications.
//!
//! The crate predicts which UI modules a session will need next and loads
//! them ahead of demand, bounded by device capability and a budgeted
//! artifact cache. The pieces:
//!
//! - [`registry`]: module descriptors, priorities and the registry.
//! - [`graph`]: the dependency graph and its hierarchy levels.
//! - [`profile`]: environment probing and the derived operating mode.
//! - [`usage`]: the interaction ring buffer and usage patterns.
//! - [`predict`]: confidence-scored predictions from usage and routes.
//! - [`viewport`]: scroll-proximity triggers for observed placeholders.
//! - [`cache`]: the value-scored, budgeted artifact cache.
//! - [`scheduler`]: deduplicated loads, bootstrap and tiered rollout.
//! - [`metrics`]: session metrics and the report.
//! - [`engine`]: the facade wiring everything together.
//!
//! Most applications only touch [`engine::PreloadEngine`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use preflight::engine::{EngineConfig, PreloadEngine};
//! use preflight::loader::MockLoader;
//! use preflight::profile::StaticProbe;
//! use preflight::registry::{ModuleDescriptor, ModulePriority};
//!
//! # async fn run() {
//! let engine = PreloadEngine::start(
//!     Arc::new(MockLoader::new()),
//!     Arc::new(StaticProbe::default()),
//!     EngineConfig::default(),
//! );
//! engine.register_module(
//!     ModuleDescriptor::new("app-shell", "/modules/app-shell.js")
//!         .with_priority(ModulePriority::Critical),
//! );
//! tokio::spawn(Arc::clone(&engine).run_startup());
//! engine.critical_ready().await;
//! # }
//! ```

pub mod cache;
pub mod engine;
pub mod graph;
pub mod loader;
pub mod metrics;
pub mod predict;
pub mod profile;
pub mod registry;
pub mod scheduler;
pub mod usage;
pub mod viewport;

pub use engine::{EngineConfig, PreloadEngine};
pub use loader::{LoadError, LoadedModule, ModuleLoader};
pub use registry::{ModuleDescriptor, ModuleId, ModulePriority};
pub use scheduler::{LoadFailure, PreloadOptions};
