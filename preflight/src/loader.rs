//! Module loading as an injected capability.
//!
//! The engine never imports modules itself; it depends on the
//! [`ModuleLoader`] trait, which maps a descriptor to an asynchronous
//! artifact fetch. This keeps the core testable without a real module
//! system and supports swapping in network-simulating or mock loaders.
//!
//! The trait uses a boxed future return type so loaders can be held as
//! trait objects behind `Arc<dyn ModuleLoader>`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use thiserror::Error;

use crate::registry::{ModuleDescriptor, ModuleId};

/// A successfully loaded module artifact.
///
/// Owned by the cache after a successful load; callers receive it behind
/// an `Arc` and never mutate it.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedModule {
    /// Id of the loaded module.
    pub id: ModuleId,
    /// Raw artifact payload.
    pub payload: Bytes,
    /// Payload size in bytes.
    pub size_bytes: u64,
}

impl LoadedModule {
    /// Wrap a payload as a loaded artifact.
    pub fn new(id: ModuleId, payload: Bytes) -> Self {
        let size_bytes = payload.len() as u64;
        Self {
            id,
            payload,
            size_bytes,
        }
    }
}

/// Errors surfaced by module loading.
///
/// `Clone` because a failed load is observed by every subscriber of the
/// shared in-flight future.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LoadError {
    /// Preload requested for an id the registry does not know.
    #[error("unknown module: {0}")]
    UnknownModule(ModuleId),

    /// The underlying fetch failed.
    #[error("fetch failed for {id}: {message}")]
    Fetch { id: ModuleId, message: String },

    /// The engine was torn down while the load was pending.
    #[error("load cancelled for {0}")]
    Cancelled(ModuleId),
}

impl LoadError {
    /// The module the error is about.
    pub fn module(&self) -> &ModuleId {
        match self {
            LoadError::UnknownModule(id) => id,
            LoadError::Fetch { id, .. } => id,
            LoadError::Cancelled(id) => id,
        }
    }
}

/// Capability mapping a module descriptor to an asynchronous fetch.
pub trait ModuleLoader: Send + Sync {
    /// Fetch the artifact for `descriptor`.
    fn load(&self, descriptor: &ModuleDescriptor) -> BoxFuture<'static, Result<LoadedModule, LoadError>>;

    /// Human-readable loader name for logs.
    fn name(&self) -> &'static str {
        "loader"
    }
}

/// Test and simulation loader with configurable latency, payloads and
/// failure injection.
///
/// By default every load succeeds immediately with a payload sized from
/// the descriptor's estimate (minimum 1 byte, so cache accounting always
/// moves).
#[derive(Debug, Default)]
pub struct MockLoader {
    latency: RwLock<HashMap<ModuleId, Duration>>,
    failures: RwLock<HashSet<ModuleId>>,
    payload_sizes: RwLock<HashMap<ModuleId, usize>>,
    fetches: AtomicU64,
}

impl MockLoader {
    /// Create a loader that succeeds instantly for every id.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add artificial latency for one id.
    pub fn with_latency(self, id: impl Into<ModuleId>, latency: Duration) -> Self {
        self.latency.write().insert(id.into(), latency);
        self
    }

    /// Make loads of one id fail.
    pub fn with_failure(self, id: impl Into<ModuleId>) -> Self {
        self.failures.write().insert(id.into());
        self
    }

    /// Fix the payload size for one id.
    pub fn with_payload_size(self, id: impl Into<ModuleId>, bytes: usize) -> Self {
        self.payload_sizes.write().insert(id.into(), bytes);
        self
    }

    /// Stop failing loads for an id (for retry tests).
    pub fn clear_failure(&self, id: &ModuleId) {
        self.failures.write().remove(id);
    }

    /// Number of fetches actually started (the dedup invariant's witness).
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

impl ModuleLoader for MockLoader {
    fn load(&self, descriptor: &ModuleDescriptor) -> BoxFuture<'static, Result<LoadedModule, LoadError>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let id = descriptor.id.clone();
        let latency = self.latency.read().get(&id).copied();
        let fail = self.failures.read().contains(&id);
        let size = self
            .payload_sizes
            .read()
            .get(&id)
            .copied()
            .unwrap_or_else(|| (descriptor.estimated_size_bytes as usize).max(1));

        Box::pin(async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            if fail {
                return Err(LoadError::Fetch {
                    id,
                    message: "injected failure".to_string(),
                });
            }
            Ok(LoadedModule::new(id, Bytes::from(vec![0u8; size])))
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ModuleDescriptor;

    #[tokio::test]
    async fn test_mock_loader_success() {
        let loader = MockLoader::new().with_payload_size("hero", 128);
        let desc = ModuleDescriptor::new("hero", "/modules/hero.js");
        let loaded = loader.load(&desc).await.expect("load");
        assert_eq!(loaded.size_bytes, 128);
        assert_eq!(loader.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_loader_failure_and_clear() {
        let loader = MockLoader::new().with_failure("flaky");
        let desc = ModuleDescriptor::new("flaky", "/modules/flaky.js");
        let err = loader.load(&desc).await.expect_err("must fail");
        assert!(matches!(err, LoadError::Fetch { .. }));

        loader.clear_failure(&"flaky".into());
        assert!(loader.load(&desc).await.is_ok());
    }

    #[tokio::test]
    async fn test_payload_size_defaults_to_estimate() {
        let loader = MockLoader::new();
        let desc = ModuleDescriptor::new("sized", "/modules/sized.js").with_estimated_size(64);
        let loaded = loader.load(&desc).await.expect("load");
        assert_eq!(loaded.size_bytes, 64);
    }
}
