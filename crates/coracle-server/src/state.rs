//! Server state management
//!
//! TigerStyle: One write, many reads, no torn state.
//!
//! The runtime is either uninitialized or holds exactly one bound entry
//! point. The entry point is published through a `OnceLock`, so `/run`
//! observes either nothing or the complete value. Initialization attempts
//! serialize on an async gate: the first to bind wins, a failed attempt
//! leaves the state untouched and a later `/init` may try again.

use crate::markers::{ActivationMarkers, MarkerSink, StdStreams};
use coracle_core::{ArtifactLoader, BoundEntryPoint, CoracleConfig, Error, Result};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;

/// The process-wide action slot
#[derive(Debug, Default)]
pub struct RuntimeState {
    bound: OnceLock<Arc<BoundEntryPoint>>,
    init_gate: Mutex<()>,
}

impl RuntimeState {
    /// Create an uninitialized runtime
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an entry point has been bound
    pub fn is_initialized(&self) -> bool {
        self.bound.get().is_some()
    }

    /// The bound entry point, if initialization succeeded
    pub fn entry_point(&self) -> Option<Arc<BoundEntryPoint>> {
        self.bound.get().cloned()
    }

    /// Run `bind` and publish its entry point, at most once per process
    ///
    /// `bind` is only called when no entry point is bound yet, and never by
    /// two callers at the same time. Returns `AlreadyInitialized` when another
    /// caller won.
    pub async fn initialize<F, Fut>(&self, bind: F) -> Result<Arc<BoundEntryPoint>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<BoundEntryPoint>>,
    {
        if self.is_initialized() {
            return Err(Error::AlreadyInitialized);
        }

        let _gate = self.init_gate.lock().await;
        if self.is_initialized() {
            return Err(Error::AlreadyInitialized);
        }

        let bound = Arc::new(bind().await?);
        self.bound
            .set(Arc::clone(&bound))
            .map_err(|_| Error::AlreadyInitialized)?;

        debug_assert!(self.is_initialized());
        Ok(bound)
    }
}

/// Server-wide shared state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// The single action this process hosts
    runtime: RuntimeState,
    /// Loader used by `/init`
    loader: Arc<dyn ArtifactLoader>,
    /// Effective configuration
    config: CoracleConfig,
    /// Where activation markers go
    markers: Arc<dyn MarkerSink>,
    /// Activations started since boot
    activations: AtomicU64,
}

impl AppState {
    /// Create server state around an artifact loader
    ///
    /// Activation markers go to stdout and stderr.
    pub fn new(config: CoracleConfig, loader: Arc<dyn ArtifactLoader>) -> Self {
        Self::with_marker_sink(config, loader, Arc::new(StdStreams))
    }

    /// Create server state writing activation markers to `markers`
    pub fn with_marker_sink(
        config: CoracleConfig,
        loader: Arc<dyn ArtifactLoader>,
        markers: Arc<dyn MarkerSink>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                runtime: RuntimeState::new(),
                loader,
                config,
                markers,
                activations: AtomicU64::new(0),
            }),
        }
    }

    /// Create server state loading WebAssembly artifacts
    pub fn with_wasm_loader(config: CoracleConfig) -> Result<Self> {
        let loader = coracle_wasm::WasmLoader::new(&config.loader, config.sandbox.clone())?;
        Ok(Self::new(config, Arc::new(loader)))
    }

    pub fn runtime(&self) -> &RuntimeState {
        &self.inner.runtime
    }

    pub fn loader(&self) -> Arc<dyn ArtifactLoader> {
        Arc::clone(&self.inner.loader)
    }

    pub fn config(&self) -> &CoracleConfig {
        &self.inner.config
    }

    /// Guard closing the current activation when dropped
    pub fn activation_markers(&self) -> ActivationMarkers {
        ActivationMarkers::new(Arc::clone(&self.inner.markers))
    }

    /// Number the next activation, starting at 1
    pub fn next_activation(&self) -> u64 {
        self.inner.activations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Activations started since boot
    pub fn activation_count(&self) -> u64 {
        self.inner.activations.load(Ordering::Relaxed)
    }
}
