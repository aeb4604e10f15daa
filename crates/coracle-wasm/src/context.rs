//! Execution context manager
//!
//! TigerStyle: Explicit per-call context, no process-wide swaps.
//!
//! Every activation runs in its own [`ExecutionScope`]: a fresh store whose
//! data carries the sandbox (WASI with nothing of the host exposed, memory
//! and fuel limits) plus a tracing span entered on the current thread.
//! Dropping the scope tears the store down and restores the span that was
//! active before, on every exit path.

use coracle_core::{Error, Result, SandboxConfig};
use tracing::span::EnteredSpan;
use tracing::{debug, info_span};
use wasi_cap_std_sync::WasiCtxBuilder;
use wasi_common::WasiCtx;
use wasmtime::{Caller, Engine, Extern, Linker, Store, StoreLimits, StoreLimitsBuilder};

use crate::abi::{HOST_IMPORT_MODULE, HOST_RAISE_FUNCTION, RAISE_MESSAGE_BYTES_MAX};

/// Exception raised by guest code through `coracle.raise`
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub(crate) struct ActionRaised {
    pub(crate) message: String,
}

/// Host-side state of one activation's store
pub struct InvocationContext {
    wasi: WasiCtx,
    limits: StoreLimits,
    raised: Option<String>,
}

impl InvocationContext {
    /// Message of the exception the guest raised, if any
    pub fn raised(&self) -> Option<&str> {
        self.raised.as_deref()
    }
}

/// Builds linkers and per-activation scopes under one sandbox policy
#[derive(Debug, Clone)]
pub struct ExecutionContextManager {
    policy: SandboxConfig,
}

impl ExecutionContextManager {
    /// Create a manager enforcing `policy`
    pub fn new(policy: SandboxConfig) -> Self {
        debug_assert!(policy.memory_bytes_max > 0);
        Self { policy }
    }

    /// Sandbox policy in force
    pub fn policy(&self) -> &SandboxConfig {
        &self.policy
    }

    /// Whether the engine must meter fuel for this policy
    pub fn meters_fuel(&self) -> bool {
        self.policy.fuel_max.is_some()
    }

    /// Linker holding everything an artifact may import
    ///
    /// Only WASI and the `coracle` host module are defined; an artifact sees
    /// nothing else of the host.
    pub fn linker(&self, engine: &Engine) -> Result<Linker<InvocationContext>> {
        let mut linker: Linker<InvocationContext> = Linker::new(engine);

        wasmtime_wasi::add_to_linker(&mut linker, |cx: &mut InvocationContext| &mut cx.wasi)
            .map_err(|e| Error::internal(format!("failed to add WASI to linker: {}", e)))?;

        linker
            .func_wrap(
                HOST_IMPORT_MODULE,
                HOST_RAISE_FUNCTION,
                |mut caller: Caller<'_, InvocationContext>,
                 ptr: i32,
                 len: i32|
                 -> anyhow::Result<()> {
                    let message = read_guest_message(&mut caller, ptr, len)
                        .unwrap_or_else(|| "the action raised an unreadable error".to_string());
                    caller.data_mut().raised = Some(message.clone());
                    Err(anyhow::Error::new(ActionRaised { message }))
                },
            )
            .map_err(|e| Error::internal(format!("failed to define host import: {}", e)))?;

        Ok(linker)
    }

    /// Open the isolated scope for one activation
    pub fn enter(&self, engine: &Engine, entry: &str) -> Result<ExecutionScope> {
        let span = info_span!("sandbox", entry = %entry).entered();

        let wasi = if self.policy.inherit_stdio {
            WasiCtxBuilder::new().inherit_stdout().inherit_stderr().build()
        } else {
            WasiCtxBuilder::new().build()
        };

        let limits = StoreLimitsBuilder::new()
            .memory_size(self.policy.memory_bytes_max)
            .build();

        let mut store = Store::new(
            engine,
            InvocationContext {
                wasi,
                limits,
                raised: None,
            },
        );
        store.limiter(|cx| &mut cx.limits);

        if let Some(fuel) = self.policy.fuel_max {
            store
                .set_fuel(fuel)
                .map_err(|e| Error::internal(format!("failed to set fuel: {}", e)))?;
        }

        debug!(
            memory_bytes_max = self.policy.memory_bytes_max,
            fuel_max = ?self.policy.fuel_max,
            "Execution scope entered"
        );

        Ok(ExecutionScope {
            store,
            _span: span,
        })
    }
}

fn read_guest_message(caller: &mut Caller<'_, InvocationContext>, ptr: i32, len: i32) -> Option<String> {
    let memory = caller.get_export("memory").and_then(Extern::into_memory)?;
    let len = (len as u32 as usize).min(RAISE_MESSAGE_BYTES_MAX);
    let mut buf = vec![0u8; len];
    memory.read(&*caller, ptr as u32 as usize, &mut buf).ok()?;
    Some(String::from_utf8_lossy(&buf).into_owned())
}

/// One activation's store and span
///
/// Not `Send`: the scope lives and dies on the worker thread that entered it.
pub struct ExecutionScope {
    // Dropped before the span so teardown is still attributed to the activation
    store: Store<InvocationContext>,
    _span: EnteredSpan,
}

impl ExecutionScope {
    /// Store of this activation
    pub fn store(&self) -> &Store<InvocationContext> {
        &self.store
    }

    /// Mutable store of this activation
    pub fn store_mut(&mut self) -> &mut Store<InvocationContext> {
        &mut self.store
    }

    /// Exception message raised by the guest in this scope, if any
    pub fn raised(&self) -> Option<String> {
        self.store.data().raised().map(str::to_string)
    }
}

impl Drop for ExecutionScope {
    fn drop(&mut self) {
        debug!("Execution scope released");
    }
}
