//! Bound WebAssembly entry point

use coracle_core::{ActionMap, CodeArtifact, EntryPoint, Error, Result};
use serde_json::Value;
use tracing::{debug, error};
use wasi_common::I32Exit;
use wasmtime::{Engine, InstancePre, Trap};

use crate::abi::{GuestExports, GuestFault, ReadFault};
use crate::context::{ActionRaised, ExecutionContextManager, ExecutionScope, InvocationContext};

/// An entry point bound inside a compiled, pre-linked module
///
/// Immutable after binding. Each `invoke` instantiates the module afresh in
/// its own execution scope.
pub struct WasmEntryPoint {
    engine: Engine,
    instance_pre: InstancePre<InvocationContext>,
    symbol: String,
    qualified_name: String,
    contexts: ExecutionContextManager,
    result_size_bytes_max: usize,
    // Keeps the materialized file alive as long as the binding
    _artifact: CodeArtifact,
}

impl WasmEntryPoint {
    pub(crate) fn new(
        engine: Engine,
        instance_pre: InstancePre<InvocationContext>,
        qualified_name: String,
        symbol: String,
        contexts: ExecutionContextManager,
        result_size_bytes_max: usize,
        artifact: CodeArtifact,
    ) -> Self {
        Self {
            engine,
            instance_pre,
            symbol,
            qualified_name,
            contexts,
            result_size_bytes_max,
            _artifact: artifact,
        }
    }

    fn run(&self, scope: &mut ExecutionScope, input: &[u8], context: &[u8]) -> Result<Value> {
        let instance = self
            .instance_pre
            .instantiate(scope.store_mut())
            .map_err(|e| self.user_failure(e, scope))?;
        let exports = GuestExports::resolve(&instance, scope.store_mut(), &self.symbol)?;

        let (input_ptr, input_len) = exports
            .write(scope.store_mut(), input)
            .map_err(|f| self.guest_fault(f, scope))?;
        let (context_ptr, context_len) = exports
            .write(scope.store_mut(), context)
            .map_err(|f| self.guest_fault(f, scope))?;

        // User code starts running here
        let packed = exports
            .entry()
            .call(
                scope.store_mut(),
                (input_ptr, input_len, context_ptr, context_len),
            )
            .map_err(|e| self.user_failure(e, scope))?;
        // User code finished running here

        exports.release(scope.store_mut(), input_ptr, input_len);
        exports.release(scope.store_mut(), context_ptr, context_len);

        let output = match exports.read(scope.store(), packed, self.result_size_bytes_max) {
            Ok(Some(output)) => output,
            Ok(None) => return Ok(Value::Null),
            Err(ReadFault::TooLarge { size, limit }) => {
                return Err(Error::ResultTooLarge { size, limit });
            }
            Err(ReadFault::OutOfBounds { ptr, len }) => {
                return Err(Error::user_code_failure(format!(
                    "the action returned an out-of-bounds result buffer at {} for {} bytes",
                    ptr, len
                )));
            }
        };

        let (output_ptr, output_len) = crate::abi::unpack(packed);
        exports.release(scope.store_mut(), output_ptr as i32, output_len as i32);

        serde_json::from_slice(&output).map_err(|e| Error::InvalidResult {
            kind: format!("invalid JSON ({})", e),
        })
    }

    fn guest_fault(&self, fault: GuestFault, scope: &ExecutionScope) -> Error {
        match fault {
            GuestFault::Trap(err) => self.user_failure(err, scope),
            GuestFault::Contract(message) => Error::user_code_failure(message),
        }
    }

    /// Unwrap a failed guest call to the underlying cause
    fn user_failure(&self, err: anyhow::Error, scope: &ExecutionScope) -> Error {
        let message = if let Some(raised) = scope.raised() {
            raised
        } else if let Some(raised) = err.downcast_ref::<ActionRaised>() {
            raised.message.clone()
        } else if let Some(exit) = err.downcast_ref::<I32Exit>() {
            format!("the action exited with status {}", exit.0)
        } else if let Some(trap) = err.downcast_ref::<Trap>() {
            match trap {
                Trap::OutOfFuel => "the action exhausted its fuel budget".to_string(),
                other => other.to_string(),
            }
        } else {
            err.root_cause().to_string()
        };

        error!(
            entry = %self.qualified_name,
            cause = %message,
            diagnostic = ?err,
            "Action failed during invocation"
        );
        Error::user_code_failure(message)
    }
}

impl EntryPoint for WasmEntryPoint {
    fn invoke(&self, input: ActionMap, context: ActionMap) -> Result<Value> {
        let input = serde_json::to_vec(&input)
            .map_err(|e| Error::internal(format!("failed to serialize input: {}", e)))?;
        let context = serde_json::to_vec(&context)
            .map_err(|e| Error::internal(format!("failed to serialize context: {}", e)))?;

        let mut scope = self.contexts.enter(&self.engine, &self.qualified_name)?;
        let result = self.run(&mut scope, &input, &context);
        drop(scope);

        debug!(entry = %self.qualified_name, ok = result.is_ok(), "Activation finished");
        result
    }
}
