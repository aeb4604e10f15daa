//! Coracle WASM Loader
//!
//! Binds an action's entry point inside a WebAssembly artifact and runs it
//! in a per-activation sandbox.
//!
//! TigerStyle: Secure sandboxed execution with explicit resource limits.
//!
//! # Overview
//!
//! Provides:
//! - wasmtime integration for loading the uploaded module
//! - Bind-time validation of the entry point's signature
//! - A fresh store and instance per activation (no shared mutable state)
//! - WASI with no environment, arguments or preopened directories
//! - Memory and optional fuel limits
//!
//! # Guest ABI
//!
//! ```wat
//! ;; Linear memory shared with the host
//! (export "memory" (memory 1))
//!
//! ;; Allocate a buffer the host writes JSON into
//! (export "alloc" (func $alloc (param i32) (result i32)))
//!
//! ;; Optional: release a buffer
//! (export "dealloc" (func $dealloc (param i32 i32)))
//!
//! ;; Entry point named by the descriptor's symbol.
//! ;; Input: [input_ptr, input_len, context_ptr, context_len], both JSON objects
//! ;; Output: (output_ptr << 32) | output_len pointing at JSON, or 0 for null
//! (export "invoke" (func $invoke (param i32 i32 i32 i32) (result i64)))
//!
//! ;; Optional import: raise an exception with a UTF-8 message
//! (import "coracle" "raise" (func $raise (param i32 i32)))
//! ```

mod abi;
mod context;
mod entry;
mod loader;

pub use abi::{
    ALLOC_EXPORT, ALLOC_SIGNATURE, DEALLOC_EXPORT, DEALLOC_SIGNATURE, ENTRY_SIGNATURE,
    HOST_IMPORT_MODULE, HOST_RAISE_FUNCTION, MEMORY_EXPORT,
};
pub use context::{ExecutionContextManager, ExecutionScope, InvocationContext};
pub use entry::WasmEntryPoint;
pub use loader::WasmLoader;
