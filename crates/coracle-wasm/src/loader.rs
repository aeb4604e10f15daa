//! WebAssembly artifact loader
//!
//! TigerStyle: Validate everything at bind time, nothing at invocation time.

use coracle_core::{
    ArtifactLoader, BoundEntryPoint, CodeArtifact, EntryDescriptor, Error, LoaderConfig, Result,
    SandboxConfig,
};
use tracing::{debug, info};
use wasmtime::{Config, Engine, Module};

use crate::abi;
use crate::context::ExecutionContextManager;
use crate::entry::WasmEntryPoint;

/// Loads WebAssembly artifacts with wasmtime
///
/// One engine is shared by every module this loader compiles.
pub struct WasmLoader {
    engine: Engine,
    contexts: ExecutionContextManager,
    result_size_bytes_max: usize,
}

impl WasmLoader {
    /// Create a loader enforcing `sandbox` on every activation
    pub fn new(loader: &LoaderConfig, sandbox: SandboxConfig) -> Result<Self> {
        let contexts = ExecutionContextManager::new(sandbox);

        let mut engine_config = Config::default();
        engine_config.wasm_backtrace_details(wasmtime::WasmBacktraceDetails::Enable);
        engine_config.consume_fuel(contexts.meters_fuel());

        let engine = Engine::new(&engine_config)
            .map_err(|e| Error::internal(format!("failed to create WASM engine: {}", e)))?;

        info!(
            memory_bytes_max = contexts.policy().memory_bytes_max,
            fuel_max = ?contexts.policy().fuel_max,
            inherit_stdio = contexts.policy().inherit_stdio,
            "WASM loader initialized"
        );

        Ok(Self {
            engine,
            contexts,
            result_size_bytes_max: loader.result_size_bytes_max,
        })
    }

    /// Create with default configuration
    pub fn with_defaults() -> Result<Self> {
        Self::new(&LoaderConfig::default(), SandboxConfig::default())
    }

    fn compile(&self, artifact: &CodeArtifact) -> Result<Module> {
        debug!(path = %artifact.path().display(), "Compiling WASM module");
        Module::from_file(&self.engine, artifact.path())
            .map_err(|e| Error::module_load_failed(format!("failed to compile module: {:#}", e)))
    }
}

/// The module's embedded name, when it has one, is its namespace
fn check_namespace(module: &Module, descriptor: &EntryDescriptor) -> Result<()> {
    match module.name() {
        Some(name) if name != descriptor.module() => Err(Error::entry_point_not_found(
            descriptor.module(),
            descriptor.symbol(),
            format!("the artifact declares module `{}`", name),
        )),
        Some(_) => Ok(()),
        None => {
            debug!(module = descriptor.module(), "Artifact is unnamed, accepting descriptor module");
            Ok(())
        }
    }
}

impl ArtifactLoader for WasmLoader {
    fn name(&self) -> &'static str {
        "wasm"
    }

    fn bind(&self, artifact: CodeArtifact, descriptor: &EntryDescriptor) -> Result<BoundEntryPoint> {
        let module = self.compile(&artifact)?;
        check_namespace(&module, descriptor)?;
        abi::validate_exports(&module, descriptor)?;

        let linker = self.contexts.linker(&self.engine)?;
        let instance_pre = linker
            .instantiate_pre(&module)
            .map_err(|e| Error::module_load_failed(format!("failed to link module: {:#}", e)))?;

        info!(entry = %descriptor, "Entry point bound");

        let entry = WasmEntryPoint::new(
            self.engine.clone(),
            instance_pre,
            descriptor.to_string(),
            descriptor.symbol().to_string(),
            self.contexts.clone(),
            self.result_size_bytes_max,
            artifact,
        );
        Ok(BoundEntryPoint::new(descriptor.clone(), Box::new(entry)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coracle_core::{load_action, ActionMap};
    use serde_json::{json, Value};

    fn loader() -> WasmLoader {
        WasmLoader::new(
            &LoaderConfig::default(),
            SandboxConfig::default().without_stdio(),
        )
        .unwrap()
    }

    fn bind(loader: &WasmLoader, wat: &str, descriptor: &str) -> Result<BoundEntryPoint> {
        let artifact = CodeArtifact::materialize(wat.as_bytes(), None)?;
        loader.bind(artifact, &EntryDescriptor::parse(descriptor)?)
    }

    fn map(value: Value) -> ActionMap {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    /// Bump allocator plus an entry echoing one of its two buffers
    fn echo_module(name: &str, echo_context: bool) -> String {
        let (ptr, len) = if echo_context {
            ("$cp", "$cl")
        } else {
            ("$ip", "$il")
        };
        format!(
            r#"(module ${name}
                (memory (export "memory") 1)
                (global $heap (mut i32) (i32.const 4096))
                (func (export "alloc") (param $len i32) (result i32)
                  (local $ptr i32)
                  (local.set $ptr (global.get $heap))
                  (global.set $heap (i32.add (global.get $heap) (local.get $len)))
                  (local.get $ptr))
                (func (export "invoke")
                  (param $ip i32) (param $il i32) (param $cp i32) (param $cl i32) (result i64)
                  (i64.or
                    (i64.shl (i64.extend_i32_u (local.get {ptr})) (i64.const 32))
                    (i64.extend_i32_u (local.get {len})))))"#
        )
    }

    const SUPPORT: &str = r#"
        (memory (export "memory") 1)
        (func (export "alloc") (param i32) (result i32) (i32.const 4096))
    "#;

    #[test]
    fn test_echo_round_trip() {
        let loader = loader();
        let bound = bind(&loader, &echo_module("pkg.Echo", false), "pkg.Echo#invoke").unwrap();

        let out = bound
            .invoke(map(json!({"k": "v"})), map(json!({"activation_id": "a1"})))
            .unwrap();
        assert_eq!(out, json!({"k": "v"}));

        // Bound entry points serve repeated activations
        let again = bound.invoke(map(json!({"n": 2})), ActionMap::new()).unwrap();
        assert_eq!(again, json!({"n": 2}));
    }

    #[test]
    fn test_context_reaches_entry_point() {
        let loader = loader();
        let bound = bind(&loader, &echo_module("pkg.Ctx", true), "pkg.Ctx#invoke").unwrap();

        let out = bound
            .invoke(ActionMap::new(), map(json!({"clusterName": "east"})))
            .unwrap();
        assert_eq!(out, json!({"clusterName": "east"}));
    }

    #[test]
    fn test_module_name_mismatch_not_found() {
        let loader = loader();
        let err = bind(&loader, &echo_module("pkg.Echo", false), "pkg.Other#invoke").unwrap_err();
        assert!(matches!(err, Error::EntryPointNotFound { .. }));
        assert!(err.to_string().contains("pkg.Echo"));
    }

    #[test]
    fn test_unnamed_module_accepts_any_namespace() {
        let loader = loader();
        let wat = format!(
            r#"(module {SUPPORT}
                (func (export "main") (param i32 i32 i32 i32) (result i64) (i64.const 0)))"#
        );
        let bound = bind(&loader, &wat, "anything.at.All").unwrap();
        assert_eq!(bound.descriptor().symbol(), "main");
        assert_eq!(bound.invoke(ActionMap::new(), ActionMap::new()).unwrap(), Value::Null);
    }

    #[test]
    fn test_garbage_artifact_fails_load() {
        let loader = loader();
        let err = bind(&loader, "this is not a module", "pkg.Impl").unwrap_err();
        assert!(matches!(err, Error::ModuleLoadFailed { .. }));
    }

    #[test]
    fn test_unresolvable_import_fails_load() {
        let loader = loader();
        let wat = format!(
            r#"(module
                (import "env" "host_secret" (func (result i32)))
                {SUPPORT}
                (func (export "main") (param i32 i32 i32 i32) (result i64) (i64.const 0)))"#
        );
        let err = bind(&loader, &wat, "pkg.Impl").unwrap_err();
        assert!(matches!(err, Error::ModuleLoadFailed { .. }));
        assert!(err.to_string().contains("link"));
    }

    #[test]
    fn test_trap_becomes_user_failure() {
        let loader = loader();
        let wat = format!(
            r#"(module {SUPPORT}
                (func (export "main") (param i32 i32 i32 i32) (result i64) unreachable))"#
        );
        let bound = bind(&loader, &wat, "pkg.Impl").unwrap();

        let err = bound.invoke(ActionMap::new(), ActionMap::new()).unwrap_err();
        match err {
            Error::UserCodeFailure { message } => assert!(message.contains("unreachable")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_raise_carries_guest_message() {
        let loader = loader();
        let wat = r#"(module
            (import "coracle" "raise" (func $raise (param i32 i32)))
            (memory (export "memory") 1)
            (data (i32.const 1024) "division by zero")
            (func (export "alloc") (param i32) (result i32) (i32.const 4096))
            (func (export "main") (param i32 i32 i32 i32) (result i64)
              (call $raise (i32.const 1024) (i32.const 16))
              unreachable))"#;
        let bound = bind(&loader, wat, "pkg.Impl").unwrap();

        let err = bound.invoke(ActionMap::new(), ActionMap::new()).unwrap_err();
        assert!(matches!(err, Error::UserCodeFailure { ref message } if message == "division by zero"));
    }

    #[test]
    fn test_fuel_exhaustion_is_user_failure() {
        let loader = WasmLoader::new(
            &LoaderConfig::default(),
            SandboxConfig::default().with_fuel(10_000).without_stdio(),
        )
        .unwrap();
        let wat = format!(
            r#"(module {SUPPORT}
                (func (export "main") (param i32 i32 i32 i32) (result i64)
                  (loop $spin (br $spin))
                  (i64.const 0)))"#
        );
        let bound = bind(&loader, &wat, "pkg.Impl").unwrap();

        let err = bound.invoke(ActionMap::new(), ActionMap::new()).unwrap_err();
        assert!(matches!(err, Error::UserCodeFailure { ref message } if message.contains("fuel")));
    }

    #[test]
    fn test_result_limit_enforced() {
        let loader = WasmLoader::new(
            &LoaderConfig {
                result_size_bytes_max: 4,
                ..Default::default()
            },
            SandboxConfig::default().without_stdio(),
        )
        .unwrap();
        let bound = bind(&loader, &echo_module("pkg.Echo", false), "pkg.Echo#invoke").unwrap();

        let err = bound
            .invoke(map(json!({"long": "payload"})), ActionMap::new())
            .unwrap_err();
        assert!(matches!(err, Error::ResultTooLarge { limit: 4, .. }));
    }

    #[test]
    fn test_load_action_from_base64() {
        use base64::Engine as _;
        let loader = loader();
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(echo_module("pkg.Echo", false));

        let bound =
            load_action(&loader, &encoded, "pkg.Echo#invoke", &LoaderConfig::default()).unwrap();
        let out = bound.invoke(map(json!({"a": [1, 2]})), ActionMap::new()).unwrap();
        assert_eq!(out, json!({"a": [1, 2]}));
    }
}
