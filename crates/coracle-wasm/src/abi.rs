//! Guest ABI
//!
//! Names, signatures and the memory marshalling between host and guest.
//! Everything here is checked once at bind time against the module's type
//! information, then resolved per activation against the fresh instance.

use coracle_core::{EntryDescriptor, Error, Result};
use wasmtime::{ExternType, FuncType, Instance, Memory, Module, Store, TypedFunc, ValType};

use crate::context::InvocationContext;

// =============================================================================
// Names and signatures
// =============================================================================

/// Exported linear memory
pub const MEMORY_EXPORT: &str = "memory";

/// Exported allocator the host writes request buffers into
pub const ALLOC_EXPORT: &str = "alloc";

/// Optional exported deallocator
pub const DEALLOC_EXPORT: &str = "dealloc";

/// Import module of host functions offered to the guest
pub const HOST_IMPORT_MODULE: &str = "coracle";

/// Host function a guest calls to raise an exception
pub const HOST_RAISE_FUNCTION: &str = "raise";

/// Required entry point signature
pub const ENTRY_SIGNATURE: &str = "(i32, i32, i32, i32) -> i64";

/// Required allocator signature
pub const ALLOC_SIGNATURE: &str = "(i32) -> i32";

/// Required deallocator signature, when exported
pub const DEALLOC_SIGNATURE: &str = "(i32, i32) -> ()";

/// Longest message accepted from `coracle.raise`
pub(crate) const RAISE_MESSAGE_BYTES_MAX: usize = 64 * 1024;

type EntryFunc = TypedFunc<(i32, i32, i32, i32), i64>;

fn val_type_name(ty: &ValType) -> &'static str {
    match ty {
        ValType::I32 => "i32",
        ValType::I64 => "i64",
        ValType::F32 => "f32",
        ValType::F64 => "f64",
        ValType::V128 => "v128",
        _ => "ref",
    }
}

/// Render a function type as `(params) -> results`
pub(crate) fn describe_signature(ty: &FuncType) -> String {
    let params: Vec<&str> = ty.params().map(|p| val_type_name(&p)).collect();
    let results: Vec<&str> = ty.results().map(|r| val_type_name(&r)).collect();

    let results = match results.len() {
        0 => "()".to_string(),
        1 => results[0].to_string(),
        _ => format!("({})", results.join(", ")),
    };
    format!("({}) -> {}", params.join(", "), results)
}

fn extern_kind(ty: &ExternType) -> &'static str {
    match ty {
        ExternType::Func(_) => "function",
        ExternType::Global(_) => "global",
        ExternType::Table(_) => "table",
        ExternType::Memory(_) => "memory",
        #[allow(unreachable_patterns)]
        _ => "non-function",
    }
}

// =============================================================================
// Bind-time validation
// =============================================================================

/// Check the entry point and the supporting exports against the ABI
pub(crate) fn validate_exports(module: &Module, descriptor: &EntryDescriptor) -> Result<()> {
    let symbol = descriptor.symbol();

    match module.get_export(symbol) {
        None => {
            return Err(Error::entry_point_not_found(
                descriptor.module(),
                symbol,
                "the artifact exports no such symbol",
            ));
        }
        Some(ExternType::Func(ty)) => {
            let found = describe_signature(&ty);
            if found != ENTRY_SIGNATURE {
                return Err(Error::InvalidEntryPointSignature {
                    symbol: symbol.to_string(),
                    expected: ENTRY_SIGNATURE.to_string(),
                    found,
                });
            }
        }
        Some(other) => {
            return Err(Error::InvalidEntryPointSignature {
                symbol: symbol.to_string(),
                expected: ENTRY_SIGNATURE.to_string(),
                found: format!("a {} export", extern_kind(&other)),
            });
        }
    }

    if !matches!(module.get_export(MEMORY_EXPORT), Some(ExternType::Memory(_))) {
        return Err(Error::module_load_failed(format!(
            "artifact must export its linear memory as `{}`",
            MEMORY_EXPORT
        )));
    }

    match module.get_export(ALLOC_EXPORT) {
        Some(ExternType::Func(ty)) if describe_signature(&ty) == ALLOC_SIGNATURE => {}
        _ => {
            return Err(Error::module_load_failed(format!(
                "artifact must export `{}` with signature {}",
                ALLOC_EXPORT, ALLOC_SIGNATURE
            )));
        }
    }

    match module.get_export(DEALLOC_EXPORT) {
        None => {}
        Some(ExternType::Func(ty)) if describe_signature(&ty) == DEALLOC_SIGNATURE => {}
        Some(_) => {
            return Err(Error::module_load_failed(format!(
                "`{}` export must have signature {}",
                DEALLOC_EXPORT, DEALLOC_SIGNATURE
            )));
        }
    }

    Ok(())
}

// =============================================================================
// Per-activation exports
// =============================================================================

/// Split a packed `(ptr << 32) | len` result
pub(crate) fn unpack(packed: i64) -> (u32, u32) {
    let raw = packed as u64;
    ((raw >> 32) as u32, (raw & 0xFFFF_FFFF) as u32)
}

/// Exports of one live instance
pub(crate) struct GuestExports {
    memory: Memory,
    alloc: TypedFunc<i32, i32>,
    dealloc: Option<TypedFunc<(i32, i32), ()>>,
    entry: EntryFunc,
}

impl GuestExports {
    /// Look up the validated exports on a fresh instance
    pub(crate) fn resolve(
        instance: &Instance,
        store: &mut Store<InvocationContext>,
        symbol: &str,
    ) -> Result<Self> {
        let memory = instance
            .get_memory(&mut *store, MEMORY_EXPORT)
            .ok_or_else(|| Error::internal("validated `memory` export is missing"))?;
        let alloc = instance
            .get_typed_func::<i32, i32>(&mut *store, ALLOC_EXPORT)
            .map_err(|e| Error::internal(format!("validated `alloc` export: {}", e)))?;
        let dealloc = instance
            .get_typed_func::<(i32, i32), ()>(&mut *store, DEALLOC_EXPORT)
            .ok();
        let entry = instance
            .get_typed_func::<(i32, i32, i32, i32), i64>(&mut *store, symbol)
            .map_err(|e| Error::internal(format!("validated entry export: {}", e)))?;

        Ok(Self {
            memory,
            alloc,
            dealloc,
            entry,
        })
    }

    /// Entry function
    pub(crate) fn entry(&self) -> &EntryFunc {
        &self.entry
    }

    /// Allocate a guest buffer and copy `bytes` into it
    ///
    /// Traps inside `alloc` are returned as the raw wasmtime error so the
    /// caller can attribute them to user code.
    pub(crate) fn write(
        &self,
        store: &mut Store<InvocationContext>,
        bytes: &[u8],
    ) -> std::result::Result<(i32, i32), GuestFault> {
        let len = i32::try_from(bytes.len())
            .map_err(|_| GuestFault::Contract("request exceeds the wasm32 address space".into()))?;
        let ptr = self
            .alloc
            .call(&mut *store, len)
            .map_err(GuestFault::Trap)?;

        self.memory
            .write(&mut *store, ptr as u32 as usize, bytes)
            .map_err(|_| {
                GuestFault::Contract(format!(
                    "`alloc` returned an out-of-bounds buffer at {} for {} bytes",
                    ptr as u32, len
                ))
            })?;
        Ok((ptr, len))
    }

    /// Read the JSON result a packed pointer refers to
    ///
    /// `None` means the guest returned the null pointer.
    pub(crate) fn read(
        &self,
        store: &Store<InvocationContext>,
        packed: i64,
        size_bytes_max: usize,
    ) -> std::result::Result<Option<Vec<u8>>, ReadFault> {
        if packed == 0 {
            return Ok(None);
        }

        let (ptr, len) = unpack(packed);
        let len = len as usize;
        if len > size_bytes_max {
            return Err(ReadFault::TooLarge {
                size: len,
                limit: size_bytes_max,
            });
        }

        let mut buf = vec![0u8; len];
        self.memory
            .read(store, ptr as usize, &mut buf)
            .map_err(|_| ReadFault::OutOfBounds { ptr, len })?;
        Ok(Some(buf))
    }

    /// Hand a buffer back to the guest allocator, if it has one
    pub(crate) fn release(&self, store: &mut Store<InvocationContext>, ptr: i32, len: i32) {
        if let Some(dealloc) = &self.dealloc {
            if let Err(e) = dealloc.call(&mut *store, (ptr, len)) {
                tracing::debug!(error = %e, "Guest dealloc failed");
            }
        }
    }
}

/// A guest-side failure while marshalling the request
pub(crate) enum GuestFault {
    /// Guest code trapped
    Trap(anyhow::Error),
    /// Guest violated the memory contract
    Contract(String),
}

/// A guest-side failure while reading the result
#[derive(Debug)]
pub(crate) enum ReadFault {
    TooLarge { size: usize, limit: usize },
    OutOfBounds { ptr: u32, len: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmtime::Engine;

    fn module(wat: &str) -> Module {
        Module::new(&Engine::default(), wat).unwrap()
    }

    fn descriptor(raw: &str) -> EntryDescriptor {
        EntryDescriptor::parse(raw).unwrap()
    }

    const SUPPORT: &str = r#"
        (memory (export "memory") 1)
        (func (export "alloc") (param i32) (result i32) (i32.const 1024))
    "#;

    #[test]
    fn test_unpack() {
        assert_eq!(unpack((1024_i64 << 32) | 17), (1024, 17));
        assert_eq!(unpack(0), (0, 0));
        // High pointer bit set still unpacks unsigned
        let packed = ((0x8000_0000_u64 << 32) | 5) as i64;
        assert_eq!(unpack(packed), (0x8000_0000, 5));
    }

    #[test]
    fn test_describe_signature() {
        let m = module(&format!(
            r#"(module {SUPPORT}
                (func (export "invoke") (param i32 i32 i32 i32) (result i64) (i64.const 0))
                (func (export "nothing")))"#
        ));
        let ExternType::Func(entry) = m.get_export("invoke").unwrap() else {
            panic!("invoke is a function");
        };
        assert_eq!(describe_signature(&entry), ENTRY_SIGNATURE);

        let ExternType::Func(nothing) = m.get_export("nothing").unwrap() else {
            panic!("nothing is a function");
        };
        assert_eq!(describe_signature(&nothing), "() -> ()");
    }

    #[test]
    fn test_valid_module_passes() {
        let m = module(&format!(
            r#"(module {SUPPORT}
                (func (export "invoke") (param i32 i32 i32 i32) (result i64) (i64.const 0)))"#
        ));
        assert!(validate_exports(&m, &descriptor("pkg.Impl#invoke")).is_ok());
    }

    #[test]
    fn test_missing_symbol_is_not_found() {
        let m = module(&format!(
            r#"(module {SUPPORT}
                (func (export "invoke") (param i32 i32 i32 i32) (result i64) (i64.const 0)))"#
        ));
        let err = validate_exports(&m, &descriptor("pkg.Impl")).unwrap_err();
        assert!(matches!(err, Error::EntryPointNotFound { ref symbol, .. } if symbol == "main"));
    }

    #[test]
    fn test_wrong_arity_is_invalid_signature() {
        let m = module(&format!(
            r#"(module {SUPPORT}
                (func (export "invoke") (param i32 i32) (result i64) (i64.const 0)))"#
        ));
        let err = validate_exports(&m, &descriptor("pkg.Impl#invoke")).unwrap_err();
        match err {
            Error::InvalidEntryPointSignature { found, expected, .. } => {
                assert_eq!(found, "(i32, i32) -> i64");
                assert_eq!(expected, ENTRY_SIGNATURE);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_wrong_return_type_is_invalid_signature() {
        let m = module(&format!(
            r#"(module {SUPPORT}
                (func (export "invoke") (param i32 i32 i32 i32) (result i32) (i32.const 0)))"#
        ));
        let err = validate_exports(&m, &descriptor("pkg.Impl#invoke")).unwrap_err();
        assert!(matches!(err, Error::InvalidEntryPointSignature { .. }));
    }

    #[test]
    fn test_non_function_symbol_is_invalid_signature() {
        let m = module(&format!(
            r#"(module {SUPPORT}
                (global (export "invoke") i32 (i32.const 7)))"#
        ));
        let err = validate_exports(&m, &descriptor("pkg.Impl#invoke")).unwrap_err();
        match err {
            Error::InvalidEntryPointSignature { found, .. } => assert_eq!(found, "a global export"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_alloc_fails_load() {
        let m = module(
            r#"(module
                (memory (export "memory") 1)
                (func (export "invoke") (param i32 i32 i32 i32) (result i64) (i64.const 0)))"#,
        );
        let err = validate_exports(&m, &descriptor("pkg.Impl#invoke")).unwrap_err();
        assert!(matches!(err, Error::ModuleLoadFailed { .. }));
        assert!(err.to_string().contains("alloc"));
    }

    #[test]
    fn test_missing_memory_fails_load() {
        let m = module(
            r#"(module
                (func (export "alloc") (param i32) (result i32) (i32.const 0))
                (func (export "invoke") (param i32 i32 i32 i32) (result i64) (i64.const 0)))"#,
        );
        let err = validate_exports(&m, &descriptor("pkg.Impl#invoke")).unwrap_err();
        assert!(err.to_string().contains("memory"));
    }

    #[test]
    fn test_mistyped_dealloc_fails_load() {
        let m = module(&format!(
            r#"(module {SUPPORT}
                (func (export "dealloc") (param i32))
                (func (export "invoke") (param i32 i32 i32 i32) (result i64) (i64.const 0)))"#
        ));
        let err = validate_exports(&m, &descriptor("pkg.Impl#invoke")).unwrap_err();
        assert!(err.to_string().contains("dealloc"));
    }
}
