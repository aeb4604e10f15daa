//! Coracle Action
//!
//! The guest side of the Coracle host ABI. An action implements [`Action`]
//! and is exported with [`export_action!`]; built for `wasm32-wasi`, the
//! result is an artifact `/init` accepts.
//!
//! ```ignore
//! use coracle_action::{export_action, Action, ActionError, ActionMap, ClusterContext};
//!
//! struct Hello;
//!
//! impl Action for Hello {
//!     fn invoke(&self, _input: ActionMap, cluster: &ClusterContext)
//!         -> Result<Option<ActionMap>, ActionError>
//!     {
//!         let mut out = ActionMap::new();
//!         match cluster.get("clusterName") {
//!             Some(name) => out.insert("clusterName".into(), name.clone()),
//!             None => out.insert("hello".into(), "world".into()),
//!         };
//!         Ok(Some(out))
//!     }
//! }
//!
//! export_action!(Hello, "invoke");
//! ```

use serde_json::{Map, Value};

/// Mapping of string to any JSON value
pub type ActionMap = Map<String, Value>;

/// The cluster context sent alongside every activation
///
/// Holds every top-level field of the `/run` request other than `value`:
/// activation id, namespace, deadline and whatever else the platform
/// provides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterContext {
    values: ActionMap,
}

impl ClusterContext {
    pub fn new(values: ActionMap) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// String value of `key`, if present and a string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn as_map(&self) -> &ActionMap {
        &self.values
    }

    pub fn into_map(self) -> ActionMap {
        self.values
    }
}

/// Failure reported by an action
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// Raised by the action itself
    #[error("{0}")]
    Failed(String),

    /// The host sent a buffer that is not a JSON object
    #[error("malformed {what}: {reason}")]
    Malformed { what: &'static str, reason: String },
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A user action
pub trait Action {
    /// Run one activation
    ///
    /// `Ok(None)` is reported by the host as a null result.
    fn invoke(
        &self,
        input: ActionMap,
        cluster: &ClusterContext,
    ) -> Result<Option<ActionMap>, ActionError>;
}

/// What the entry export hands back to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Serialized output object
    Output(Vec<u8>),
    /// The action returned nothing
    Null,
    /// The action failed with this message
    Raise(String),
}

/// Decode both buffers, run the action and encode its outcome
pub fn dispatch<A: Action + ?Sized>(action: &A, input: &[u8], context: &[u8]) -> Dispatch {
    let input = match parse_map(input, "input") {
        Ok(input) => input,
        Err(e) => return Dispatch::Raise(e.to_string()),
    };
    let cluster = match parse_map(context, "context") {
        Ok(context) => ClusterContext::new(context),
        Err(e) => return Dispatch::Raise(e.to_string()),
    };

    match action.invoke(input, &cluster) {
        Ok(Some(output)) => match serde_json::to_vec(&output) {
            Ok(bytes) => Dispatch::Output(bytes),
            Err(e) => Dispatch::Raise(format!("failed to encode output: {}", e)),
        },
        Ok(None) => Dispatch::Null,
        Err(e) => Dispatch::Raise(e.to_string()),
    }
}

fn parse_map(bytes: &[u8], what: &'static str) -> Result<ActionMap, ActionError> {
    match serde_json::from_slice(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ActionError::Malformed {
            what,
            reason: "not a JSON object".into(),
        }),
        Err(e) => Err(ActionError::Malformed {
            what,
            reason: e.to_string(),
        }),
    }
}

/// Raw exports backing [`export_action!`]
#[cfg(target_arch = "wasm32")]
pub mod abi {
    use super::{dispatch, Action, Dispatch};

    #[link(wasm_import_module = "coracle")]
    extern "C" {
        #[link_name = "raise"]
        fn coracle_raise(ptr: *const u8, len: usize);
    }

    pub fn alloc(len: i32) -> i32 {
        let mut buf = Vec::<u8>::with_capacity(len as u32 as usize);
        let ptr = buf.as_mut_ptr();
        std::mem::forget(buf);
        ptr as i32
    }

    /// # Safety
    ///
    /// `ptr` and `len` must come from a previous [`alloc`] or entry result.
    pub unsafe fn dealloc(ptr: i32, len: i32) {
        drop(Vec::from_raw_parts(ptr as *mut u8, 0, len as u32 as usize));
    }

    /// # Safety
    ///
    /// Both buffers must have been written by the host into memory obtained
    /// from [`alloc`].
    pub unsafe fn run<A: Action + ?Sized>(
        action: &A,
        input_ptr: i32,
        input_len: i32,
        context_ptr: i32,
        context_len: i32,
    ) -> i64 {
        let input = std::slice::from_raw_parts(input_ptr as *const u8, input_len as u32 as usize);
        let context =
            std::slice::from_raw_parts(context_ptr as *const u8, context_len as u32 as usize);

        match dispatch(action, input, context) {
            Dispatch::Output(bytes) => {
                let bytes = bytes.into_boxed_slice();
                let len = bytes.len() as u64;
                let ptr = Box::into_raw(bytes) as *mut u8 as u32 as u64;
                ((ptr << 32) | len) as i64
            }
            Dispatch::Null => 0,
            Dispatch::Raise(message) => {
                // The host turns this call into a trap; it never returns
                coracle_raise(message.as_ptr(), message.len());
                core::arch::wasm32::unreachable()
            }
        }
    }
}

/// Export an [`Action`] under the host ABI
///
/// Emits `alloc`, `dealloc` and the entry export named `symbol` (default
/// `main`). Expands to nothing outside `wasm32`.
#[macro_export]
macro_rules! export_action {
    ($action:expr, $symbol:literal) => {
        #[cfg(target_arch = "wasm32")]
        const _: () = {
            #[no_mangle]
            pub extern "C" fn alloc(len: i32) -> i32 {
                $crate::abi::alloc(len)
            }

            #[no_mangle]
            pub unsafe extern "C" fn dealloc(ptr: i32, len: i32) {
                $crate::abi::dealloc(ptr, len)
            }

            #[export_name = $symbol]
            pub unsafe extern "C" fn __coracle_entry(
                input_ptr: i32,
                input_len: i32,
                context_ptr: i32,
                context_len: i32,
            ) -> i64 {
                $crate::abi::run(&$action, input_ptr, input_len, context_ptr, context_len)
            }
        };
    };
    ($action:expr) => {
        $crate::export_action!($action, "main");
    };
}
