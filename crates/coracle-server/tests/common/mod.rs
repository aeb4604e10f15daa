//! Shared fixtures for the lifecycle HTTP tests
//!
//! Actions are WebAssembly text modules following the host ABI: a `memory`
//! export, `alloc`, and an entry taking the input and context buffers and
//! returning `(ptr << 32) | len` of a JSON result.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::Engine;
use coracle_core::{CoracleConfig, SandboxConfig, ACTIVATION_LOG_MARKER};
use coracle_server::markers::write_marker;
use coracle_server::{router, AppState, MarkerSink};
use coracle_wasm::WasmLoader;
use serde_json::{json, Value};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

/// Bump allocator shared by the fixtures
const ALLOCATOR: &str = r#"
    (memory (export "memory") 1)
    (global $heap (mut i32) (i32.const 4096))
    (func (export "alloc") (param $len i32) (result i32)
      (local $ptr i32)
      (local.set $ptr (global.get $heap))
      (global.set $heap (i32.add (global.get $heap) (local.get $len)))
      (local.get $ptr))
"#;

fn module(name: &str, imports: &str, body: &str) -> String {
    format!("(module ${name}\n{imports}\n{ALLOCATOR}\n{body})")
}

/// `pkg.Echo#invoke`: returns its input
pub fn echo() -> String {
    module(
        "pkg.Echo",
        "",
        r#"(func (export "invoke") (param $ip i32) (param $il i32) (param i32 i32) (result i64)
             (i64.or
               (i64.shl (i64.extend_i32_u (local.get $ip)) (i64.const 32))
               (i64.extend_i32_u (local.get $il))))"#,
    )
}

/// `pkg.Impl#invoke`: returns `{"hello":"world"}`
pub fn hello() -> String {
    module(
        "pkg.Impl",
        "",
        r#"(data (i32.const 1024) "{\"hello\":\"world\"}")
           (func (export "invoke") (param i32 i32 i32 i32) (result i64)
             (i64.or (i64.shl (i64.const 1024) (i64.const 32)) (i64.const 17)))"#,
    )
}

/// `pkg.Null#main`: returns null
pub fn null() -> String {
    module(
        "pkg.Null",
        "",
        r#"(func (export "main") (param i32 i32 i32 i32) (result i64) (i64.const 0))"#,
    )
}

/// `pkg.Picky#main`: echoes an empty input, raises on anything else
pub fn picky() -> String {
    module(
        "pkg.Picky",
        r#"(import "coracle" "raise" (func $raise (param i32 i32)))"#,
        r#"(data (i32.const 1024) "input must be empty")
           (func (export "main") (param $ip i32) (param $il i32) (param i32 i32) (result i64)
             (if (i32.gt_u (local.get $il) (i32.const 2))
               (then
                 (call $raise (i32.const 1024) (i32.const 19))
                 unreachable))
             (i64.or
               (i64.shl (i64.extend_i32_u (local.get $ip)) (i64.const 32))
               (i64.extend_i32_u (local.get $il))))"#,
    )
}

/// `pkg.Exit#main`: calls WASI `proc_exit(3)`
pub fn exit() -> String {
    module(
        "pkg.Exit",
        r#"(import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))"#,
        r#"(func (export "main") (param i32 i32 i32 i32) (result i64)
             (call $proc_exit (i32.const 3))
             (i64.const 0))"#,
    )
}

/// `pkg.Env#main`: reports whether any environment variable is visible
pub fn env() -> String {
    module(
        "pkg.Env",
        r#"(import "wasi_snapshot_preview1" "environ_sizes_get"
             (func $environ_sizes_get (param i32 i32) (result i32)))"#,
        r#"(data (i32.const 1024) "{\"env\":\"hidden\"}")
           (data (i32.const 1056) "{\"env\":\"visible\"}")
           (func (export "main") (param i32 i32 i32 i32) (result i64)
             (drop (call $environ_sizes_get (i32.const 0) (i32.const 4)))
             (if (result i64) (i32.eqz (i32.load (i32.const 0)))
               (then (i64.or (i64.shl (i64.const 1024) (i64.const 32)) (i64.const 16)))
               (else (i64.or (i64.shl (i64.const 1056) (i64.const 32)) (i64.const 17)))))"#,
    )
}

/// `pkg.Spin#main`: never returns
pub fn spin() -> String {
    module(
        "pkg.Spin",
        "",
        r#"(func (export "main") (param i32 i32 i32 i32) (result i64)
             (loop $forever (br $forever))
             (i64.const 0))"#,
    )
}

/// `pkg.Bad#invoke` with a single-buffer signature
pub fn wrong_signature() -> String {
    module(
        "pkg.Bad",
        "",
        r#"(func (export "invoke") (param i32 i32) (result i32) (i32.const 0))"#,
    )
}

pub fn encode(wat: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(wat)
}

pub fn init_body(main: &str, wat: &str) -> Value {
    json!({"value": {"main": main, "code": encode(wat)}})
}

/// A router over a fresh WebAssembly runtime
pub fn test_app() -> Router {
    test_app_with(SandboxConfig::default().without_stdio())
}

pub fn test_app_with(sandbox: SandboxConfig) -> Router {
    let config = CoracleConfig {
        sandbox,
        ..Default::default()
    };
    router(AppState::with_wasm_loader(config).unwrap())
}

/// One stream holding both the log output and the activation markers
///
/// Stands in for the container output the platform's collector reads, so
/// tests can check what lands before and after a marker.
#[derive(Clone, Default)]
pub struct Capture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl Capture {
    /// Route this thread's `tracing` output into the capture
    pub fn subscribe(&self) -> DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    /// Drain the captured lines, blank ones skipped
    pub fn take(&self) -> Vec<String> {
        let bytes = std::mem::take(&mut *self.buf.lock().unwrap());
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl Write for Capture {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Capture {
    type Writer = Capture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl MarkerSink for Capture {
    fn emit(&self) -> io::Result<()> {
        write_marker(&mut self.clone())
    }
}

pub fn is_marker(line: &str) -> bool {
    line == ACTIVATION_LOG_MARKER
}

/// A WebAssembly router whose markers and logs go to the returned capture
pub fn capturing_app() -> (Router, Capture) {
    let config = CoracleConfig {
        sandbox: SandboxConfig::default().without_stdio(),
        ..Default::default()
    };
    let loader = WasmLoader::new(&config.loader, config.sandbox.clone()).unwrap();
    let capture = Capture::default();
    let state = AppState::with_marker_sink(config, Arc::new(loader), Arc::new(capture.clone()));
    (router(state), capture)
}

/// Send a POST and return the status and the raw body
pub async fn post_raw(app: &Router, uri: &str, body: Vec<u8>) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

/// Send a JSON POST and parse the JSON response
pub async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let (status, body) = post_raw(app, uri, body.to_string().into_bytes()).await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

/// `/init` and return the status with the raw body text
pub async fn init(app: &Router, main: &str, wat: &str) -> (StatusCode, String) {
    let (status, body) = post_raw(app, "/init", init_body(main, wat).to_string().into_bytes()).await;
    (status, String::from_utf8(body).unwrap())
}

/// Error message of a 502 body
pub fn error_message(body: &Value) -> &str {
    body["error"].as_str().unwrap_or_default()
}
