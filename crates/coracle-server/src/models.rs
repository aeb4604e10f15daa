//! Request and response bodies of the lifecycle protocol
//!
//! Bodies arrive as raw bytes and are picked apart as `serde_json::Value`,
//! since the protocol distinguishes "field missing" from "body malformed".

use coracle_core::{ActionMap, Error, Result, REQUEST_VALUE_FIELD};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error body of every failed request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable message
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

impl From<&Error> for ErrorResponse {
    fn from(err: &Error) -> Self {
        Self::new(err.response_message())
    }
}

/// `/init` payload: `{"value": {"main": "<descriptor>", "code": "<base64>"}}`
#[derive(Debug, Clone)]
pub struct InitRequest {
    /// Entry descriptor, `module[#symbol]`
    pub main: String,
    /// Base64 artifact
    pub code: String,
}

impl InitRequest {
    /// Parse an `/init` body
    ///
    /// Both fields must be strings; anything else is the fixed
    /// missing-fields rejection.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let body = parse_object(body)?;
        let value = body.get(REQUEST_VALUE_FIELD);
        let field = |name: &str| {
            value
                .and_then(|v| v.get(name))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        match (field("main"), field("code")) {
            (Some(main), Some(code)) => Ok(Self { main, code }),
            _ => Err(Error::missing_init_fields()),
        }
    }
}

/// `/run` payload split into the action input and its context
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunRequest {
    /// The `value` object
    pub input: ActionMap,
    /// Every other top-level field
    pub context: ActionMap,
}

impl RunRequest {
    /// Parse a `/run` body
    ///
    /// A missing or `null` `value` is an empty input.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut context = parse_object(body)?;

        let input = match context.remove(REQUEST_VALUE_FIELD) {
            None | Some(Value::Null) => ActionMap::new(),
            Some(Value::Object(input)) => input,
            Some(other) => {
                return Err(Error::malformed_request(format!(
                    "Malformed request: `{}` must be a JSON object, found {}",
                    REQUEST_VALUE_FIELD,
                    json_kind(&other)
                )))
            }
        };

        Ok(Self { input, context })
    }
}

fn parse_object(body: &[u8]) -> Result<ActionMap> {
    match serde_json::from_slice::<Value>(body)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::malformed_request(format!(
            "Malformed request: expected a JSON object, found {}",
            json_kind(&other)
        ))),
    }
}

/// Name of a JSON value's type, for messages
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
