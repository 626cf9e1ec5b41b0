//! Wire types for the Klipper API socket.
//!
//! Each message is a compact JSON object terminated by `0x03` (see
//! [`framing`](crate::framing)).
//!
//! **Request:**
//! ```json
//! {"id":3,"method":"objects/query","params":{"objects":{"toolhead":["position"]}}}
//! ```
//!
//! **Response:**
//! ```json
//! {"id":3,"result":{"eventtime":1234.5,"status":{"toolhead":{"position":[0,0,0,0]}}}}
//! {"id":3,"error":{"error":"WebRequestError","message":"Unknown command"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::framing::encode_frame;

/// Request from client to daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Session-unique request id
    pub id: u64,
    /// Endpoint name (e.g. "info", "gcode/script")
    pub method: String,
    /// Endpoint parameters; omitted for parameterless endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Response from daemon to client.
///
/// Exactly one of `result` and `error` is expected; `error` wins if a
/// misbehaving peer sends both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the request this answers
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

/// Error envelope returned by the daemon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Human-readable error message
    pub message: String,
    /// Error class reported by Klipper (e.g. "WebRequestError")
    #[serde(default, rename = "error", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    /// Serialize to compact JSON followed by the frame delimiter.
    pub fn to_frame(&self) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        Ok(encode_frame(&json))
    }
}

impl Response {
    /// Build a response from a decoded frame.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::parse(format!("Malformed response: {}", e)))
    }

    /// Turn the envelope into the call outcome.
    ///
    /// A response without `result` yields `Value::Null`.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(err) => Err(Error::Remote(err.message)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Endpoint names used by this crate.
pub mod methods {
    pub const INFO: &str = "info";
    pub const GCODE_SCRIPT: &str = "gcode/script";
    pub const OBJECTS_QUERY: &str = "objects/query";
    pub const OBJECTS_LIST: &str = "objects/list";
}

/// Params for `gcode/script`.
pub fn gcode_script_params(script: &str) -> Value {
    json!({ "script": script })
}

/// Params for `objects/query` asking for `fields` of one `object`.
pub fn objects_query_params(object: &str, fields: &[&str]) -> Value {
    json!({ "objects": { object: fields } })
}
