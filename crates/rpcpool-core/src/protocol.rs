//! Wire protocol types and codec.
//!
//! Frames are single JSON documents:
//!
//! ```text
//! Request  = { "id": string|integer, "method": string, "params": any }
//! Success  = { "id": string|integer, "result": any }
//! Failure  = { "id": string|integer|null, "error": { "message": string, "code"?: integer, "data"?: any } }
//! ```
//!
//! Decoding goes through `serde_json::Value` and validates the shape by hand,
//! so that presence of a key (not its value) decides which Response variant
//! a payload is. `"result": null` is a valid Success.

use crate::error::{Result, RpcError};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Caller-supplied correlation id, echoed verbatim in the response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl RequestId {
    /// Interpret the id as a pool call id. Only non-negative integers qualify.
    pub fn as_call_id(&self) -> Option<u64> {
        match self {
            RequestId::Number(n) => u64::try_from(*n).ok(),
            RequestId::String(_) => None,
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        RequestId::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        RequestId::String(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        RequestId::String(value)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "\"{}\"", s),
        }
    }
}

/// A call request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: Value,
}

impl Request {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// Error body of a Failure frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            data: None,
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }
}

/// Keeps an explicit `"data": null` as `Some(Value::Null)`.
fn deserialize_present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// A response: exactly one of Success or Failure.
///
/// Failure ids are optional: a frame that could not be decoded far enough to
/// learn its id is answered with `"id": null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Success {
        id: RequestId,
        result: Value,
    },
    Failure {
        id: Option<RequestId>,
        error: ErrorObject,
    },
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Response::Success { id, result }
    }

    pub fn failure(id: Option<RequestId>, error: ErrorObject) -> Self {
        Response::Failure { id, error }
    }

    /// Build a Failure frame from a runtime error.
    pub fn from_error(id: Option<RequestId>, err: &RpcError) -> Self {
        Response::Failure {
            id,
            error: err.to_error_object(),
        }
    }

    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Response::Success { id, .. } => Some(id),
            Response::Failure { id, .. } => id.as_ref(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success { .. })
    }

    /// Turn the frame into the value a caller awaits.
    pub fn into_result(self) -> Result<Value> {
        match self {
            Response::Success { result, .. } => Ok(result),
            Response::Failure { error, .. } => Err(RpcError::from_error_object(error)),
        }
    }
}

/// Encode a request as a JSON document.
pub fn encode_request(request: &Request) -> Result<String> {
    Ok(serde_json::to_string(request)?)
}

/// Decode a request, failing on invalid JSON or missing `id`/`method`.
///
/// `params` is optional and defaults to `null`. Unknown keys (such as a
/// `jsonrpc` version marker) are ignored.
pub fn decode_request(payload: &[u8]) -> Result<Request> {
    let mut object = parse_object(payload)?;

    let id = match object.remove("id") {
        Some(value) => parse_id(value)?,
        None => return Err(missing("id")),
    };

    let method = match object.remove("method") {
        Some(Value::String(method)) => method,
        Some(other) => {
            return Err(RpcError::InvalidFrame {
                message: format!("'method' must be a string, got {}", type_name(&other)),
            })
        }
        None => return Err(missing("method")),
    };

    let params = object.remove("params").unwrap_or(Value::Null);

    Ok(Request { id, method, params })
}

/// Encode a response as a JSON document.
pub fn encode_response(response: &Response) -> Result<String> {
    Ok(serde_json::to_string(response)?)
}

/// Decode a response, requiring `id` and exactly one of `result`/`error`.
pub fn decode_response(payload: &[u8]) -> Result<Response> {
    let mut object = parse_object(payload)?;

    let id = match object.remove("id") {
        Some(Value::Null) => None,
        Some(value) => Some(parse_id(value)?),
        None => return Err(missing("id")),
    };

    match (object.remove("result"), object.remove("error")) {
        (Some(result), None) => {
            let id = id.ok_or_else(|| RpcError::InvalidFrame {
                message: "success response must carry a non-null 'id'".to_string(),
            })?;
            Ok(Response::Success { id, result })
        }
        (None, Some(error)) => {
            let error: ErrorObject =
                serde_json::from_value(error).map_err(|e| RpcError::InvalidFrame {
                    message: format!("invalid 'error' object: {}", e),
                })?;
            Ok(Response::Failure { id, error })
        }
        (Some(_), Some(_)) => Err(RpcError::InvalidFrame {
            message: "response carries both 'result' and 'error'".to_string(),
        }),
        (None, None) => Err(RpcError::InvalidFrame {
            message: "response carries neither 'result' nor 'error'".to_string(),
        }),
    }
}

/// Recover the id of a payload that failed to decode as a request.
///
/// Succeeds only if the payload is a JSON object whose `id` is a valid
/// request id; anything else yields `None` so the caller answers with a
/// null id instead of guessing.
pub fn extract_request_id(payload: &[u8]) -> Option<RequestId> {
    let mut object = parse_object(payload).ok()?;
    object.remove("id").and_then(|value| parse_id(value).ok())
}

fn parse_object(payload: &[u8]) -> Result<Map<String, Value>> {
    let value: Value = serde_json::from_slice(payload).map_err(|e| RpcError::Parse {
        message: e.to_string(),
    })?;
    match value {
        Value::Object(object) => Ok(object),
        other => Err(RpcError::InvalidFrame {
            message: format!("expected a JSON object, got {}", type_name(&other)),
        }),
    }
}

fn parse_id(value: Value) -> Result<RequestId> {
    match value {
        Value::String(s) => Ok(RequestId::String(s)),
        Value::Number(n) => n.as_i64().map(RequestId::Number).ok_or_else(|| {
            RpcError::InvalidFrame {
                message: format!("'id' must be an integer or a string, got {}", n),
            }
        }),
        other => Err(RpcError::InvalidFrame {
            message: format!("'id' must be an integer or a string, got {}", type_name(&other)),
        }),
    }
}

fn missing(field: &str) -> RpcError {
    RpcError::InvalidFrame {
        message: format!("missing field '{}'", field),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
