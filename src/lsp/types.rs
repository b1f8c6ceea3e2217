use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error code for an unhandled server-to-client request.
pub const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: i64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: i64, method: impl Into<String>, params: Option<Value>) -> Self {
        Request {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Notification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Either direction: replies from the server and our replies to server
/// requests. Ids stay raw JSON since servers may use strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Response {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Response {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(ResponseError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// Builds outgoing messages and hands out request ids, starting at 1.
#[derive(Debug, Default)]
pub struct MessageFactory {
    id: AtomicI64,
}

impl MessageFactory {
    pub fn new() -> Self {
        MessageFactory::default()
    }

    pub fn get_id(&self) -> i64 {
        self.id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// `params` serializing to `null` (e.g. `()`) leaves `params` out.
    pub fn create_request<T: Serialize>(&self, method: &str, params: T) -> anyhow::Result<Request> {
        let params = to_params(params).with_context(|| format!("serializing {method} params"))?;
        Ok(Request::new(self.get_id(), method, params))
    }

    pub fn create_notification<T: Serialize>(
        &self,
        method: &str,
        params: T,
    ) -> anyhow::Result<Notification> {
        let params = to_params(params).with_context(|| format!("serializing {method} params"))?;
        Ok(Notification::new(method, params))
    }
}

fn to_params<T: Serialize>(params: T) -> serde_json::Result<Option<Value>> {
    let value = serde_json::to_value(params)?;
    Ok((!value.is_null()).then_some(value))
}
