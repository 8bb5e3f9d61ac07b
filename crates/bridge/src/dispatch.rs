use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::{
    namespace::{CallError, Namespace, Unresolved},
    value::ValueError,
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("malformed request: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("request has no method")]
    MissingMethod,
    #[error("method not found: {method}")]
    MethodNotFound { method: String },
    #[error("invocation of {method} failed: {message}")]
    Invocation { method: String, message: String },
    #[error("result of {method} could not be serialized: {source}")]
    Serialize {
        method: String,
        #[source]
        source: ValueError,
    },
}

impl DispatchError {
    /// Stable code reported in the `kind` field of an error reply.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::MissingMethod => "missing_method",
            Self::MethodNotFound { .. } => "method_not_found",
            Self::Invocation { .. } => "invocation",
            Self::Serialize { .. } => "serialize",
        }
    }
}

/// Handles one inbound invoke request.
///
/// Implementations are called from blocking threads, possibly several at
/// once.
pub trait RequestHandler: Send + Sync + 'static {
    /// # Errors
    /// Returns error if the request cannot be decoded, routed, or completed.
    fn invoke(&self, request_json: &str) -> Result<Option<String>, DispatchError>;
}

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

/// Routes requests to the entry points of a loaded [`Namespace`].
#[derive(Debug, Clone)]
pub struct Dispatcher {
    namespace: Arc<Namespace>,
}

impl Dispatcher {
    #[must_use]
    pub const fn new(namespace: Arc<Namespace>) -> Self {
        Self { namespace }
    }
}

impl RequestHandler for Dispatcher {
    fn invoke(&self, request_json: &str) -> Result<Option<String>, DispatchError> {
        let request: Request = serde_json::from_str(request_json)?;
        let method = request
            .method
            .filter(|m| !m.is_empty())
            .ok_or(DispatchError::MissingMethod)?;

        let entry = self.namespace.resolve(&method).map_err(|reason| {
            if reason == Unresolved::NotInvokable {
                tracing::debug!(%method, "requested name is not invokable");
            }
            DispatchError::MethodNotFound {
                method: method.clone(),
            }
        })?;

        let data = request.data.filter(|d| !is_empty_argument(d));
        tracing::debug!(%method, with_data = data.is_some(), "invoking entry point");

        match entry.call(data.as_ref()) {
            Ok(None) => Ok(None),
            Ok(Some(Value::String(s))) => Ok(Some(s)),
            Ok(Some(other)) => Ok(Some(other.to_string())),
            Err(CallError::Unserializable(source)) => Err(DispatchError::Serialize {
                method: method.clone(),
                source,
            }),
            Err(err) => Err(DispatchError::Invocation {
                method: method.clone(),
                message: err.to_string(),
            }),
        }
    }
}

/// `null` and `[]` both mean "call with no arguments".
fn is_empty_argument(data: &Value) -> bool {
    match data {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
