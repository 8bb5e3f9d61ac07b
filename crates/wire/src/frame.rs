use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request frame: the id used to correlate the reply plus the operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: u64,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Envelope<T> {
    pub const fn new(id: u64, body: T) -> Self {
        Self { id, body }
    }
}

/// Operations the bridge sends to the host over the gateway channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HostRequest {
    /// Sent once after connecting; announces the callback port.
    Hello { callback_port: u16, pid: u32 },
    /// Liveness probe.
    Ping,
    /// Script-initiated call into the host.
    Call {
        method: String,
        #[serde(default)]
        data: Value,
    },
}

/// Operations the host sends to the bridge over the callback channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BridgeRequest {
    /// `request` is the JSON text `{"method": ..., "data": ...}`.
    Invoke { request: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

/// Reply to a request. Success when `error` is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub id: u64,
    #[serde(default)]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Reply {
    pub const fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result,
            error: None,
        }
    }

    pub fn error(id: u64, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id,
            result: Value::Null,
            error: Some(ErrorBody {
                kind: kind.into(),
                message: message.into(),
            }),
        }
    }

    /// Splits the reply into its result or error body.
    ///
    /// # Errors
    /// Returns the error body when the peer reported a failure.
    pub fn into_result(self) -> Result<Value, ErrorBody> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result),
        }
    }
}
