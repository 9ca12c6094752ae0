// MIT License - Copyright (c) 2026 Peter Wright
// RPC wire format: one JSON object per line

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::devices::security::SecuritySensor;
use crate::error::{PlcError, Result, RpcErrorCode};

/// Longest request or response line accepted from a peer.
pub const MAX_LINE_LEN: u64 = 64 * 1024;

/// Operation sent to a unit's RPC server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RpcRequest {
    SecurityStatusGet,
    SecurityStatusSet { status: bool },
    SecurityAlarmGet,
    SecurityAlarmSet { alarm: bool },
    SecuritySensorsGet,
    SocketStatusGet { name: String },
    SocketStatusSet { name: String, status: bool },
}

impl RpcRequest {
    /// Operation name as it appears on the wire.
    pub fn op_name(&self) -> &'static str {
        match self {
            RpcRequest::SecurityStatusGet => "security_status_get",
            RpcRequest::SecurityStatusSet { .. } => "security_status_set",
            RpcRequest::SecurityAlarmGet => "security_alarm_get",
            RpcRequest::SecurityAlarmSet { .. } => "security_alarm_set",
            RpcRequest::SecuritySensorsGet => "security_sensors_get",
            RpcRequest::SocketStatusGet { .. } => "socket_status_get",
            RpcRequest::SocketStatusSet { .. } => "socket_status_set",
        }
    }
}

/// Payload of a successful query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RpcResult {
    Flag(bool),
    Sensors(Vec<SecuritySensor>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RpcResult>,
    /// Error code string, see [`RpcErrorCode`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn ok(result: Option<RpcResult>) -> Self {
        Self {
            success: true,
            result,
            error: None,
        }
    }

    pub fn failed(code: RpcErrorCode) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(code.as_str().to_string()),
        }
    }

    /// Turn a decoded response into the caller's result.
    pub fn into_result(self) -> Result<Option<RpcResult>> {
        if self.success {
            return Ok(self.result);
        }
        let code = self
            .error
            .as_deref()
            .and_then(RpcErrorCode::from_code)
            .unwrap_or(RpcErrorCode::Internal);
        Err(PlcError::Remote(code))
    }
}

/// Serialize a message as one newline-terminated JSON line.
pub fn encode_line<T: Serialize>(msg: &T) -> Result<String> {
    let mut line = serde_json::to_string(msg).map_err(|e| PlcError::Protocol {
        details: format!("encode failed: {}", e),
    })?;
    line.push('\n');
    Ok(line)
}

/// Parse one JSON line. Trailing whitespace is ignored.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T> {
    let line = line.trim_end();
    if line.is_empty() {
        return Err(PlcError::Protocol {
            details: "empty message".to_string(),
        });
    }
    serde_json::from_str(line).map_err(|e| PlcError::Protocol {
        details: format!("decode failed: {}", e),
    })
}
