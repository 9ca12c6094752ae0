// MIT License - Copyright (c) 2026 Peter Wright
// Error taxonomy

use std::fmt;

use crate::stack::UnitId;

/// Error codes a unit returns in a failed RPC response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcErrorCode {
    /// BADREQ - Request could not be decoded
    BadRequest,
    /// NOSOCK - Socket does not exist on the unit
    SocketNotFound,
    /// GPIO - Hardware write failed on the unit
    Hardware,
    /// STORE - Persistence step failed on the unit
    Persistence,
    /// INTERNAL - Any other failure on the unit
    Internal,
}

impl RpcErrorCode {
    /// Parse an error code string from a response (e.g., "NOSOCK").
    pub fn from_code(s: &str) -> Option<Self> {
        match s {
            "BADREQ" => Some(Self::BadRequest),
            "NOSOCK" => Some(Self::SocketNotFound),
            "GPIO" => Some(Self::Hardware),
            "STORE" => Some(Self::Persistence),
            "INTERNAL" => Some(Self::Internal),
            _ => None,
        }
    }

    /// Human-readable description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::BadRequest => "Malformed request",
            Self::SocketNotFound => "Socket not found",
            Self::Hardware => "GPIO failure",
            Self::Persistence => "Storage failure",
            Self::Internal => "Internal error",
        }
    }

    /// The wire string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BADREQ",
            Self::SocketNotFound => "NOSOCK",
            Self::Hardware => "GPIO",
            Self::Persistence => "STORE",
            Self::Internal => "INTERNAL",
        }
    }

    /// Map a local failure onto the code reported to a remote caller.
    pub fn for_error(err: &PlcError) -> Self {
        match err {
            PlcError::SocketNotFound { .. } => Self::SocketNotFound,
            PlcError::Hardware { .. } => Self::Hardware,
            PlcError::Persistence(_) => Self::Persistence,
            PlcError::Protocol { .. } => Self::BadRequest,
            _ => Self::Internal,
        }
    }
}

impl fmt::Display for RpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.as_str(), self.description())
    }
}

/// All errors that can occur in the controller core.
#[derive(Debug, thiserror::Error)]
pub enum PlcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("Duplicate stack unit name: {name}")]
    DuplicateUnitName { name: String },

    #[error("Duplicate stack unit id: {id}")]
    DuplicateUnitId { id: UnitId },

    #[error("Duplicate socket: {name}")]
    DuplicateSocket { name: String },

    #[error("GPIO error on \"{pin}\": {reason}")]
    Hardware { pin: String, reason: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Socket not found: {name}")]
    SocketNotFound { name: String },

    #[error("Stack unit not found: {name}")]
    UnitNotFound { name: String },

    #[error("Unknown stack unit id: {id}")]
    UnknownUnitId { id: UnitId },

    #[error("RPC timeout: unit {unit}")]
    Timeout { unit: UnitId },

    #[error("Protocol error: {details}")]
    Protocol { details: String },

    #[error("Remote unit error: {0}")]
    Remote(RpcErrorCode),

    #[error("Command did not take effect on unit {unit}")]
    CommandFailed { unit: UnitId },

    #[error("Channel closed")]
    ChannelClosed,
}

impl PlcError {
    /// Whether this error is transient and the operation may succeed if retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlcError::Io(_)
                | PlcError::Timeout { .. }
                | PlcError::CommandFailed { .. }
                | PlcError::ChannelClosed
        )
    }

    /// Whether this is a plain lookup miss rather than a fault.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PlcError::SocketNotFound { .. }
                | PlcError::UnitNotFound { .. }
                | PlcError::UnknownUnitId { .. }
        )
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        PlcError::Configuration {
            reason: reason.into(),
        }
    }

    pub(crate) fn hardware(pin: &str, reason: impl fmt::Display) -> Self {
        PlcError::Hardware {
            pin: pin.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<rusqlite::Error> for PlcError {
    fn from(e: rusqlite::Error) -> Self {
        PlcError::Persistence(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PlcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_roundtrip() {
        for code in [
            RpcErrorCode::BadRequest,
            RpcErrorCode::SocketNotFound,
            RpcErrorCode::Hardware,
            RpcErrorCode::Persistence,
            RpcErrorCode::Internal,
        ] {
            assert_eq!(RpcErrorCode::from_code(code.as_str()), Some(code));
        }
        assert_eq!(RpcErrorCode::from_code("NOUNIT"), None);
    }

    #[test]
    fn test_code_for_error() {
        let err = PlcError::SocketNotFound {
            name: "porch".to_string(),
        };
        assert_eq!(RpcErrorCode::for_error(&err), RpcErrorCode::SocketNotFound);
        assert_eq!(
            RpcErrorCode::for_error(&PlcError::hardware("relay1", "EIO")),
            RpcErrorCode::Hardware
        );
        assert_eq!(
            RpcErrorCode::for_error(&PlcError::ChannelClosed),
            RpcErrorCode::Internal
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(PlcError::Timeout { unit: 2 }.is_transient());
        assert!(!PlcError::config("bad").is_transient());
        assert!(
            PlcError::UnitNotFound {
                name: "garage".to_string()
            }
            .is_not_found()
        );
        assert!(!PlcError::CommandFailed { unit: 2 }.is_not_found());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            RpcErrorCode::SocketNotFound.to_string(),
            "NOSOCK: Socket not found"
        );
        assert_eq!(
            PlcError::hardware("relay1", "EIO").to_string(),
            "GPIO error on \"relay1\": EIO"
        );
    }
}
