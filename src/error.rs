//! Error types for printwire.

use serde_json::Value;
use thiserror::Error;

use crate::task::{TaskEvent, TaskState};

/// Main error type for printwire operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during transport operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Endpoint address string could not be parsed.
    #[error(transparent)]
    Address(#[from] AddressError),

    /// A task was driven out of order.
    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// A task received a lifecycle event that is not legal in its current state.
///
/// This is a programming error in the caller, not a runtime condition to
/// recover from: the transition is rejected and the task is left unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal task transition: {event:?} in state {state:?}")]
pub struct IllegalTransition {
    /// State the task was in when the event arrived.
    pub state: TaskState,
    /// The rejected lifecycle event.
    pub event: TaskEvent,
}

/// An application-recognized RPC fault carrying an explicit error code.
///
/// Registered methods return this to produce a structured JSON-RPC error
/// response with their own code/message/data, as opposed to the generic
/// `-32000 uncaught exception` used for unrecognized failures.
#[derive(Debug, Clone, Error)]
#[error("rpc fault {code}: {message}")]
pub struct RpcFault {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl RpcFault {
    /// Create a fault with no attached data.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create a fault with attached data.
    pub fn with_data(code: i64, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }
}

/// The closed set of failures a registered method can produce.
#[derive(Debug, Error)]
pub enum MethodError {
    /// Argument count/shape did not match the method (`-32602`).
    #[error("invalid params")]
    InvalidParams,

    /// A recognized fault with its own code/message/data.
    #[error(transparent)]
    Fault(#[from] RpcFault),

    /// Anything else, including a caught handler panic (`-32000`).
    #[error("{name}: {message}")]
    Uncaught { name: String, message: String },
}

/// Failure to parse an endpoint address string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// The scheme prefix is not `pipe:`, `unix:`, or `tcp:`.
    #[error("unknown address scheme in {0:?}")]
    UnknownScheme(String),

    /// A `pipe:`/`unix:` address with no path.
    #[error("missing pipe path in {0:?}")]
    MissingPath(String),

    /// A `tcp:` address with no host.
    #[error("missing host in {0:?}")]
    MissingHost(String),

    /// A `tcp:` address without a `host:port` pair.
    #[error("malformed address {0:?}")]
    Malformed(String),

    /// A `tcp:` address whose port is not a number.
    #[error("invalid port in {0:?}")]
    InvalidPort(String),
}
