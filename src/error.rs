//! Error types for tool dispatch.
//!
//! Only [`DispatchError`] ever reaches the caller of
//! [`dispatch`](crate::tools::dispatch). Argument problems are reported back
//! to the model as plain text, so [`ArgumentError`] stays inside the tools
//! module and is rendered with `Display`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// No enabled tool is registered under this name.
    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum ArgumentError {
    #[error("arguments must be a JSON object")]
    NotAnObject,

    #[error("missing required parameter: {0}")]
    Missing(String),

    #[error("parameter '{name}' must be of type '{expected}', got {actual}")]
    WrongType {
        name: String,
        expected: String,
        actual: &'static str,
    },

    #[error("parameter '{name}' must be one of: {allowed}")]
    NotAllowed { name: String, allowed: String },

    #[error("malformed arguments: {0}")]
    Malformed(String),
}
