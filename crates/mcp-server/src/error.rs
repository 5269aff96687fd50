use thiserror::Error;

/// Errors the dispatcher itself raises, as opposed to errors surfaced
/// from [`context_hierarchy`] or [`context_registry`] (those already
/// carry their own `Display` and are relayed as-is).
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("execute_tool(\"{0}\") cancelled by caller")]
    Cancelled(String),
}
