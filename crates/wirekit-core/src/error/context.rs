//! `anyhow`-style context on typed results.

use super::types::RpcError;

/// Extension trait for adding context to `Result<T, RpcError>`.
///
/// # Example
///
/// ```rust
/// use wirekit_core::error::{RpcError, RpcResultExt};
///
/// fn load() -> Result<(), RpcError> {
///     let result: Result<(), RpcError> = Err(RpcError::internal("disk full"));
///     result.context("Failed to persist event")?;
///     Ok(())
/// }
/// ```
pub trait RpcResultExt<T> {
    /// Add context to an error.
    fn context<C: Into<String>>(self, context: C) -> Result<T, RpcError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<C, F>(self, f: F) -> Result<T, RpcError>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> RpcResultExt<T> for Result<T, RpcError> {
    fn context<C: Into<String>>(self, context: C) -> Self {
        self.map_err(|e| RpcError::WithContext {
            context: context.into(),
            source: Box::new(e),
        })
    }

    fn with_context<C, F>(self, f: F) -> Self
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| RpcError::WithContext {
            context: f().into(),
            source: Box::new(e),
        })
    }
}
