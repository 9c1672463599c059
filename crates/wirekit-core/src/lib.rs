//! Core types for wirekit.
//!
//! This crate holds everything about a session that does not depend on an
//! async runtime:
//!
//! - [`protocol`]: the JSON-RPC 2.0 message envelope and its decoder
//! - [`types`]: well-known methods (`initialize`, `ping`, cancellation, progress)
//! - [`capability`]: initialize payloads and protocol version negotiation
//! - [`state`]: the session lifecycle state machine
//! - [`error`]: the unified [`RpcError`] and JSON-RPC error codes
//!
//! # Example
//!
//! ```rust
//! use wirekit_core::prelude::*;
//!
//! let msg = Message::decode(br#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#).unwrap();
//! assert!(msg.is_response());
//! ```

pub mod capability;
pub mod error;
pub mod protocol;
pub mod state;
pub mod types;

pub use error::{ErrorCategory, JsonRpcError, RpcError, RpcResultExt};
pub use protocol::{EnvelopeError, Message, Notification, ProgressToken, Request, RequestId, Response};
pub use state::SessionState;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::capability::{
        Capabilities, InitializeParams, InitializeResult, PROTOCOL_VERSION, PeerInfo,
    };
    pub use crate::error::{ErrorCategory, JsonRpcError, RpcError, RpcResultExt};
    pub use crate::protocol::{
        Message, Notification, ProgressToken, Request, RequestId, Response,
    };
    pub use crate::state::SessionState;
    pub use crate::types::{CancelledParams, ProgressParams, method};
}
