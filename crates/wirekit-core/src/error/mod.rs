//! Unified error handling for wirekit.
//!
//! Every fallible operation in the session engine returns [`RpcError`]. Its
//! variants line up with the protocol's failure classes, which
//! [`RpcError::category`] reports as an [`ErrorCategory`]:
//!
//! | Category | Raised when | Effect |
//! |----------|-------------|--------|
//! | `Framing` | bytes on the wire are not a message | tears down the session |
//! | `Protocol` | a message breaks the envelope invariants | error Response, or teardown |
//! | `Timeout` | a request outlives its deadline | surfaced to the caller |
//! | `Cancelled` | either side cancels | surfaced to the caller |
//! | `SessionClosed` | the session is gone | all further calls fail |
//! | `ReplayExpired` | the event store pruned a resume range | client must restart |
//!
//! Per-request failures (unknown method, bad params, handler errors) become
//! error Responses through [`JsonRpcError::from`] and never reach the
//! receive loop.

pub mod codes;
mod context;
mod details;
mod jsonrpc;
mod transport;
mod types;

pub use codes::*;
pub use context::RpcResultExt;
pub use details::{BoxError, HandshakeDetails, InvalidParamsDetails, TransportDetails};
pub use jsonrpc::JsonRpcError;
pub use transport::{TransportContext, TransportErrorKind};
pub use types::{ErrorCategory, RpcError};
