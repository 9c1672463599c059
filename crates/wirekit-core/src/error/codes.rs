//! Standard JSON-RPC error codes and the wirekit server-range codes.

/// Invalid JSON was received.
pub const PARSE_ERROR: i32 = -32700;

/// The JSON sent is not a valid Request object.
pub const INVALID_REQUEST: i32 = -32600;

/// The method does not exist.
pub const METHOD_NOT_FOUND: i32 = -32601;

/// Invalid method parameters.
pub const INVALID_PARAMS: i32 = -32602;

/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i32 = -32603;

/// Server error range start.
pub const SERVER_ERROR_START: i32 = -32000;

/// Server error range end.
pub const SERVER_ERROR_END: i32 = -32099;

// Session and transport codes (server range)

/// The session or its connection has been closed.
pub const CONNECTION_CLOSED: i32 = SERVER_ERROR_START;

/// A request exceeded its deadline.
pub const REQUEST_TIMEOUT: i32 = SERVER_ERROR_START - 1;

/// Requested replay range has been pruned from the event store.
pub const REPLAY_EXPIRED: i32 = SERVER_ERROR_START - 2;

/// The session identifier is unknown.
pub const SESSION_NOT_FOUND: i32 = SERVER_ERROR_START - 3;

/// The initialize exchange failed.
pub const HANDSHAKE_FAILED: i32 = SERVER_ERROR_START - 4;

/// A transport-level failure.
pub const TRANSPORT_ERROR: i32 = SERVER_ERROR_START - 5;

/// The request was cancelled before it completed.
pub const REQUEST_CANCELLED: i32 = -32800;
