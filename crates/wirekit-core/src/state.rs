//! Session lifecycle states.
//!
//! ```text
//! uninitialized ──► initializing ──► active ──► closing ──► closed
//!        │                │                                   ▲
//!        └────────────────┴──────────── fatal error ──────────┘
//! ```
//!
//! Only `active` accepts arbitrary requests. `closing` drains work that is
//! already in flight and refuses new outgoing requests. `closed` is terminal.

use std::fmt;

/// The lifecycle state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SessionState {
    /// Transport attached, no handshake yet.
    Uninitialized,
    /// The `initialize` exchange is in progress.
    Initializing,
    /// Handshake complete; any method may be called.
    Active,
    /// Draining in-flight work before teardown.
    Closing,
    /// Torn down. Every operation fails with `SessionClosed`.
    Closed,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use SessionState::{Active, Closed, Closing, Initializing, Uninitialized};
        matches!(
            (self, next),
            (Uninitialized, Initializing)
                | (Initializing, Active)
                | (Uninitialized | Initializing | Active, Closing)
                | (Uninitialized | Initializing | Active | Closing, Closed)
        )
    }

    /// Whether arbitrary requests may be sent and served.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }

    /// Whether the session is closing or closed.
    #[must_use]
    pub const fn is_shutting_down(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }

    /// Whether this is the terminal state.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(text)
    }
}
