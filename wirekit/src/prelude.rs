//! Prelude module for convenient imports.
//!
//! ```rust
//! use wirekit::prelude::*;
//!
//! let config = SessionConfig::default().with_info("my-server", "1.0.0");
//! let builder = SessionBuilder::new(config);
//! assert!(!builder.has_handler("echo"));
//! ```

pub use wirekit_core::prelude::*;

pub use wirekit_session::{
    CancellationToken, NotificationListener, RequestContext, RequestHandler, RequestOptions, Role,
    Session, SessionBuilder, SessionConfig,
};

pub use wirekit_transport::{Transport, TransportMetadata};
