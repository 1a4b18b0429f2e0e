//! Prometheus metrics for the access service
//!
//! Structured logging lives in [`crate::logging`].

pub mod endpoint;
pub mod metrics;
pub mod recorder;

pub use self::endpoint::*;
pub use self::metrics::*;
pub use self::recorder::*;
