//! protomon-registry: concurrent owner of per-source protocol status.
//! Protocol clients push connection events in; the API layer reads
//! normalized snapshots out. No socket, no I/O.

pub mod clock;
pub mod rate_limiter;
pub mod registry;

pub use protomon_core::{config, types};
pub use rate_limiter::{ConnectDecision, ConnectionRateLimiter, RateLimitState};
pub use registry::ProtocolStatusRegistry;
