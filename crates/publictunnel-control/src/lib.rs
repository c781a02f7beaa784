//! Control plane for the tunnel relay
//!
//! - [`TunnelHandler`] runs the server side of one control connection
//! - [`PendingRequests`] correlates relayed requests with their responses
//! - [`HttpRelay`] forwards one public request over a tunnel and waits for the answer
pub mod connection;
pub mod handler;
pub mod pending_requests;
pub mod relay;

pub use connection::{TunnelConnection, TunnelRegistry};
pub use handler::{HeartbeatConfig, SessionError, TunnelHandler};
pub use pending_requests::{PendingError, PendingRequests, PendingSlot};
pub use relay::{HttpRelay, RelayOutcome, RelayRequest};
