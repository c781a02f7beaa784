//! Tunnel Protocol Definitions
//!
//! This crate defines the control-channel envelope, the payload shapes carried inside it,
//! the JSON codec, and the liveness constants shared by server and client.
//!
//! Server and client are built independently, so everything in here is wire contract.

pub mod codec;
pub mod headers;
pub mod messages;

pub use codec::{CodecError, ControlCodec};
pub use headers::{append_header, is_hop_by_hop, Headers, HOP_BY_HOP_HEADERS};
pub use messages::*;

use std::time::Duration;

/// Path of the WebSocket upgrade endpoint on the server's main listener
pub const CONTROL_PATH: &str = "/ws";

/// Time allowed between inbound frames before the peer is considered dead
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Heartbeat period. Must be less than [`PONG_WAIT`].
pub const PING_PERIOD: Duration = Duration::from_secs(54);

/// Time allowed to write a single frame to the peer
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// How long the ingress waits for a relayed response
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);
