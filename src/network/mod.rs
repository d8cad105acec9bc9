// src/network/mod.rs
mod backend;
mod channel;
mod error;
mod protocol;

pub use backend::{AttendanceBackend, Endpoints, HttpBackend};
pub use channel::{ChannelEvent, ChannelState, SessionChannel};
pub use error::{ApiError, ConnectError, ProtocolError};
pub use protocol::{channel_url, decode_inbound, parse_timestamp, InboundMessage};
