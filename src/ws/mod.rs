//! WebSocket channels: wire protocol, outbound transport and upgrade handlers

pub mod handler;
pub mod protocol;
pub mod transport;
