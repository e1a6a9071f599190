//! WebSocket transport: session lifecycle and heartbeat.

pub mod heartbeat;
pub mod session;
