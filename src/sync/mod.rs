//! Real-time channel: wire messages, the WebSocket connection, and cursor
//! smoothing.

pub mod channel;
pub mod cursor;
pub mod message;
