mod packets;
pub mod ws;

pub use packets::*;
pub use ws::ConnectionError;
pub type WebSocketConnection = ws::WSConnection;
