use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::TcpStream;
use std::time::Duration;

use log::{debug, warn};
use thiserror::Error;
use tungstenite::protocol::WebSocketConfig;
pub use tungstenite::{accept_with_config, Message, WebSocket};

use super::packets::{Packet, ServerBoundPacket};

// upper bound on messages drained per poll so a chatty client can't starve
// its own outgoing queue
const MAX_READS_PER_POLL: usize = 64;

// tungstenite buffers writes without limit by default; past this a write
// hands the message back instead
const MAX_WRITE_BUFFER: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
    #[error("socket io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("connection closed by peer")]
    Closed,
}

fn is_would_block(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

pub struct WSConnection {
    socket: WebSocket<TcpStream>,
    incoming_packets: VecDeque<ServerBoundPacket>,
    outgoing_packets: VecDeque<Message>,
}

impl WSConnection {
    // Performs the (blocking) handshake, then switches the stream to short
    // read timeouts so one thread can interleave reading and writing
    pub fn new(tcp_stream: TcpStream, poll_interval: Duration) -> Result<WSConnection, ConnectionError> {
        // disable the Nagle algorithm to allow for real-time transfers
        tcp_stream.set_nodelay(true)?;
        tcp_stream.set_nonblocking(false)?;

        let mut config = WebSocketConfig::default();
        config.max_write_buffer_size = MAX_WRITE_BUFFER;
        let socket = accept_with_config(tcp_stream, Some(config))
            .map_err(|err| ConnectionError::Handshake(err.to_string()))?;
        socket.get_ref().set_read_timeout(Some(poll_interval))?;
        socket.get_ref().set_write_timeout(Some(poll_interval))?;

        Ok(WSConnection {
            socket,
            incoming_packets: VecDeque::new(),
            outgoing_packets: VecDeque::new(),
        })
    }

    // Returns Err once the peer has gone away; malformed messages are logged
    // and dropped without affecting the connection
    pub fn fetch_incoming_packets(&mut self) -> Result<(), ConnectionError> {
        for _ in 0..MAX_READS_PER_POLL {
            match self.socket.read() {
                Ok(Message::Text(txt)) => match ServerBoundPacket::parse_packet(&txt) {
                    Ok(packet) if packet.is_well_formed() => self.incoming_packets.push_back(packet),
                    Ok(packet) => warn!("dropping packet with non-finite values: {:?}", packet),
                    Err(err) => warn!("dropping unparseable message: {}", err),
                },
                Ok(Message::Close(_)) => return Err(ConnectionError::Closed),
                // pings are answered by tungstenite itself
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                Ok(Message::Binary(bytes)) => {
                    debug!("ignoring {} byte binary message", bytes.len());
                }
                Err(tungstenite::Error::Io(ref err)) if is_would_block(err) => return Ok(()),
                Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                    return Err(ConnectionError::Closed)
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    pub fn pop_incoming(&mut self) -> Option<ServerBoundPacket> {
        self.incoming_packets.pop_front()
    }

    pub fn push_outgoing(&mut self, text: impl Into<String>) {
        self.outgoing_packets.push_back(Message::Text(text.into()));
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outgoing_packets.is_empty()
    }

    // send queued packets until exhausted or the socket pushes back; anything
    // left over is retried on the next call
    pub fn sync_outgoing(&mut self) -> Result<(), ConnectionError> {
        while let Some(msg) = self.outgoing_packets.pop_front() {
            match self.socket.write(msg) {
                Ok(()) => {}
                Err(tungstenite::Error::WriteBufferFull(msg)) => {
                    self.outgoing_packets.push_front(msg);
                    break;
                }
                // the message is already buffered inside tungstenite
                Err(tungstenite::Error::Io(ref err)) if is_would_block(err) => break,
                Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                    return Err(ConnectionError::Closed)
                }
                Err(err) => return Err(err.into()),
            }
        }

        match self.socket.flush() {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::Io(ref err)) if is_would_block(err) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                Err(ConnectionError::Closed)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn close(&mut self) {
        if let Err(err) = self.socket.close(None) {
            debug!("error while closing websocket: {}", err);
        }
        let _ = self.socket.flush();
    }
}
