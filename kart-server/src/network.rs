use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TryRecvError, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

use kart_core::networking::{ConnectionError, ServerBoundPacket, WebSocketConnection};
use kart_core::{PlayerID, GLOBAL_CONFIG};

use crate::error::ServerError;

// how long a connection thread waits on a read before checking its outbox
const POLL_INTERVAL: Duration = Duration::from_millis(5);

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(0);

// Tells connections apart even when two of them claim the same player id
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

// Everything the simulation learns from the network, in arrival order. Each
// event names the connection it came from
#[derive(Debug)]
pub enum NetworkEvent {
    Joined {
        id: PlayerID,
        connection: ConnectionHandle,
    },
    Message {
        id: PlayerID,
        connection: ConnectionId,
        packet: ServerBoundPacket,
    },
    Left {
        id: PlayerID,
        connection: ConnectionId,
    },
}

/// The simulation's side of a connection: a bounded outbox drained by the
/// connection thread. Dropping every handle closes the connection.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbox: SyncSender<Arc<str>>,
}

impl ConnectionHandle {
    pub fn new(capacity: usize) -> (ConnectionHandle, Receiver<Arc<str>>) {
        let (outbox, receiver) = mpsc::sync_channel(capacity.max(1));
        let id = ConnectionId(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed));
        (ConnectionHandle { id, outbox }, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    // Never blocks the tick. A message that doesn't fit is dropped; the next
    // state update supersedes it anyway
    pub fn send(&self, message: Arc<str>) -> bool {
        match self.outbox.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("outbox full, dropping message for a slow client");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

pub fn listen(addr: &str) -> Result<Receiver<NetworkEvent>, ServerError> {
    let listener = TcpListener::bind(addr).map_err(|source| ServerError::Bind {
        addr: addr.to_string(),
        source,
    })?;
    info!("game server now listening on {}", addr);
    spawn_listener(listener)
}

// Accepts connections on a dedicated thread; every connection then lives on a
// thread of its own and reports back through the returned channel
pub fn spawn_listener(listener: TcpListener) -> Result<Receiver<NetworkEvent>, ServerError> {
    let (events, receiver) = mpsc::channel();
    thread::Builder::new()
        .name("listener".to_string())
        .spawn(move || accept_loop(listener, events))
        .map_err(|err| ServerError::Spawn("listener", err))?;
    Ok(receiver)
}

fn accept_loop(listener: TcpListener, events: Sender<NetworkEvent>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let peer = stream
                    .peer_addr()
                    .map(|addr| addr.to_string())
                    .unwrap_or_else(|_| "unknown peer".to_string());
                debug!("new connection from {}", peer);

                let events = events.clone();
                let spawned = thread::Builder::new()
                    .name(format!("conn {}", peer))
                    .spawn(move || run_connection(stream, peer, events));
                if let Err(err) = spawned {
                    error!("could not start a connection thread: {}", err);
                }
            }
            Err(err) => warn!("couldn't get connecting client info {:?}", err),
        }
    }
    error!("listener stopped accepting connections");
}

fn run_connection(stream: TcpStream, peer: String, events: Sender<NetworkEvent>) {
    let mut connection = match WebSocketConnection::new(stream, POLL_INTERVAL) {
        Ok(connection) => connection,
        Err(err) => {
            warn!("dropping {}: {}", peer, err);
            return;
        }
    };

    let id = PlayerID::new_v4();
    let (handle, outbox) = ConnectionHandle::new(GLOBAL_CONFIG.outbox_capacity);
    let from = handle.id();
    info!("player {} connected from {}", id, peer);
    if events
        .send(NetworkEvent::Joined {
            id,
            connection: handle,
        })
        .is_err()
    {
        connection.close();
        return;
    }

    match pump(&mut connection, id, from, &outbox, &events) {
        Ok(()) => info!("closing connection to player {}", id),
        Err(ConnectionError::Closed) => info!("player {} disconnected", id),
        Err(err) => warn!("lost connection to player {}: {}", id, err),
    }
    connection.close();
    let _ = events.send(NetworkEvent::Left {
        id,
        connection: from,
    });
}

// Shuttles packets both ways until the peer goes away (Err) or the simulation
// drops its handle (Ok). While the socket still holds unsent messages the
// outbox is left alone, so a client that stops reading fills it up and the
// simulation starts dropping instead
fn pump(
    connection: &mut WebSocketConnection,
    id: PlayerID,
    from: ConnectionId,
    outbox: &Receiver<Arc<str>>,
    events: &Sender<NetworkEvent>,
) -> Result<(), ConnectionError> {
    loop {
        connection.fetch_incoming_packets()?;
        while let Some(packet) = connection.pop_incoming() {
            let event = NetworkEvent::Message {
                id,
                connection: from,
                packet,
            };
            if events.send(event).is_err() {
                return Ok(());
            }
        }

        // a leftover means the write buffer is full
        while !connection.has_outgoing() {
            match outbox.try_recv() {
                Ok(message) => {
                    connection.push_outgoing(&*message);
                    connection.sync_outgoing()?;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    // let whatever the server said last reach the client
                    connection.sync_outgoing()?;
                    return Ok(());
                }
            }
        }
        connection.sync_outgoing()?;
    }
}
