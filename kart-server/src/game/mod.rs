use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, warn};

use kart_core::networking::{ClientBoundPacket, Packet, PlayerState, ServerBoundPacket};
use kart_core::{PlayerID, GLOBAL_CONFIG};

use crate::network::{ConnectionHandle, ConnectionId, NetworkEvent};
use crate::physics::PhysicsWorld;
use crate::session::SessionTable;
use crate::vehicle::RigPart;

use self::clock::TickClock;

mod clock;

/// The authoritative simulation. Only this struct ever touches the physics
/// world; the network threads talk to it through `events`.
pub struct GameServer {
    world: PhysicsWorld,
    sessions: SessionTable,
    events: Receiver<NetworkEvent>,
    max_drive_velocity: f32,
    max_steer_angle: f32,
    ticks: u64,
    network_lost: bool,
}

impl GameServer {
    pub fn new(events: Receiver<NetworkEvent>) -> GameServer {
        GameServer::with_sessions(events, SessionTable::default())
    }

    pub fn with_sessions(events: Receiver<NetworkEvent>, sessions: SessionTable) -> GameServer {
        GameServer {
            world: PhysicsWorld::new(),
            sessions,
            events,
            max_drive_velocity: GLOBAL_CONFIG.max_drive_velocity,
            max_steer_angle: GLOBAL_CONFIG.max_steer_angle(),
            ticks: 0,
            network_lost: false,
        }
    }

    // WARNING: this function never returns
    pub fn start_loop(&mut self) -> ! {
        let interval = Duration::from_secs_f64(1.0 / GLOBAL_CONFIG.server_tick_rate.max(1) as f64);
        let mut clock = TickClock::new(interval, Instant::now());

        loop {
            self.tick();

            let pacing = clock.advance(Instant::now());
            if pacing.dropped > 0 {
                warn!(
                    "server tick {} took longer than {:?}, dropped {} tick(s)",
                    self.ticks,
                    clock.interval(),
                    pacing.dropped
                );
            }
            thread::sleep(pacing.wait);
        }
    }

    // One full cycle: structural changes and inputs first, then exactly one
    // physics step, then the broadcast of what the step produced
    pub fn tick(&mut self) {
        self.process_network_events();
        self.apply_inputs();
        self.world.step();
        self.sync_state();
        self.ticks += 1;
    }

    // handle every event in received order
    fn process_network_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(NetworkEvent::Joined { id, connection }) => self.handle_join(id, connection),
                Ok(NetworkEvent::Message {
                    id,
                    connection,
                    packet,
                }) => self.handle_packet(id, connection, packet),
                Ok(NetworkEvent::Left { id, connection }) => self.handle_leave(id, connection),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.network_lost {
                        error!("network threads are gone, no more players can join");
                        self.network_lost = true;
                    }
                    break;
                }
            }
        }
    }

    fn handle_join(&mut self, id: PlayerID, connection: ConnectionHandle) {
        // a rejected connection is closed once its handle is dropped here
        let session = match self.sessions.on_join(&mut self.world, id, connection) {
            Ok(session) => session,
            Err(err) => {
                warn!("rejected player {}: {}", id, err);
                return;
            }
        };

        if let Some(geometry) = session.vehicle().geometry(&self.world) {
            let join = ClientBoundPacket::Join {
                player_id: id,
                geometry,
            };
            let ground = ClientBoundPacket::CreateGround {
                ground: self.world.ground_geometry(),
            };
            for packet in [join, ground] {
                if let Some(message) = encode(&packet) {
                    session.connection().send(message);
                }
            }
        }

        // everyone else learns about the new vehicle straight away
        self.broadcast_state(Some(id));
    }

    fn handle_packet(&mut self, id: PlayerID, from: ConnectionId, packet: ServerBoundPacket) {
        match packet {
            ServerBoundPacket::Move { input } => {
                if !self.sessions.on_input(id, from, input) {
                    debug!("ignoring input for player {} from {:?}", id, from);
                }
            }
        }
    }

    // a rejected duplicate hanging up must not take the live session with it
    fn handle_leave(&mut self, id: PlayerID, from: ConnectionId) {
        if !self.sessions.on_leave(&mut self.world, id, from) {
            debug!("no session for player {} on {:?}", id, from);
        }
    }

    // Held input: whatever a player sent last keeps being applied until they
    // send something else
    fn apply_inputs(&mut self) {
        for session in self.sessions.iter_mut() {
            let input = session.pending_input().clamped();
            let vehicle = session.vehicle_mut();
            vehicle.set_drive_velocity(&mut self.world, input.throttle * self.max_drive_velocity);
            vehicle.set_steering_angle(&mut self.world, input.steer * self.max_steer_angle);
        }
    }

    fn sync_state(&mut self) {
        self.broadcast_state(None);
    }

    fn broadcast_state(&self, except: Option<PlayerID>) {
        let players = self
            .sessions
            .iter()
            .filter_map(|session| {
                Some(PlayerState {
                    player_id: session.id(),
                    geometry: session.vehicle().geometry(&self.world)?,
                })
            })
            .collect();

        let Some(message) = encode(&ClientBoundPacket::StateUpdate { players }) else {
            return;
        };
        self.sessions
            .iter()
            .filter(|session| Some(session.id()) != except)
            .for_each(|session| {
                session.connection().send(Arc::clone(&message));
            });
    }

}

#[cfg(test)]
impl GameServer {
    pub fn world(&self) -> &PhysicsWorld {
        &self.world
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn vehicle_geometry(&self, id: PlayerID) -> Option<kart_core::geometry::VehicleGeometry> {
        self.sessions.get(id)?.vehicle().geometry(&self.world)
    }
}

impl Drop for GameServer {
    fn drop(&mut self) {
        self.sessions.clear(&mut self.world);
    }
}

// encoded once and shared by every outbox it goes to
fn encode(packet: &ClientBoundPacket) -> Option<Arc<str>> {
    match packet.to_text() {
        Ok(text) => Some(Arc::from(text)),
        Err(err) => {
            error!("could not encode {:?}: {}", packet, err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::{self, Sender};

    use kart_core::player_inputs::PlayerInputs;

    use super::*;
    use crate::spawn::spawn_pose;
    use crate::vehicle::VehicleParams;

    struct Client {
        id: PlayerID,
        connection: ConnectionId,
        outbox: Receiver<Arc<str>>,
    }

    impl Client {
        fn join(events: &Sender<NetworkEvent>) -> Client {
            Client::join_as(events, PlayerID::new_v4())
        }

        fn join_as(events: &Sender<NetworkEvent>, id: PlayerID) -> Client {
            let (connection, outbox) = ConnectionHandle::new(1024);
            let from = connection.id();
            events.send(NetworkEvent::Joined { id, connection }).unwrap();
            Client {
                id,
                connection: from,
                outbox,
            }
        }

        fn send(&self, events: &Sender<NetworkEvent>, throttle: f32, steer: f32) {
            events
                .send(NetworkEvent::Message {
                    id: self.id,
                    connection: self.connection,
                    packet: ServerBoundPacket::Move {
                        input: PlayerInputs::new(throttle, steer),
                    },
                })
                .unwrap();
        }

        fn leave(&self, events: &Sender<NetworkEvent>) {
            events
                .send(NetworkEvent::Left {
                    id: self.id,
                    connection: self.connection,
                })
                .unwrap();
        }

        fn received(&self) -> Vec<ClientBoundPacket> {
            self.outbox
                .try_iter()
                .map(|text| ClientBoundPacket::parse_packet(&text).unwrap())
                .collect()
        }
    }

    fn server() -> (GameServer, Sender<NetworkEvent>) {
        let (events, receiver) = mpsc::channel();
        (GameServer::new(receiver), events)
    }

    fn players_in(packet: &ClientBoundPacket) -> Vec<PlayerID> {
        match packet {
            ClientBoundPacket::StateUpdate { players } => {
                players.iter().map(|player| player.player_id).collect()
            }
            other => panic!("expected a state update, got {:?}", other),
        }
    }

    #[test]
    fn joiner_gets_join_then_ground_then_state() {
        let (mut game, events) = server();
        let a = Client::join(&events);
        game.tick();

        let received = a.received();
        assert_eq!(received.len(), 3);
        match &received[0] {
            ClientBoundPacket::Join {
                player_id,
                geometry,
            } => {
                assert_eq!(*player_id, a.id);
                // snapshot taken before the first step
                assert!(geometry.chassis.position.abs_diff_eq(spawn_pose(0).position, 1e-5));
            }
            other => panic!("expected a join, got {:?}", other),
        }
        match &received[1] {
            ClientBoundPacket::CreateGround { ground } => {
                assert_eq!(*ground, game.world().ground_geometry());
            }
            other => panic!("expected the ground, got {:?}", other),
        }
        assert_eq!(players_in(&received[2]), vec![a.id]);

        let b = Client::join(&events);
        game.tick();

        // one update for b's arrival, one for the tick
        let seen_by_a = a.received();
        assert_eq!(seen_by_a.len(), 2);
        for packet in &seen_by_a {
            let mut expected = vec![a.id, b.id];
            expected.sort();
            assert_eq!(players_in(packet), expected);
        }

        // b sits out its own arrival broadcast and only sees the tick's
        let seen_by_b = b.received();
        assert_eq!(seen_by_b.len(), 3);
        assert!(matches!(seen_by_b[0], ClientBoundPacket::Join { player_id, .. } if player_id == b.id));
        assert!(matches!(seen_by_b[1], ClientBoundPacket::CreateGround { .. }));
        assert_eq!(players_in(&seen_by_b[2]).len(), 2);
    }

    #[test]
    fn arrival_broadcast_skips_the_new_player() {
        let (mut game, events) = server();
        let a = Client::join(&events);
        game.tick();
        a.received();

        // handle the join alone, without stepping or the tick's broadcast
        let b = Client::join(&events);
        game.process_network_events();

        let seen_by_a = a.received();
        assert_eq!(seen_by_a.len(), 1);
        assert!(players_in(&seen_by_a[0]).contains(&b.id));

        let seen_by_b = b.received();
        assert_eq!(seen_by_b.len(), 2);
        assert!(matches!(seen_by_b[0], ClientBoundPacket::Join { .. }));
        assert!(matches!(seen_by_b[1], ClientBoundPacket::CreateGround { .. }));
    }

    #[test]
    fn input_from_a_player_who_left_is_never_applied() {
        let (mut game, events) = server();
        let a = Client::join(&events);
        let b = Client::join(&events);
        game.tick();
        b.received();

        a.send(&events, 5.0, 0.0);
        a.leave(&events);
        game.tick();

        assert!(!game.sessions().contains(a.id));
        assert!(game.vehicle_geometry(a.id).is_none());
        // ground plus b's vehicle
        assert_eq!(game.world().body_count(), 1 + 9);

        let updates = b.received();
        assert_eq!(updates.len(), 1);
        assert_eq!(players_in(&updates[0]), vec![b.id]);
    }

    #[test]
    fn a_full_server_closes_the_extra_connection() {
        let (events, receiver) = mpsc::channel();
        let mut game =
            GameServer::with_sessions(receiver, SessionTable::new(VehicleParams::default(), 1));
        let a = Client::join(&events);
        let b = Client::join(&events);
        game.tick();

        assert_eq!(game.sessions().len(), 1);
        assert!(game.sessions().contains(a.id));
        // b's handle was dropped without anything being sent
        assert!(matches!(b.outbox.try_recv(), Err(TryRecvError::Disconnected)));
    }

    #[test]
    fn held_throttle_drives_only_that_vehicle_forward() {
        let (mut game, events) = server();
        let a = Client::join(&events);
        let b = Client::join(&events);

        for _ in 0..30 {
            game.tick();
        }
        let a_before = game.vehicle_geometry(a.id).unwrap().chassis.position;
        let b_before = game.vehicle_geometry(b.id).unwrap().chassis.position;

        // sent once, held for every following tick
        a.send(&events, 1.0, 0.0);
        for _ in 0..120 {
            game.tick();
        }
        let a_after = game.vehicle_geometry(a.id).unwrap().chassis.position;
        let b_after = game.vehicle_geometry(b.id).unwrap().chassis.position;

        assert!(a_after.z - a_before.z > 1.0, "a only moved from {} to {}", a_before, a_after);
        assert!((b_after.x - b_before.x).abs() < 0.1);
        assert!((b_after.z - b_before.z).abs() < 0.1);
        assert_eq!(game.ticks(), 150);

        let driven = game.sessions().get(a.id).unwrap();
        assert_eq!(driven.vehicle().drive_velocity(), GLOBAL_CONFIG.max_drive_velocity);
    }

    #[test]
    fn a_duplicate_id_cannot_touch_the_live_session() {
        let (mut game, events) = server();
        let a = Client::join(&events);
        game.tick();

        let impostor = Client::join_as(&events, a.id);
        game.tick();
        assert!(matches!(impostor.outbox.try_recv(), Err(TryRecvError::Disconnected)));

        // its connection thread would still report input and then a leave
        impostor.send(&events, 1.0, 1.0);
        impostor.leave(&events);
        game.tick();

        let session = game.sessions().get(a.id).expect("a is still in the game");
        assert_eq!(session.pending_input(), PlayerInputs::default());
        assert_eq!(game.world().body_count(), 1 + 9);

        a.leave(&events);
        game.tick();
        assert!(game.sessions().is_empty());
    }

    #[test]
    fn steering_while_driving_turns_the_vehicle() {
        fn heading(game: &GameServer, id: PlayerID) -> f32 {
            let forward = game.vehicle_geometry(id).unwrap().chassis.orientation * glam::Vec3::Z;
            forward.x.atan2(forward.z)
        }

        let turn = |steer: f32| {
            let (mut game, events) = server();
            let a = Client::join(&events);
            for _ in 0..30 {
                game.tick();
            }
            let before = heading(&game, a.id);

            a.send(&events, 0.5, steer);
            for _ in 0..60 {
                game.tick();
            }
            let delta = heading(&game, a.id) - before;
            delta.sin().atan2(delta.cos())
        };

        let right = turn(1.0);
        let left = turn(-1.0);
        assert!(right > 0.2, "full right only turned {} rad", right);
        assert!(left < -0.2, "full left only turned {} rad", left);
    }
}
