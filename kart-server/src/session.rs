use std::collections::BTreeMap;
use std::mem;

use log::info;
use thiserror::Error;

use kart_core::player_inputs::PlayerInputs;
use kart_core::PlayerID;

use crate::network::{ConnectionHandle, ConnectionId};
use crate::physics::{vehicle_collision_groups, PhysicsWorld};
use crate::spawn::{slot_capacity, spawn_pose};
use crate::vehicle::{RigPart, VehicleParams, VehicleRig};

/// Why a join was turned away. `ServerFull` exists because every vehicle
/// needs a collision group bit of its own, so the table never grows past the
/// bits left over after the environment's.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("player {0} has already joined")]
    AlreadyJoined(PlayerID),
    #[error("all {capacity} vehicle slots are taken")]
    ServerFull { capacity: usize },
}

pub struct PlayerSession {
    id: PlayerID,
    // picks the spawn lane and the collision group
    slot: usize,
    vehicle: VehicleRig,
    // held until the client sends something else
    pending_input: PlayerInputs,
    connection: ConnectionHandle,
}

impl PlayerSession {
    pub fn id(&self) -> PlayerID {
        self.id
    }

    pub fn vehicle(&self) -> &VehicleRig {
        &self.vehicle
    }

    pub fn vehicle_mut(&mut self) -> &mut VehicleRig {
        &mut self.vehicle
    }

    pub fn pending_input(&self) -> PlayerInputs {
        self.pending_input
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    fn is_from(&self, connection: ConnectionId) -> bool {
        self.connection.id() == connection
    }
}

/// Sole owner of every player session, and through them every vehicle in the
/// world. Ordered by id so broadcasts come out the same way every tick.
pub struct SessionTable {
    sessions: BTreeMap<PlayerID, PlayerSession>,
    params: VehicleParams,
    capacity: usize,
}

impl SessionTable {
    pub fn new(params: VehicleParams, capacity: usize) -> SessionTable {
        SessionTable {
            sessions: BTreeMap::new(),
            params,
            capacity,
        }
    }

    // Reconnecting with an id that is still in the table is rejected rather
    // than handed the existing vehicle
    pub fn on_join(
        &mut self,
        world: &mut PhysicsWorld,
        id: PlayerID,
        connection: ConnectionHandle,
    ) -> Result<&PlayerSession, SessionError> {
        if self.sessions.contains_key(&id) {
            return Err(SessionError::AlreadyJoined(id));
        }
        let slot = self.free_slot().ok_or(SessionError::ServerFull {
            capacity: self.capacity,
        })?;

        let vehicle = VehicleRig::new(
            world,
            spawn_pose(slot),
            &self.params,
            vehicle_collision_groups(slot),
        );
        info!("player {} spawned in slot {}", id, slot);

        Ok(self.sessions.entry(id).or_insert(PlayerSession {
            id,
            slot,
            vehicle,
            pending_input: PlayerInputs::default(),
            connection,
        }))
    }

    // Late input for a player that already left is ignored, and so is input
    // carrying the right id over some other connection
    pub fn on_input(&mut self, id: PlayerID, from: ConnectionId, input: PlayerInputs) -> bool {
        match self.sessions.get_mut(&id) {
            Some(session) if session.is_from(from) => {
                session.pending_input = input;
                true
            }
            _ => false,
        }
    }

    // only the connection that owns the session can end it
    pub fn on_leave(&mut self, world: &mut PhysicsWorld, id: PlayerID, from: ConnectionId) -> bool {
        if !self.sessions.get(&id).is_some_and(|session| session.is_from(from)) {
            return false;
        }
        match self.sessions.remove(&id) {
            Some(mut session) => {
                session.vehicle.cleanup(world);
                info!("player {} left, slot {} is free", id, session.slot);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self, world: &mut PhysicsWorld) {
        for (_, mut session) in mem::take(&mut self.sessions) {
            session.vehicle.cleanup(world);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerSession> {
        self.sessions.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PlayerSession> {
        self.sessions.values_mut()
    }

    // lowest slot nobody holds
    pub fn free_slot(&self) -> Option<usize> {
        (0..self.capacity).find(|slot| self.sessions.values().all(|session| session.slot != *slot))
    }
}

#[cfg(test)]
impl SessionTable {
    pub fn get(&self, id: PlayerID) -> Option<&PlayerSession> {
        self.sessions.get(&id)
    }

    pub fn contains(&self, id: PlayerID) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
impl PlayerSession {
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        SessionTable::new(VehicleParams::default(), slot_capacity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn join(table: &mut SessionTable, world: &mut PhysicsWorld) -> (PlayerID, ConnectionId) {
        let id = PlayerID::new_v4();
        let (connection, _outbox) = ConnectionHandle::new(8);
        let from = connection.id();
        table.on_join(world, id, connection).unwrap();
        (id, from)
    }

    fn counts(world: &PhysicsWorld) -> (usize, usize, usize) {
        (world.body_count(), world.collider_count(), world.joint_count())
    }

    #[test]
    fn joins_and_leaves_leave_no_orphans() {
        let mut world = PhysicsWorld::new();
        let mut table = SessionTable::default();
        // just the ground
        assert_eq!(counts(&world), (1, 1, 0));

        let (a, a_from) = join(&mut table, &mut world);
        let (b, _) = join(&mut table, &mut world);
        assert_eq!(counts(&world), (1 + 2 * 9, 1 + 2 * 9, 2 * 8));

        assert!(table.on_leave(&mut world, a, a_from));
        assert_eq!(counts(&world), (1 + 9, 1 + 9, 8));

        let (c, _) = join(&mut table, &mut world);
        // the freed slot is reused
        assert_eq!(table.get(c).unwrap().slot(), 0);
        assert_eq!(table.get(b).unwrap().slot(), 1);

        table.clear(&mut world);
        assert!(table.is_empty());
        assert_eq!(counts(&world), (1, 1, 0));
    }

    #[test]
    fn duplicate_leave_is_tolerated() {
        let mut world = PhysicsWorld::new();
        let mut table = SessionTable::default();
        let (id, from) = join(&mut table, &mut world);

        assert!(table.on_leave(&mut world, id, from));
        assert!(!table.on_leave(&mut world, id, from));
        assert!(!table.on_leave(&mut world, PlayerID::new_v4(), from));
        assert_eq!(counts(&world), (1, 1, 0));
    }

    #[test]
    fn rejoining_with_a_live_id_is_rejected() {
        let mut world = PhysicsWorld::new();
        let mut table = SessionTable::default();
        let (id, from) = join(&mut table, &mut world);
        let bodies = world.body_count();

        let (connection, _outbox) = ConnectionHandle::new(8);
        let impostor = connection.id();
        let err = table.on_join(&mut world, id, connection).err();
        assert_eq!(err, Some(SessionError::AlreadyJoined(id)));
        assert_eq!(table.len(), 1);
        assert_eq!(world.body_count(), bodies);

        // the rejected connection can neither steer nor end the live session
        assert!(!table.on_input(id, impostor, PlayerInputs::new(1.0, 1.0)));
        assert!(!table.on_leave(&mut world, id, impostor));
        assert_eq!(table.get(id).unwrap().pending_input(), PlayerInputs::default());
        assert_eq!(world.body_count(), bodies);
        assert!(table.on_leave(&mut world, id, from));

        table.clear(&mut world);
    }

    #[test]
    fn joining_a_full_table_fails() {
        let mut world = PhysicsWorld::new();
        let mut table = SessionTable::new(VehicleParams::default(), 2);
        join(&mut table, &mut world);
        join(&mut table, &mut world);

        let (connection, _outbox) = ConnectionHandle::new(8);
        let err = table.on_join(&mut world, PlayerID::new_v4(), connection).err();
        assert_eq!(err, Some(SessionError::ServerFull { capacity: 2 }));
        assert_eq!(table.free_slot(), None);

        table.clear(&mut world);
    }

    #[test]
    fn input_overwrites_and_unknown_ids_are_ignored() {
        let mut world = PhysicsWorld::new();
        let mut table = SessionTable::default();
        let (id, from) = join(&mut table, &mut world);
        assert_eq!(table.get(id).unwrap().pending_input(), PlayerInputs::default());

        assert!(table.on_input(id, from, PlayerInputs::new(1.0, 0.0)));
        assert!(table.on_input(id, from, PlayerInputs::new(0.5, -0.2)));
        assert_eq!(table.get(id).unwrap().pending_input(), PlayerInputs::new(0.5, -0.2));

        assert!(!table.on_input(PlayerID::new_v4(), from, PlayerInputs::new(1.0, 1.0)));

        table.clear(&mut world);
    }
}
