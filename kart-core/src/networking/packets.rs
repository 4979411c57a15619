use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Result;

pub use uuid::Uuid;

use crate::geometry::{GroundGeometry, VehicleGeometry};
use crate::player_inputs::PlayerInputs;
use crate::PlayerID;

// Joining is implicit on connect, so clients only ever drive their vehicle
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerBoundPacket {
    Move { input: PlayerInputs },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub player_id: PlayerID,
    pub geometry: VehicleGeometry,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientBoundPacket {
    // Sent once to a new player: who they are and where their vehicle is
    #[serde(rename_all = "camelCase")]
    Join {
        player_id: PlayerID,
        geometry: VehicleGeometry,
    },
    CreateGround {
        ground: GroundGeometry,
    },
    // Every tick: the pose of every vehicle in the world
    StateUpdate {
        players: Vec<PlayerState>,
    },
}

pub trait Packet: Serialize + DeserializeOwned {
    fn parse_packet(text: &str) -> Result<Self> {
        serde_json::from_str(text)
    }
    fn to_text(&self) -> Result<String> {
        serde_json::to_string(self)
    }
}

impl Packet for ClientBoundPacket {}
impl Packet for ServerBoundPacket {}

impl ServerBoundPacket {
    // json has no NaN, but 1e39 still overflows an f32 to infinity
    pub fn is_well_formed(&self) -> bool {
        match self {
            ServerBoundPacket::Move { input } => input.is_finite(),
        }
    }
}
