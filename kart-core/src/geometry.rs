use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

// Geometry snapshots get sent from the server to the clients; they're read
// back from the physics world each tick, never from player input
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PartKind {
    Chassis,
    Wheel,
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
pub struct ChassisGeometry {
    #[serde(rename = "type")]
    pub kind: PartKind,
    pub position: Vec3,
    pub orientation: Quat,
    pub width: f32,
    pub height: f32,
    pub length: f32,
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
pub struct WheelGeometry {
    #[serde(rename = "type")]
    pub kind: PartKind,
    pub position: Vec3,
    pub orientation: Quat,
    pub radius: f32,
    pub width: f32,
}

// wheels are always ordered front-left, front-right, rear-left, rear-right;
// clients index into them directly
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
pub struct VehicleGeometry {
    pub chassis: ChassisGeometry,
    pub wheels: [WheelGeometry; 4],
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
pub struct GroundGeometry {
    pub position: Vec3,
    pub width: f32,
    pub height: f32,
    pub length: f32,
}
