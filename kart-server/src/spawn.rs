use glam::Vec3;

use kart_core::frame_math::Pose;
use kart_core::GLOBAL_CONFIG;

use crate::physics::MAX_VEHICLE_GROUPS;

// Every slot gets its own lane along X so freshly spawned vehicles never
// overlap, upright and facing +Z
pub fn spawn_pose(slot: usize) -> Pose {
    let origin = Vec3::new(GLOBAL_CONFIG.spawn_x, GLOBAL_CONFIG.spawn_y, GLOBAL_CONFIG.spawn_z);
    Pose::from_position(origin + Vec3::X * (slot as f32 * GLOBAL_CONFIG.spawn_spacing))
}

// how many vehicles can exist at once; capped by the collision groups left
// after the environment takes its bit
pub fn slot_capacity() -> usize {
    GLOBAL_CONFIG.max_players.min(MAX_VEHICLE_GROUPS)
}
