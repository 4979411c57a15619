use serde::{Deserialize, Serialize};

// PlayerInputs gets sent from the client to the server to inform the simulation
// about what a player is doing. Both axes are nominally in [-1, 1]: throttle
// scales the drive velocity (negative reverses), steer scales the steering lock
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerInputs {
    pub throttle: f32,
    pub steer: f32,
}

impl PlayerInputs {
    pub fn new(throttle: f32, steer: f32) -> PlayerInputs {
        PlayerInputs { throttle, steer }
    }

    pub fn is_finite(&self) -> bool {
        self.throttle.is_finite() && self.steer.is_finite()
    }

    pub fn clamped(&self) -> PlayerInputs {
        PlayerInputs {
            throttle: self.throttle.clamp(-1.0, 1.0),
            steer: self.steer.clamp(-1.0, 1.0),
        }
    }
}
