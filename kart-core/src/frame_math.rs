use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

// Composing many rotations lets the quaternion norm creep away from 1; only
// renormalize once it has moved past this so exact unit inputs stay bit-identical
const NORM_DRIFT_TOLERANCE: f32 = 4.0 * f32::EPSILON;

// A position + orientation pair; orientation must stay a unit quaternion
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: Vec3::ZERO,
        orientation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, orientation: Quat) -> Pose {
        Pose {
            position,
            orientation,
        }
    }

    pub fn from_position(position: Vec3) -> Pose {
        Pose::new(position, Quat::IDENTITY)
    }

    // express a pose given relative to `self` in the frame `self` lives in
    pub fn compose(&self, local: &Pose) -> Pose {
        Pose {
            position: global_position(self, local.position),
            orientation: global_rotation(self.orientation, local.orientation),
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Pose::IDENTITY
    }
}

/// Rotates `local_offset` by the parent's orientation, then translates by the
/// parent's position.
pub fn global_position(parent: &Pose, local_offset: Vec3) -> Vec3 {
    parent.position + parent.orientation * local_offset
}

/// `parent * local`, renormalized when the product has drifted off unit length.
pub fn global_rotation(parent: Quat, local: Quat) -> Quat {
    let product = parent * local;
    if (product.length_squared() - 1.0).abs() > NORM_DRIFT_TOLERANCE {
        product.normalize()
    } else {
        product
    }
}
