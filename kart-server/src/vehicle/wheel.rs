use std::f32::consts::FRAC_PI_2;

use log::{debug, warn};
use rapier3d::prelude::*;

use kart_core::frame_math::Pose;
use kart_core::geometry::{PartKind, WheelGeometry};

use super::{RigPart, WheelParams, WheelPosition};
use crate::physics::{to_isometry, OwnedBody, PhysicsWorld};

// Both constraints are revolute joints, so their single free axis is AngX in
// joint space regardless of the axis they were built around
const JOINT_AXIS: JointAxis = JointAxis::AngX;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DriveMode {
    Idle,
    Driving,
}

/// One wheel unit. The axle body carries the steering yaw relative to the
/// chassis; the wheel body spins relative to the axle.
///
/// ```text
/// chassis --steer joint (Y, limited, position motor)--> axle
///    axle --drive joint (X, free, velocity motor)-----> wheel
/// ```
pub struct WheelAssembly {
    // fixes the side sign and the mount offset on the chassis
    position: WheelPosition,

    axle_body: OwnedBody,
    wheel_body: OwnedBody,
    steer_joint: Option<ImpulseJointHandle>,
    drive_joint: Option<ImpulseJointHandle>,

    steerable: bool,
    driven: bool,
    drive_mode: DriveMode,

    radius: f32,
    width: f32,
    max_steer_angle: f32,
    steer_stiffness: f32,
    steer_damping: f32,
    steer_max_force: f32,
    drive_damping: f32,
    drive_max_force: f32,
}

impl WheelAssembly {
    // `mount` is the already-resolved global pose of the wheel centre
    pub fn new(
        world: &mut PhysicsWorld,
        mount: &Pose,
        position: WheelPosition,
        params: &WheelParams,
        groups: InteractionGroups,
    ) -> WheelAssembly {
        let isometry = to_isometry(mount);

        let axle_body = world.insert_body(
            RigidBodyBuilder::dynamic()
                .position(isometry)
                .can_sleep(false),
        );
        world.attach_collider(
            ColliderBuilder::cuboid(
                params.axle_half_size,
                params.axle_half_size,
                params.axle_half_size,
            )
            .mass(params.axle_mass)
            .collision_groups(groups),
            axle_body,
        );

        let wheel_body = world.insert_body(
            RigidBodyBuilder::dynamic()
                .position(isometry)
                .can_sleep(false),
        );
        // rapier cylinders stand along +Y; lay it down so it rolls about X
        let border = params.border_radius.min(params.radius).min(params.width / 2.0);
        world.attach_collider(
            ColliderBuilder::round_cylinder(params.width / 2.0 - border, params.radius - border, border)
                .rotation(vector![0.0, 0.0, FRAC_PI_2])
                .mass(params.mass)
                .friction(params.friction)
                .friction_combine_rule(CoefficientCombineRule::Max)
                .restitution(params.restitution)
                .collision_groups(groups),
            wheel_body,
        );

        WheelAssembly {
            position,
            axle_body: OwnedBody::new(axle_body),
            wheel_body: OwnedBody::new(wheel_body),
            steer_joint: None,
            drive_joint: None,
            steerable: false,
            driven: false,
            drive_mode: DriveMode::Idle,
            radius: params.radius,
            width: params.width,
            max_steer_angle: params.max_steer_angle,
            steer_stiffness: params.steer_stiffness,
            steer_damping: params.steer_damping,
            steer_max_force: params.steer_max_force,
            drive_damping: params.drive_damping,
            drive_max_force: params.drive_max_force,
        }
    }

    /// Creates the steer constraint (chassis to axle) and the drive constraint
    /// (axle to wheel). A wheel that does not steer is still mounted through a
    /// steer constraint, with a zero-width limit holding it rigid.
    pub fn attach_axle(
        &mut self,
        world: &mut PhysicsWorld,
        chassis: RigidBodyHandle,
        local_mount: Pose,
        steerable: bool,
        driven: bool,
    ) {
        if self.steer_joint.is_some() || self.drive_joint.is_some() {
            warn!("{:?} wheel already has its axle attached", self.position);
            return;
        }
        let (Some(axle), Some(wheel)) = (self.axle_body.handle(), self.wheel_body.handle()) else {
            warn!("cannot attach an axle to a cleaned up {:?} wheel", self.position);
            return;
        };

        let anchor = local_mount.position;
        let mut steer = RevoluteJointBuilder::new(Vector::y_axis())
            .local_anchor1(point![anchor.x, anchor.y, anchor.z])
            .local_anchor2(Point::origin())
            .contacts_enabled(false);
        // force based, so the gains don't depend on the axle's inertia
        steer = if steerable {
            steer
                .limits([-self.max_steer_angle, self.max_steer_angle])
                .motor_model(MotorModel::ForceBased)
                .motor_position(0.0, self.steer_stiffness, self.steer_damping)
                .motor_max_force(self.steer_max_force)
        } else {
            steer.limits([0.0, 0.0])
        };

        let mut drive = RevoluteJointBuilder::new(Vector::x_axis())
            .local_anchor1(Point::origin())
            .local_anchor2(Point::origin())
            .contacts_enabled(false);
        if driven {
            drive = drive
                .motor_velocity(0.0, self.drive_damping)
                .motor_max_force(self.drive_max_force);
        }

        self.steer_joint = Some(world.insert_joint(chassis, axle, steer.build()));
        self.drive_joint = Some(world.insert_joint(axle, wheel, drive.build()));
        self.steerable = steerable;
        self.driven = driven;
    }

    // no-op on wheels that don't steer
    pub fn set_steering_angle(&mut self, world: &mut PhysicsWorld, angle: f32) {
        if !self.steerable {
            return;
        }
        let Some(handle) = self.steer_joint else {
            return;
        };
        let target = angle.clamp(-self.max_steer_angle, self.max_steer_angle);
        if let Some(joint) = world.joint_mut(handle) {
            joint.data.set_motor_position(
                JOINT_AXIS,
                target,
                self.steer_stiffness,
                self.steer_damping,
            );
        }
    }

    // no-op on wheels that aren't driven
    pub fn set_drive_velocity(&mut self, world: &mut PhysicsWorld, velocity: f32) {
        if !self.driven {
            return;
        }
        let Some(handle) = self.drive_joint else {
            return;
        };
        if let Some(joint) = world.joint_mut(handle) {
            joint
                .data
                .set_motor_velocity(JOINT_AXIS, velocity, self.drive_damping);
            let mode = if velocity == 0.0 {
                DriveMode::Idle
            } else {
                DriveMode::Driving
            };
            if mode != self.drive_mode {
                debug!("{:?} wheel is now {:?}", self.position, mode);
            }
            self.drive_mode = mode;
        }
    }

    pub fn is_steerable(&self) -> bool {
        self.steerable
    }

    pub fn is_driven(&self) -> bool {
        self.driven
    }

    pub fn is_live(&self) -> bool {
        self.wheel_body.is_live() || self.axle_body.is_live()
    }
}

#[cfg(test)]
impl WheelAssembly {
    // the position target currently configured on the steer motor
    pub fn steer_target(&self, world: &PhysicsWorld) -> Option<f32> {
        if !self.steerable {
            return None;
        }
        world
            .joint(self.steer_joint?)?
            .data
            .motor(JOINT_AXIS)
            .map(|motor| motor.target_pos)
    }

    // the velocity target currently configured on the drive motor
    pub fn drive_target(&self, world: &PhysicsWorld) -> Option<f32> {
        if !self.driven {
            return None;
        }
        world
            .joint(self.drive_joint?)?
            .data
            .motor(JOINT_AXIS)
            .map(|motor| motor.target_vel)
    }

    pub fn position(&self) -> WheelPosition {
        self.position
    }

    pub fn drive_mode(&self) -> DriveMode {
        self.drive_mode
    }

    pub fn axle_pose(&self, world: &PhysicsWorld) -> Option<Pose> {
        world.body_pose(self.axle_body.handle()?)
    }

    pub fn wheel_collider(&self, world: &PhysicsWorld) -> Option<ColliderHandle> {
        world.collider_of(self.wheel_body.handle()?)
    }

    pub fn axle_collider(&self, world: &PhysicsWorld) -> Option<ColliderHandle> {
        world.collider_of(self.axle_body.handle()?)
    }
}

impl RigPart for WheelAssembly {
    type Geometry = WheelGeometry;

    fn pose(&self, world: &PhysicsWorld) -> Option<Pose> {
        self.wheel_body.handle().and_then(|body| world.body_pose(body))
    }

    fn geometry(&self, world: &PhysicsWorld) -> Option<WheelGeometry> {
        let pose = self.pose(world)?;
        Some(WheelGeometry {
            kind: PartKind::Wheel,
            position: pose.position,
            orientation: pose.orientation,
            radius: self.radius,
            width: self.width,
        })
    }

    // removing the bodies takes their colliders and both joints with them
    fn cleanup(&mut self, world: &mut PhysicsWorld) {
        self.wheel_body.remove(world);
        self.axle_body.remove(world);
        self.steer_joint = None;
        self.drive_joint = None;
        self.drive_mode = DriveMode::Idle;
    }
}
