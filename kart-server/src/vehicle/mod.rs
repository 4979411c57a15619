use glam::Vec3;
use log::warn;
use rapier3d::prelude::*;

use kart_core::frame_math::Pose;
use kart_core::geometry::VehicleGeometry;
use kart_core::{Drivetrain, Settings, GLOBAL_CONFIG};

use crate::physics::PhysicsWorld;

mod chassis;
mod wheel;

pub use chassis::Chassis;
pub use wheel::WheelAssembly;

// What every piece of a rig can do, whether it's a single body or the whole
// vehicle
pub trait RigPart {
    type Geometry;

    fn pose(&self, world: &PhysicsWorld) -> Option<Pose>;
    // read from the physics world; None once the part has been cleaned up
    fn geometry(&self, world: &PhysicsWorld) -> Option<Self::Geometry>;
    // safe to call more than once
    fn cleanup(&mut self, world: &mut PhysicsWorld);
}

// Chassis frame: +Z forward, +Y up, -X is the left-hand side
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WheelPosition {
    FrontLeft = 0,
    FrontRight = 1,
    RearLeft = 2,
    RearRight = 3,
}

impl WheelPosition {
    // the order wheels appear in every geometry snapshot
    pub const ALL: [WheelPosition; 4] = [
        WheelPosition::FrontLeft,
        WheelPosition::FrontRight,
        WheelPosition::RearLeft,
        WheelPosition::RearRight,
    ];

    pub fn is_front(&self) -> bool {
        matches!(self, WheelPosition::FrontLeft | WheelPosition::FrontRight)
    }

    pub fn side(&self) -> f32 {
        match self {
            WheelPosition::FrontLeft | WheelPosition::RearLeft => -1.0,
            WheelPosition::FrontRight | WheelPosition::RearRight => 1.0,
        }
    }

    // wheel centres sit on the bottom corners of the chassis box
    pub fn local_offset(&self, chassis: &ChassisParams) -> Vec3 {
        let longitudinal = if self.is_front() { 1.0 } else { -1.0 };
        Vec3::new(
            self.side() * chassis.width / 2.0,
            -chassis.height / 2.0,
            longitudinal * chassis.length / 2.0,
        )
    }
}

#[derive(Clone, Debug)]
pub struct ChassisParams {
    pub width: f32,
    pub height: f32,
    pub length: f32,
    pub mass: f32,
    pub friction: f32,
    pub restitution: f32,
}

#[derive(Clone, Debug)]
pub struct WheelParams {
    pub radius: f32,
    pub width: f32,
    pub border_radius: f32,
    pub mass: f32,
    pub friction: f32,
    pub restitution: f32,
    pub axle_half_size: f32,
    pub axle_mass: f32,
    pub max_steer_angle: f32,
    pub steer_stiffness: f32,
    pub steer_damping: f32,
    pub steer_max_force: f32,
    pub drive_damping: f32,
    pub drive_max_force: f32,
}

#[derive(Clone, Debug)]
pub struct VehicleParams {
    pub chassis: ChassisParams,
    pub wheel: WheelParams,
    pub drivetrain: Drivetrain,
}

impl VehicleParams {
    pub fn from_settings(settings: &Settings) -> VehicleParams {
        VehicleParams {
            chassis: ChassisParams {
                width: settings.chassis_width,
                height: settings.chassis_height,
                length: settings.chassis_length,
                mass: settings.chassis_mass,
                friction: settings.chassis_friction,
                restitution: settings.chassis_restitution,
            },
            wheel: WheelParams {
                radius: settings.wheel_radius,
                width: settings.wheel_width,
                border_radius: settings.wheel_border_radius,
                mass: settings.wheel_mass,
                friction: settings.wheel_friction,
                restitution: settings.wheel_restitution,
                axle_half_size: settings.axle_half_size,
                axle_mass: settings.axle_mass,
                max_steer_angle: settings.max_steer_angle(),
                steer_stiffness: settings.steer_stiffness,
                steer_damping: settings.steer_damping,
                steer_max_force: settings.steer_max_force,
                drive_damping: settings.drive_damping,
                drive_max_force: settings.drive_max_force,
            },
            drivetrain: settings.drivetrain,
        }
    }

    fn is_driven(&self, position: WheelPosition) -> bool {
        if position.is_front() {
            self.drivetrain.drives_front()
        } else {
            self.drivetrain.drives_rear()
        }
    }
}

impl Default for VehicleParams {
    fn default() -> Self {
        VehicleParams::from_settings(&GLOBAL_CONFIG)
    }
}

/// A chassis and its four wheel assemblies. Front wheels steer; which wheels
/// are driven comes from the drivetrain.
pub struct VehicleRig {
    chassis: Chassis,
    // indexed by WheelPosition
    wheels: [WheelAssembly; 4],
    max_steer_angle: f32,
    steering_angle: f32,
    drive_velocity: f32,
}

impl VehicleRig {
    pub fn new(
        world: &mut PhysicsWorld,
        pose: Pose,
        params: &VehicleParams,
        groups: InteractionGroups,
    ) -> VehicleRig {
        let chassis = Chassis::new(world, &pose, &params.chassis, groups);

        let wheels = WheelPosition::ALL.map(|position| {
            let local_mount = Pose::from_position(position.local_offset(&params.chassis));
            let mount = pose.compose(&local_mount);

            let mut wheel = WheelAssembly::new(world, &mount, position, &params.wheel, groups);
            if let Some(chassis_body) = chassis.body() {
                wheel.attach_axle(
                    world,
                    chassis_body,
                    local_mount,
                    position.is_front(),
                    params.is_driven(position),
                );
            }
            wheel
        });

        VehicleRig {
            chassis,
            wheels,
            max_steer_angle: params.wheel.max_steer_angle,
            steering_angle: 0.0,
            drive_velocity: 0.0,
        }
    }

    // Clamps, then points both front wheels at the same angle. The joints are
    // only touched when the target actually changes
    pub fn set_steering_angle(&mut self, world: &mut PhysicsWorld, angle: f32) {
        let angle = angle.clamp(-self.max_steer_angle, self.max_steer_angle);
        if angle == self.steering_angle {
            return;
        }
        for wheel in self.wheels.iter_mut().filter(|wheel| wheel.is_steerable()) {
            wheel.set_steering_angle(world, angle);
        }
        self.steering_angle = angle;
    }

    pub fn set_drive_velocity(&mut self, world: &mut PhysicsWorld, velocity: f32) {
        if velocity == self.drive_velocity {
            return;
        }
        for wheel in self.wheels.iter_mut().filter(|wheel| wheel.is_driven()) {
            wheel.set_drive_velocity(world, velocity);
        }
        self.drive_velocity = velocity;
    }

    pub fn wheel(&self, position: WheelPosition) -> &WheelAssembly {
        &self.wheels[position as usize]
    }

    pub fn is_live(&self) -> bool {
        self.chassis.is_live() || self.wheels.iter().any(|wheel| wheel.is_live())
    }
}

#[cfg(test)]
impl VehicleRig {
    pub fn steering_angle(&self) -> f32 {
        self.steering_angle
    }

    pub fn drive_velocity(&self) -> f32 {
        self.drive_velocity
    }

    pub fn chassis(&self) -> &Chassis {
        &self.chassis
    }
}

impl RigPart for VehicleRig {
    type Geometry = VehicleGeometry;

    fn pose(&self, world: &PhysicsWorld) -> Option<Pose> {
        self.chassis.pose(world)
    }

    fn geometry(&self, world: &PhysicsWorld) -> Option<VehicleGeometry> {
        let wheel = |position: WheelPosition| self.wheel(position).geometry(world);
        Some(VehicleGeometry {
            chassis: self.chassis.geometry(world)?,
            wheels: [
                wheel(WheelPosition::FrontLeft)?,
                wheel(WheelPosition::FrontRight)?,
                wheel(WheelPosition::RearLeft)?,
                wheel(WheelPosition::RearRight)?,
            ],
        })
    }

    // wheels first, their joints hang off the chassis
    fn cleanup(&mut self, world: &mut PhysicsWorld) {
        for wheel in self.wheels.iter_mut() {
            wheel.cleanup(world);
        }
        self.chassis.cleanup(world);
    }
}

impl Drop for VehicleRig {
    fn drop(&mut self) {
        if self.is_live() {
            warn!("vehicle rig dropped without cleanup, its bodies are still in the world");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_4;

    use glam::Quat;

    use kart_core::frame_math::global_position;

    use super::wheel::DriveMode;
    use super::*;
    use crate::physics::vehicle_collision_groups;

    fn spawn(world: &mut PhysicsWorld, pose: Pose, params: &VehicleParams) -> VehicleRig {
        VehicleRig::new(world, pose, params, vehicle_collision_groups(0))
    }

    #[test]
    fn steering_is_clamped_and_idempotent() {
        let mut world = PhysicsWorld::new();
        let params = VehicleParams::default();
        let mut rig = spawn(&mut world, Pose::from_position(Vec3::new(0.0, 5.0, 0.0)), &params);
        let max = params.wheel.max_steer_angle;
        assert!((max - FRAC_PI_4).abs() < 1e-6);

        for requested in [0.0, 0.3, -0.3, 1.2, -10.0, max] {
            rig.set_steering_angle(&mut world, requested);
            let expected = requested.clamp(-max, max);
            assert_eq!(rig.steering_angle(), expected);
            for position in [WheelPosition::FrontLeft, WheelPosition::FrontRight] {
                assert_eq!(rig.wheel(position).steer_target(&world), Some(expected));
            }
        }

        let joints = world.joint_count();
        let bodies = world.body_count();
        rig.set_steering_angle(&mut world, 0.5);
        rig.set_steering_angle(&mut world, 0.5);
        assert_eq!(rig.wheel(WheelPosition::FrontLeft).steer_target(&world), Some(0.5));
        assert_eq!(world.joint_count(), joints);
        assert_eq!(world.body_count(), bodies);

        // rear wheels are rigidly mounted and ignore steering
        assert!(!rig.wheel(WheelPosition::RearLeft).is_steerable());
        assert_eq!(rig.wheel(WheelPosition::RearLeft).steer_target(&world), None);

        rig.cleanup(&mut world);
    }

    #[test]
    fn fresh_rig_reports_its_spawn_pose() {
        let mut world = PhysicsWorld::new();
        let params = VehicleParams::default();
        let pose = Pose::new(Vec3::new(4.0, 3.0, -2.0), Quat::from_rotation_y(0.3));
        let mut rig = spawn(&mut world, pose, &params);

        let geometry = rig.geometry(&world).expect("live rig has geometry");
        assert!(geometry.chassis.position.abs_diff_eq(pose.position, 1e-5));
        assert!(geometry.chassis.orientation.abs_diff_eq(pose.orientation, 1e-5));
        assert_eq!(geometry.chassis.length, params.chassis.length);

        for (wheel, position) in geometry.wheels.iter().zip(WheelPosition::ALL) {
            let expected = global_position(&pose, position.local_offset(&params.chassis));
            assert!(wheel.position.abs_diff_eq(expected, 1e-5));
            assert_eq!(wheel.radius, params.wheel.radius);
        }

        rig.cleanup(&mut world);
    }

    #[test]
    fn wheels_come_out_in_canonical_order() {
        let mut world = PhysicsWorld::new();
        let mut rig = spawn(&mut world, Pose::from_position(Vec3::new(0.0, 5.0, 0.0)), &VehicleParams::default());
        let wheels = rig.geometry(&world).unwrap().wheels;

        // front-left, front-right, rear-left, rear-right
        assert!(wheels[0].position.x < 0.0 && wheels[0].position.z > 0.0);
        assert!(wheels[1].position.x > 0.0 && wheels[1].position.z > 0.0);
        assert!(wheels[2].position.x < 0.0 && wheels[2].position.z < 0.0);
        assert!(wheels[3].position.x > 0.0 && wheels[3].position.z < 0.0);

        for (index, position) in WheelPosition::ALL.iter().enumerate() {
            assert_eq!(rig.wheel(*position).position(), *position);
            assert_eq!(*position as usize, index);
        }

        rig.cleanup(&mut world);
    }

    #[test]
    fn cleanup_twice_is_inert() {
        let mut world = PhysicsWorld::new();
        let empty = (world.body_count(), world.collider_count(), world.joint_count());

        let mut rig = spawn(&mut world, Pose::from_position(Vec3::new(0.0, 5.0, 0.0)), &VehicleParams::default());
        // chassis + 4 axles + 4 wheels, each with one collider; two joints per wheel
        assert_eq!(world.body_count(), empty.0 + 9);
        assert_eq!(world.collider_count(), empty.1 + 9);
        assert_eq!(world.joint_count(), empty.2 + 8);

        rig.cleanup(&mut world);
        assert_eq!((world.body_count(), world.collider_count(), world.joint_count()), empty);
        assert!(!rig.is_live());
        assert!(rig.geometry(&world).is_none());

        rig.cleanup(&mut world);
        assert_eq!((world.body_count(), world.collider_count(), world.joint_count()), empty);

        // controls on a dead rig go nowhere
        rig.set_steering_angle(&mut world, 0.2);
        rig.set_drive_velocity(&mut world, 3.0);
        assert_eq!(rig.wheel(WheelPosition::FrontLeft).steer_target(&world), None);
    }

    #[test]
    fn drivetrain_decides_which_wheels_are_driven() {
        let mut world = PhysicsWorld::new();
        let mut params = VehicleParams::default();
        params.drivetrain = Drivetrain::Rear;
        let mut rear = spawn(&mut world, Pose::from_position(Vec3::new(0.0, 5.0, 0.0)), &params);

        rear.set_drive_velocity(&mut world, 7.5);
        assert_eq!(rear.drive_velocity(), 7.5);
        for position in WheelPosition::ALL {
            let wheel = rear.wheel(position);
            if position.is_front() {
                assert!(!wheel.is_driven());
                assert_eq!(wheel.drive_target(&world), None);
                assert_eq!(wheel.drive_mode(), DriveMode::Idle);
            } else {
                assert_eq!(wheel.drive_target(&world), Some(7.5));
                assert_eq!(wheel.drive_mode(), DriveMode::Driving);
            }
        }

        params.drivetrain = Drivetrain::All;
        let mut all = VehicleRig::new(
            &mut world,
            Pose::from_position(Vec3::new(10.0, 5.0, 0.0)),
            &params,
            vehicle_collision_groups(1),
        );
        all.set_drive_velocity(&mut world, -2.0);
        for position in WheelPosition::ALL {
            assert_eq!(all.wheel(position).drive_target(&world), Some(-2.0));
        }

        rear.cleanup(&mut world);
        all.cleanup(&mut world);
    }

    #[test]
    fn drive_mode_follows_the_velocity_target() {
        let mut world = PhysicsWorld::new();
        let mut rig = spawn(&mut world, Pose::from_position(Vec3::new(0.0, 5.0, 0.0)), &VehicleParams::default());
        let rear = WheelPosition::RearLeft;

        assert_eq!(rig.wheel(rear).drive_mode(), DriveMode::Idle);
        rig.set_drive_velocity(&mut world, 4.0);
        assert_eq!(rig.wheel(rear).drive_mode(), DriveMode::Driving);
        // stepping never changes the mode by itself
        world.step();
        assert_eq!(rig.wheel(rear).drive_mode(), DriveMode::Driving);
        rig.set_drive_velocity(&mut world, 0.0);
        assert_eq!(rig.wheel(rear).drive_mode(), DriveMode::Idle);

        rig.cleanup(&mut world);
    }
}
