use std::num::NonZeroUsize;

use glam::{Quat, Vec3};
use log::info;
use rapier3d::na::{Quaternion, Translation3, UnitQuaternion};
use rapier3d::prelude::*;

use kart_core::frame_math::Pose;
use kart_core::geometry::GroundGeometry;
use kart_core::GLOBAL_CONFIG;


// Bit 0 is the static environment; vehicle slot k owns bit 1 + k
pub const ENVIRONMENT_GROUP: Group = Group::GROUP_1;
pub const MAX_VEHICLE_GROUPS: usize = 31;

// A vehicle's own colliders are filtered out against each other but still hit
// the environment and every other vehicle
pub fn vehicle_collision_groups(slot: usize) -> InteractionGroups {
    let own = Group::from_bits_truncate(1 << (1 + slot % MAX_VEHICLE_GROUPS));
    InteractionGroups::new(own, Group::ALL.difference(own))
}

pub fn to_isometry(pose: &Pose) -> Isometry<Real> {
    let Pose {
        position,
        orientation,
    } = *pose;
    Isometry::from_parts(
        Translation3::new(position.x, position.y, position.z),
        UnitQuaternion::new_normalize(Quaternion::new(
            orientation.w,
            orientation.x,
            orientation.y,
            orientation.z,
        )),
    )
}

pub fn from_isometry(isometry: &Isometry<Real>) -> Pose {
    let translation = isometry.translation.vector;
    let rotation = isometry.rotation;
    Pose::new(
        Vec3::new(translation.x, translation.y, translation.z),
        Quat::from_xyzw(rotation.i, rotation.j, rotation.k, rotation.w),
    )
}

/// A rigid body handle owned by exactly one rig part. Removing it takes the
/// handle, so a second removal is inert instead of touching a stale body.
#[derive(Debug)]
pub struct OwnedBody {
    handle: Option<RigidBodyHandle>,
}

impl OwnedBody {
    pub fn new(handle: RigidBodyHandle) -> OwnedBody {
        OwnedBody {
            handle: Some(handle),
        }
    }

    pub fn handle(&self) -> Option<RigidBodyHandle> {
        self.handle
    }

    pub fn is_live(&self) -> bool {
        self.handle.is_some()
    }

    // removes the body together with its colliders and joints
    pub fn remove(&mut self, world: &mut PhysicsWorld) -> bool {
        match self.handle.take() {
            Some(handle) => world.remove_body(handle),
            None => false,
        }
    }
}

/// The only place the rapier pipeline is touched. Everything in here must be
/// driven from the simulation thread.
pub struct PhysicsWorld {
    gravity: Vector<Real>,
    integration_parameters: IntegrationParameters,
    physics_pipeline: PhysicsPipeline,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,

    ground: GroundGeometry,
}

impl PhysicsWorld {
    pub fn new() -> PhysicsWorld {
        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();

        // the top face of the ground sits at y = 0
        let ground = GroundGeometry {
            position: Vec3::new(0.0, -GLOBAL_CONFIG.ground_height / 2.0, 0.0),
            width: GLOBAL_CONFIG.ground_width,
            height: GLOBAL_CONFIG.ground_height,
            length: GLOBAL_CONFIG.ground_length,
        };
        let ground_body = bodies.insert(
            RigidBodyBuilder::fixed().translation(vector![
                ground.position.x,
                ground.position.y,
                ground.position.z
            ]),
        );
        colliders.insert_with_parent(
            ColliderBuilder::cuboid(ground.width / 2.0, ground.height / 2.0, ground.length / 2.0)
                .friction(GLOBAL_CONFIG.ground_friction)
                .collision_groups(InteractionGroups::new(ENVIRONMENT_GROUP, Group::ALL)),
            ground_body,
            &mut bodies,
        );

        info!(
            "ground inserted ({} x {} m)",
            ground.width, ground.length
        );

        PhysicsWorld {
            gravity: vector![0.0, GLOBAL_CONFIG.gravity, 0.0],
            integration_parameters: IntegrationParameters {
                dt: 1.0 / GLOBAL_CONFIG.server_tick_rate.max(1) as Real,
                // the axle sits between two heavier bodies, the default
                // iteration counts can't push motor torque through it
                num_solver_iterations: NonZeroUsize::new(GLOBAL_CONFIG.solver_iterations)
                    .unwrap_or(NonZeroUsize::MIN),
                num_internal_pgs_iterations: GLOBAL_CONFIG.internal_pgs_iterations.max(1),
                ..IntegrationParameters::default()
            },
            physics_pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies,
            colliders,
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            ground,
        }
    }

    // advance the world by exactly one fixed time step
    pub fn step(&mut self) {
        self.physics_pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &(),
            &(),
        );
    }

    pub fn insert_body(&mut self, body: impl Into<RigidBody>) -> RigidBodyHandle {
        self.bodies.insert(body)
    }

    pub fn attach_collider(
        &mut self,
        collider: impl Into<Collider>,
        parent: RigidBodyHandle,
    ) -> ColliderHandle {
        self.colliders
            .insert_with_parent(collider, parent, &mut self.bodies)
    }

    pub fn insert_joint(
        &mut self,
        body1: RigidBodyHandle,
        body2: RigidBodyHandle,
        joint: impl Into<GenericJoint>,
    ) -> ImpulseJointHandle {
        self.impulse_joints.insert(body1, body2, joint, true)
    }

    pub fn joint_mut(&mut self, handle: ImpulseJointHandle) -> Option<&mut ImpulseJoint> {
        self.impulse_joints.get_mut(handle)
    }

    // Removes the body, every collider attached to it and every joint touching
    // it. Returns false when the handle no longer refers to a live body
    pub fn remove_body(&mut self, handle: RigidBodyHandle) -> bool {
        self.bodies
            .remove(
                handle,
                &mut self.island_manager,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                true,
            )
            .is_some()
    }

    pub fn body_pose(&self, handle: RigidBodyHandle) -> Option<Pose> {
        self.bodies
            .get(handle)
            .map(|body| from_isometry(body.position()))
    }

    pub fn ground_geometry(&self) -> GroundGeometry {
        self.ground
    }
}

// Inspection used by the tests; the simulation itself only ever reads poses
#[cfg(test)]
impl PhysicsWorld {
    pub fn joint(&self, handle: ImpulseJointHandle) -> Option<&ImpulseJoint> {
        self.impulse_joints.get(handle)
    }

    pub fn contains_body(&self, handle: RigidBodyHandle) -> bool {
        self.bodies.contains(handle)
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn collider_count(&self) -> usize {
        self.colliders.len()
    }

    pub fn joint_count(&self) -> usize {
        self.impulse_joints.len()
    }

    // every rig part carries exactly one collider
    pub fn collider_of(&self, body: RigidBodyHandle) -> Option<ColliderHandle> {
        self.bodies.get(body)?.colliders().first().copied()
    }

    // whether the narrow phase currently has touching contact points between the two
    pub fn in_contact(&self, collider1: ColliderHandle, collider2: ColliderHandle) -> bool {
        self.narrow_phase
            .contact_pair(collider1, collider2)
            .map_or(false, |pair| pair.has_any_active_contact)
    }

    pub fn ground_collider(&self) -> Option<ColliderHandle> {
        self.colliders
            .iter()
            .find(|(_, collider)| collider.collision_groups().memberships == ENVIRONMENT_GROUP)
            .map(|(handle, _)| handle)
    }
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        PhysicsWorld::new()
    }
}
