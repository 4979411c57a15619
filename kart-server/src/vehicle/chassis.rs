use rapier3d::prelude::*;

use kart_core::frame_math::Pose;
use kart_core::geometry::{ChassisGeometry, PartKind};

use super::{ChassisParams, RigPart};
use crate::physics::{to_isometry, OwnedBody, PhysicsWorld};

pub struct Chassis {
    body: OwnedBody,
    width: f32,
    height: f32,
    length: f32,
}

impl Chassis {
    pub fn new(
        world: &mut PhysicsWorld,
        pose: &Pose,
        params: &ChassisParams,
        groups: InteractionGroups,
    ) -> Chassis {
        let body = world.insert_body(
            RigidBodyBuilder::dynamic()
                .position(to_isometry(pose))
                .can_sleep(false),
        );
        world.attach_collider(
            ColliderBuilder::cuboid(params.width / 2.0, params.height / 2.0, params.length / 2.0)
                .mass(params.mass)
                .friction(params.friction)
                .restitution(params.restitution)
                .collision_groups(groups),
            body,
        );

        Chassis {
            body: OwnedBody::new(body),
            width: params.width,
            height: params.height,
            length: params.length,
        }
    }

    pub fn body(&self) -> Option<RigidBodyHandle> {
        self.body.handle()
    }

    pub fn is_live(&self) -> bool {
        self.body.is_live()
    }

    #[cfg(test)]
    pub fn collider(&self, world: &PhysicsWorld) -> Option<ColliderHandle> {
        world.collider_of(self.body.handle()?)
    }
}

impl RigPart for Chassis {
    type Geometry = ChassisGeometry;

    fn pose(&self, world: &PhysicsWorld) -> Option<Pose> {
        self.body.handle().and_then(|body| world.body_pose(body))
    }

    fn geometry(&self, world: &PhysicsWorld) -> Option<ChassisGeometry> {
        let pose = self.pose(world)?;
        Some(ChassisGeometry {
            kind: PartKind::Chassis,
            position: pose.position,
            orientation: pose.orientation,
            width: self.width,
            height: self.height,
            length: self.length,
        })
    }

    // the collider goes with the body
    fn cleanup(&mut self, world: &mut PhysicsWorld) {
        self.body.remove(world);
    }
}
