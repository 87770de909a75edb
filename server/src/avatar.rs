//! Per-connection avatar state
//!
//! The avatar's transform lives in the physics world; the session only keeps
//! the body handle and what the client asked for.

use crate::capture::CaptureRequest;
use crate::connection::ConnectionId;
use crate::physics::{BodyHandle, PhysicsWorld};
use crate::semantic::ObservedSet;
use crate::world::World;
use shared::{DecodedInput, JoinRequest, Vec3, ALL_RELATIONSHIPS};
use std::collections::BTreeSet;

pub type AvatarId = u32;

/// Radius of the sphere body every avatar gets
pub const AVATAR_RADIUS: f32 = 0.5;

#[derive(Debug)]
pub struct AvatarSession {
    pub id: AvatarId,
    pub connection: ConnectionId,
    pub body: BodyHandle,
    pub target_velocity: Vec3,
    pub target_rotation: Vec3,
    pub ready_for_simulation: bool,
    pub observed: ObservedSet,
    pub relationships: BTreeSet<String>,
    /// Whether observed objects and relations are gathered and reported
    pub collect_world_state: bool,
    /// Send `sceneInfo` with the next frame, then clear
    pub send_scene_info: bool,
    pub capture: CaptureRequest,
    pub frames_sent: u64,
}

impl AvatarSession {
    /// Creates the session for a freshly joined client.
    ///
    /// `default_variants` is used when the join does not list shaders.
    pub fn init_session(
        id: AvatarId,
        connection: ConnectionId,
        body: BodyHandle,
        join: &JoinRequest,
        default_variants: &[Option<String>],
    ) -> Self {
        let variants = join
            .shaders
            .clone()
            .unwrap_or_else(|| default_variants.to_vec());

        Self {
            id,
            connection,
            body,
            target_velocity: Vec3::ZERO,
            target_rotation: Vec3::ZERO,
            ready_for_simulation: false,
            observed: ObservedSet::new(),
            relationships: join.relationships.iter().cloned().collect(),
            collect_world_state: join.get_obj_data.unwrap_or(true),
            send_scene_info: join.send_scene_info,
            capture: CaptureRequest::new(id, variants),
            frames_sent: 0,
        }
    }

    /// Drives the body towards the requested motion.
    ///
    /// Linear velocity becomes a physics target; rotation is applied as an
    /// immediate angular velocity change, limited to `rot_speed`.
    pub fn apply_input(
        &mut self,
        input: DecodedInput,
        physics: &mut dyn PhysicsWorld,
        move_speed: f32,
        rot_speed: f32,
    ) {
        self.target_velocity = input.velocity * move_speed;
        self.target_rotation = input.rotation * rot_speed;
        physics.set_target_velocity(self.body, self.target_velocity);

        let current = physics.angular_velocity(self.body).unwrap_or(Vec3::ZERO);
        let change = (self.target_rotation - current).clamp_magnitude(rot_speed);
        physics.apply_torque(self.body, change);
    }

    /// Per-step option overrides carried by `CLIENT_INPUT`
    pub fn apply_options(&mut self, get_obj_data: Option<bool>, relationships: Option<&[String]>) {
        if let Some(collect) = get_obj_data {
            self.collect_world_state = collect;
        }
        if let Some(names) = relationships {
            self.relationships = names.iter().cloned().collect();
        }
    }

    /// Recomputes the observed set from a range query around the avatar.
    pub fn update_observed_objects(&mut self, world: &World, range: f32) {
        self.observed.clear();
        if !self.collect_world_state {
            return;
        }
        let center = match world.physics.transform(self.body) {
            Some(t) => t.position,
            None => return,
        };
        let bodies = world.physics.query_within(center, range);
        world
            .semantics
            .observe(&bodies, Some(self.body), &mut self.observed);
    }

    pub fn subscribes_to(&self, relationship: &str) -> bool {
        self.relationships.contains(ALL_RELATIONSHIPS) || self.relationships.contains(relationship)
    }

    /// Removes the avatar's body from the world
    pub fn release(self, physics: &mut dyn PhysicsWorld) {
        physics.remove_body(self.body);
    }
}
