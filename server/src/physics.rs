//! Physics collaborator
//!
//! The session layer only talks to [`PhysicsWorld`]: range queries, transforms,
//! velocity targets, velocity-change torques and the contacts of the last step.
//! [`SimplePhysics`] is a small sphere-body implementation used by the server
//! binary and tests; a full engine can be plugged in behind the same trait.

use shared::{Quat, Vec3};
use std::collections::BTreeMap;

pub type BodyHandle = u32;

/// Distance below which touching spheres still count as in contact
pub const CONTACT_SLOP: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
}

/// Parameters for a new body
#[derive(Debug, Clone, Copy)]
pub struct BodyDesc {
    pub position: Vec3,
    pub radius: f32,
    /// Kinematic bodies never move from contacts or integration
    pub kinematic: bool,
}

impl BodyDesc {
    pub fn dynamic(position: Vec3, radius: f32) -> Self {
        Self {
            position,
            radius,
            kinematic: false,
        }
    }

    pub fn kinematic(position: Vec3, radius: f32) -> Self {
        Self {
            position,
            radius,
            kinematic: true,
        }
    }
}

/// Contact recorded during the last step. `normal` points from `a` to `b`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    pub a: BodyHandle,
    pub b: BodyHandle,
    pub normal: Vec3,
    /// Closing speed along the normal when the contact was resolved
    pub impulse: f32,
}

pub trait PhysicsWorld: Send {
    fn add_body(&mut self, desc: BodyDesc) -> BodyHandle;
    fn remove_body(&mut self, body: BodyHandle) -> bool;
    fn transform(&self, body: BodyHandle) -> Option<Transform>;
    fn radius(&self, body: BodyHandle) -> Option<f32>;
    fn velocity(&self, body: BodyHandle) -> Option<Vec3>;
    fn angular_velocity(&self, body: BodyHandle) -> Option<Vec3>;
    /// Velocity the body is driven at on every step until changed
    fn set_target_velocity(&mut self, body: BodyHandle, velocity: Vec3);
    /// Immediate change of angular velocity
    fn apply_torque(&mut self, body: BodyHandle, change: Vec3);
    /// Bodies whose volume overlaps the sphere at `center`
    fn query_within(&self, center: Vec3, radius: f32) -> Vec<BodyHandle>;
    /// True if any body overlaps the sphere at `center`
    fn check_sphere(&self, center: Vec3, radius: f32) -> bool;
    fn contacts(&self) -> &[Contact];
    fn step(&mut self, dt: f32);
}

#[derive(Debug, Clone)]
struct RigidBody {
    position: Vec3,
    rotation: Quat,
    velocity: Vec3,
    angular_velocity: Vec3,
    target_velocity: Option<Vec3>,
    radius: f32,
    kinematic: bool,
}

/// Sphere bodies over a floor plane, no gravity
pub struct SimplePhysics {
    bodies: BTreeMap<BodyHandle, RigidBody>,
    contacts: Vec<Contact>,
    next_handle: BodyHandle,
    floor_y: f32,
    angular_damping: f32,
}

impl SimplePhysics {
    pub fn new() -> Self {
        Self {
            bodies: BTreeMap::new(),
            contacts: Vec::new(),
            next_handle: 1,
            floor_y: 0.0,
            angular_damping: 2.0,
        }
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    fn integrate(&mut self, dt: f32) {
        let floor_y = self.floor_y;
        let damping = (1.0 - self.angular_damping * dt).max(0.0);

        for body in self.bodies.values_mut().filter(|b| !b.kinematic) {
            if let Some(target) = body.target_velocity {
                body.velocity = target;
            }
            body.position += body.velocity * dt;
            body.rotation = body.rotation.integrate(body.angular_velocity, dt);
            body.angular_velocity = body.angular_velocity * damping;

            // Floor contact
            if body.position.y - body.radius < floor_y {
                body.position.y = floor_y + body.radius;
                body.velocity.y = body.velocity.y.max(0.0);
            }
        }
    }

    /// Detects overlapping pairs, separates them and records contacts
    fn resolve_contacts(&mut self) {
        self.contacts.clear();
        let handles: Vec<BodyHandle> = self.bodies.keys().copied().collect();

        for i in 0..handles.len() {
            for j in (i + 1)..handles.len() {
                let (a, b) = (handles[i], handles[j]);
                let (body_a, body_b) = match (self.bodies.get(&a), self.bodies.get(&b)) {
                    (Some(x), Some(y)) => (x.clone(), y.clone()),
                    _ => continue,
                };
                if body_a.kinematic && body_b.kinematic {
                    continue;
                }

                let delta = body_b.position - body_a.position;
                let distance = delta.magnitude();
                let reach = body_a.radius + body_b.radius;
                if distance > reach + CONTACT_SLOP {
                    continue;
                }

                let normal = if distance == 0.0 {
                    Vec3::UP
                } else {
                    delta.scale(1.0 / distance)
                };
                let closing = (body_a.velocity - body_b.velocity).dot(&normal).max(0.0);
                self.contacts.push(Contact {
                    a,
                    b,
                    normal,
                    impulse: closing,
                });

                let overlap = reach - distance;
                if overlap <= 0.0 {
                    continue;
                }
                // Split the separation between the movable bodies
                let (share_a, share_b) = match (body_a.kinematic, body_b.kinematic) {
                    (false, false) => (0.5, 0.5),
                    (true, false) => (0.0, 1.0),
                    _ => (1.0, 0.0),
                };
                if let Some(body) = self.bodies.get_mut(&a) {
                    body.position = body.position - normal * (overlap * share_a);
                }
                if let Some(body) = self.bodies.get_mut(&b) {
                    body.position += normal * (overlap * share_b);
                }
            }
        }
    }
}

impl Default for SimplePhysics {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicsWorld for SimplePhysics {
    fn add_body(&mut self, desc: BodyDesc) -> BodyHandle {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.bodies.insert(
            handle,
            RigidBody {
                position: desc.position,
                rotation: Quat::IDENTITY,
                velocity: Vec3::ZERO,
                angular_velocity: Vec3::ZERO,
                target_velocity: None,
                radius: desc.radius,
                kinematic: desc.kinematic,
            },
        );
        handle
    }

    fn remove_body(&mut self, body: BodyHandle) -> bool {
        self.contacts.retain(|c| c.a != body && c.b != body);
        self.bodies.remove(&body).is_some()
    }

    fn transform(&self, body: BodyHandle) -> Option<Transform> {
        self.bodies.get(&body).map(|b| Transform {
            position: b.position,
            rotation: b.rotation,
        })
    }

    fn radius(&self, body: BodyHandle) -> Option<f32> {
        self.bodies.get(&body).map(|b| b.radius)
    }

    fn velocity(&self, body: BodyHandle) -> Option<Vec3> {
        self.bodies.get(&body).map(|b| b.velocity)
    }

    fn angular_velocity(&self, body: BodyHandle) -> Option<Vec3> {
        self.bodies.get(&body).map(|b| b.angular_velocity)
    }

    fn set_target_velocity(&mut self, body: BodyHandle, velocity: Vec3) {
        if let Some(b) = self.bodies.get_mut(&body) {
            b.target_velocity = Some(velocity);
        }
    }

    fn apply_torque(&mut self, body: BodyHandle, change: Vec3) {
        if let Some(b) = self.bodies.get_mut(&body) {
            if !b.kinematic {
                b.angular_velocity += change;
            }
        }
    }

    fn query_within(&self, center: Vec3, radius: f32) -> Vec<BodyHandle> {
        self.bodies
            .iter()
            .filter(|(_, b)| b.position.distance(&center) <= radius + b.radius)
            .map(|(handle, _)| *handle)
            .collect()
    }

    fn check_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.bodies
            .values()
            .any(|b| b.position.distance(&center) < radius + b.radius)
    }

    fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    fn step(&mut self, dt: f32) {
        self.integrate(dt);
        self.resolve_contacts();
    }
}
