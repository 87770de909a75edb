//! Avatar spawn placement

use crate::physics::PhysicsWorld;
use rand::Rng;
use shared::Vec3;
use thiserror::Error;

/// Horizontal extent of the room, centered on the origin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoomBounds {
    pub width: f32,
    pub depth: f32,
}

impl Default for RoomBounds {
    fn default() -> Self {
        Self {
            width: 10.0,
            depth: 10.0,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SpawnError {
    #[error("no free spawn point after {attempts} attempts")]
    Exhausted { attempts: u32, last: Vec3 },
}

/// Picks a random point on the floor where a sphere of `radius` overlaps nothing.
pub fn find_spawn_point<R: Rng>(
    physics: &dyn PhysicsWorld,
    rng: &mut R,
    room: RoomBounds,
    radius: f32,
    attempts: u32,
) -> Result<Vec3, SpawnError> {
    let half_width = (room.width / 2.0 - radius).max(0.0);
    let half_depth = (room.depth / 2.0 - radius).max(0.0);
    let mut last = Vec3::new(0.0, radius, 0.0);

    for _ in 0..attempts {
        let x = if half_width > 0.0 {
            rng.gen_range(-half_width..half_width)
        } else {
            0.0
        };
        let z = if half_depth > 0.0 {
            rng.gen_range(-half_depth..half_depth)
        } else {
            0.0
        };
        last = Vec3::new(x, radius, z);
        if !physics.check_sphere(last, radius) {
            return Ok(last);
        }
    }
    Err(SpawnError::Exhausted { attempts, last })
}
