//! The simulated world: physics bodies plus the semantic objects bound to them

use crate::physics::{PhysicsWorld, SimplePhysics};
use crate::semantic::SemanticRegistry;

pub struct World {
    pub physics: Box<dyn PhysicsWorld>,
    pub semantics: SemanticRegistry,
}

impl World {
    pub fn new(physics: Box<dyn PhysicsWorld>) -> Self {
        Self {
            physics,
            semantics: SemanticRegistry::new(),
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new(Box::new(SimplePhysics::new()))
    }
}
