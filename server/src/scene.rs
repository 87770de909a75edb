//! Scene collaborator: loads and unloads named sets of bodies and semantic objects

use crate::physics::BodyDesc;
use crate::semantic::SemanticError;
use crate::world::World;
use log::info;
use shared::Vec3;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SceneError {
    #[error("scene '{0}' does not exist")]
    NotFound(String),

    #[error("scene '{0}' is not loaded")]
    NotLoaded(String),

    #[error("cannot register scene objects: {0}")]
    Semantic(#[from] SemanticError),
}

pub trait SceneLoader: Send {
    fn load_scene(&mut self, name: &str, world: &mut World) -> Result<(), SceneError>;
    fn unload_scene(&mut self, name: &str, world: &mut World) -> Result<(), SceneError>;
    fn loaded_scenes(&self) -> Vec<String>;
}

/// Built-in scenes
///
/// - `Empty`: nothing but the floor
/// - `Playroom`: a table (composite of top and legs) with a ball on it,
///   a ball and a crate on the floor
#[derive(Debug, Default)]
pub struct SceneCatalog {
    loaded: Vec<String>,
}

impl SceneCatalog {
    pub const EMPTY: &'static str = "Empty";
    pub const PLAYROOM: &'static str = "Playroom";

    pub fn new() -> Self {
        Self::default()
    }

    fn build_playroom(world: &mut World) -> Result<(), SceneError> {
        let scene = Self::PLAYROOM;
        let table_center = Vec3::new(4.0, 0.0, 4.0);

        let mut table_parts = Vec::new();
        for (i, (dx, dz)) in [(-0.6, -0.6), (0.6, -0.6), (-0.6, 0.6), (0.6, 0.6)]
            .iter()
            .enumerate()
        {
            let position = table_center + Vec3::new(*dx, 0.3, *dz);
            let body = world.physics.add_body(BodyDesc::kinematic(position, 0.3));
            table_parts.push(
                world
                    .semantics
                    .register_leaf(&format!("table_leg_{}", i), body, scene)?,
            );
        }
        let top = world
            .physics
            .add_body(BodyDesc::kinematic(table_center + Vec3::new(0.0, 0.9, 0.0), 0.3));
        table_parts.push(world.semantics.register_leaf("table_top", top, scene)?);
        world
            .semantics
            .register_composite("table", &table_parts, scene)?;

        let resting = world
            .physics
            .add_body(BodyDesc::dynamic(table_center + Vec3::new(0.0, 1.45, 0.0), 0.25));
        world.semantics.register_leaf("ball_0", resting, scene)?;

        let floor_ball = world
            .physics
            .add_body(BodyDesc::dynamic(Vec3::new(-3.0, 0.25, 2.0), 0.25));
        world.semantics.register_leaf("ball_1", floor_ball, scene)?;

        let crate_body = world
            .physics
            .add_body(BodyDesc::dynamic(Vec3::new(2.0, 0.5, -3.0), 0.5));
        world.semantics.register_leaf("crate_0", crate_body, scene)?;
        Ok(())
    }
}

impl SceneLoader for SceneCatalog {
    /// Loading a scene that is already loaded is a no-op.
    fn load_scene(&mut self, name: &str, world: &mut World) -> Result<(), SceneError> {
        if self.loaded.iter().any(|s| s == name) {
            return Ok(());
        }
        match name {
            Self::EMPTY => {}
            Self::PLAYROOM => Self::build_playroom(world)?,
            other => return Err(SceneError::NotFound(other.to_string())),
        }
        self.loaded.push(name.to_string());
        info!("Loaded scene {} ({} semantic objects)", name, world.semantics.len());
        Ok(())
    }

    fn unload_scene(&mut self, name: &str, world: &mut World) -> Result<(), SceneError> {
        let index = self
            .loaded
            .iter()
            .position(|s| s == name)
            .ok_or_else(|| SceneError::NotLoaded(name.to_string()))?;
        self.loaded.remove(index);

        let bodies = world.semantics.remove_scene(name);
        for body in &bodies {
            world.physics.remove_body(*body);
        }
        info!("Unloaded scene {} ({} bodies removed)", name, bodies.len());
        Ok(())
    }

    fn loaded_scenes(&self) -> Vec<String> {
        self.loaded.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::SemanticKind;

    #[test]
    fn test_load_playroom_registers_table_composite() {
        let mut world = World::default();
        let mut catalog = SceneCatalog::new();
        catalog.load_scene("Playroom", &mut world).unwrap();

        let table = world.semantics.lookup("table").unwrap();
        match &world.semantics.get(table).unwrap().kind {
            SemanticKind::Composite { members } => assert_eq!(members.len(), 5),
            other => panic!("unexpected {:?}", other),
        }
        let top = world.semantics.lookup("table_top").unwrap();
        assert_eq!(world.semantics.parents_of(top), &[table]);
        assert_eq!(catalog.loaded_scenes(), vec!["Playroom".to_string()]);
    }

    #[test]
    fn test_load_twice_is_noop() {
        let mut world = World::default();
        let mut catalog = SceneCatalog::new();
        catalog.load_scene("Playroom", &mut world).unwrap();
        let count = world.semantics.len();

        catalog.load_scene("Playroom", &mut world).unwrap();
        assert_eq!(world.semantics.len(), count);
    }

    #[test]
    fn test_unload_removes_bodies_and_objects() {
        let mut world = World::default();
        let mut catalog = SceneCatalog::new();
        catalog.load_scene("Playroom", &mut world).unwrap();
        let ball = world.semantics.lookup("ball_1").unwrap();
        let body = world.semantics.body_of(ball).unwrap();

        catalog.unload_scene("Playroom", &mut world).unwrap();
        assert!(world.semantics.is_empty());
        assert!(world.physics.transform(body).is_none());
        assert!(catalog.loaded_scenes().is_empty());
        assert_eq!(
            catalog.unload_scene("Playroom", &mut world),
            Err(SceneError::NotLoaded("Playroom".to_string()))
        );
    }

    #[test]
    fn test_unknown_scene() {
        let mut world = World::default();
        let mut catalog = SceneCatalog::new();
        assert_eq!(
            catalog.load_scene("Moon", &mut world),
            Err(SceneError::NotFound("Moon".to_string()))
        );
        catalog.load_scene("Empty", &mut world).unwrap();
        assert!(world.semantics.is_empty());
    }
}
