//! Semantic world model
//!
//! Every identified thing in the world is a [`SemanticObject`]. Leaves are
//! bound to exactly one physics body; composites group a fixed set of leaves
//! (a table made of a top and legs). Leaf to composite membership is stored
//! as parent back-references written once at registration, so observation
//! never has to walk the tree.

use crate::physics::BodyHandle;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u32);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Objects an avatar (or the union of all avatars) currently sees
pub type ObservedSet = BTreeSet<ObjectId>;

#[derive(Debug, Clone, PartialEq)]
pub enum SemanticKind {
    Leaf { body: BodyHandle },
    Composite { members: Vec<ObjectId> },
}

#[derive(Debug, Clone)]
pub struct SemanticObject {
    pub id: ObjectId,
    pub identifier: String,
    pub kind: SemanticKind,
    /// Scene that registered the object; unloading the scene removes it
    pub scene: String,
    /// Composites this leaf belongs to
    pub parents: Vec<ObjectId>,
}

impl SemanticObject {
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, SemanticKind::Leaf { .. })
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SemanticError {
    #[error("identifier '{0}' is already registered")]
    DuplicateIdentifier(String),

    #[error("composite member {0} is not registered")]
    UnknownMember(ObjectId),

    #[error("composite member {0} is not a leaf")]
    NotALeaf(ObjectId),

    #[error("body {0} already has a semantic object")]
    BodyAlreadyBound(BodyHandle),
}

/// Arena of semantic objects with identifier and body lookups
#[derive(Default)]
pub struct SemanticRegistry {
    // Slots are never reused so stale ids cannot alias new objects
    objects: Vec<Option<SemanticObject>>,
    by_identifier: HashMap<String, ObjectId>,
    by_body: HashMap<BodyHandle, ObjectId>,
}

impl SemanticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_leaf(
        &mut self,
        identifier: &str,
        body: BodyHandle,
        scene: &str,
    ) -> Result<ObjectId, SemanticError> {
        self.check_identifier(identifier)?;
        if self.by_body.contains_key(&body) {
            return Err(SemanticError::BodyAlreadyBound(body));
        }

        let id = self.insert(identifier, SemanticKind::Leaf { body }, scene);
        self.by_body.insert(body, id);
        Ok(id)
    }

    /// Registers a composite and records it as parent of each member leaf.
    pub fn register_composite(
        &mut self,
        identifier: &str,
        members: &[ObjectId],
        scene: &str,
    ) -> Result<ObjectId, SemanticError> {
        self.check_identifier(identifier)?;
        for member in members {
            match self.get(*member) {
                None => return Err(SemanticError::UnknownMember(*member)),
                Some(object) if !object.is_leaf() => return Err(SemanticError::NotALeaf(*member)),
                Some(_) => {}
            }
        }

        let mut unique: Vec<ObjectId> = members.to_vec();
        unique.sort();
        unique.dedup();

        let id = self.insert(
            identifier,
            SemanticKind::Composite {
                members: unique.clone(),
            },
            scene,
        );
        for member in unique {
            if let Some(Some(leaf)) = self.objects.get_mut(member.0 as usize) {
                leaf.parents.push(id);
            }
        }
        Ok(id)
    }

    pub fn get(&self, id: ObjectId) -> Option<&SemanticObject> {
        self.objects.get(id.0 as usize).and_then(|slot| slot.as_ref())
    }

    pub fn identifier(&self, id: ObjectId) -> Option<&str> {
        self.get(id).map(|o| o.identifier.as_str())
    }

    pub fn lookup(&self, identifier: &str) -> Option<ObjectId> {
        self.by_identifier.get(identifier).copied()
    }

    pub fn leaf_for_body(&self, body: BodyHandle) -> Option<ObjectId> {
        self.by_body.get(&body).copied()
    }

    pub fn parents_of(&self, id: ObjectId) -> &[ObjectId] {
        self.get(id).map(|o| o.parents.as_slice()).unwrap_or(&[])
    }

    pub fn body_of(&self, id: ObjectId) -> Option<BodyHandle> {
        match self.get(id)?.kind {
            SemanticKind::Leaf { body } => Some(body),
            SemanticKind::Composite { .. } => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SemanticObject> {
        self.objects.iter().filter_map(|slot| slot.as_ref())
    }

    pub fn len(&self) -> usize {
        self.by_identifier.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identifier.is_empty()
    }

    /// Removes every object of `scene` and returns the bodies they were bound to.
    pub fn remove_scene(&mut self, scene: &str) -> Vec<BodyHandle> {
        let mut removed = BTreeSet::new();
        let mut bodies = Vec::new();

        for slot in self.objects.iter_mut() {
            let matches = slot.as_ref().map(|o| o.scene == scene).unwrap_or(false);
            if !matches {
                continue;
            }
            if let Some(object) = slot.take() {
                self.by_identifier.remove(&object.identifier);
                if let SemanticKind::Leaf { body } = object.kind {
                    self.by_body.remove(&body);
                    bodies.push(body);
                }
                removed.insert(object.id);
            }
        }

        // Drop references held by objects of other scenes
        for object in self.objects.iter_mut().flatten() {
            object.parents.retain(|p| !removed.contains(p));
            if let SemanticKind::Composite { members } = &mut object.kind {
                members.retain(|m| !removed.contains(m));
            }
        }
        bodies
    }

    /// Adds the leaves bound to `bodies`, plus their composites, to `observed`.
    ///
    /// Bodies without a semantic leaf (avatars, scenery) are ignored, as is `exclude`.
    pub fn observe(
        &self,
        bodies: &[BodyHandle],
        exclude: Option<BodyHandle>,
        observed: &mut ObservedSet,
    ) {
        for body in bodies {
            if Some(*body) == exclude {
                continue;
            }
            if let Some(leaf) = self.leaf_for_body(*body) {
                observed.insert(leaf);
                observed.extend(self.parents_of(leaf).iter().copied());
            }
        }
    }

    /// `[identifier, numeric id]` for every registered object
    pub fn scene_info(&self) -> Vec<[String; 2]> {
        self.iter()
            .map(|o| [o.identifier.clone(), o.id.to_string()])
            .collect()
    }

    fn check_identifier(&self, identifier: &str) -> Result<(), SemanticError> {
        if self.by_identifier.contains_key(identifier) {
            return Err(SemanticError::DuplicateIdentifier(identifier.to_string()));
        }
        Ok(())
    }

    fn insert(&mut self, identifier: &str, kind: SemanticKind, scene: &str) -> ObjectId {
        let id = ObjectId(self.objects.len() as u32);
        self.objects.push(Some(SemanticObject {
            id,
            identifier: identifier.to_string(),
            kind,
            scene: scene.to_string(),
            parents: Vec::new(),
        }));
        self.by_identifier.insert(identifier.to_string(), id);
        id
    }
}
