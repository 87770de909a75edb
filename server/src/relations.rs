//! Relationship evaluation over observed semantic objects
//!
//! Relationships are stateless: every step they are evaluated from the
//! current transforms and contacts. The session manager evaluates each
//! subscribed relationship once over the union of all avatars' observed
//! objects; [`results_for`] then filters the shared results per avatar.

use crate::semantic::{ObjectId, ObservedSet, SemanticRegistry};
use crate::world::World;
use serde_json::{Map, Value};
use shared::ALL_RELATIONSHIPS;
use std::collections::{BTreeMap, BTreeSet};

/// Result of evaluating one relationship
#[derive(Debug, Clone, PartialEq)]
pub enum RelationValue {
    Scalar(f64),
    /// Ordered pairs, e.g. (upper, lower) for `on`
    Pairs(Vec<(ObjectId, ObjectId)>),
    Groups(Vec<Vec<ObjectId>>),
}

impl RelationValue {
    /// JSON restricted to `visible` objects, named by identifier
    ///
    /// Pairs survive only if both ends are visible; groups keep their visible
    /// members and are dropped below two. Scalars pass through unchanged.
    pub fn to_json(&self, semantics: &SemanticRegistry, visible: &ObservedSet) -> Value {
        let name = |id: &ObjectId| {
            if visible.contains(id) {
                semantics.identifier(*id).map(|s| Value::String(s.to_string()))
            } else {
                None
            }
        };

        match self {
            RelationValue::Scalar(v) => serde_json::json!(v),
            RelationValue::Pairs(pairs) => Value::Array(
                pairs
                    .iter()
                    .filter_map(|(a, b)| Some(Value::Array(vec![name(a)?, name(b)?])))
                    .collect(),
            ),
            RelationValue::Groups(groups) => Value::Array(
                groups
                    .iter()
                    .map(|g| g.iter().filter_map(name).collect::<Vec<_>>())
                    .filter(|g| g.len() >= 2)
                    .map(Value::Array)
                    .collect(),
            ),
        }
    }
}

pub trait Relationship: Send {
    fn name(&self) -> &str;
    fn evaluate(&self, observed: &ObservedSet, world: &World) -> RelationValue;
}

/// Name to implementation registry
#[derive(Default)]
pub struct RelationshipRegistry {
    relationships: Vec<Box<dyn Relationship>>,
}

impl RelationshipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `on`, `push` and `touch`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(OnRelation::default()));
        registry.register(Box::new(PushRelation::default()));
        registry.register(Box::new(TouchRelation));
        registry
    }

    /// Adds a relationship, replacing any registered under the same name.
    pub fn register(&mut self, relationship: Box<dyn Relationship>) {
        self.relationships
            .retain(|r| r.name() != relationship.name());
        self.relationships.push(relationship);
    }

    pub fn names(&self) -> Vec<&str> {
        self.relationships.iter().map(|r| r.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relationships.is_empty()
    }

    /// Evaluates each relationship named in `subscribed` (all of them if it
    /// holds the wildcard) exactly once over `observed`.
    pub fn evaluate_subscribed(
        &self,
        subscribed: &BTreeSet<String>,
        observed: &ObservedSet,
        world: &World,
    ) -> BTreeMap<String, RelationValue> {
        let all = subscribed.contains(ALL_RELATIONSHIPS);
        self.relationships
            .iter()
            .filter(|r| all || subscribed.contains(r.name()))
            .map(|r| (r.name().to_string(), r.evaluate(observed, world)))
            .collect()
    }
}

/// Builds one avatar's `observed_relations` from the shared results.
pub fn results_for(
    values: &BTreeMap<String, RelationValue>,
    subscriptions: &BTreeSet<String>,
    visible: &ObservedSet,
    semantics: &SemanticRegistry,
) -> Map<String, Value> {
    let all = subscriptions.contains(ALL_RELATIONSHIPS);
    values
        .iter()
        .filter(|(name, _)| all || subscriptions.contains(name.as_str()))
        .map(|(name, value)| (name.clone(), value.to_json(semantics, visible)))
        .collect()
}

struct LeafState {
    id: ObjectId,
    position: shared::Vec3,
    radius: f32,
}

fn observed_leaves(observed: &ObservedSet, world: &World) -> Vec<LeafState> {
    observed
        .iter()
        .filter_map(|id| {
            let body = world.semantics.body_of(*id)?;
            Some(LeafState {
                id: *id,
                position: world.physics.transform(body)?.position,
                radius: world.physics.radius(body)?,
            })
        })
        .collect()
}

/// Extends leaf pairs to the observed composites containing either end.
fn lift_pairs(
    pairs: Vec<(ObjectId, ObjectId)>,
    semantics: &SemanticRegistry,
    observed: &ObservedSet,
) -> Vec<(ObjectId, ObjectId)> {
    let with_parents = |id: ObjectId| {
        let mut ids = vec![id];
        ids.extend(
            semantics
                .parents_of(id)
                .iter()
                .filter(|p| observed.contains(*p)),
        );
        ids
    };
    let contains = |outer: ObjectId, inner: ObjectId| semantics.parents_of(inner).contains(&outer);

    let mut lifted = BTreeSet::new();
    for (a, b) in pairs {
        for x in with_parents(a) {
            for y in with_parents(b) {
                if x != y && !contains(x, y) && !contains(y, x) {
                    lifted.insert((x, y));
                }
            }
        }
    }
    lifted.into_iter().collect()
}

/// `on`: (upper, lower) when upper rests on top of lower
pub struct OnRelation {
    pub tolerance: f32,
}

impl Default for OnRelation {
    fn default() -> Self {
        Self { tolerance: 0.05 }
    }
}

impl Relationship for OnRelation {
    fn name(&self) -> &str {
        "on"
    }

    fn evaluate(&self, observed: &ObservedSet, world: &World) -> RelationValue {
        let leaves = observed_leaves(observed, world);
        let mut pairs = Vec::new();

        for upper in &leaves {
            for lower in &leaves {
                if upper.id == lower.id || upper.position.y <= lower.position.y {
                    continue;
                }
                let gap = (upper.position.y - upper.radius) - (lower.position.y + lower.radius);
                let offset = upper.position.horizontal_distance(&lower.position);
                if gap.abs() <= self.tolerance && offset < lower.radius.max(upper.radius) {
                    pairs.push((upper.id, lower.id));
                }
            }
        }
        RelationValue::Pairs(lift_pairs(pairs, &world.semantics, observed))
    }
}

/// `push`: (pusher, pushed) for contacts whose closing speed exceeds `threshold`
pub struct PushRelation {
    pub threshold: f32,
}

impl Default for PushRelation {
    fn default() -> Self {
        Self { threshold: 0.1 }
    }
}

impl Relationship for PushRelation {
    fn name(&self) -> &str {
        "push"
    }

    fn evaluate(&self, observed: &ObservedSet, world: &World) -> RelationValue {
        let physics = world.physics.as_ref();
        let semantics = &world.semantics;
        let mut pairs = Vec::new();

        for contact in physics.contacts() {
            if contact.impulse < self.threshold {
                continue;
            }
            let (a, b) = match (
                semantics.leaf_for_body(contact.a),
                semantics.leaf_for_body(contact.b),
            ) {
                (Some(a), Some(b)) if observed.contains(&a) && observed.contains(&b) => (a, b),
                _ => continue,
            };

            // Whoever moves harder into the other is the pusher
            let toward_b = physics
                .velocity(contact.a)
                .map(|v| v.dot(&contact.normal))
                .unwrap_or(0.0);
            let toward_a = physics
                .velocity(contact.b)
                .map(|v| -v.dot(&contact.normal))
                .unwrap_or(0.0);
            if toward_b >= toward_a {
                pairs.push((a, b));
            } else {
                pairs.push((b, a));
            }
        }
        RelationValue::Pairs(lift_pairs(pairs, semantics, observed))
    }
}

/// `touch`: connected groups of objects in contact
pub struct TouchRelation;

impl Relationship for TouchRelation {
    fn name(&self) -> &str {
        "touch"
    }

    fn evaluate(&self, observed: &ObservedSet, world: &World) -> RelationValue {
        let semantics = &world.semantics;
        let leaves: Vec<ObjectId> = observed
            .iter()
            .copied()
            .filter(|id| semantics.body_of(*id).is_some())
            .collect();
        let index: BTreeMap<ObjectId, usize> =
            leaves.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut groups = DisjointSet::new(leaves.len());
        let mut touching = vec![false; leaves.len()];
        for contact in world.physics.contacts() {
            let a = semantics.leaf_for_body(contact.a).and_then(|id| index.get(&id));
            let b = semantics.leaf_for_body(contact.b).and_then(|id| index.get(&id));
            if let (Some(&a), Some(&b)) = (a, b) {
                groups.union(a, b);
                touching[a] = true;
                touching[b] = true;
            }
        }

        let mut by_root: BTreeMap<usize, BTreeSet<ObjectId>> = BTreeMap::new();
        for (i, id) in leaves.iter().enumerate() {
            if !touching[i] {
                continue;
            }
            let members = by_root.entry(groups.find(i)).or_default();
            members.insert(*id);
            members.extend(
                semantics
                    .parents_of(*id)
                    .iter()
                    .filter(|p| observed.contains(*p)),
            );
        }
        RelationValue::Groups(
            by_root
                .into_values()
                .map(|members| members.into_iter().collect())
                .collect(),
        )
    }
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = i;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[rb] = ra;
        }
    }
}
