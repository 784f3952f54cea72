//! Spatial Index (Octree)
//!
//! Broad phase for collision and proximity queries. Rebuilt from scratch
//! every fixed step, so there is no removal or update path.
//!
//! ```text
//!  insert(p):  outside region ─► reject
//!              room in node   ─► keep here
//!              full           ─► subdivide once, descend into the first
//!                                octant (x=bit0, y=bit1, z=bit2) holding p
//! ```
//!
//! Nodes live in a flat arena indexed by `usize`; children of a node are
//! eight consecutive arena slots.

use glam::Vec3;

use crate::core::math::Aabb;
use crate::game::ecs::EntityId;

/// Default per-node capacity.
pub const DEFAULT_CAPACITY: usize = 1;

/// Default depth limit. A node at this depth accepts entries past capacity.
pub const DEFAULT_MAX_DEPTH: u32 = 16;

#[derive(Clone, Debug)]
struct Node {
    bounds: Aabb,
    depth: u32,
    entries: Vec<(EntityId, Vec3)>,
    first_child: Option<usize>,
}

impl Node {
    fn new(bounds: Aabb, depth: u32) -> Self {
        Self {
            bounds,
            depth,
            entries: Vec::new(),
            first_child: None,
        }
    }
}

/// Region-bounded, capacity-limited octree over entity positions.
#[derive(Clone, Debug)]
pub struct SpatialIndex {
    nodes: Vec<Node>,
    capacity: usize,
    max_depth: u32,
    len: usize,
}

impl SpatialIndex {
    /// Empty index over `bounds`.
    pub fn new(bounds: Aabb, capacity: usize, max_depth: u32) -> Self {
        Self {
            nodes: vec![Node::new(bounds, 0)],
            capacity: capacity.max(1),
            max_depth,
            len: 0,
        }
    }

    /// Build an index from `(id, position)` pairs. Out-of-region points are skipped.
    pub fn build<I>(bounds: Aabb, capacity: usize, max_depth: u32, items: I) -> Self
    where
        I: IntoIterator<Item = (EntityId, Vec3)>,
    {
        let mut index = Self::new(bounds, capacity, max_depth);
        for (id, position) in items {
            index.insert(id, position);
        }
        index
    }

    /// Insert a point. Returns `false` when it lies outside the region.
    pub fn insert(&mut self, id: EntityId, point: Vec3) -> bool {
        if !self.nodes[0].bounds.contains(point) {
            return false;
        }

        let mut current = 0;
        loop {
            let node = &mut self.nodes[current];
            if node.entries.len() < self.capacity || node.depth >= self.max_depth {
                node.entries.push((id, point));
                self.len += 1;
                return true;
            }

            let first_child = node.first_child;
            let first = match first_child {
                Some(first) => first,
                None => self.subdivide(current),
            };

            match (first..first + 8).find(|&child| self.nodes[child].bounds.contains(point)) {
                Some(child) => current = child,
                None => return false,
            }
        }
    }

    /// Entities within `radius` of `point` (inclusive), sorted by id.
    pub fn query(&self, point: Vec3, radius: f32) -> Vec<EntityId> {
        let mut found = Vec::new();
        if !point.is_finite() || radius.is_nan() || radius < 0.0 {
            return found;
        }

        let mut stack = vec![0usize];
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            if node.bounds.distance_to(point) > radius {
                continue;
            }
            found.extend(
                node.entries
                    .iter()
                    .filter(|(_, p)| p.distance(point) <= radius)
                    .map(|(id, _)| *id),
            );
            if let Some(first) = node.first_child {
                stack.extend(first..first + 8);
            }
        }

        found.sort_unstable();
        found
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Region covered by the root.
    pub fn bounds(&self) -> Aabb {
        self.nodes[0].bounds
    }

    /// Number of allocated nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn subdivide(&mut self, idx: usize) -> usize {
        let bounds = self.nodes[idx].bounds;
        let depth = self.nodes[idx].depth + 1;
        let first = self.nodes.len();
        self.nodes
            .extend((0..8).map(|octant| Node::new(bounds.octant(octant), depth)));
        self.nodes[idx].first_child = Some(first);
        first
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn world() -> Aabb {
        Aabb::cube(Vec3::ZERO, 100.0)
    }

    #[test]
    fn test_rejects_outside_points() {
        let mut index = SpatialIndex::new(world(), 1, DEFAULT_MAX_DEPTH);
        assert!(!index.insert(EntityId(1), Vec3::new(150.0, 0.0, 0.0)));
        assert!(!index.insert(EntityId(2), Vec3::new(f32::NAN, 0.0, 0.0)));
        assert!(index.is_empty());
    }

    #[test]
    fn test_subdivides_lazily() {
        let mut index = SpatialIndex::new(world(), 1, DEFAULT_MAX_DEPTH);
        index.insert(EntityId(1), Vec3::new(10.0, 10.0, 10.0));
        assert_eq!(index.node_count(), 1);

        index.insert(EntityId(2), Vec3::new(-10.0, -10.0, -10.0));
        assert_eq!(index.node_count(), 9);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_query_prunes_by_radius() {
        let index = SpatialIndex::build(
            world(),
            1,
            DEFAULT_MAX_DEPTH,
            vec![
                (EntityId(1), Vec3::new(0.0, 0.0, 0.0)),
                (EntityId(2), Vec3::new(5.0, 0.0, 0.0)),
                (EntityId(3), Vec3::new(50.0, 50.0, 50.0)),
            ],
        );

        assert_eq!(index.query(Vec3::ZERO, 5.0), vec![EntityId(1), EntityId(2)]);
        assert_eq!(index.query(Vec3::ZERO, 4.9), vec![EntityId(1)]);
        assert_eq!(index.query(Vec3::splat(50.0), 0.0), vec![EntityId(3)]);
        assert!(index.query(Vec3::ZERO, -1.0).is_empty());
    }

    #[test]
    fn test_coincident_points_hit_depth_limit() {
        let mut index = SpatialIndex::new(world(), 1, 4);
        for i in 0..10 {
            assert!(index.insert(EntityId(i), Vec3::splat(1.0)));
        }
        assert_eq!(index.query(Vec3::splat(1.0), 0.0).len(), 10);
    }

    #[test]
    fn test_point_on_split_plane() {
        let mut index = SpatialIndex::new(world(), 1, DEFAULT_MAX_DEPTH);
        index.insert(EntityId(1), Vec3::new(1.0, 1.0, 1.0));
        assert!(index.insert(EntityId(2), Vec3::ZERO));
        assert_eq!(index.query(Vec3::ZERO, 0.0), vec![EntityId(2)]);
    }

    proptest! {
        #[test]
        fn prop_inserted_points_are_found(
            points in proptest::collection::vec(
                (-100.0f32..=100.0, -100.0f32..=100.0, -100.0f32..=100.0),
                1..64,
            ),
            radius in 0.0f32..10.0,
        ) {
            let mut index = SpatialIndex::new(world(), 1, DEFAULT_MAX_DEPTH);
            for (i, (x, y, z)) in points.iter().enumerate() {
                prop_assert!(index.insert(EntityId(i as u32), Vec3::new(*x, *y, *z)));
            }
            for (i, (x, y, z)) in points.iter().enumerate() {
                let hits = index.query(Vec3::new(*x, *y, *z), radius);
                prop_assert!(hits.contains(&EntityId(i as u32)));
            }
        }
    }
}
