//! Quadtree spatial index of feature bounding boxes
//!
//! Each entry is a feature id with its bounding box. Entries live in the deepest node whose
//! bounds fully contain the box, so large boxes stay near the root and small ones sink. Nodes split
//! lazily once they hold more than the configured capacity. A locator map remembers each id's
//! box, which makes removal and replacement a single walk down the containment path.
//!
//! Boxes outside the root extent are kept at the root and tested on every query, so the index never
//! drops an entry just because the layer extends past the configured extent.

use crate::{FeatureId, utils};
use geo::{Coord, Rect};
use std::collections::HashMap;

/// Maximum depth of the quadtree to prevent infinite recursion
const MAX_DEPTH: u32 = 16;

/// Default number of entries a node holds before it splits
pub(crate) const DEFAULT_NODE_CAPACITY: usize = 16;

/// Id-keyed spatial index supporting rectangle-intersection queries
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    root: QuadtreeNode,
    /// Bounding box of every indexed id
    locator: HashMap<FeatureId, Rect<f64>>,
    node_capacity: usize,
}

/// A single node of the quadtree
#[derive(Debug, Clone)]
struct QuadtreeNode {
    bounding_box: Rect<f64>,
    /// Depth level in the tree (0 = root)
    level: u32,
    entries: Vec<(FeatureId, Rect<f64>)>,
    /// Child nodes (NW, NE, SW, SE) if subdivided
    children: Option<Box<[QuadtreeNode; 4]>>,
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new(utils::mercator_extent(), DEFAULT_NODE_CAPACITY)
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl SpatialIndex {
    /// Create an empty index covering `extent`
    ///
    /// # Arguments
    /// * `extent` - Root bounds; boxes outside it are still indexed, only less efficiently
    /// * `node_capacity` - Entries per node before it splits (at least 1)
    pub fn new(extent: Rect<f64>, node_capacity: usize) -> Self {
        Self {
            root: QuadtreeNode::new(extent, 0),
            locator: HashMap::new(),
            node_capacity: node_capacity.max(1),
        }
    }

    /// Insert or replace the bounding box of `id`
    pub fn insert(&mut self, id: FeatureId, bbox: Rect<f64>) {
        if let Some(previous) = self.locator.insert(id, bbox) {
            self.root.remove(id, previous);
        }
        self.root.insert(id, bbox, self.node_capacity);
    }

    /// Remove `id`, returning the box it was indexed with
    pub fn remove(&mut self, id: FeatureId) -> Option<Rect<f64>> {
        let bbox = self.locator.remove(&id)?;
        let removed = self.root.remove(id, bbox);
        debug_assert!(removed, "locator and tree disagree about feature {id}");
        Some(bbox)
    }

    /// Ids whose bounding box intersects `rect`, borders included
    pub fn intersects(&self, rect: Rect<f64>) -> Vec<FeatureId> {
        #[cfg(feature = "profiling")]
        profiling::scope!("index::intersects");

        let mut results = Vec::new();
        self.root.query(rect, true, &mut results);
        results
    }

    #[inline]
    pub fn contains(&self, id: FeatureId) -> bool {
        self.locator.contains_key(&id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.locator.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.locator.is_empty()
    }
}

impl QuadtreeNode {
    fn new(bounding_box: Rect<f64>, level: u32) -> Self {
        Self {
            bounding_box,
            level,
            entries: Vec::new(),
            children: None,
        }
    }

    /// Index of the child quadrant fully containing `bbox`, if any
    ///
    /// Insertion and removal both descend through this function, so an entry is always found
    /// along the same path it was stored on.
    fn child_for(&self, bbox: Rect<f64>) -> Option<usize> {
        let children = self.children.as_ref()?;
        children
            .iter()
            .position(|child| utils::rect_contains(child.bounding_box, bbox))
    }

    fn insert(&mut self, id: FeatureId, bbox: Rect<f64>, capacity: usize) {
        if let Some(i) = self.child_for(bbox) {
            if let Some(children) = &mut self.children {
                children[i].insert(id, bbox, capacity);
                return;
            }
        }

        self.entries.push((id, bbox));

        if self.children.is_none() && self.entries.len() > capacity && self.level < MAX_DEPTH {
            self.subdivide();
            self.push_down(capacity);
        }
    }

    /// Move entries that fit a child quadrant into it
    fn push_down(&mut self, capacity: usize) {
        let entries = std::mem::take(&mut self.entries);
        for (id, bbox) in entries {
            match (self.child_for(bbox), &mut self.children) {
                (Some(i), Some(children)) => children[i].insert(id, bbox, capacity),
                _ => self.entries.push((id, bbox)),
            }
        }
    }

    fn remove(&mut self, id: FeatureId, bbox: Rect<f64>) -> bool {
        if let Some(pos) = self.entries.iter().position(|(entry_id, _)| *entry_id == id) {
            self.entries.swap_remove(pos);
            return true;
        }

        match (self.child_for(bbox), &mut self.children) {
            (Some(i), Some(children)) => children[i].remove(id, bbox),
            _ => false,
        }
    }

    /// Subdivide this node into 4 children
    fn subdivide(&mut self) {
        if self.children.is_some() {
            return; // Already subdivided
        }

        let min = self.bounding_box.min();
        let max = self.bounding_box.max();
        let mid_x = (min.x + max.x) / 2.0;
        let mid_y = (min.y + max.y) / 2.0;

        let child_level = self.level + 1;

        // Create 4 children: NW, NE, SW, SE
        let nw = QuadtreeNode::new(
            Rect::new(Coord { x: min.x, y: mid_y }, Coord { x: mid_x, y: max.y }),
            child_level,
        );
        let ne = QuadtreeNode::new(
            Rect::new(Coord { x: mid_x, y: mid_y }, Coord { x: max.x, y: max.y }),
            child_level,
        );
        let sw = QuadtreeNode::new(
            Rect::new(Coord { x: min.x, y: min.y }, Coord { x: mid_x, y: mid_y }),
            child_level,
        );
        let se = QuadtreeNode::new(
            Rect::new(Coord { x: mid_x, y: min.y }, Coord { x: max.x, y: mid_y }),
            child_level,
        );

        self.children = Some(Box::new([nw, ne, sw, se]));
    }

    /// Collect ids of entries intersecting `rect`
    ///
    /// The root is always visited because it also holds boxes outside its own bounds.
    fn query(&self, rect: Rect<f64>, is_root: bool, results: &mut Vec<FeatureId>) {
        if !is_root && !utils::rects_intersect(self.bounding_box, rect) {
            return;
        }

        results.extend(
            self.entries
                .iter()
                .filter(|(_, bbox)| utils::rects_intersect(*bbox, rect))
                .map(|(id, _)| *id),
        );

        if let Some(children) = &self.children {
            for child in children.iter() {
                child.query(rect, false, results);
            }
        }
    }

    #[cfg(test)]
    fn depth(&self) -> u32 {
        match &self.children {
            Some(children) => children.iter().map(QuadtreeNode::depth).max().unwrap_or(0) + 1,
            None => 0,
        }
    }
}
