//! Approximate radius queries over UTXO Cartesian positions.
//!
//! A grid of cell side `grid_size` is maintained alongside the raw point
//! list; `query_range` checks every cell that could intersect the search
//! circle, giving no false negatives. This mirrors the grid fallback of
//! the reference spatial indexer (a KD-tree is the other acceptable
//! implementation per the component contract, but a periodically-rebuilt
//! grid is simpler to keep correct under removals).

use std::collections::{HashMap, HashSet};

use crate::coordinate::Point;
use crate::error::ChainError;

type CellIndex = (i64, i64);

#[derive(Debug, Default)]
struct GridCell {
    points: HashMap<String, Point>,
}

/// Spatial index keyed by UTXO id.
#[derive(Debug)]
pub struct SpatialIndex {
    grid: HashMap<CellIndex, GridCell>,
    points: HashMap<String, Point>,
    grid_size: f64,
}

impl SpatialIndex {
    pub fn new(grid_size: f64) -> Self {
        SpatialIndex {
            grid: HashMap::new(),
            points: HashMap::new(),
            grid_size,
        }
    }

    fn cell_of(&self, p: Point) -> CellIndex {
        (
            (p.x / self.grid_size).floor() as i64,
            (p.y / self.grid_size).floor() as i64,
        )
    }

    pub fn insert(&mut self, id: impl Into<String>, point: Point) {
        let id = id.into();
        let cell = self.cell_of(point);
        self.grid.entry(cell).or_default().points.insert(id.clone(), point);
        self.points.insert(id, point);
    }

    pub fn remove(&mut self, id: &str) -> Result<(), ChainError> {
        let Some(point) = self.points.remove(id) else {
            return Err(ChainError::UnknownUtxo(id.to_string()));
        };
        let cell = self.cell_of(point);
        if let Some(bucket) = self.grid.get_mut(&cell) {
            bucket.points.remove(id);
            if bucket.points.is_empty() {
                self.grid.remove(&cell);
            }
        }
        Ok(())
    }

    /// Every indexed id whose Euclidean distance to `center` is `<= radius`.
    pub fn query_range(&self, center: Point, radius: f64) -> HashSet<String> {
        let mut result = HashSet::new();
        let radius_sq = radius * radius;
        let cells_radius = (radius / self.grid_size).ceil() as i64;
        let (center_i, center_j) = self.cell_of(center);

        for i in (center_i - cells_radius)..=(center_i + cells_radius) {
            for j in (center_j - cells_radius)..=(center_j + cells_radius) {
                if let Some(bucket) = self.grid.get(&(i, j)) {
                    for (id, point) in &bucket.points {
                        let dx = point.x - center.x;
                        let dy = point.y - center.y;
                        if dx * dx + dy * dy <= radius_sq {
                            result.insert(id.clone());
                        }
                    }
                }
            }
        }
        result
    }

    pub fn clear(&mut self) {
        self.grid.clear();
        self.points.clear();
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        SpatialIndex::new(0.1)
    }
}
