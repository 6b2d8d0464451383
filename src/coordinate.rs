//! Fractal (Sierpinski-triangle) coordinate algebra.
//!
//! A [`Coordinate`] names a sub-triangle of the unit triangle
//! `(0,0)-(1,0)-(0.5, sqrt(3)/2)` at a given recursion depth. The first path
//! digit determines the shard a coordinate belongs to.

use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};
use std::hash::{Hash, Hasher};

use crate::error::ChainError;

/// A point in the embedding Cartesian plane.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// A position in the fractal coordinate system: `depth` levels of recursion,
/// `path` a sequence of digits in `{0, 1, 2}` of length `depth`.
///
/// Immutable once constructed. `hash` and `cartesian` are computed lazily
/// and memoized per instance.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Coordinate {
    depth: u32,
    path: Vec<u8>,
    #[serde(skip)]
    cached_hash: OnceCell<String>,
    #[serde(skip)]
    cached_cartesian: OnceCell<Point>,
}

impl PartialEq for Coordinate {
    fn eq(&self, other: &Self) -> bool {
        self.depth == other.depth && self.path == other.path
    }
}
impl Eq for Coordinate {}

impl Hash for Coordinate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.depth.hash(state);
        self.path.hash(state);
    }
}

impl Coordinate {
    /// Construct a new coordinate, rejecting malformed depth/path combinations.
    pub fn new(depth: u32, path: Vec<u8>) -> Result<Self, ChainError> {
        if path.len() as u32 != depth {
            return Err(ChainError::InvalidCoordinate(format!(
                "path length ({}) must equal depth ({})",
                path.len(),
                depth
            )));
        }
        if let Some(&bad) = path.iter().find(|&&d| d > 2) {
            return Err(ChainError::InvalidCoordinate(format!(
                "invalid path digit: {bad}, must be 0, 1, or 2"
            )));
        }
        Ok(Coordinate {
            depth,
            path,
            cached_hash: OnceCell::new(),
            cached_cartesian: OnceCell::new(),
        })
    }

    /// The root coordinate, depth 0, empty path.
    pub fn root() -> Self {
        Coordinate::new(0, Vec::new()).expect("root coordinate is always valid")
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn path(&self) -> &[u8] {
        &self.path
    }

    /// `path[0]` when `depth >= 1`, else `0`.
    pub fn shard_id(&self) -> u32 {
        if self.depth > 0 {
            self.path[0] as u32
        } else {
            0
        }
    }

    /// Trims the last path digit. The root's parent is the root itself.
    pub fn parent(&self) -> Coordinate {
        if self.depth == 0 {
            return self.clone();
        }
        Coordinate::new(self.depth - 1, self.path[..self.path.len() - 1].to_vec())
            .expect("trimming a valid path keeps it valid")
    }

    /// The three children obtained by appending each digit in `{0, 1, 2}`.
    pub fn children(&self) -> [Coordinate; 3] {
        std::array::from_fn(|i| {
            let mut path = self.path.clone();
            path.push(i as u8);
            Coordinate::new(self.depth + 1, path).expect("appending a digit keeps the path valid")
        })
    }

    /// `SHA256("<depth>:<d0>,<d1>,...")`, hex-encoded lowercase.
    pub fn hash(&self) -> &str {
        self.cached_hash.get_or_init(|| {
            let digits: Vec<String> = self.path.iter().map(|d| d.to_string()).collect();
            let serialized = format!("{}:{}", self.depth, digits.join(","));
            let mut hasher = Sha256::new();
            hasher.update(serialized.as_bytes());
            hex::encode(hasher.finalize())
        })
    }

    /// Recursive sub-triangle selection starting at the centroid of the unit
    /// triangle `(0,0)-(1,0)-(0.5, sqrt(3)/2)`, halving scale per depth step.
    pub fn cartesian(&self) -> Point {
        *self.cached_cartesian.get_or_init(|| {
            let mut x = 0.5_f64;
            let mut y = 3f64.sqrt() / 6.0;
            let mut scale = 1.0_f64;

            for &digit in &self.path {
                scale /= 2.0;
                match digit {
                    0 => {
                        x -= scale / 2.0;
                        y += scale * (3f64.sqrt() / 4.0);
                    }
                    1 => {
                        y += scale * (3f64.sqrt() / 2.0);
                    }
                    2 => {
                        x += scale / 2.0;
                        y += scale * (3f64.sqrt() / 4.0);
                    }
                    _ => unreachable!("constructor rejects digits outside 0..=2"),
                }
            }
            Point::new(x, y)
        })
    }

    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        self.cartesian().distance_to(&other.cartesian())
    }
}
