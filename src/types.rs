//! Core coordinate types for tiled volumes

use std::fmt;

/// Three sample counts or indices, axis 1 first (slowest) and axis 3 last (fastest)
pub type Dims3 = [usize; 3];

/// Position of a tile in the tile grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridIndex(pub Dims3);

impl GridIndex {
    pub fn new(i1: usize, i2: usize, i3: usize) -> Self {
        Self([i1, i2, i3])
    }

    /// Get the index along one axis (0-based)
    pub fn get(&self, axis: usize) -> usize {
        self.0[axis]
    }
}

impl fmt::Display for GridIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.0[0], self.0[1], self.0[2])
    }
}

/// Axis-aligned box of samples in volume-local coordinates: `[origin, origin + shape)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub origin: Dims3,
    pub shape: Dims3,
}

impl Region {
    pub fn new(origin: Dims3, shape: Dims3) -> Self {
        Self { origin, shape }
    }

    /// Exclusive upper corner, saturating at `usize::MAX`
    pub fn end(&self) -> Dims3 {
        [
            self.origin[0].saturating_add(self.shape[0]),
            self.origin[1].saturating_add(self.shape[1]),
            self.origin[2].saturating_add(self.shape[2]),
        ]
    }

    /// Number of samples in the box
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.shape.iter().any(|&s| s == 0)
    }

    pub fn contains(&self, point: Dims3) -> bool {
        let end = self.end();
        (0..3).all(|a| point[a] >= self.origin[a] && point[a] < end[a])
    }

    /// Overlap of two boxes, `None` when they are disjoint
    pub fn intersect(&self, other: &Region) -> Option<Region> {
        let (a_end, b_end) = (self.end(), other.end());
        let mut origin = [0; 3];
        let mut shape = [0; 3];
        for axis in 0..3 {
            let lo = self.origin[axis].max(other.origin[axis]);
            let hi = a_end[axis].min(b_end[axis]);
            if lo >= hi {
                return None;
            }
            origin[axis] = lo;
            shape[axis] = hi - lo;
        }
        Some(Region { origin, shape })
    }

    /// Smallest box enclosing both
    pub fn union(&self, other: &Region) -> Region {
        let (a_end, b_end) = (self.end(), other.end());
        let mut origin = [0; 3];
        let mut shape = [0; 3];
        for axis in 0..3 {
            origin[axis] = self.origin[axis].min(other.origin[axis]);
            shape[axis] = a_end[axis].max(b_end[axis]) - origin[axis];
        }
        Region { origin, shape }
    }

    /// Re-express this box relative to `base`. `base` must not lie past `self.origin`.
    pub fn relative_to(&self, base: Dims3) -> Region {
        Region {
            origin: [
                self.origin[0] - base[0],
                self.origin[1] - base[1],
                self.origin[2] - base[2],
            ],
            shape: self.shape,
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.end();
        write!(
            f,
            "[{}..{}, {}..{}, {}..{}]",
            self.origin[0], end[0], self.origin[1], end[1], self.origin[2], end[2]
        )
    }
}
