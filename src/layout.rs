//! Volume layout - how a volume is cut into tiles and where each tile lives

use crate::error::{Result, VolumeError};
use crate::ring::DirectoryRing;
use crate::types::{Dims3, GridIndex, Region};
use crate::utils::tile_file_name;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Size of a tile file sample, in bytes
pub const SAMPLE_BYTES: usize = std::mem::size_of::<f32>();

const AXES: [&str; 3] = ["1", "2", "3"];

/// Everything needed to address one tile on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRef {
    /// Position in the tile grid
    pub index: GridIndex,
    /// Row-major enumeration index (axis 1 outer, axis 3 inner)
    pub linear: usize,
    /// Full (padded) box covered by the tile file, in volume-local coordinates
    pub region: Region,
    /// Tile file location
    pub path: PathBuf,
}

impl TileRef {
    pub fn origin(&self) -> Dims3 {
        self.region.origin
    }
}

/// Layout of a tiled volume.
///
/// Built once and immutable afterwards; `with_tile_shape` and
/// `with_directories` produce a new layout whose filenames are re-derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawLayout")]
pub struct VolumeLayout {
    /// Global coordinate of local sample (0, 0, 0)
    origin: Dims3,

    /// Number of samples along each axis
    extent: Dims3,

    /// Global coordinate spacing between samples
    stride: Dims3,

    /// Tile dimensions in samples
    tile_shape: Dims3,

    prefix: String,
    suffix: String,
    directories: DirectoryRing,
}

#[derive(Deserialize)]
struct RawLayout {
    origin: Dims3,
    extent: Dims3,
    stride: Dims3,
    tile_shape: Dims3,
    prefix: String,
    suffix: String,
    directories: DirectoryRing,
}

impl TryFrom<RawLayout> for VolumeLayout {
    type Error = VolumeError;

    fn try_from(raw: RawLayout) -> Result<Self> {
        VolumeLayout::build(
            raw.origin,
            raw.extent,
            raw.stride,
            raw.tile_shape,
            raw.prefix,
            raw.suffix,
            raw.directories,
        )
    }
}

impl VolumeLayout {
    /// Create and validate a layout
    pub fn build(
        origin: Dims3,
        extent: Dims3,
        stride: Dims3,
        tile_shape: Dims3,
        prefix: impl Into<String>,
        suffix: impl Into<String>,
        directories: DirectoryRing,
    ) -> Result<Self> {
        let prefix = prefix.into();
        for axis in 0..3 {
            let name = AXES[axis];
            if extent[axis] < 1 {
                return Err(VolumeError::InvalidConfig(format!("n{} < 1", name)));
            }
            if stride[axis] < 1 {
                return Err(VolumeError::InvalidConfig(format!("d{} < 1", name)));
            }
            if tile_shape[axis] < 1 {
                return Err(VolumeError::InvalidConfig(format!("p{} < 1", name)));
            }
        }
        if prefix.is_empty() {
            return Err(VolumeError::InvalidConfig("prefix empty".to_string()));
        }
        for axis in 0..3 {
            if axis_end(origin[axis], stride[axis], extent[axis]).is_none() {
                return Err(VolumeError::InvalidConfig(format!(
                    "o{a}+d{a}*n{a} overflows",
                    a = AXES[axis]
                )));
            }
        }

        Ok(Self {
            origin,
            extent,
            stride,
            tile_shape,
            prefix,
            suffix: suffix.into(),
            directories,
        })
    }

    /// Load a layout from its JSON form
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Same volume, different tile shape. Every filename is re-derived.
    pub fn with_tile_shape(&self, tile_shape: Dims3) -> Result<Self> {
        Self::build(
            self.origin,
            self.extent,
            self.stride,
            tile_shape,
            self.prefix.clone(),
            self.suffix.clone(),
            self.directories.clone(),
        )
    }

    /// Same volume, tiles spread over a different directory list
    pub fn with_directories(&self, directories: DirectoryRing) -> Self {
        Self {
            directories,
            ..self.clone()
        }
    }

    pub fn origin(&self) -> Dims3 {
        self.origin
    }

    pub fn extent(&self) -> Dims3 {
        self.extent
    }

    pub fn stride(&self) -> Dims3 {
        self.stride
    }

    pub fn tile_shape(&self) -> Dims3 {
        self.tile_shape
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn directories(&self) -> &DirectoryRing {
        &self.directories
    }

    /// Number of tiles along each axis (ceiling division)
    pub fn tile_grid_shape(&self) -> Dims3 {
        [
            self.extent[0].div_ceil(self.tile_shape[0]),
            self.extent[1].div_ceil(self.tile_shape[1]),
            self.extent[2].div_ceil(self.tile_shape[2]),
        ]
    }

    /// Total number of tiles
    pub fn tile_count(&self) -> usize {
        self.tile_grid_shape().iter().product()
    }

    /// Samples in one tile file
    pub fn tile_len(&self) -> usize {
        self.tile_shape.iter().product()
    }

    /// Size in bytes of one tile file
    pub fn tile_size_bytes(&self) -> usize {
        self.tile_len() * SAMPLE_BYTES
    }

    /// Samples in the volume (excluding tile padding)
    pub fn total_samples(&self) -> usize {
        self.extent.iter().product()
    }

    /// The whole volume as a local-coordinate box
    pub fn volume_region(&self) -> Region {
        Region::new([0, 0, 0], self.extent)
    }

    /// Convert grid coordinates to the row-major enumeration index
    pub fn linear_index(&self, index: GridIndex) -> usize {
        let grid = self.tile_grid_shape();
        (index.0[0] * grid[1] + index.0[1]) * grid[2] + index.0[2]
    }

    /// Convert a row-major enumeration index back to grid coordinates
    pub fn grid_index(&self, linear: usize) -> GridIndex {
        let grid = self.tile_grid_shape();
        let i3 = linear % grid[2];
        let rest = linear / grid[2];
        GridIndex::new(rest / grid[1], rest % grid[1], i3)
    }

    /// Local coordinate of the first sample of a tile
    pub fn tile_origin(&self, index: GridIndex) -> Dims3 {
        [
            index.0[0] * self.tile_shape[0],
            index.0[1] * self.tile_shape[1],
            index.0[2] * self.tile_shape[2],
        ]
    }

    /// Full box of a tile, including padding past the volume extent
    pub fn tile_region(&self, index: GridIndex) -> Region {
        Region::new(self.tile_origin(index), self.tile_shape)
    }

    /// Part of a tile that holds real volume samples
    pub fn tile_data_region(&self, index: GridIndex) -> Region {
        let origin = self.tile_origin(index);
        let mut shape = self.tile_shape;
        for axis in 0..3 {
            shape[axis] = shape[axis].min(self.extent[axis] - origin[axis]);
        }
        Region::new(origin, shape)
    }

    /// File path of a tile: `dir/<prefix><o1>_<o2>_<o3><suffix>`, with the
    /// directory picked round-robin on the linear index
    pub fn filename_for(&self, index: GridIndex) -> PathBuf {
        let dir: &Path = self.directories.assign(self.linear_index(index));
        dir.join(tile_file_name(
            &self.prefix,
            self.tile_origin(index),
            &self.suffix,
        ))
    }

    /// Addressing record for one tile
    pub fn tile(&self, index: GridIndex) -> TileRef {
        TileRef {
            index,
            linear: self.linear_index(index),
            region: self.tile_region(index),
            path: self.filename_for(index),
        }
    }

    /// Every tile, in row-major enumeration order
    pub fn tiles(&self) -> impl Iterator<Item = TileRef> + '_ {
        (0..self.tile_count()).map(move |k| self.tile(self.grid_index(k)))
    }

    /// Tiles whose boxes intersect `region`, in row-major enumeration order
    pub fn tiles_touching(&self, region: &Region) -> Vec<TileRef> {
        if region.is_empty() {
            return Vec::new();
        }
        let grid = self.tile_grid_shape();
        let end = region.end();
        let mut first = [0; 3];
        let mut last = [0; 3];
        for axis in 0..3 {
            first[axis] = region.origin[axis] / self.tile_shape[axis];
            last[axis] = ((end[axis] - 1) / self.tile_shape[axis]).min(grid[axis] - 1);
            if first[axis] > last[axis] {
                return Vec::new();
            }
        }

        let mut tiles = Vec::new();
        for i1 in first[0]..=last[0] {
            for i2 in first[1]..=last[1] {
                for i3 in first[2]..=last[2] {
                    tiles.push(self.tile(GridIndex::new(i1, i2, i3)));
                }
            }
        }
        tiles
    }

    /// Reject boxes that leave the volume, including boxes whose end is not representable
    pub fn check_region(&self, region: &Region) -> Result<()> {
        for axis in 0..3 {
            let end = region.origin[axis].checked_add(region.shape[axis]);
            if end.map_or(true, |end| end > self.extent[axis]) {
                return Err(VolumeError::OutOfRange(format!(
                    "or{a}+nr{a} > n{a} ({} + {} > {})",
                    region.origin[axis],
                    region.shape[axis],
                    self.extent[axis],
                    a = AXES[axis]
                )));
            }
        }
        Ok(())
    }

    /// Translate a global (physical axis) coordinate to a local sample index.
    ///
    /// Accepts `origin <= i <= origin + n * stride` on every axis and requires
    /// `i - origin` to be a multiple of the stride.
    pub fn global_to_local(&self, global: Dims3) -> Result<Dims3> {
        let mut local = [0; 3];
        for axis in 0..3 {
            let a = AXES[axis];
            let i = global[axis];
            let o = self.origin[axis];
            let d = self.stride[axis];
            if i < o {
                return Err(VolumeError::OutOfRange(format!("i{a} < o{a} ({} < {})", i, o)));
            }
            let last = axis_end(o, d, self.extent[axis]).ok_or_else(|| {
                VolumeError::OutOfRange(format!(
                    "o{a}+d{a}*n{a} overflows ({} + {} * {})",
                    o, d, self.extent[axis]
                ))
            })?;
            if i > last {
                return Err(VolumeError::OutOfRange(format!(
                    "i{a} > o{a}+d{a}*n{a} ({} > {})",
                    i, last
                )));
            }
            if (i - o) % d != 0 {
                return Err(VolumeError::NotAligned(format!(
                    "(i{a}-o{a}) mod d{a} != 0 ({} - {} not a multiple of {})",
                    i, o, d
                )));
            }
            local[axis] = (i - o) / d;
        }
        Ok(local)
    }

    /// Translate a local sample index to its global coordinate
    pub fn local_to_global(&self, local: Dims3) -> Dims3 {
        [
            self.origin[0] + local[0] * self.stride[0],
            self.origin[1] + local[1] * self.stride[1],
            self.origin[2] + local[2] * self.stride[2],
        ]
    }

    /// Get a summary string of the layout
    pub fn summary(&self) -> String {
        let grid = self.tile_grid_shape();
        format!(
            "Volume {} x {} x {}, tiles {} x {} x {} ({} tiles of {} x {} x {}) over {} directories",
            self.extent[0],
            self.extent[1],
            self.extent[2],
            grid[0],
            grid[1],
            grid[2],
            self.tile_count(),
            self.tile_shape[0],
            self.tile_shape[1],
            self.tile_shape[2],
            self.directories.len(),
        )
    }
}

/// Global coordinate one stride past the last sample, `None` on overflow
fn axis_end(origin: usize, stride: usize, extent: usize) -> Option<usize> {
    stride.checked_mul(extent)?.checked_add(origin)
}
