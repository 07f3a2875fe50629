//! Tile files: binary codec, full-tile I/O and partial read-modify-write.
//!
//! A tile file is headerless: exactly `p1 * p2 * p3` little-endian `f32`
//! samples in row-major order (axis 3 fastest). Sample `x` of a tile whose
//! first sample is `t` lives at byte
//! `4 * (((x1 - t1) * p2 + (x2 - t2)) * p3 + (x3 - t3))`.
//!
//! Every operation holds the tile's lock for its whole duration, so a merge's
//! read-then-write window cannot interleave with another access to the same
//! tile through this store.

use crate::error::{Result, VolumeError};
use crate::io;
use crate::layout::{TileRef, VolumeLayout, SAMPLE_BYTES};
use crate::types::{Dims3, Region};
use bytes::{Buf, BufMut, BytesMut};
use ndarray::{s, Array3, ArrayView3, ArrayViewMut3};
use parking_lot::{FairMutex, FairMutexGuard};
use tracing::debug;

/// Reads and writes tile files, one fair lock per tile
pub struct TileStore {
    tile_shape: Dims3,

    /// Indexed by linear grid index
    locks: Vec<FairMutex<()>>,
}

impl TileStore {
    /// Create the lock arena for every tile of a layout
    pub fn new(layout: &VolumeLayout) -> Self {
        let locks = (0..layout.tile_count())
            .map(|_| FairMutex::new(()))
            .collect();
        Self {
            tile_shape: layout.tile_shape(),
            locks,
        }
    }

    pub fn tile_shape(&self) -> Dims3 {
        self.tile_shape
    }

    /// Number of tile locks held
    pub fn tile_count(&self) -> usize {
        self.locks.len()
    }

    fn lock(&self, tile: &TileRef) -> Result<FairMutexGuard<'_, ()>> {
        let lock = self.locks.get(tile.linear).ok_or_else(|| {
            VolumeError::OutOfRange(format!(
                "tile {} (#{}) is not part of this store ({} tiles)",
                tile.index,
                tile.linear,
                self.locks.len()
            ))
        })?;
        Ok(lock.lock())
    }

    /// Read a whole tile. A missing file is an error.
    pub fn read_full(&self, tile: &TileRef) -> Result<Array3<f32>> {
        let _guard = self.lock(tile)?;
        self.read_unlocked(tile)
    }

    /// Read a whole tile, treating a missing file as all zeros
    pub fn read_or_zero(&self, tile: &TileRef) -> Result<Array3<f32>> {
        let _guard = self.lock(tile)?;
        self.read_existing_or_zero(tile)
    }

    /// Overwrite a tile file with `data`, which must be exactly tile-shaped
    pub fn write_full(&self, tile: &TileRef, data: ArrayView3<'_, f32>) -> Result<()> {
        let (p1, p2, p3) = data.dim();
        if [p1, p2, p3] != self.tile_shape {
            return Err(VolumeError::DimensionMismatch(format!(
                "tile data is {:?}, tile shape is {:?}",
                [p1, p2, p3],
                self.tile_shape
            )));
        }
        let _guard = self.lock(tile)?;
        io::write_file(&tile.path, &encode_tile(data))?;
        debug!(tile = %tile.index, path = %tile.path.display(), "wrote tile");
        Ok(())
    }

    /// Apply the part of `source` that falls inside this tile.
    ///
    /// `source` holds the samples of `sub_region` (volume-local coordinates).
    /// Samples of the tile outside `sub_region` keep their stored value, or
    /// zero if the tile file does not exist yet. The whole tile is written back.
    pub fn merge_partial(
        &self,
        tile: &TileRef,
        sub_region: &Region,
        source: ArrayView3<'_, f32>,
    ) -> Result<()> {
        let (s1, s2, s3) = source.dim();
        if [s1, s2, s3] != sub_region.shape {
            return Err(VolumeError::DimensionMismatch(format!(
                "source buffer is {:?}, sub-region is {:?}",
                [s1, s2, s3],
                sub_region.shape
            )));
        }

        let _guard = self.lock(tile)?;
        let mut working = self.read_existing_or_zero(tile)?;

        if let Some(overlap) = tile.region.intersect(sub_region) {
            block_mut(&mut working, &overlap.relative_to(tile.origin()))
                .assign(&block(source, &overlap.relative_to(sub_region.origin)));
        }

        io::write_file(&tile.path, &encode_tile(working.view()))?;
        debug!(tile = %tile.index, region = %sub_region, "merged tile");
        Ok(())
    }

    /// Read a single sample at volume-local coordinate `local`, which must lie in the tile
    pub fn read_sample(&self, tile: &TileRef, local: Dims3) -> Result<f32> {
        if !tile.region.contains(local) {
            return Err(VolumeError::OutOfRange(format!(
                "sample {:?} is outside tile {}",
                local, tile.region
            )));
        }
        let offset = sample_offset(tile.origin(), self.tile_shape, local);
        let mut raw = [0u8; SAMPLE_BYTES];
        let _guard = self.lock(tile)?;
        io::read_exact_at(&tile.path, offset, &mut raw)?;
        Ok(f32::from_le_bytes(raw))
    }

    /// Delete a tile file if present
    pub fn remove(&self, tile: &TileRef) -> Result<bool> {
        let _guard = self.lock(tile)?;
        io::remove_if_exists(&tile.path)
    }

    fn read_unlocked(&self, tile: &TileRef) -> Result<Array3<f32>> {
        let len: usize = self.tile_shape.iter().product();
        let mut raw = vec![0u8; len * SAMPLE_BYTES];
        io::read_exact_at(&tile.path, 0, &mut raw)?;
        decode_tile(&raw, self.tile_shape)
    }

    fn read_existing_or_zero(&self, tile: &TileRef) -> Result<Array3<f32>> {
        match self.read_unlocked(tile) {
            Ok(data) => Ok(data),
            Err(e) if e.is_not_found() => {
                debug!(tile = %tile.index, "tile file absent, using zeros");
                Ok(Array3::zeros(dims_tuple(self.tile_shape)))
            }
            Err(e) => Err(e),
        }
    }
}

/// Byte offset of sample `x` inside the file of the tile starting at `tile_origin`
pub fn sample_offset(tile_origin: Dims3, tile_shape: Dims3, x: Dims3) -> u64 {
    let i = ((x[0] - tile_origin[0]) * tile_shape[1] + (x[1] - tile_origin[1])) * tile_shape[2]
        + (x[2] - tile_origin[2]);
    (i * SAMPLE_BYTES) as u64
}

/// Serialize samples in row-major order as little-endian `f32`
pub fn encode_tile(data: ArrayView3<'_, f32>) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(data.len() * SAMPLE_BYTES);
    for &value in data.iter() {
        buf.put_f32_le(value);
    }
    buf.to_vec()
}

/// Parse a tile file's bytes into a `shape`-sized array
pub fn decode_tile(raw: &[u8], shape: Dims3) -> Result<Array3<f32>> {
    let len: usize = shape.iter().product();
    if raw.len() != len * SAMPLE_BYTES {
        return Err(VolumeError::DimensionMismatch(format!(
            "tile payload is {} bytes, expected {} for shape {:?}",
            raw.len(),
            len * SAMPLE_BYTES,
            shape
        )));
    }
    let mut buf = raw;
    let values: Vec<f32> = (0..len).map(|_| buf.get_f32_le()).collect();
    Array3::from_shape_vec(dims_tuple(shape), values)
        .map_err(|e| VolumeError::DimensionMismatch(e.to_string()))
}

pub(crate) fn dims_tuple(d: Dims3) -> (usize, usize, usize) {
    (d[0], d[1], d[2])
}

/// View of the `r` box of an array
pub(crate) fn block<'a>(a: ArrayView3<'a, f32>, r: &Region) -> ArrayView3<'a, f32> {
    let (o, e) = (r.origin, r.end());
    a.slice_move(s![o[0]..e[0], o[1]..e[1], o[2]..e[2]])
}

/// Mutable view of the `r` box of an array
pub(crate) fn block_mut<'a>(a: &'a mut Array3<f32>, r: &Region) -> ArrayViewMut3<'a, f32> {
    let (o, e) = (r.origin, r.end());
    a.slice_mut(s![o[0]..e[0], o[1]..e[1], o[2]..e[2]])
}
