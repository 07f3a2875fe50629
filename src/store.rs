//! Volume store - main API for reading and writing tiled volumes

use crate::config::{FailurePolicy, MissingTiles, StoreConfig};
use crate::error::{Result, TileFailure, VolumeError};
use crate::header::HeaderConfig;
use crate::io;
use crate::layout::{TileRef, VolumeLayout};
use crate::scheduler::{JobResult, ParallelIoScheduler};
use crate::tile::{block, block_mut, dims_tuple, TileStore};
use crate::types::{Dims3, GridIndex, Region};
use ndarray::{Array3, ArrayView3};
use parking_lot::FairMutex;
use std::path::Path;
use tracing::{debug, info, warn};

/// One tile's share of an operation
#[derive(Debug, Clone)]
pub struct TileJob {
    pub tile: TileRef,

    /// Requested box of a region write, in volume-local coordinates
    pub sub_region: Option<Region>,
}

impl TileJob {
    fn full(tile: TileRef) -> Self {
        Self {
            tile,
            sub_region: None,
        }
    }

    fn partial(tile: TileRef, sub_region: Region) -> Self {
        Self {
            tile,
            sub_region: Some(sub_region),
        }
    }
}

/// Handle on a tiled volume.
///
/// Public operations block until done and are totally ordered: each one holds
/// a store-wide fair lock for its duration, and fans out over worker threads
/// that live only as long as that operation.
pub struct VolumeStore {
    layout: VolumeLayout,
    tiles: TileStore,
    config: StoreConfig,
    op_lock: FairMutex<()>,
}

impl VolumeStore {
    /// Attach to the tiles of an existing layout. Nothing on disk is touched.
    pub fn open(layout: VolumeLayout, config: StoreConfig) -> Self {
        info!("{}", layout.summary());
        Self {
            tiles: TileStore::new(&layout),
            layout,
            config,
            op_lock: FairMutex::new(()),
        }
    }

    /// Attach to a layout described by a header file
    pub fn open_header(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        let layout = HeaderConfig::from_file(path)?.to_layout()?;
        Ok(Self::open(layout, config))
    }

    /// Start an empty volume: any tile file the layout addresses is deleted
    pub fn create(layout: VolumeLayout, config: StoreConfig) -> Result<Self> {
        let store = Self::open(layout, config);
        store.clean()?;
        Ok(store)
    }

    /// Start a volume holding `data`, which must match the layout's extent
    pub fn create_from_array(
        layout: VolumeLayout,
        config: StoreConfig,
        data: ArrayView3<'_, f32>,
    ) -> Result<Self> {
        let store = Self::create(layout, config)?;
        store.write_whole(data, false)?;
        Ok(store)
    }

    pub fn layout(&self) -> &VolumeLayout {
        &self.layout
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Direct tile access, bypassing the store-wide lock
    pub fn tile_store(&self) -> &TileStore {
        &self.tiles
    }

    /// Switch to a new tile shape or directory list.
    ///
    /// Filenames and tile locks are re-derived. Files written under the old
    /// scheme are left where they are; `purge` removes them.
    pub fn relayout(&mut self, layout: VolumeLayout) {
        info!(
            old = ?self.layout.tile_shape(),
            new = ?layout.tile_shape(),
            directories = layout.directories().len(),
            "re-deriving tile filenames"
        );
        self.tiles = TileStore::new(&layout);
        self.layout = layout;
    }

    fn scheduler(&self) -> ParallelIoScheduler {
        ParallelIoScheduler::for_directories(
            self.layout.directories().len(),
            self.config.workers_per_directory,
        )
    }

    fn read_tile(&self, tile: &TileRef) -> Result<Array3<f32>> {
        match self.config.missing_tiles {
            MissingTiles::Zero => self.tiles.read_or_zero(tile),
            MissingTiles::Error => self.tiles.read_full(tile),
        }
    }

    /// Split job outcomes into successes and failures and apply the failure policy
    fn settle<T>(
        &self,
        operation: &str,
        results: Vec<JobResult<TileJob, T>>,
    ) -> Result<Vec<(TileJob, T)>> {
        let mut done = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for JobResult { job, result, .. } in results {
            match result {
                Ok(value) => done.push((job, value)),
                Err(error) => failures.push(TileFailure {
                    index: job.tile.index,
                    path: job.tile.path,
                    error,
                }),
            }
        }

        if failures.is_empty() {
            return Ok(done);
        }
        match self.config.failure_policy {
            FailurePolicy::Propagate => Err(VolumeError::TileJobs(failures)),
            FailurePolicy::BestEffort => {
                for failure in &failures {
                    warn!(operation, %failure, "skipping failed tile");
                }
                Ok(done)
            }
        }
    }

    fn touched_tiles(&self, region: &Region) -> Result<Vec<TileRef>> {
        self.layout.check_region(region)?;
        let tiles = self.layout.tiles_touching(region);
        if tiles.is_empty() {
            return Err(VolumeError::EmptyProbe(format!(
                "region {} touches no tile",
                region
            )));
        }
        Ok(tiles)
    }

    /// Read the whole volume
    pub fn read_whole(&self) -> Result<Array3<f32>> {
        let _guard = self.op_lock.lock();
        let jobs: Vec<TileJob> = self.layout.tiles().map(TileJob::full).collect();
        let scheduler = self.scheduler();
        info!(
            tiles = jobs.len(),
            workers = scheduler.worker_count(),
            "reading whole volume"
        );

        let results = scheduler.execute(jobs, |job: &TileJob| self.read_tile(&job.tile))?;

        let mut output = Array3::zeros(dims_tuple(self.layout.extent()));
        for (job, data) in self.settle("read_whole", results)? {
            // Padding past the extent stays on disk
            let real = self.layout.tile_data_region(job.tile.index);
            block_mut(&mut output, &real)
                .assign(&block(data.view(), &real.relative_to(job.tile.origin())));
        }
        Ok(output)
    }

    /// Read the box `[origin, origin + shape)` of the volume
    pub fn read_region(&self, origin: Dims3, shape: Dims3) -> Result<Array3<f32>> {
        let region = Region::new(origin, shape);
        let tiles = self.touched_tiles(&region)?;

        let _guard = self.op_lock.lock();
        let bounds = tiles
            .iter()
            .map(|t| t.region)
            .reduce(|a, b| a.union(&b))
            .unwrap_or(region);
        let jobs: Vec<TileJob> = tiles.into_iter().map(TileJob::full).collect();
        let scheduler = self.scheduler();
        info!(
            %region,
            tiles = jobs.len(),
            workers = scheduler.worker_count(),
            "reading region"
        );

        let results = scheduler.execute(jobs, |job: &TileJob| self.read_tile(&job.tile))?;

        let mut scratch = Array3::zeros(dims_tuple(bounds.shape));
        for (job, data) in self.settle("read_region", results)? {
            block_mut(&mut scratch, &job.tile.region.relative_to(bounds.origin)).assign(&data);
        }
        Ok(block(scratch.view(), &region.relative_to(bounds.origin)).to_owned())
    }

    /// Replace the whole volume with `data`, whose shape must equal the extent.
    ///
    /// With `remove_existing`, every currently addressed tile file is deleted first.
    pub fn write_whole(&self, data: ArrayView3<'_, f32>, remove_existing: bool) -> Result<()> {
        let (n1, n2, n3) = data.dim();
        let extent = self.layout.extent();
        if [n1, n2, n3] != extent {
            return Err(VolumeError::DimensionMismatch(format!(
                "data is {:?}, volume is {:?}",
                [n1, n2, n3],
                extent
            )));
        }

        let _guard = self.op_lock.lock();
        if remove_existing {
            self.clean_tiles()?;
        }

        let jobs: Vec<TileJob> = self.layout.tiles().map(TileJob::full).collect();
        let scheduler = self.scheduler();
        info!(
            tiles = jobs.len(),
            workers = scheduler.worker_count(),
            "writing whole volume"
        );

        let tile_shape = self.layout.tile_shape();
        let results = scheduler.execute(jobs, |job: &TileJob| {
            let real = self.layout.tile_data_region(job.tile.index);
            let mut buf = Array3::zeros(dims_tuple(tile_shape));
            block_mut(&mut buf, &real.relative_to(job.tile.origin())).assign(&block(data, &real));
            self.tiles.write_full(&job.tile, buf.view())
        })?;
        self.settle("write_whole", results)?;
        Ok(())
    }

    /// Write `data` into the box starting at `origin`; its shape is the box shape.
    ///
    /// Every touched tile goes through read-modify-write, so samples outside
    /// the box are preserved.
    pub fn write_region(&self, origin: Dims3, data: ArrayView3<'_, f32>) -> Result<()> {
        let (s1, s2, s3) = data.dim();
        let region = Region::new(origin, [s1, s2, s3]);
        let tiles = self.touched_tiles(&region)?;

        let _guard = self.op_lock.lock();
        let jobs: Vec<TileJob> = tiles
            .into_iter()
            .map(|tile| TileJob::partial(tile, region))
            .collect();
        let scheduler = self.scheduler();
        info!(
            %region,
            tiles = jobs.len(),
            workers = scheduler.worker_count(),
            "writing region"
        );

        let results = scheduler.execute(jobs, |job: &TileJob| self.merge_job(job, data))?;
        self.settle("write_region", results)?;
        Ok(())
    }

    fn merge_job(&self, job: &TileJob, data: ArrayView3<'_, f32>) -> Result<()> {
        match &job.sub_region {
            Some(sub_region) => self.tiles.merge_partial(&job.tile, sub_region, data),
            None => Err(VolumeError::DimensionMismatch(format!(
                "region write job for tile {} has no sub-region",
                job.tile.index
            ))),
        }
    }

    /// Read one sample by volume-local index
    pub fn read_sample(&self, local: Dims3) -> Result<f32> {
        let extent = self.layout.extent();
        for axis in 0..3 {
            if local[axis] >= extent[axis] {
                return Err(VolumeError::OutOfRange(format!(
                    "i{} >= n{} ({} >= {})",
                    axis + 1,
                    axis + 1,
                    local[axis],
                    extent[axis]
                )));
            }
        }

        let _guard = self.op_lock.lock();
        let p = self.layout.tile_shape();
        let tile = self.layout.tile(GridIndex::new(
            local[0] / p[0],
            local[1] / p[1],
            local[2] / p[2],
        ));
        match self.tiles.read_sample(&tile, local) {
            Err(e) if e.is_not_found() && self.config.missing_tiles == MissingTiles::Zero => {
                Ok(0.0)
            }
            other => other,
        }
    }

    /// Read one sample by global (physical axis) coordinate
    pub fn read_sample_global(&self, global: Dims3) -> Result<f32> {
        let local = self.layout.global_to_local(global)?;
        self.read_sample(local)
    }

    /// Delete every tile file the current layout addresses. Missing files are
    /// skipped. Returns how many files were removed.
    pub fn clean(&self) -> Result<usize> {
        let _guard = self.op_lock.lock();
        self.clean_tiles()
    }

    fn clean_tiles(&self) -> Result<usize> {
        let mut removed = 0;
        for tile in self.layout.tiles() {
            if self.tiles.remove(&tile)? {
                removed += 1;
            }
        }
        info!(removed, "cleaned tile files");
        Ok(removed)
    }

    /// Delete every regular file in the configured directories, whatever its name
    pub fn purge(&self) -> Result<usize> {
        let _guard = self.op_lock.lock();
        let mut removed = 0;
        for dir in self.layout.directories().distinct() {
            let count = io::remove_all_files(dir)?;
            debug!(dir = %dir.display(), count, "purged directory");
            removed += count;
        }
        info!(removed, "purged storage directories");
        Ok(removed)
    }

    /// Get statistics about the volume
    pub fn stats(&self) -> VolumeStats {
        VolumeStats {
            extent: self.layout.extent(),
            tile_shape: self.layout.tile_shape(),
            tile_grid: self.layout.tile_grid_shape(),
            total_samples: self.layout.total_samples(),
            total_tiles: self.layout.tile_count(),
            directories: self.layout.directories().len(),
            stored_bytes: self.layout.tile_count() * self.layout.tile_size_bytes(),
        }
    }
}

/// Volume statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeStats {
    pub extent: Dims3,
    pub tile_shape: Dims3,
    pub tile_grid: Dims3,
    pub total_samples: usize,
    pub total_tiles: usize,
    pub directories: usize,

    /// Bytes on disk once every tile is written, padding included
    pub stored_bytes: usize,
}

impl VolumeStats {
    pub fn summary(&self) -> String {
        format!(
            "{} x {} x {} volume: {} samples, {} tiles of {} x {} x {} across {} directories, {} on disk",
            self.extent[0],
            self.extent[1],
            self.extent[2],
            self.total_samples,
            self.total_tiles,
            self.tile_shape[0],
            self.tile_shape[1],
            self.tile_shape[2],
            self.directories,
            crate::utils::format_bytes(self.stored_bytes),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::DirectoryRing;
    use tempfile::TempDir;

    fn create_test_store(dir: &TempDir, extent: Dims3, tile_shape: Dims3) -> VolumeStore {
        let layout = VolumeLayout::build(
            [0; 3],
            extent,
            [1; 3],
            tile_shape,
            "vol_",
            ".bin",
            DirectoryRing::new([dir.path().join("a"), dir.path().join("b")]).unwrap(),
        )
        .unwrap();
        VolumeStore::create(layout, StoreConfig::default().with_workers_per_directory(2)).unwrap()
    }

    fn ramp(shape: Dims3) -> Array3<f32> {
        Array3::from_shape_fn(dims_tuple(shape), |(a, b, c)| {
            (a * 10000 + b * 100 + c) as f32
        })
    }

    #[test]
    fn test_read_region_matches_whole() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir, [9, 7, 5], [4, 3, 2]);
        let data = ramp([9, 7, 5]);
        store.write_whole(data.view(), false).unwrap();

        let region = store.read_region([3, 2, 1], [5, 4, 3]).unwrap();
        assert_eq!(region, data.slice(ndarray::s![3..8, 2..6, 1..4]));
    }

    #[test]
    fn test_write_whole_dimension_mismatch() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir, [4, 4, 4], [2, 2, 2]);
        let wrong = Array3::<f32>::zeros((4, 4, 3));
        assert!(matches!(
            store.write_whole(wrong.view(), false),
            Err(VolumeError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_empty_probe() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir, [4, 4, 4], [2, 2, 2]);
        assert!(matches!(
            store.read_region([1, 1, 1], [0, 2, 2]),
            Err(VolumeError::EmptyProbe(_))
        ));
    }

    #[test]
    fn test_write_whole_removes_existing_tiles() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir, [4, 4, 4], [2, 2, 2]);
        let tile = store.layout().tile(GridIndex::new(0, 0, 0));
        std::fs::create_dir_all(dir.path().join("a")).unwrap();

        // A hard link shares the tile's bytes until the tile path is unlinked
        let overwritten = dir.path().join("a").join("overwritten.dat");
        std::fs::write(&overwritten, b"stale").unwrap();
        std::fs::hard_link(&overwritten, &tile.path).unwrap();
        store
            .write_whole(Array3::from_elem((4, 4, 4), 1.0).view(), false)
            .unwrap();
        assert_eq!(std::fs::metadata(&overwritten).unwrap().len(), 32);

        std::fs::remove_file(&tile.path).unwrap();
        let detached = dir.path().join("a").join("detached.dat");
        std::fs::write(&detached, b"stale").unwrap();
        std::fs::hard_link(&detached, &tile.path).unwrap();
        let data = ramp([4, 4, 4]);
        store.write_whole(data.view(), true).unwrap();

        assert_eq!(std::fs::read(&detached).unwrap(), b"stale");
        assert_eq!(std::fs::metadata(&tile.path).unwrap().len(), 32);
        assert_eq!(store.read_whole().unwrap(), data);
        // Files outside the addressed tile paths are untouched
        assert!(overwritten.exists());
    }

    #[test]
    fn test_region_job_without_sub_region_fails() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir, [4, 4, 4], [2, 2, 2]);
        let job = TileJob::full(store.layout().tile(GridIndex::new(0, 0, 0)));
        let data = Array3::<f32>::zeros((1, 1, 1));
        assert!(matches!(
            store.merge_job(&job, data.view()),
            Err(VolumeError::DimensionMismatch(_))
        ));
        assert!(!job.tile.path.exists());
    }

    #[test]
    fn test_overflowing_region_is_out_of_range() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir, [4, 4, 4], [2, 2, 2]);
        assert!(matches!(
            store.read_region([usize::MAX, 0, 0], [2, 1, 1]),
            Err(VolumeError::OutOfRange(_))
        ));
        assert!(matches!(
            store.write_region([0, usize::MAX, 0], Array3::<f32>::zeros((1, 2, 1)).view()),
            Err(VolumeError::OutOfRange(_))
        ));
        assert!(!dir.path().join("a").exists());
        assert!(!dir.path().join("b").exists());
    }

    #[test]
    fn test_missing_tiles_policy() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir, [4, 4, 4], [2, 2, 2]);
        assert_eq!(
            store.read_region([0, 0, 0], [2, 2, 2]).unwrap(),
            Array3::<f32>::zeros((2, 2, 2))
        );
        assert_eq!(store.read_sample([3, 3, 3]).unwrap(), 0.0);

        let strict = VolumeStore::open(
            store.layout().clone(),
            StoreConfig::default().with_missing_tiles(MissingTiles::Error),
        );
        match strict.read_region([0, 0, 0], [3, 2, 2]) {
            Err(VolumeError::TileJobs(failures)) => {
                assert_eq!(failures.len(), 2);
                assert!(failures.iter().all(|f| f.error.is_not_found()));
            }
            other => panic!("expected tile failures, got {:?}", other.map(|a| a.dim())),
        }
    }

    #[test]
    fn test_best_effort_leaves_holes() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir, [4, 4, 4], [2, 2, 2]);
        store
            .write_whole(Array3::from_elem((4, 4, 4), 1.0).view(), false)
            .unwrap();
        let victim = store.layout().tile(GridIndex::new(0, 0, 0));
        std::fs::remove_file(&victim.path).unwrap();

        let lenient = VolumeStore::open(
            store.layout().clone(),
            StoreConfig::default()
                .with_missing_tiles(MissingTiles::Error)
                .with_failure_policy(FailurePolicy::BestEffort),
        );
        let data = lenient.read_whole().unwrap();
        assert_eq!(data[[0, 0, 0]], 0.0);
        assert_eq!(data[[3, 3, 3]], 1.0);
        assert_eq!(data.iter().filter(|&&v| v == 0.0).count(), 8);
    }

    #[test]
    fn test_read_sample_global() {
        let dir = TempDir::new().unwrap();
        let layout = VolumeLayout::build(
            [10, 20, 30],
            [4, 4, 4],
            [2, 2, 2],
            [3, 3, 3],
            "g",
            ".bin",
            DirectoryRing::new([dir.path()]).unwrap(),
        )
        .unwrap();
        let store = VolumeStore::create(layout, StoreConfig::default()).unwrap();
        let data = ramp([4, 4, 4]);
        store.write_whole(data.view(), true).unwrap();

        assert_eq!(store.read_sample_global([14, 22, 36]).unwrap(), data[[2, 1, 3]]);
        assert!(matches!(
            store.read_sample_global([11, 20, 30]),
            Err(VolumeError::NotAligned(_))
        ));
        // Global coordinate one stride past the end maps to local index n
        assert!(matches!(
            store.read_sample_global([18, 20, 30]),
            Err(VolumeError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_clean_and_purge() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir, [4, 4, 4], [2, 2, 2]);
        store
            .write_whole(Array3::from_elem((4, 4, 4), 2.0).view(), false)
            .unwrap();
        std::fs::write(dir.path().join("a").join("stray.dat"), b"x").unwrap();

        assert_eq!(store.clean().unwrap(), 8);
        assert_eq!(store.clean().unwrap(), 0);
        assert!(dir.path().join("a").join("stray.dat").exists());

        assert_eq!(store.purge().unwrap(), 1);
        assert!(!dir.path().join("a").join("stray.dat").exists());
    }

    #[test]
    fn test_relayout_orphans_old_tiles() {
        let dir = TempDir::new().unwrap();
        let mut store = create_test_store(&dir, [4, 4, 4], [2, 2, 2]);
        store
            .write_whole(Array3::from_elem((4, 4, 4), 3.0).view(), false)
            .unwrap();

        let retiled = store
            .layout()
            .with_tile_shape([4, 4, 4])
            .unwrap()
            .with_directories(DirectoryRing::new([dir.path().join("c")]).unwrap());
        store.relayout(retiled);
        assert_eq!(store.tile_store().tile_count(), 1);
        assert_eq!(store.read_whole().unwrap(), Array3::<f32>::zeros((4, 4, 4)));
        assert_eq!(store.clean().unwrap(), 0);

        // Old 2x2x2 tiles are still on disk under the old directories
        let orphans = std::fs::read_dir(dir.path().join("a")).unwrap().count()
            + std::fs::read_dir(dir.path().join("b")).unwrap().count();
        assert_eq!(orphans, 8);

        let sweep = store.layout().with_directories(
            DirectoryRing::new(["a", "b", "c"].map(|d| dir.path().join(d))).unwrap(),
        );
        store.relayout(sweep);
        assert_eq!(store.purge().unwrap(), 8);
    }

    #[test]
    fn test_stats_summary() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir, [5, 4, 4], [2, 2, 2]);
        let stats = store.stats();
        assert_eq!(stats.tile_grid, [3, 2, 2]);
        assert_eq!(stats.total_tiles, 12);
        assert_eq!(stats.stored_bytes, 12 * 32);
        assert!(stats.summary().contains("12 tiles"));
    }
}
