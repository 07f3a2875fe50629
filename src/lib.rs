//! tilevol - tiled on-disk storage for large 3D float volumes
//!
//! A volume (for example a seismic cube) is cut into fixed-size tiles. Each
//! tile is one headerless file of little-endian `f32` samples, and tiles are
//! spread round-robin over a list of storage directories so that I/O is
//! shared between disks or mounts.
//!
//! # Features
//!
//! - Whole-volume and sub-region reads and writes
//! - Parallel tile I/O on short-lived worker threads, bounded per directory
//! - One fair lock per tile; partial writes are read-modify-write
//! - Tile failures reported per tile, or skipped under a best-effort policy
//! - Plain-text header files describing a layout
//!
//! # Example
//!
//! ```rust,no_run
//! use ndarray::Array3;
//! use tilevol::{DirectoryRing, StoreConfig, VolumeLayout, VolumeStore};
//!
//! # fn example() -> tilevol::Result<()> {
//! let layout = VolumeLayout::build(
//!     [0, 0, 0],
//!     [256, 256, 512],
//!     [1, 1, 1],
//!     [64, 64, 64],
//!     "cube_",
//!     ".bin",
//!     DirectoryRing::new(["/mnt/disk0", "/mnt/disk1"])?,
//! )?;
//! let store = VolumeStore::create(layout, StoreConfig::default())?;
//!
//! store.write_whole(Array3::zeros((256, 256, 512)).view(), false)?;
//! let slab = store.read_region([10, 20, 0], [1, 100, 512])?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod header;
pub mod ingest;
pub mod io;
pub mod layout;
pub mod ring;
pub mod scheduler;
pub mod store;
pub mod tile;
pub mod types;
pub mod utils;

// Re-exports
pub use config::{FailurePolicy, MissingTiles, StoreConfig};
pub use error::{Result, TileFailure, VolumeError};
pub use header::HeaderConfig;
pub use ingest::{populate_from_traces, TraceSource};
pub use layout::{TileRef, VolumeLayout};
pub use ring::DirectoryRing;
pub use scheduler::ParallelIoScheduler;
pub use store::{VolumeStats, VolumeStore};
pub use tile::TileStore;
pub use types::{Dims3, GridIndex, Region};

/// Version of the tilevol implementation
pub const TILEVOL_VERSION: &str = env!("CARGO_PKG_VERSION");
