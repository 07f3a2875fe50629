//! Utility functions

use crate::types::Dims3;

/// Format byte size in human-readable form
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// File name of a tile from its local origin
pub fn tile_file_name(prefix: &str, tile_origin: Dims3, suffix: &str) -> String {
    format!(
        "{}{}_{}_{}{}",
        prefix, tile_origin[0], tile_origin[1], tile_origin[2], suffix
    )
}

/// Worker threads per storage directory when none is configured
pub fn parallelism_hint() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}
