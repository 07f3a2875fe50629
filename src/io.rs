//! File system primitives used by tile I/O and cleanup

use crate::error::{Result, VolumeError};
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::debug;

/// Read exactly `buf.len()` bytes of a file, starting at byte `offset`.
///
/// A file shorter than the buffer is an error (`UnexpectedEof`).
pub fn read_exact_at(path: &Path, offset: u64, buf: &mut [u8]) -> Result<()> {
    let mut file = fs::File::open(path).map_err(|e| VolumeError::tile_io(path, e))?;
    if offset > 0 {
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| VolumeError::tile_io(path, e))?;
    }
    file.read_exact(buf)
        .map_err(|e| VolumeError::tile_io(path, e))?;
    Ok(())
}

/// Write data to a path, replacing any existing file
pub fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    // Create parent directories if they don't exist
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| VolumeError::tile_io(parent, e))?;
        }
    }

    let mut file = fs::File::create(path).map_err(|e| VolumeError::tile_io(path, e))?;
    file.write_all(data)
        .map_err(|e| VolumeError::tile_io(path, e))?;
    Ok(())
}

/// Check if a path exists
pub fn exists(path: &Path) -> bool {
    path.is_file()
}

/// Delete a file; a missing file is not an error. Returns whether a file was removed.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed tile file");
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(VolumeError::tile_io(path, e)),
    }
}

/// Delete every regular file directly inside `dir`. A missing directory counts as empty.
pub fn remove_all_files(dir: &Path) -> Result<usize> {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(VolumeError::tile_io(dir, e)),
    };

    let mut removed = 0;
    for entry in read_dir {
        let entry = entry.map_err(|e| VolumeError::tile_io(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| VolumeError::tile_io(&path, e))?;
        if file_type.is_file() && remove_if_exists(&path)? {
            removed += 1;
        }
    }
    Ok(removed)
}

/// Get the size of a file in bytes
pub fn size(path: &Path) -> Result<u64> {
    let metadata = fs::metadata(path).map_err(|e| VolumeError::tile_io(path, e))?;
    Ok(metadata.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_system_io() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("test.dat");

        // Write
        let data = b"Hello, tiles!";
        write_file(&path, data).unwrap();

        // Read
        let mut read_data = vec![0u8; data.len()];
        read_exact_at(&path, 0, &mut read_data).unwrap();
        assert_eq!(&read_data[..], data);

        let mut tail = [0u8; 6];
        read_exact_at(&path, 7, &mut tail).unwrap();
        assert_eq!(&tail, b"tiles!");

        // Exists / size
        assert!(exists(&path));
        assert_eq!(size(&path).unwrap(), data.len() as u64);

        // Delete
        assert!(remove_if_exists(&path).unwrap());
        assert!(!exists(&path));
        assert!(!remove_if_exists(&path).unwrap());
    }

    #[test]
    fn test_short_read_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("short.dat");
        write_file(&path, b"abc").unwrap();

        let mut buf = [0u8; 8];
        let err = read_exact_at(&path, 0, &mut buf).unwrap_err();
        assert!(matches!(err, VolumeError::TileIo { .. }));
    }

    #[test]
    fn test_remove_all_files() {
        let temp_dir = TempDir::new().unwrap();
        write_file(&temp_dir.path().join("a"), b"1").unwrap();
        write_file(&temp_dir.path().join("b"), b"2").unwrap();
        std::fs::create_dir(temp_dir.path().join("sub")).unwrap();

        assert_eq!(remove_all_files(temp_dir.path()).unwrap(), 2);
        assert!(temp_dir.path().join("sub").is_dir());
        assert_eq!(remove_all_files(&temp_dir.path().join("missing")).unwrap(), 0);
    }

    #[test]
    fn test_remove_all_files_reports_path() {
        let temp_dir = TempDir::new().unwrap();
        let not_a_dir = temp_dir.path().join("plain");
        write_file(&not_a_dir, b"x").unwrap();

        match remove_all_files(&not_a_dir) {
            Err(VolumeError::TileIo { path, .. }) => assert_eq!(path, not_a_dir),
            other => panic!("expected a path-tagged error, got {:?}", other),
        }
    }
}
