//! Filesystem directory backend for persistent storage.

use crate::dir::{FileReader, FileWriter, SegmentDirectory};
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Name of the advisory lock file within each directory.
const LOCK_FILE: &str = "LOCK";

/// A filesystem-backed directory.
///
/// Scoped to one OS directory, which it creates if missing. An exclusive
/// advisory lock is acquired at open and held for the lifetime of the value,
/// so only one process can own a segment's directory at a time.
///
/// # Durability
///
/// - `FileWriter::flush` pushes buffered data to the OS
/// - `FileWriter::sync` calls `File::sync_all` to ensure data is on disk
/// - `rename` uses `std::fs::rename`, which atomically replaces the
///   destination on POSIX systems
///
/// # Example
///
/// ```no_run
/// use silt_storage::{SegmentDirectory, FsDirectory};
/// use std::path::Path;
///
/// let dir = FsDirectory::open(Path::new("segments/seg-00000001")).unwrap();
/// let mut writer = dir.create("seg-00000001.main").unwrap();
/// writer.append(b"persistent data").unwrap();
/// writer.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FsDirectory {
    path: PathBuf,
    /// Lock file handle, held for exclusive access.
    _lock_file: File,
}

impl FsDirectory {
    /// Opens or creates a directory at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::DirectoryLocked`] if another process holds the
    /// lock, or an I/O error if the directory cannot be created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        fs::create_dir_all(path)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StorageError::DirectoryLocked)?;

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the root path of this directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn resolve(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

impl SegmentDirectory for FsDirectory {
    fn create(&self, name: &str) -> StorageResult<Box<dyn FileWriter>> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.resolve(name))?;
        Ok(Box::new(FsWriter { file, size: 0 }))
    }

    fn open(&self, name: &str) -> StorageResult<Box<dyn FileReader>> {
        let path = self.resolve(name);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata()?.len();
        Ok(Box::new(FsReader {
            file: Mutex::new(file),
            size,
        }))
    }

    fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        let from_path = self.resolve(from);
        if !from_path.exists() {
            return Err(StorageError::NotFound(from.to_string()));
        }
        fs::rename(from_path, self.resolve(to))?;
        Ok(())
    }

    fn delete(&self, name: &str) -> StorageResult<()> {
        match fs::remove_file(self.resolve(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, name: &str) -> bool {
        self.resolve(name).exists()
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.path().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name != LOCK_FILE {
                names.push(name);
            }
        }
        Ok(names)
    }
}

struct FsReader {
    /// Seek-then-read requires exclusive access to the file handle.
    file: Mutex<File>,
    size: u64,
}

impl FileReader for FsReader {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let end = offset.saturating_add(len as u64);
        if offset > self.size || end > self.size {
            return Err(StorageError::ReadPastEnd {
                offset,
                len,
                size: self.size,
            });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.size)
    }
}

struct FsWriter {
    file: File,
    size: u64,
}

impl FileWriter for FsWriter {
    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.size;
        self.file.write_all(data)?;
        self.size += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.sync_all()?;
        Ok(())
    }
}
