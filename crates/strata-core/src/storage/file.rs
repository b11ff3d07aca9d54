use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt as _;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use memmap2::Mmap;
use tracing::debug;

use crate::error::StorageError;
use crate::types::{DATA_START, HEADER_SLOT_SIZE, Ref};

use super::header::FileHeader;
use super::slab::SyncMode;

/// Append-only database file.
///
/// Node images are appended with `pwrite` and read back through a read-only
/// memory map. Committed bytes are never rewritten, so the map stays valid
/// until the next append remaps it. The file is exclusively locked for the
/// lifetime of the manager.
pub struct FileManager {
    file: File,
    mmap: Option<Mmap>,
    header: FileHeader,
    header_slot: u8,
    path: PathBuf,
}

impl FileManager {
    /// Create a new database file at `path`.
    ///
    /// Writes both header slots (identical fresh headers) and fsyncs.
    pub fn create(path: &Path) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        FileExt::try_lock_exclusive(&file).map_err(|_| StorageError::FileLocked)?;

        let header = FileHeader::new();
        let mut buf = [0u8; HEADER_SLOT_SIZE];
        header.write_to_slot(&mut buf);
        file.write_all_at(&buf, 0)?;
        file.write_all_at(&buf, HEADER_SLOT_SIZE as u64)?;
        file.sync_all()?;

        let mut fm = Self {
            file,
            mmap: None,
            header,
            header_slot: 0,
            path: path.to_path_buf(),
        };
        fm.remap()?;
        debug!(path = %path.display(), "created database file");
        Ok(fm)
    }

    /// Open an existing database file at `path`.
    ///
    /// Reads both header slots and selects the current valid one.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        FileExt::try_lock_exclusive(&file).map_err(|_| StorageError::FileLocked)?;

        let mut slot_a = [0u8; HEADER_SLOT_SIZE];
        let mut slot_b = [0u8; HEADER_SLOT_SIZE];
        file.read_exact_at(&mut slot_a, 0)?;
        file.read_exact_at(&mut slot_b, HEADER_SLOT_SIZE as u64)?;
        let (header, header_slot) = FileHeader::select_current(&slot_a, &slot_b)?;

        let file_len = file.metadata()?.len();
        if file_len < header.data_len {
            return Err(StorageError::CorruptedHeader(format!(
                "header claims {} bytes of data, file has {file_len}",
                header.data_len
            )));
        }

        let mut fm = Self {
            file,
            mmap: None,
            header,
            header_slot,
            path: path.to_path_buf(),
        };
        fm.remap()?;
        debug!(
            path = %path.display(),
            commit_counter = fm.header.commit_counter,
            data_len = fm.header.data_len,
            "opened database file"
        );
        Ok(fm)
    }

    fn remap(&mut self) -> Result<(), StorageError> {
        self.mmap = None;
        // SAFETY: committed node bytes are never modified in place. Header
        // slots are rewritten only by `append`, which holds `&mut self`, so
        // no slice handed out by `data()` is alive while the file changes.
        let m = unsafe { Mmap::map(&self.file) }?;
        if (m.len() as u64) < self.header.data_len {
            return Err(StorageError::CorruptedHeader(format!(
                "mapped {} bytes, expected at least {}",
                m.len(),
                self.header.data_len
            )));
        }
        self.mmap = Some(m);
        Ok(())
    }

    /// The committed address space: header slots followed by node data.
    pub fn data(&self) -> &[u8] {
        match &self.mmap {
            Some(m) => &m[..self.header.data_len as usize],
            None => &[],
        }
    }

    /// Append `bytes` after the committed data and publish `top_ref` by
    /// writing the alternate header slot.
    pub fn append(&mut self, bytes: &[u8], top_ref: Ref, sync: SyncMode) -> Result<(), StorageError> {
        let offset = self.header.data_len;
        self.file.write_all_at(bytes, offset)?;
        if sync == SyncMode::Full {
            self.file.sync_data()?;
        }

        let next = FileHeader {
            commit_counter: self.header.commit_counter + 1,
            top_ref,
            data_len: offset + bytes.len() as u64,
        };
        let slot = FileHeader::alternate_slot(self.header_slot);
        let mut buf = [0u8; HEADER_SLOT_SIZE];
        next.write_to_slot(&mut buf);
        self.file
            .write_all_at(&buf, u64::from(slot) * HEADER_SLOT_SIZE as u64)?;
        if sync == SyncMode::Full {
            self.file.sync_all()?;
        }

        self.header = next;
        self.header_slot = slot;
        self.remap()
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Which header slot (0 or 1) holds the current header.
    pub fn header_slot(&self) -> u8 {
        self.header_slot
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for FileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileManager")
            .field("path", &self.path)
            .field("header", &self.header)
            .field("header_slot", &self.header_slot)
            .finish()
    }
}
