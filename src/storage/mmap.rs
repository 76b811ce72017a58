//! # Growable Memory-Mapped File
//!
//! `GrowableMappedFile` owns one data file, maps it read-write into memory and
//! tracks two sizes:
//!
//! ```text
//! 0                         used                      size
//! +---------------------------+-------------------------+
//! |  meaningful content       |  zero-filled reserve    |
//! +---------------------------+-------------------------+
//! ```
//!
//! - `size`: bytes currently allocated and mapped
//! - `used`: high-water mark of meaningful content, always `<= size`
//!
//! The file starts at one growth increment and grows by whole increments on
//! demand. It never shrinks except through [`GrowableMappedFile::clear`].
//!
//! ## Used-Size Discovery
//!
//! No high-water mark is persisted. On open the used size is recovered by a
//! binary search for the lowest offset where [`BOUNDARY_SENTINEL_LEN`]
//! consecutive zero bytes begin. This is O(log n) and tolerates partially
//! written tails, but it is a heuristic: the structures stored in the file must
//! never contain such a zero run inside their content. The document log pads
//! with spaces for that reason. The hash table does not rely on it and
//! recomputes its used size from the bucket chains.
//!
//! ## Safety Model
//!
//! Growing remaps the file, which invalidates every slice into the old
//! mapping. The borrow checker enforces that no slice outlives a remap:
//!
//! ```text
//! buf(&self) -> &[u8]
//! buf_mut(&mut self) -> &mut [u8]
//! ensure_size(&mut self, ..)     // exclusive borrow, no live slices
//! ```
//!
//! The type does no internal locking. Concurrent writers, or a grower racing
//! readers, must be serialized by the caller.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;
use tracing::{debug, info};

use crate::config::BOUNDARY_SENTINEL_LEN;

#[derive(Debug)]
pub struct GrowableMappedFile {
    path: PathBuf,
    file: File,
    mmap: MmapMut,
    size: u64,
    used: u64,
    growth: u64,
}

impl GrowableMappedFile {
    /// Opens `path`, creating it when absent. Files smaller than one growth
    /// increment are extended to it.
    pub fn open<P: AsRef<Path>>(path: P, growth: u64) -> Result<Self> {
        let path = path.as_ref();

        ensure!(
            growth > 0,
            "growth increment must be positive (opening '{}')",
            path.display()
        );

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .wrap_err_with(|| format!("failed to open data file '{}'", path.display()))?;

        let mut size = file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", path.display()))?
            .len();

        if size < growth {
            file.set_len(growth)
                .wrap_err_with(|| format!("failed to set '{}' to {} bytes", path.display(), growth))?;
            size = growth;
        }

        // SAFETY: the mapping is only reachable through buf()/buf_mut(), whose
        // borrows end before any remap, and data files are not shared with
        // other processes.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        let used = find_used_size(&mmap);
        info!(path = %path.display(), used, size, "opened data file");

        Ok(Self {
            path: path.to_path_buf(),
            file,
            mmap,
            size,
            used,
            growth,
        })
    }

    /// Makes sure `more` bytes fit after the used size, growing the file by
    /// as many increments as needed.
    pub fn ensure_size(&mut self, more: u64) -> Result<()> {
        let needed = self
            .used
            .checked_add(more)
            .ok_or_else(|| eyre::eyre!("requested size overflows u64"))?;
        if needed <= self.size {
            return Ok(());
        }

        let steps = (needed - self.size).div_ceil(self.growth);
        let new_size = self.size + steps * self.growth;

        self.mmap
            .flush()
            .wrap_err("failed to flush mmap before grow")?;

        self.file.set_len(new_size).wrap_err_with(|| {
            format!("failed to extend '{}' to {} bytes", self.path.display(), new_size)
        })?;

        // SAFETY: &mut self guarantees no slice into the old mapping is alive;
        // the old mapping was flushed and is dropped on assignment.
        self.mmap = unsafe {
            MmapMut::map_mut(&self.file).wrap_err_with(|| {
                format!("failed to remap '{}' after grow", self.path.display())
            })?
        };

        info!(
            path = %self.path.display(),
            from = self.size,
            to = new_size,
            used = self.used,
            "grew data file"
        );
        self.size = new_size;
        Ok(())
    }

    /// Truncates the file back to a single growth increment of zeros.
    pub fn clear(&mut self) -> Result<()> {
        self.file
            .set_len(0)
            .wrap_err_with(|| format!("failed to truncate '{}'", self.path.display()))?;
        self.file.set_len(self.growth).wrap_err_with(|| {
            format!("failed to resize '{}' to {} bytes", self.path.display(), self.growth)
        })?;

        // SAFETY: see ensure_size.
        self.mmap = unsafe {
            MmapMut::map_mut(&self.file)
                .wrap_err_with(|| format!("failed to remap '{}' after clear", self.path.display()))?
        };

        self.size = self.growth;
        self.used = 0;
        info!(path = %self.path.display(), size = self.size, "cleared data file");
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.mmap
            .flush()
            .wrap_err_with(|| format!("failed to sync '{}' to disk", self.path.display()))
    }

    /// Flushes, then unmaps and closes the file.
    pub fn close(self) -> Result<()> {
        self.flush()?;
        debug!(path = %self.path.display(), "closed data file");
        Ok(())
    }

    pub fn buf(&self) -> &[u8] {
        &self.mmap
    }

    pub fn buf_mut(&mut self) -> &mut [u8] {
        &mut self.mmap
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn growth(&self) -> u64 {
        self.growth
    }

    pub(crate) fn set_used(&mut self, used: u64) -> Result<()> {
        ensure!(
            used <= self.size,
            "used size {} exceeds allocated size {} of '{}'",
            used,
            self.size,
            self.path.display()
        );
        self.used = used;
        Ok(())
    }
}

fn looks_empty(buf: &[u8], pos: usize) -> bool {
    let end = (pos + BOUNDARY_SENTINEL_LEN).min(buf.len());
    buf[pos..end].iter().all(|&b| b == 0)
}

/// Lowest offset at which a boundary sentinel begins, assuming content never
/// contains one.
fn find_used_size(buf: &[u8]) -> u64 {
    let (mut low, mut high) = (0usize, buf.len());
    while low < high {
        let mid = low + (high - low) / 2;
        if looks_empty(buf, mid) {
            high = mid;
        } else {
            low = mid + 1;
        }
    }
    low as u64
}
