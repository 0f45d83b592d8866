//! # Memory-Mapped Database File
//!
//! [`MmapFile`] owns the database file handle and the chain of memory-mapped
//! chunks that cover it. Instead of copying page data between kernel and
//! user space, the file is mapped directly into the process address space
//! and pages are sliced out of the mapping.
//!
//! ## Chunk Chain
//!
//! Remapping an mmap invalidates outstanding pointers, so the mapping is
//! never replaced. Growth appends a new chunk instead:
//!
//! ```text
//! chunk 0: [0, 64 MiB)          mapped at open
//! chunk 1: [64 MiB, 128 MiB)    doubles the covered range
//! chunk 2: [128 MiB, 256 MiB)   doubles again
//! ```
//!
//! Every chunk size is a multiple of the page size, so chunk boundaries are
//! page boundaries and the page lookup can walk the chain in whole pages.
//! The chunks cover address space, not disk: mapping beyond the end of the
//! file is valid as long as only pages inside the allocated file range are
//! touched.
//!
//! ## File Growth
//!
//! The file is grown in 12.5% steps (at least one page) ahead of demand,
//! and the bytes are materialized eagerly so that later page writes through
//! the mapping cannot run out of disk space mid-commit.

use std::fs::{File, OpenOptions};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use memmap2::{MmapMut, MmapOptions};
use tracing::debug;

use crate::config::{INITIAL_MMAP_SIZE, PAGE_SIZE};

#[derive(Debug)]
pub struct MmapFile {
    file: File,
    file_size: u64,
    mmap_size: u64,
    chunks: Vec<MmapMut>,
}

impl MmapFile {
    /// Opens (or creates) the database file and maps its initial chunk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, INITIAL_MMAP_SIZE as u64)
    }

    /// Like [`MmapFile::open`] with a custom initial mapping size; used by
    /// tests to exercise chunk growth without a 64 MiB file.
    pub(crate) fn open_with<P: AsRef<Path>>(path: P, initial_map: u64) -> Result<Self> {
        let path = path.as_ref();
        assert!(initial_map % PAGE_SIZE as u64 == 0, "chunk sizes are page-aligned");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open database file '{}'", path.display()))?;

        let metadata = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?;
        let file_size = metadata.len();

        ensure!(
            file_size % PAGE_SIZE as u64 == 0,
            "database file '{}' size {} is not a multiple of page size {}",
            path.display(),
            file_size,
            PAGE_SIZE
        );

        let mut mmap_size = initial_map;
        while mmap_size < file_size {
            mmap_size *= 2;
        }

        // SAFETY: mapping a file mutably is unsafe because external
        // modification of the file would be undefined behavior. This is safe
        // because:
        // 1. The store is a single-process design; nothing else writes the file
        // 2. The mapping may extend past EOF, but the pager only touches
        //    pages below the allocated file size
        // 3. The chunk's lifetime is tied to MmapFile, preventing
        //    use-after-unmap
        let chunk = unsafe {
            MmapOptions::new()
                .len(mmap_size as usize)
                .map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        debug!(path = %path.display(), file_size, mmap_size, "opened database file");

        Ok(Self {
            file,
            file_size,
            mmap_size,
            chunks: vec![chunk],
        })
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn file_pages(&self) -> u64 {
        self.file_size / PAGE_SIZE as u64
    }

    /// Slices one page out of the mapping.
    pub fn page_at(&self, ptr: u64) -> &[u8] {
        let mut start = 0u64;
        for chunk in &self.chunks {
            let end = start + (chunk.len() / PAGE_SIZE) as u64;
            if ptr < end {
                let offset = ((ptr - start) as usize) * PAGE_SIZE;
                return &chunk[offset..offset + PAGE_SIZE];
            }
            start = end;
        }
        panic!("page pointer {ptr} beyond the mapped region");
    }

    pub fn page_at_mut(&mut self, ptr: u64) -> &mut [u8] {
        let mut start = 0u64;
        for chunk in &mut self.chunks {
            let end = start + (chunk.len() / PAGE_SIZE) as u64;
            if ptr < end {
                let offset = ((ptr - start) as usize) * PAGE_SIZE;
                return &mut chunk[offset..offset + PAGE_SIZE];
            }
            start = end;
        }
        panic!("page pointer {ptr} beyond the mapped region");
    }

    /// Grows the file to hold at least `npages` pages, in 12.5% steps.
    pub fn extend_file(&mut self, npages: u64) -> Result<()> {
        let mut file_pages = self.file_pages();
        if file_pages >= npages {
            return Ok(());
        }

        while file_pages < npages {
            file_pages += (file_pages / 8).max(1);
        }

        let file_size = file_pages * PAGE_SIZE as u64;
        preallocate(&self.file, file_size)
            .wrap_err_with(|| format!("failed to preallocate {file_size} bytes"))?;
        self.file_size = file_size;
        debug!(file_size, "extended database file");
        Ok(())
    }

    /// Ensures the mapping covers at least `npages` pages, doubling the
    /// mapped range with a new chunk when it does not.
    pub fn extend_mmap(&mut self, npages: u64) -> Result<()> {
        while self.mmap_size < npages * PAGE_SIZE as u64 {
            // SAFETY: same contract as the initial mapping in `open_with`;
            // the new chunk covers [mmap_size, 2 * mmap_size), disjoint from
            // every existing chunk, so no aliasing is introduced.
            let chunk = unsafe {
                MmapOptions::new()
                    .offset(self.mmap_size)
                    .len(self.mmap_size as usize)
                    .map_mut(&self.file)
                    .wrap_err("failed to map an additional chunk")?
            };

            self.mmap_size *= 2;
            self.chunks.push(chunk);
            debug!(mmap_size = self.mmap_size, chunks = self.chunks.len(), "extended mapping");
        }
        Ok(())
    }

    /// Flushes file data to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all().wrap_err("fsync failed")
    }
}

fn preallocate(file: &File, size: u64) -> std::io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::io::AsRawFd;
        let rc = unsafe { libc::fallocate(file.as_raw_fd(), 0, 0, size as libc::off_t) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }
    #[cfg(not(target_os = "linux"))]
    {
        file.set_len(size)
    }
}
