use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use memmap2::MmapMut;
use tempfile::TempDir;

pub trait TempBuffer: Send + Sync {
    fn bytes(&self) -> &[u8];
    fn bytes_mut(&mut self) -> &mut [u8];
    fn truncate(&mut self, len: usize);
}

pub trait TempStorage {
    fn allocate(&mut self, len: usize) -> Result<Box<dyn TempBuffer>>;
}

impl TempBuffer for Vec<u8> {
    fn bytes(&self) -> &[u8] {
        self
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self
    }

    fn truncate(&mut self, len: usize) {
        Vec::truncate(self, len);
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    allocations: usize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocations(&self) -> usize {
        self.allocations
    }
}

impl TempStorage for MemoryStorage {
    fn allocate(&mut self, len: usize) -> Result<Box<dyn TempBuffer>> {
        self.allocations += 1;
        Ok(Box::new(vec![0u8; len]))
    }
}

pub struct FileStorage {
    dir: TempDir,
}

impl FileStorage {
    pub fn new_in(parent: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(".tile-density-")
            .tempdir_in(parent)
            .with_context(|| format!("failed to create temp dir in {}", parent.display()))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

struct FileBuffer {
    _file: File,
    mmap: MmapMut,
    len: usize,
}

impl TempBuffer for FileBuffer {
    fn bytes(&self) -> &[u8] {
        &self.mmap[..self.len]
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.mmap[..self.len]
    }

    fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }
}

impl TempStorage for FileStorage {
    fn allocate(&mut self, len: usize) -> Result<Box<dyn TempBuffer>> {
        let file = tempfile::tempfile_in(self.dir.path())
            .with_context(|| format!("failed to create temp file in {}", self.dir.path().display()))?;
        // Zero-length mappings are not portable.
        file.set_len(len.max(1) as u64)
            .context("failed to size temp merge file")?;
        let mmap = unsafe { MmapMut::map_mut(&file) }.context("failed to map temp merge file")?;
        Ok(Box::new(FileBuffer {
            _file: file,
            mmap,
            len,
        }))
    }
}
