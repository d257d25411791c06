use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use memmap2::{Mmap, MmapMut};

use crate::error::IntegrityError;
use crate::record::codec::{
    decode_key, decode_record, decode_weight, encode_record, verify_header, write_header, Record,
    RecordSink, HEADER_LEN, RECORD_BYTES,
};

#[derive(Debug, Clone, Copy)]
pub struct RecordSlice<'a> {
    bytes: &'a [u8],
}

impl<'a> RecordSlice<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self, IntegrityError> {
        if bytes.len() % RECORD_BYTES != 0 {
            return Err(IntegrityError::RaggedBody {
                len: bytes.len() as u64,
                record_bytes: RECORD_BYTES,
            });
        }
        Ok(Self { bytes })
    }

    pub fn empty() -> Self {
        Self { bytes: &[] }
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / RECORD_BYTES
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    fn record_bytes(&self, index: usize) -> &'a [u8] {
        let start = index * RECORD_BYTES;
        &self.bytes[start..start + RECORD_BYTES]
    }

    pub fn key(&self, index: usize) -> u64 {
        decode_key(self.record_bytes(index))
    }

    pub fn weight(&self, index: usize) -> u32 {
        decode_weight(self.record_bytes(index))
    }

    pub fn get(&self, index: usize) -> Record {
        decode_record(self.record_bytes(index))
    }

    pub fn slice(&self, range: Range<usize>) -> RecordSlice<'a> {
        assert!(
            range.start <= range.end && range.end <= self.len(),
            "record range {range:?} out of bounds for {} records",
            self.len()
        );
        RecordSlice {
            bytes: &self.bytes[range.start * RECORD_BYTES..range.end * RECORD_BYTES],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Record> + use<'a> {
        self.bytes.chunks_exact(RECORD_BYTES).map(decode_record)
    }

    /// First index whose masked key is not less than `target`.
    ///
    /// Only meaningful on a sorted slice; the result is still deterministic on
    /// an unsorted one, and the merge catches the disorder.
    pub fn lower_bound(&self, target: u64, mask: u64) -> usize {
        let mut lo = 0;
        let mut hi = self.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.key(mid) & mask < target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }
}

fn check_body_len(file_len: u64) -> Result<(), IntegrityError> {
    if file_len < HEADER_LEN as u64 {
        return Err(IntegrityError::ShortFile { len: file_len });
    }
    let body = file_len - HEADER_LEN as u64;
    if body % RECORD_BYTES as u64 != 0 {
        return Err(IntegrityError::RaggedBody {
            len: body,
            record_bytes: RECORD_BYTES,
        });
    }
    Ok(())
}

pub struct RecordFile {
    path: PathBuf,
    mmap: Mmap,
}

impl RecordFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open record file: {}", path.display()))?;
        let len = file
            .metadata()
            .with_context(|| format!("failed to stat record file: {}", path.display()))?
            .len();
        check_body_len(len).with_context(|| path.display().to_string())?;
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("failed to map record file: {}", path.display()))?;
        verify_header(&mmap).with_context(|| path.display().to_string())?;
        Ok(Self {
            path: path.to_path_buf(),
            mmap,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> RecordSlice<'_> {
        RecordSlice {
            bytes: &self.mmap[HEADER_LEN..],
        }
    }
}

pub struct RecordFileMut {
    path: PathBuf,
    file: File,
    mmap: MmapMut,
}

impl RecordFileMut {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("failed to open record file: {}", path.display()))?;
        let len = file
            .metadata()
            .with_context(|| format!("failed to stat record file: {}", path.display()))?
            .len();
        check_body_len(len).with_context(|| path.display().to_string())?;
        let mmap = unsafe { MmapMut::map_mut(&file) }
            .with_context(|| format!("failed to map record file: {}", path.display()))?;
        verify_header(&mmap).with_context(|| path.display().to_string())?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            mmap,
        })
    }

    pub fn create(path: &Path, capacity: usize) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("failed to create record file: {}", path.display()))?;
        write_header(&mut file).context("write record header")?;
        file.set_len((HEADER_LEN + capacity * RECORD_BYTES) as u64)
            .with_context(|| format!("failed to resize record file: {}", path.display()))?;
        let mmap = unsafe { MmapMut::map_mut(&file) }
            .with_context(|| format!("failed to map record file: {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            mmap,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn body(&self) -> &[u8] {
        &self.mmap[HEADER_LEN..]
    }

    pub fn body_mut(&mut self) -> &mut [u8] {
        &mut self.mmap[HEADER_LEN..]
    }

    pub fn flush(&self) -> Result<()> {
        self.mmap
            .flush()
            .with_context(|| format!("failed to flush record file: {}", self.path.display()))
    }

    pub fn finish(self, records: usize) -> Result<()> {
        self.flush()?;
        let Self { path, file, mmap } = self;
        drop(mmap);
        file.set_len((HEADER_LEN + records * RECORD_BYTES) as u64)
            .with_context(|| format!("failed to truncate record file: {}", path.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to sync record file: {}", path.display()))?;
        Ok(())
    }
}

pub struct RecordWriter {
    path: PathBuf,
    out: BufWriter<File>,
    records: u64,
}

impl RecordWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create record file: {}", path.display()))?;
        let mut out = BufWriter::with_capacity(1 << 20, file);
        write_header(&mut out).context("write record header")?;
        Ok(Self {
            path: path.to_path_buf(),
            out,
            records: 0,
        })
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn finish(self) -> Result<u64> {
        let Self { path, out, records } = self;
        let file = out
            .into_inner()
            .map_err(|err| anyhow::anyhow!("flush {}: {}", path.display(), err.error()))?;
        file.sync_all()
            .with_context(|| format!("failed to sync record file: {}", path.display()))?;
        Ok(records)
    }
}

impl RecordSink for RecordWriter {
    fn push(&mut self, key: u64, weight: u32) -> Result<()> {
        self.out
            .write_all(&encode_record(key, weight))
            .with_context(|| format!("failed to write record: {}", self.path.display()))?;
        self.records += 1;
        Ok(())
    }
}

pub struct RegionWriter<'a> {
    out: &'a mut [u8],
    written: usize,
}

impl<'a> RegionWriter<'a> {
    pub fn new(out: &'a mut [u8]) -> Self {
        Self { out, written: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl RecordSink for RegionWriter<'_> {
    fn push(&mut self, key: u64, weight: u32) -> Result<()> {
        let start = self.written * RECORD_BYTES;
        let end = start + RECORD_BYTES;
        if end > self.out.len() {
            anyhow::bail!(
                "merge output region overflow: {} records do not fit in {} bytes",
                self.written + 1,
                self.out.len()
            );
        }
        self.out[start..end].copy_from_slice(&encode_record(key, weight));
        self.written += 1;
        Ok(())
    }
}
