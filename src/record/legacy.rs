use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use memmap2::Mmap;

use crate::error::IntegrityError;
use crate::record::codec::{verify_magic, RecordSink, HEADER_LEN};

//                                                 "0123456789ABCDEF"
pub const LEGACY_MAGIC: &[u8; HEADER_LEN] = b"tile-count ver 1";
pub const LEGACY_RECORD_BYTES: usize = 16;

pub fn is_legacy_file(path: &Path) -> Result<bool> {
    let mut header = [0u8; HEADER_LEN];
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    match std::io::Read::read_exact(&mut file, &mut header) {
        Ok(()) => Ok(&header == LEGACY_MAGIC),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

pub fn import_legacy<S: RecordSink>(path: &Path, sink: &mut S) -> Result<u64> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let len = file
        .metadata()
        .with_context(|| format!("failed to stat {}", path.display()))?
        .len();
    if len < HEADER_LEN as u64 {
        return Err(IntegrityError::ShortFile { len }).context(path.display().to_string());
    }
    let mmap = unsafe { Mmap::map(&file) }
        .with_context(|| format!("failed to map {}", path.display()))?;
    verify_magic(&mmap, LEGACY_MAGIC).with_context(|| path.display().to_string())?;

    let body = &mmap[HEADER_LEN..];
    if body.len() % LEGACY_RECORD_BYTES != 0 {
        return Err(IntegrityError::RaggedBody {
            len: body.len() as u64,
            record_bytes: LEGACY_RECORD_BYTES,
        })
        .context(path.display().to_string());
    }

    let mut count = 0u64;
    for chunk in body.chunks_exact(LEGACY_RECORD_BYTES) {
        let mut key = [0u8; 8];
        let mut total = [0u8; 8];
        key.copy_from_slice(&chunk[..8]);
        total.copy_from_slice(&chunk[8..]);
        sink.push_total(u64::from_be_bytes(key), u64::from_be_bytes(total))?;
        count += 1;
    }
    Ok(count)
}
