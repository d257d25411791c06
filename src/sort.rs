use std::ops::Range;
use std::path::Path;

use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::IntegrityError;
use crate::record::{RecordFileMut, INDEX_BYTES, RECORD_BYTES};
use crate::util::{page_size, Progress};

pub const DEFAULT_CHUNK_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct SortOptions {
    pub chunk_bytes: usize,
    pub page_size: usize,
    pub quiet: bool,
}

impl Default for SortOptions {
    fn default() -> Self {
        Self {
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            page_size: page_size(),
            quiet: false,
        }
    }
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 { a } else { gcd(b, a % b) }
}

pub fn chunk_records(options: &SortOptions) -> usize {
    let page = options.page_size.max(1);
    let unit = page / gcd(page, RECORD_BYTES) * RECORD_BYTES;
    let units = options.chunk_bytes.div_ceil(unit).max(1);
    units * unit / RECORD_BYTES
}

fn sort_chunk(chunk: &mut [u8]) {
    let mut records = chunk
        .chunks_exact(RECORD_BYTES)
        .map(|bytes| {
            let mut record = [0u8; RECORD_BYTES];
            record.copy_from_slice(bytes);
            record
        })
        .collect::<Vec<_>>();
    records.sort_by(|a, b| a[..INDEX_BYTES].cmp(&b[..INDEX_BYTES]));
    for (dst, src) in chunk.chunks_exact_mut(RECORD_BYTES).zip(records.iter()) {
        dst.copy_from_slice(src);
    }
}

pub fn sort_runs(
    body: &mut [u8],
    options: &SortOptions,
    pool: &rayon::ThreadPool,
    progress: &Progress,
) -> Result<Vec<Range<usize>>> {
    if body.len() % RECORD_BYTES != 0 {
        return Err(IntegrityError::RaggedBody {
            len: body.len() as u64,
            record_bytes: RECORD_BYTES,
        }
        .into());
    }
    let total = body.len() / RECORD_BYTES;
    let per_chunk = chunk_records(options);
    debug!(records = total, per_chunk, "sorting chunks");

    pool.install(|| {
        body.par_chunks_mut(per_chunk * RECORD_BYTES).for_each(|chunk| {
            sort_chunk(chunk);
            progress.inc((chunk.len() / RECORD_BYTES) as u64);
        })
    });

    Ok((0..total)
        .step_by(per_chunk)
        .map(|start| start..(start + per_chunk).min(total))
        .collect())
}

pub fn sort_file(
    path: &Path,
    options: &SortOptions,
    pool: &rayon::ThreadPool,
) -> Result<Vec<Range<usize>>> {
    let mut file = RecordFileMut::open(path)?;
    let total = (file.body().len() / RECORD_BYTES) as u64;
    let progress = Progress::new("sorting", total, options.quiet);
    let runs = sort_runs(file.body_mut(), options, pool, &progress)
        .with_context(|| format!("failed to sort {}", path.display()))?;
    progress.finish();
    file.flush()?;
    info!(path = %path.display(), records = total, runs = runs.len(), "sorted");
    Ok(runs)
}
