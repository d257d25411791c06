pub mod heap;
pub mod parallel;
pub mod storage;

pub use self::heap::merge_runs;
pub use self::parallel::{merge_parallel, split_points};
pub use self::storage::{FileStorage, MemoryStorage, TempBuffer, TempStorage};

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::index::{zoom_mask, MAX_ZOOM};
use crate::record::{
    import_legacy, is_legacy_file, RecordFile, RecordFileMut, RecordSlice, RecordWriter,
    RECORD_BYTES,
};
use crate::sort::{sort_file, SortOptions};
use crate::util::{available_threads, Progress};

pub const DEFAULT_FAN_IN: usize = 50;
pub const DEFAULT_MIN_PARALLEL_RECORDS: usize = 1 << 16;

#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub zoom: u8,
    pub workers: usize,
    pub fan_in: usize,
    pub min_parallel_records: usize,
    pub quiet: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            zoom: MAX_ZOOM,
            workers: available_threads(),
            fan_in: DEFAULT_FAN_IN,
            min_parallel_records: DEFAULT_MIN_PARALLEL_RECORDS,
            quiet: false,
        }
    }
}

impl MergeOptions {
    pub fn mask(&self) -> u64 {
        zoom_mask(self.zoom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub inputs: usize,
    pub runs: usize,
    pub input_records: u64,
    pub output_records: u64,
}

pub fn merge_reduce(
    runs: &[RecordSlice<'_>],
    out: &mut [u8],
    options: &MergeOptions,
    pool: &rayon::ThreadPool,
    storage: &mut dyn TempStorage,
    progress: &Progress,
) -> Result<usize> {
    let fan_in = options.fan_in.max(2);
    if runs.len() <= fan_in {
        return merge_parallel(runs, out, options, pool, progress);
    }

    let mut buffers = Vec::with_capacity(runs.len().div_ceil(fan_in));
    for batch in runs.chunks(fan_in) {
        let len: usize = batch.iter().map(RecordSlice::len).sum();
        let mut buffer = storage.allocate(len * RECORD_BYTES)?;
        let written = merge_parallel(batch, buffer.bytes_mut(), options, pool, &Progress::hidden())?;
        buffer.truncate(written * RECORD_BYTES);
        buffers.push(buffer);
    }
    debug!(runs = runs.len(), intermediates = buffers.len(), "merged a fan-in level");

    let intermediates = buffers
        .iter()
        .map(|buffer| RecordSlice::new(buffer.bytes()))
        .collect::<Result<Vec<_>, _>>()?;
    merge_reduce(&intermediates, out, options, pool, storage, progress)
}

pub fn merge_into_file(
    runs: &[RecordSlice<'_>],
    output: &Path,
    options: &MergeOptions,
    pool: &rayon::ThreadPool,
    storage: &mut dyn TempStorage,
) -> Result<u64> {
    let total: usize = runs.iter().map(RecordSlice::len).sum();
    let mut out = RecordFileMut::create(output, total)?;
    let progress = Progress::new("merging", total as u64, options.quiet);
    let written = merge_reduce(runs, out.body_mut(), options, pool, storage, &progress)
        .with_context(|| format!("failed to merge into {}", output.display()))?;
    progress.finish();
    out.finish(written)?;
    Ok(written as u64)
}

pub(crate) fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

pub fn merge_files(
    inputs: &[PathBuf],
    output: &Path,
    options: &MergeOptions,
    pool: &rayon::ThreadPool,
) -> Result<MergeSummary> {
    if inputs.is_empty() {
        anyhow::bail!("merge needs at least one input file");
    }
    if let Some(input) = inputs.iter().find(|input| same_file(input, output)) {
        anyhow::bail!("output {} is also an input", input.display());
    }

    let scratch_parent = output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut storage = FileStorage::new_in(scratch_parent)?;

    let mut files = Vec::with_capacity(inputs.len());
    let mut file_runs = Vec::with_capacity(inputs.len());
    for (i, input) in inputs.iter().enumerate() {
        if is_legacy_file(input)? {
            let converted = storage.path().join(format!("legacy-{i}.count"));
            let mut writer = RecordWriter::create(&converted)?;
            let imported = import_legacy(input, &mut writer)?;
            writer.finish()?;
            info!(input = %input.display(), records = imported, "imported legacy record file");
            let sort_options = SortOptions {
                quiet: options.quiet,
                ..SortOptions::default()
            };
            let runs = sort_file(&converted, &sort_options, pool)?;
            files.push(RecordFile::open(&converted)?);
            file_runs.push(Some(runs));
        } else {
            files.push(RecordFile::open(input)?);
            file_runs.push(None);
        }
    }

    let mut runs = Vec::new();
    for (file, ranges) in files.iter().zip(file_runs.iter()) {
        let records = file.records();
        match ranges {
            Some(ranges) => runs.extend(ranges.iter().map(|r| records.slice(r.clone()))),
            None => runs.push(records),
        }
    }

    let input_records = runs.iter().map(|r| r.len() as u64).sum();
    let output_records = merge_into_file(&runs, output, options, pool, &mut storage)?;
    info!(
        output = %output.display(),
        input_records,
        output_records,
        "merged"
    );
    Ok(MergeSummary {
        inputs: inputs.len(),
        runs: runs.len(),
        input_records,
        output_records,
    })
}
