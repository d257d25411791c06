use std::ops::Range;

use anyhow::Result;
use rayon::prelude::*;
use tracing::debug;

use crate::error::IntegrityError;
use crate::merge::heap::merge_runs;
use crate::merge::MergeOptions;
use crate::record::{RecordSlice, RegionWriter, decode_key, RECORD_BYTES};
use crate::util::Progress;

const SAMPLES_PER_RUN: usize = 64;

/// Estimates `parts - 1` interior cut keys that divide the records of all
/// runs into roughly equal shares.
///
/// Cuts are masked keys, so records that aggregate together never straddle a
/// cut. The result is strictly increasing and may be shorter than requested
/// when the data has few distinct keys.
pub fn split_points(runs: &[RecordSlice<'_>], parts: usize, mask: u64) -> Vec<u64> {
    if parts < 2 {
        return Vec::new();
    }
    let mut samples = Vec::new();
    for run in runs.iter().filter(|run| !run.is_empty()) {
        let n = run.len().min(SAMPLES_PER_RUN);
        let stride = run.len() / n;
        let weight = run.len() as f64 / n as f64;
        for i in 0..n {
            samples.push((run.key(i * stride + stride / 2) & mask, weight));
        }
    }
    samples.sort_by(|a, b| a.0.cmp(&b.0));

    let total: f64 = samples.iter().map(|(_, w)| w).sum();
    let mut cuts: Vec<u64> = Vec::with_capacity(parts - 1);
    let mut cumulative = 0.0;
    let mut next = 1;
    for (key, weight) in samples {
        if next >= parts {
            break;
        }
        cumulative += weight;
        if cumulative >= total * next as f64 / parts as f64 {
            if cuts.last().is_none_or(|last| key > *last) && key > 0 {
                cuts.push(key);
            }
            next += 1;
        }
    }
    cuts
}

fn partition_ranges(
    runs: &[RecordSlice<'_>],
    cuts: &[u64],
    mask: u64,
) -> Vec<Vec<Range<usize>>> {
    let bounds = runs
        .iter()
        .map(|run| {
            let mut b = Vec::with_capacity(cuts.len() + 2);
            b.push(0);
            for &cut in cuts {
                let last = b[b.len() - 1];
                b.push(run.lower_bound(cut, mask).max(last));
            }
            b.push(run.len());
            b
        })
        .collect::<Vec<_>>();

    (0..=cuts.len())
        .map(|part| {
            bounds
                .iter()
                .map(|b| b[part]..b[part + 1])
                .collect()
        })
        .collect()
}

/// Merges `runs` into `out`, which must hold at least as many records as the
/// runs together, and returns the number of records written.
///
/// With more than one worker each worker merges one key range of every run
/// into its own region of `out`; the regions are then shifted together in
/// output order.
pub fn merge_parallel(
    runs: &[RecordSlice<'_>],
    out: &mut [u8],
    options: &MergeOptions,
    pool: &rayon::ThreadPool,
    progress: &Progress,
) -> Result<usize> {
    let mask = options.mask();
    let total: usize = runs.iter().map(RecordSlice::len).sum();
    if total * RECORD_BYTES > out.len() {
        anyhow::bail!(
            "merge output of {} bytes cannot hold {} records",
            out.len(),
            total
        );
    }

    if options.workers <= 1 || total < options.min_parallel_records.max(1) {
        let mut writer = RegionWriter::new(out);
        merge_runs(runs, mask, &mut writer, progress)?;
        return Ok(writer.written());
    }

    let cuts = split_points(runs, options.workers, mask);
    let partitions = partition_ranges(runs, &cuts, mask);
    let sizes = partitions
        .iter()
        .map(|ranges| ranges.iter().map(|r| r.len()).sum::<usize>())
        .collect::<Vec<_>>();
    debug!(runs = runs.len(), partitions = partitions.len(), records = total, "parallel merge");

    let mut regions = Vec::with_capacity(partitions.len());
    let mut offsets = Vec::with_capacity(partitions.len());
    let mut rest: &mut [u8] = out;
    let mut offset = 0usize;
    for size in sizes.iter() {
        let (region, tail) = std::mem::take(&mut rest).split_at_mut(size * RECORD_BYTES);
        regions.push(region);
        offsets.push(offset);
        offset += size;
        rest = tail;
    }

    let written = pool.install(|| {
        regions
            .into_par_iter()
            .zip(partitions.par_iter())
            .map(|(region, ranges)| {
                let subruns = runs
                    .iter()
                    .zip(ranges.iter())
                    .map(|(run, range)| run.slice(range.clone()))
                    .collect::<Vec<_>>();
                let mut writer = RegionWriter::new(region);
                merge_runs(&subruns, mask, &mut writer, progress)?;
                Ok(writer.written())
            })
            .collect::<Result<Vec<usize>>>()
    })?;

    let mut dst = 0usize;
    let mut previous_last: Option<u64> = None;
    for (&start, &count) in offsets.iter().zip(written.iter()) {
        if count == 0 {
            continue;
        }
        let src = start * RECORD_BYTES;
        let len = count * RECORD_BYTES;
        out.copy_within(src..src + len, dst);

        let first = decode_key(&out[dst..]) & mask;
        if let Some(previous) = previous_last {
            if first <= previous {
                return Err(IntegrityError::OutOfOrder {
                    previous,
                    found: first,
                }
                .into());
            }
        }
        previous_last = Some(decode_key(&out[dst + len - RECORD_BYTES..]) & mask);
        dst += len;
    }
    Ok(dst / RECORD_BYTES)
}
