use std::cmp::Reverse;
use std::collections::BinaryHeap;

use anyhow::Result;

use crate::error::IntegrityError;
use crate::record::{RecordSink, RecordSlice, MAX_COUNT};
use crate::util::Progress;

const PROGRESS_BATCH: u64 = 1 << 14;

pub fn merge_runs<S: RecordSink>(
    runs: &[RecordSlice<'_>],
    mask: u64,
    sink: &mut S,
    progress: &Progress,
) -> Result<u64> {
    let mut cursors = vec![0usize; runs.len()];
    let mut heap = BinaryHeap::with_capacity(runs.len());
    for (id, run) in runs.iter().enumerate() {
        if !run.is_empty() {
            heap.push(Reverse((run.key(0) & mask, id)));
        }
    }

    let mut current: Option<(u64, u64)> = None;
    let mut consumed = 0u64;
    let mut unreported = 0u64;

    while let Some(Reverse((key, id))) = heap.pop() {
        let weight = runs[id].weight(cursors[id]) as u64;
        match current {
            Some((current_key, ref mut total)) if key == current_key => {
                *total += weight;
                while *total > MAX_COUNT {
                    sink.push(key, MAX_COUNT as u32)?;
                    *total -= MAX_COUNT;
                }
            }
            Some((current_key, _)) if key < current_key => {
                return Err(IntegrityError::OutOfOrder {
                    previous: current_key,
                    found: key,
                }
                .into());
            }
            _ => {
                if let Some((previous, total)) = current.take() {
                    sink.push_total(previous, total)?;
                }
                current = Some((key, weight));
            }
        }

        cursors[id] += 1;
        if cursors[id] < runs[id].len() {
            heap.push(Reverse((runs[id].key(cursors[id]) & mask, id)));
        }

        consumed += 1;
        unreported += 1;
        if unreported == PROGRESS_BATCH {
            progress.inc(unreported);
            unreported = 0;
        }
    }

    if let Some((key, total)) = current {
        sink.push_total(key, total)?;
    }
    progress.inc(unreported);
    Ok(consumed)
}
