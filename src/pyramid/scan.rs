use std::collections::BTreeMap;
use std::ops::Range;

use anyhow::Result;
use rayon::prelude::*;
use tracing::debug;

use crate::error::IntegrityError;
use crate::index::zoom_mask;
use crate::pyramid::tile::Tile;
use crate::record::RecordSlice;
use crate::util::Progress;

const PROGRESS_STEP: usize = 1 << 16;

pub fn shard_ranges(len: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.clamp(1, len.max(1));
    (0..parts)
        .map(|i| len * i / parts..len * (i + 1) / parts)
        .collect()
}

/// Cells of a tile that continues into a neighbouring shard.
struct Partial {
    zoom: u8,
    id: u64,
    cells: Vec<(u32, i64)>,
}

/// Aggregates sorted records into tiles at every zoom in `zooms` at once.
///
/// Each worker scans one shard with one grid per zoom and hands every tile
/// it saw completely to `visit` with its own state from `init`. Tiles cut by
/// a shard boundary are summed on the calling thread afterwards and visited
/// with one more fresh state, which is the last element of the result.
#[allow(clippy::too_many_arguments)]
pub fn scan_tiles<S, I, V>(
    records: RecordSlice<'_>,
    zooms: &[u8],
    detail: u8,
    workers: usize,
    pool: &rayon::ThreadPool,
    progress: &Progress,
    init: I,
    visit: V,
) -> Result<Vec<S>>
where
    S: Send,
    I: Fn() -> S + Sync,
    V: Fn(&mut S, &Tile) -> Result<()> + Sync,
{
    let shards = shard_ranges(records.len(), workers);
    let scanned = pool.install(|| {
        shards
            .par_iter()
            .map(|range| scan_shard(records, range.clone(), zooms, detail, progress, &init, &visit))
            .collect::<Result<Vec<_>>>()
    })?;

    let mut states = Vec::with_capacity(scanned.len() + 1);
    let mut pieces: BTreeMap<(u8, u64), Vec<Vec<(u32, i64)>>> = BTreeMap::new();
    for (state, partials) in scanned {
        states.push(state);
        for partial in partials {
            pieces
                .entry((partial.zoom, partial.id))
                .or_default()
                .push(partial.cells);
        }
    }
    debug!(shards = shards.len(), stitched = pieces.len(), "scanned tiles");

    let mut stitched = init();
    let mut tile = Tile::new(detail);
    for ((zoom, id), parts) in pieces {
        tile.reset(zoom, id);
        for cells in parts {
            tile.absorb(&cells);
        }
        visit(&mut stitched, &tile)?;
    }
    states.push(stitched);
    Ok(states)
}

fn scan_shard<S, I, V>(
    records: RecordSlice<'_>,
    range: Range<usize>,
    zooms: &[u8],
    detail: u8,
    progress: &Progress,
    init: &I,
    visit: &V,
) -> Result<(S, Vec<Partial>)>
where
    I: Fn() -> S,
    V: Fn(&mut S, &Tile) -> Result<()>,
{
    let mut state = init();
    let mut partials = Vec::new();
    let before = range.start.checked_sub(1).map(|i| records.key(i));
    let after = (range.end < records.len()).then(|| records.key(range.end));
    let shard = records.slice(range);

    let masks = zooms.iter().map(|&zoom| zoom_mask(zoom)).collect::<Vec<_>>();
    let mut tiles = zooms.iter().map(|_| Tile::new(detail)).collect::<Vec<_>>();
    let mut current: Vec<Option<u64>> = vec![None; zooms.len()];
    let mut previous = before;

    for (i, record) in shard.iter().enumerate() {
        if let Some(previous) = previous {
            if record.key < previous {
                return Err(IntegrityError::OutOfOrder {
                    previous,
                    found: record.key,
                }
                .into());
            }
        }
        previous = Some(record.key);

        for slot in 0..zooms.len() {
            let id = record.key & masks[slot];
            if current[slot] != Some(id) {
                if let Some(done) = current[slot] {
                    flush(&tiles[slot], done, masks[slot], before, after, &mut state, &mut partials, visit)?;
                }
                tiles[slot].reset(zooms[slot], record.key);
                current[slot] = Some(id);
            }
            tiles[slot].add(record.key, record.weight as i64);
        }

        if (i + 1) % PROGRESS_STEP == 0 {
            progress.inc(PROGRESS_STEP as u64);
        }
    }
    progress.inc((shard.len() % PROGRESS_STEP) as u64);

    for slot in 0..zooms.len() {
        if let Some(done) = current[slot] {
            flush(&tiles[slot], done, masks[slot], before, after, &mut state, &mut partials, visit)?;
        }
    }
    Ok((state, partials))
}

#[allow(clippy::too_many_arguments)]
fn flush<S, V>(
    tile: &Tile,
    id: u64,
    mask: u64,
    before: Option<u64>,
    after: Option<u64>,
    state: &mut S,
    partials: &mut Vec<Partial>,
    visit: &V,
) -> Result<()>
where
    V: Fn(&mut S, &Tile) -> Result<()>,
{
    // Sorted input means only the first and last tile of a shard can share
    // keys with the neighbouring shards.
    let shared = before.is_some_and(|key| key & mask == id) || after.is_some_and(|key| key & mask == id);
    if shared {
        partials.push(Partial {
            zoom: tile.zoom(),
            id,
            cells: tile.occupied(),
        });
        Ok(())
    } else {
        visit(state, tile)
    }
}
