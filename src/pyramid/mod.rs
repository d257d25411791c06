pub mod encode;
pub mod normalize;
pub mod retile;
pub mod scan;
pub mod stats;
pub mod tile;
pub mod types;

pub use self::encode::{encode_tile, EncodedTile};
pub use self::normalize::DensityScales;
pub use self::retile::{retile_records, RetileStats};
pub use self::scan::{scan_tiles, shard_ranges};
pub use self::stats::{PassStats, PyramidSummary, ZoomReport, ZoomStats};
pub use self::tile::Tile;
pub use self::types::*;

use std::sync::Mutex;

use anyhow::Result;
use tracing::{debug, info};

use crate::mbtiles::{TileCoord, TileSink};
use crate::record::RecordSlice;
use crate::util::Progress;

pub fn gather_statistics(
    records: RecordSlice<'_>,
    options: &PyramidOptions,
    pool: &rayon::ThreadPool,
) -> Result<(PassStats, DensityScales)> {
    options.validate()?;
    let zooms = options.zooms();
    let sketch = options.quantile.is_some();
    let progress = Progress::new("statistics", records.len() as u64, options.quiet);
    let shards = scan_tiles(
        records,
        &zooms,
        options.detail,
        options.workers,
        pool,
        &progress,
        || PassStats::new(options.min_zoom, options.max_zoom),
        |stats, tile| {
            stats.add_tile(tile, sketch);
            Ok(())
        },
    )?;
    progress.finish();

    let mut stats = PassStats::new(options.min_zoom, options.max_zoom);
    for shard in shards {
        stats.merge(shard);
    }
    let maxima = stats
        .zooms
        .iter()
        .map(|zoom| zoom.calibration(options.quantile))
        .collect::<Vec<_>>();
    let scales = DensityScales::fit(options.min_zoom, &maxima, options.levels, options.gamma);
    for (zoom, (raw, scale)) in zooms.iter().zip(maxima.iter().zip(scales.scales.iter())) {
        debug!(zoom, raw = ?raw, scale, "density scale");
    }
    Ok((stats, scales))
}

/// Builds every tile of the pyramid from sorted, aggregated records.
///
/// All writes to `sink` go through one lock; encoding happens outside it.
pub fn build_pyramid(
    records: RecordSlice<'_>,
    sink: &mut (dyn TileSink + Send),
    options: &PyramidOptions,
    pool: &rayon::ThreadPool,
) -> Result<PyramidSummary> {
    let (stats, scales) = gather_statistics(records, options, pool)?;
    info!(
        records = records.len(),
        zooms = stats.zooms.len(),
        "gathered density statistics"
    );

    let zooms = options.zooms();
    let sink = Mutex::new(sink);
    let progress = Progress::new("tiling", records.len() as u64, options.quiet);
    let reports = scan_tiles(
        records,
        &zooms,
        options.detail,
        options.workers,
        pool,
        &progress,
        || vec![ZoomReport::default(); zooms.len()],
        |reports, tile| {
            let Some(encoded) = encode_tile(tile, &scales, options)? else {
                return Ok(());
            };
            {
                let mut sink = sink
                    .lock()
                    .map_err(|_| anyhow::anyhow!("tile writer lock poisoned"))?;
                sink.write_tile(TileCoord::new(tile.zoom(), tile.x(), tile.y()), &encoded.bytes)?;
            }
            reports[(tile.zoom() - options.min_zoom) as usize].record(&encoded, options.min_level);
            Ok(())
        },
    )?;
    progress.finish();

    let mut zoom_reports = zooms
        .iter()
        .zip(stats.zooms.iter())
        .map(|(&zoom, zoom_stats)| ZoomReport {
            zoom,
            cells: zoom_stats.cells,
            max_count: zoom_stats.max,
            scale: scales.scale(zoom),
            ..ZoomReport::default()
        })
        .collect::<Vec<_>>();
    for shard in &reports {
        for (total, part) in zoom_reports.iter_mut().zip(shard) {
            total.merge(part);
        }
    }

    let summary = PyramidSummary {
        records: records.len() as u64,
        tiles: zoom_reports.iter().map(|z| z.tiles).sum(),
        bytes: zoom_reports.iter().map(|z| z.bytes).sum(),
        max_tile_bytes: zoom_reports.iter().map(|z| z.max_bytes).max().unwrap_or(0),
        bounds: stats.extent.lon_lat_bounds(),
        center: stats.extent.center(),
        zooms: zoom_reports,
        scales,
    };
    info!(
        tiles = summary.tiles,
        bytes = summary.bytes,
        max_tile_bytes = summary.max_tile_bytes,
        "built pyramid"
    );
    Ok(summary)
}
