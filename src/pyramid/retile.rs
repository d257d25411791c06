use anyhow::{Context, Result};
use geo_types::{Coord, Geometry, LineString};
use mvt_reader::feature::Value;
use mvt_reader::Reader;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use crate::index::{encode, MAX_ZOOM};
use crate::mbtiles::{max_zoom_level, read_density_scales, read_metadata, read_tiles_at_zoom};
use crate::pyramid::encode::decode_tile_payload;
use crate::pyramid::types::{DENSITY_ATTRIBUTE, LAYER_NAME};
use crate::record::RecordSink;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetileStats {
    pub zoom: u8,
    pub tiles: u64,
    pub features: u64,
    pub cells: u64,
    pub total: u64,
}

pub fn retile_records<S: RecordSink>(conn: &Connection, sink: &mut S) -> Result<RetileStats> {
    let metadata = read_metadata(conn)?;
    if metadata.get("format").is_some_and(|format| format != "pbf") {
        anyhow::bail!("only vector pyramids can be re-tiled");
    }
    let scales = read_density_scales(&metadata)?;
    let Some(zoom) = max_zoom_level(conn)? else {
        warn!("input pyramid has no tiles");
        return Ok(RetileStats::default());
    };

    let mut stats = RetileStats {
        zoom,
        ..RetileStats::default()
    };
    read_tiles_at_zoom(conn, zoom, |coord, data| {
        let payload = decode_tile_payload(&data)?;
        let reader = Reader::new(payload)
            .map_err(|err| anyhow::anyhow!("decode vector tile: {err}"))?;
        let layers = reader
            .get_layer_metadata()
            .map_err(|err| anyhow::anyhow!("read layer metadata: {err}"))?;
        stats.tiles += 1;
        for layer in layers.into_iter().filter(|layer| layer.name == LAYER_NAME) {
            let features = reader
                .get_features(layer.layer_index)
                .map_err(|err| anyhow::anyhow!("read layer features: {err}"))?;
            let extent = layer.extent.max(1) as f64;
            for feature in features {
                let level = feature
                    .properties
                    .as_ref()
                    .and_then(|props| props.get(DENSITY_ATTRIBUTE))
                    .and_then(level_value);
                let Some(level) = level else {
                    warn!(
                        "tile {}/{}/{}: feature without a {DENSITY_ATTRIBUTE} level",
                        coord.zoom, coord.x, coord.y
                    );
                    continue;
                };
                stats.features += 1;
                let count = scales.representative_count(level, zoom) as u64;
                for (px, py) in cell_anchors(feature.get_geometry()) {
                    let x = world_coordinate(coord.x, px as f64, extent, zoom);
                    let y = world_coordinate(coord.y, py as f64, extent, zoom);
                    sink.push_total(encode(x, y), count)?;
                    stats.cells += 1;
                    stats.total += count;
                }
            }
        }
        Ok(())
    })
    .context("failed to read input pyramid")?;

    info!(
        zoom,
        tiles = stats.tiles,
        cells = stats.cells,
        "decoded input pyramid"
    );
    Ok(stats)
}

fn level_value(value: &Value) -> Option<u32> {
    let level = match value {
        Value::UInt(v) => *v as f64,
        Value::Int(v) => *v as f64,
        Value::SInt(v) => *v as f64,
        Value::Float(v) => *v as f64,
        Value::Double(v) => *v,
        _ => return None,
    };
    (level.is_finite() && level >= 0.0).then_some(level as u32)
}

fn ring_corner(ring: &LineString<f32>) -> Option<(f32, f32)> {
    let first = ring.0.first()?;
    Some(ring.0.iter().fold((first.x, first.y), |(x, y), c: &Coord<f32>| {
        (x.min(c.x), y.min(c.y))
    }))
}

fn cell_anchors(geometry: &Geometry<f32>) -> Vec<(f32, f32)> {
    match geometry {
        Geometry::Point(point) => vec![(point.x(), point.y())],
        Geometry::MultiPoint(points) => points.0.iter().map(|p| (p.x(), p.y())).collect(),
        Geometry::Polygon(polygon) => ring_corner(polygon.exterior()).into_iter().collect(),
        Geometry::MultiPolygon(polygons) => polygons
            .0
            .iter()
            .filter_map(|polygon| ring_corner(polygon.exterior()))
            .collect(),
        _ => Vec::new(),
    }
}

fn world_coordinate(tile: u32, offset: f64, extent: f64, zoom: u8) -> u32 {
    let span = (1u64 << (MAX_ZOOM - zoom)) as f64;
    let position = (tile as f64 + (offset / extent).clamp(0.0, 1.0)) * span;
    position.floor().clamp(0.0, u32::MAX as f64) as u32
}
