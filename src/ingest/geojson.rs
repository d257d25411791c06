use std::io::BufRead;

use anyhow::Result;
use serde_json::Value;
use tracing::warn;

use crate::ingest::{deliver, IngestStats, Point};

fn coordinate(value: &Value) -> Option<(f64, f64)> {
    let pair = value.as_array()?;
    if pair.len() < 2 {
        return None;
    }
    Some((pair[0].as_f64()?, pair[1].as_f64()?))
}

fn feature_weight(feature: &Value) -> Option<u64> {
    match feature.get("properties").and_then(|p| p.get("count")) {
        None | Some(Value::Null) => Some(1),
        Some(count) => count.as_u64().or_else(|| {
            count
                .as_f64()
                .filter(|c| c.is_finite() && *c >= 0.0)
                .map(|c| c.round() as u64)
        }),
    }
}

pub fn geometry_points(geometry: &Value) -> Result<Vec<(f64, f64)>, String> {
    let kind = geometry
        .get("type")
        .and_then(Value::as_str)
        .ok_or("geometry with no type")?;
    let coordinates = geometry
        .get("coordinates")
        .ok_or("geometry with no coordinates")?;
    match kind {
        "Point" => coordinate(coordinates)
            .map(|c| vec![c])
            .ok_or_else(|| "malformed point coordinates".to_string()),
        "MultiPoint" => coordinates
            .as_array()
            .ok_or("malformed multipoint coordinates")?
            .iter()
            .map(|c| coordinate(c).ok_or_else(|| "malformed multipoint coordinates".to_string()))
            .collect(),
        other => Err(format!("unsupported geometry type {other}")),
    }
}

fn read_feature<F>(
    feature: &Value,
    source: &str,
    index: usize,
    stats: &mut IngestStats,
    on_point: &mut F,
) -> Result<()>
where
    F: FnMut(Point) -> Result<()>,
{
    let Some(geometry) = feature.get("geometry").filter(|g| !g.is_null()) else {
        warn!("{source}: feature {index}: feature with no geometry");
        stats.skipped += 1;
        return Ok(());
    };
    let Some(weight) = feature_weight(feature) else {
        warn!("{source}: feature {index}: count is not a non-negative number");
        stats.skipped += 1;
        return Ok(());
    };
    match geometry_points(geometry) {
        Ok(points) => {
            for (lon, lat) in points {
                deliver(Point { lon, lat, weight }, source, index, stats, on_point)?;
            }
        }
        Err(message) => {
            warn!("{source}: feature {index}: {message}");
            stats.skipped += 1;
        }
    }
    Ok(())
}

pub fn read_geojson<R, F>(reader: R, source: &str, on_point: &mut F) -> Result<IngestStats>
where
    R: BufRead,
    F: FnMut(Point) -> Result<()>,
{
    let mut stats = IngestStats::default();
    let mut index = 0usize;
    let stream = serde_json::Deserializer::from_reader(reader).into_iter::<Value>();
    for value in stream {
        let value = match value {
            Ok(value) => value,
            Err(err) if err.is_io() => {
                return Err(anyhow::Error::new(err).context(format!("failed to read {source}")));
            }
            Err(err) => {
                // Syntax errors leave the stream unrecoverable.
                warn!("{source}:{}: {err}; ignoring the rest of the input", err.line());
                stats.skipped += 1;
                break;
            }
        };
        match value.get("type").and_then(Value::as_str) {
            Some("FeatureCollection") => {
                let features = value
                    .get("features")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                for feature in features {
                    index += 1;
                    read_feature(feature, source, index, &mut stats, on_point)?;
                }
            }
            Some("Feature") => {
                index += 1;
                read_feature(&value, source, index, &mut stats, on_point)?;
            }
            _ => {
                index += 1;
                warn!("{source}: item {index}: not a GeoJSON feature");
                stats.skipped += 1;
            }
        }
    }
    Ok(stats)
}
