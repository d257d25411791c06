pub mod csv;
pub mod geojson;

use std::io::BufRead;

use anyhow::Result;
use serde::Serialize;
use tracing::warn;

use crate::format::PointFormat;
use crate::index::MERCATOR_MAX_LAT;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub lon: f64,
    pub lat: f64,
    pub weight: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub points: u64,
    pub skipped: u64,
}

impl IngestStats {
    pub fn merge(&mut self, other: IngestStats) {
        self.points += other.points;
        self.skipped += other.skipped;
    }
}

pub fn normalize_point(point: Point) -> Option<Point> {
    if !point.lon.is_finite() || !point.lat.is_finite() {
        return None;
    }
    if !(-180.0..=180.0).contains(&point.lon) || !(-90.0..=90.0).contains(&point.lat) {
        return None;
    }
    Some(Point {
        lat: point.lat.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT),
        ..point
    })
}

pub(crate) fn deliver<F>(
    point: Point,
    source: &str,
    location: usize,
    stats: &mut IngestStats,
    on_point: &mut F,
) -> Result<()>
where
    F: FnMut(Point) -> Result<()>,
{
    match normalize_point(point) {
        Some(point) => {
            stats.points += 1;
            on_point(point)
        }
        None => {
            warn!(
                "{source}:{location}: coordinates out of range: {},{}",
                point.lon, point.lat
            );
            stats.skipped += 1;
            Ok(())
        }
    }
}

pub fn read_points<R, F>(
    reader: R,
    format: PointFormat,
    source: &str,
    on_point: &mut F,
) -> Result<IngestStats>
where
    R: BufRead,
    F: FnMut(Point) -> Result<()>,
{
    match format {
        PointFormat::Csv => csv::read_csv(reader, source, on_point),
        PointFormat::GeoJson => geojson::read_geojson(reader, source, on_point),
    }
}
