use std::path::Path;

use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointFormat {
    Csv,
    GeoJson,
}

impl PointFormat {
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" | "txt" => Some(PointFormat::Csv),
            "json" | "geojson" | "geojsonl" | "ndjson" => Some(PointFormat::GeoJson),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "csv" => Some(PointFormat::Csv),
            "geojson" | "json" => Some(PointFormat::GeoJson),
            _ => None,
        }
    }
}

pub fn decide_point_format(path: Option<&Path>, explicit: Option<&str>) -> Result<PointFormat> {
    if let Some(name) = explicit {
        return PointFormat::from_name(name)
            .ok_or_else(|| anyhow::anyhow!("unknown input format: {name}"));
    }
    Ok(path
        .and_then(PointFormat::from_extension)
        .unwrap_or(PointFormat::Csv))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PyramidSource {
    Records,
    Mbtiles,
}

impl PyramidSource {
    pub fn from_path(path: &Path) -> Self {
        let is_mbtiles = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("mbtiles"));
        if is_mbtiles {
            PyramidSource::Mbtiles
        } else {
            PyramidSource::Records
        }
    }
}
