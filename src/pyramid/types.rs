use anyhow::Result;
use serde::Serialize;

use crate::index::{unproject, MAX_ZOOM};
use crate::util::available_threads;

pub const DEFAULT_MAX_ZOOM: u8 = 11;
pub const DEFAULT_DETAIL: u8 = 9;
pub const DEFAULT_LEVELS: u32 = 50;
pub const DEFAULT_GAMMA: f64 = 2.5;
pub const DEFAULT_MAX_TILE_BYTES: usize = 500_000;
pub const VECTOR_EXTENT_BITS: u8 = 12;
pub const MAX_RASTER_DETAIL: u8 = 12;
pub const LAYER_NAME: &str = "count";
pub const DENSITY_ATTRIBUTE: &str = "density";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureShape {
    Points,
    Polygons,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TileEncoding {
    Vector,
    Raster,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureGrouping {
    Cells,
    Buckets,
}

#[derive(Debug, Clone)]
pub struct PyramidOptions {
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub detail: u8,
    pub levels: u32,
    pub gamma: f64,
    pub min_level: u32,
    pub max_tile_bytes: usize,
    pub incremental_threshold: bool,
    pub quantile: Option<f64>,
    pub shape: FeatureShape,
    pub encoding: TileEncoding,
    pub grouping: FeatureGrouping,
    pub workers: usize,
    pub quiet: bool,
}

impl Default for PyramidOptions {
    fn default() -> Self {
        Self {
            min_zoom: 0,
            max_zoom: DEFAULT_MAX_ZOOM,
            detail: DEFAULT_DETAIL,
            levels: DEFAULT_LEVELS,
            gamma: DEFAULT_GAMMA,
            min_level: 0,
            max_tile_bytes: DEFAULT_MAX_TILE_BYTES,
            incremental_threshold: false,
            quantile: None,
            shape: FeatureShape::Points,
            encoding: TileEncoding::Vector,
            grouping: FeatureGrouping::Cells,
            workers: available_threads(),
            quiet: false,
        }
    }
}

impl PyramidOptions {
    pub fn validate(&self) -> Result<()> {
        if self.min_zoom > self.max_zoom {
            anyhow::bail!(
                "minimum zoom {} is above maximum zoom {}",
                self.min_zoom,
                self.max_zoom
            );
        }
        if self.max_zoom as u32 + self.detail as u32 > MAX_ZOOM as u32 {
            anyhow::bail!(
                "zoom {} with detail {} exceeds the {}-bit index",
                self.max_zoom,
                self.detail,
                MAX_ZOOM
            );
        }
        if self.encoding == TileEncoding::Vector && self.detail > VECTOR_EXTENT_BITS {
            anyhow::bail!(
                "detail {} is finer than the vector tile extent allows (max {})",
                self.detail,
                VECTOR_EXTENT_BITS
            );
        }
        if self.encoding == TileEncoding::Raster && self.detail > MAX_RASTER_DETAIL {
            anyhow::bail!(
                "detail {} is too large for raster tiles (max {})",
                self.detail,
                MAX_RASTER_DETAIL
            );
        }
        if self.levels == 0 {
            anyhow::bail!("levels must be greater than zero");
        }
        if !(self.gamma.is_finite() && self.gamma > 0.0) {
            anyhow::bail!("gamma must be a positive number");
        }
        if let Some(q) = self.quantile {
            if !(q > 0.0 && q <= 1.0) {
                anyhow::bail!("quantile must be in (0, 1]");
            }
        }
        Ok(())
    }

    pub fn zooms(&self) -> Vec<u8> {
        (self.min_zoom..=self.max_zoom).collect()
    }

    pub fn format_name(&self) -> &'static str {
        match self.encoding {
            TileEncoding::Vector => "pbf",
            TileEncoding::Raster => "png",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Extent {
    pub bounds: Option<(u32, u32, u32, u32)>,
    pub densest: Option<(i64, u32, u32)>,
}

impl Extent {
    pub fn add_cell(&mut self, x: u32, y: u32, size: u64, count: i64) {
        let max_x = (x as u64 + size - 1).min(u32::MAX as u64) as u32;
        let max_y = (y as u64 + size - 1).min(u32::MAX as u64) as u32;
        self.bounds = Some(match self.bounds {
            None => (x, y, max_x, max_y),
            Some((a, b, c, d)) => (a.min(x), b.min(y), c.max(max_x), d.max(max_y)),
        });
        let center_x = (x as u64 + size / 2).min(u32::MAX as u64) as u32;
        let center_y = (y as u64 + size / 2).min(u32::MAX as u64) as u32;
        let denser = match self.densest {
            None => true,
            Some((best, bx, by)) => count > best || (count == best && (center_y, center_x) < (by, bx)),
        };
        if denser {
            self.densest = Some((count, center_x, center_y));
        }
    }

    pub fn merge(&mut self, other: &Extent) {
        if let Some((a, b, c, d)) = other.bounds {
            self.bounds = Some(match self.bounds {
                None => (a, b, c, d),
                Some((w, x, y, z)) => (w.min(a), x.min(b), y.max(c), z.max(d)),
            });
        }
        if let Some((count, x, y)) = other.densest {
            let denser = match self.densest {
                None => true,
                Some((best, bx, by)) => count > best || (count == best && (y, x) < (by, bx)),
            };
            if denser {
                self.densest = Some((count, x, y));
            }
        }
    }

    pub fn lon_lat_bounds(&self) -> Option<[f64; 4]> {
        let (min_x, min_y, max_x, max_y) = self.bounds?;
        let (west, north) = unproject(min_x, min_y, MAX_ZOOM);
        let (east, south) = unproject(max_x, max_y, MAX_ZOOM);
        Some([west, south, east, north])
    }

    pub fn center(&self) -> Option<(f64, f64)> {
        let (_, x, y) = self.densest?;
        Some(unproject(x, y, MAX_ZOOM))
    }
}
