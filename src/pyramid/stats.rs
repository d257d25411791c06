use serde::Serialize;

use crate::pyramid::encode::EncodedTile;
use crate::pyramid::normalize::DensityScales;
use crate::pyramid::tile::Tile;
use crate::pyramid::types::Extent;
use crate::sketch::QuantileSketch;

#[derive(Debug, Clone, Default)]
pub struct ZoomStats {
    pub tiles: u64,
    pub cells: u64,
    pub total: i64,
    pub max: i64,
    pub sketch: Option<QuantileSketch<i64>>,
}

impl ZoomStats {
    pub fn add_tile(&mut self, tile: &Tile, sketch: bool) {
        let cells = tile.occupied();
        if cells.is_empty() {
            return;
        }
        self.tiles += 1;
        self.cells += cells.len() as u64;
        for (_, count) in cells {
            self.total += count;
            self.max = self.max.max(count);
            if sketch {
                self.sketch.get_or_insert_with(QuantileSketch::default).update(count);
            }
        }
    }

    pub fn merge(&mut self, other: ZoomStats) {
        self.tiles += other.tiles;
        self.cells += other.cells;
        self.total += other.total;
        self.max = self.max.max(other.max);
        self.sketch = match (self.sketch.take(), other.sketch) {
            (Some(mut mine), Some(theirs)) => {
                mine.merge(&theirs);
                Some(mine)
            }
            (mine, theirs) => mine.or(theirs),
        };
    }

    pub fn calibration(&self, quantile: Option<f64>) -> Option<f64> {
        if self.cells == 0 {
            return None;
        }
        match quantile {
            Some(q) => self
                .sketch
                .as_ref()
                .and_then(|sketch| sketch.quantile(q))
                .map(|count| count as f64),
            None => Some(self.max as f64),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PassStats {
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub zooms: Vec<ZoomStats>,
    pub extent: Extent,
}

impl PassStats {
    pub fn new(min_zoom: u8, max_zoom: u8) -> Self {
        Self {
            min_zoom,
            max_zoom,
            zooms: vec![ZoomStats::default(); (max_zoom - min_zoom) as usize + 1],
            extent: Extent::default(),
        }
    }

    pub fn add_tile(&mut self, tile: &Tile, sketch: bool) {
        let slot = (tile.zoom() - self.min_zoom) as usize;
        self.zooms[slot].add_tile(tile, sketch);
        // The finest zoom gives the tightest bounds.
        if tile.zoom() == self.max_zoom {
            for (cell, count) in tile.occupied() {
                let (x, y, size) = tile.cell_origin(cell);
                self.extent.add_cell(x, y, size, count);
            }
        }
    }

    pub fn merge(&mut self, other: PassStats) {
        for (mine, theirs) in self.zooms.iter_mut().zip(other.zooms) {
            mine.merge(theirs);
        }
        self.extent.merge(&other.extent);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ZoomReport {
    pub zoom: u8,
    pub tiles: u64,
    pub bytes: u64,
    pub max_bytes: u64,
    pub features: u64,
    pub thresholded: u64,
    pub cells: u64,
    pub max_count: i64,
    pub scale: f64,
}

impl ZoomReport {
    pub fn record(&mut self, encoded: &EncodedTile, min_level: u32) {
        self.tiles += 1;
        self.bytes += encoded.bytes.len() as u64;
        self.max_bytes = self.max_bytes.max(encoded.bytes.len() as u64);
        self.features += encoded.features as u64;
        if encoded.min_level > min_level {
            self.thresholded += 1;
        }
    }

    pub fn merge(&mut self, other: &ZoomReport) {
        self.tiles += other.tiles;
        self.bytes += other.bytes;
        self.max_bytes = self.max_bytes.max(other.max_bytes);
        self.features += other.features;
        self.thresholded += other.thresholded;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PyramidSummary {
    pub records: u64,
    pub tiles: u64,
    pub bytes: u64,
    pub max_tile_bytes: u64,
    pub bounds: Option<[f64; 4]>,
    pub center: Option<(f64, f64)>,
    pub zooms: Vec<ZoomReport>,
    pub scales: DensityScales,
}
