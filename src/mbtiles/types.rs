use anyhow::{Context, Result};
use serde::Serialize;

use crate::pyramid::{DensityScales, DENSITY_ATTRIBUTE, LAYER_NAME};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TileCoord {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn new(zoom: u8, x: u32, y: u32) -> Self {
        Self { zoom, x, y }
    }

    pub fn tms_row(&self) -> u32 {
        ((1u64 << self.zoom) - 1 - self.y as u64) as u32
    }

    pub fn from_tms(zoom: u8, column: u32, row: u32) -> Self {
        let y = ((1u64 << zoom) - 1).saturating_sub(row as u64) as u32;
        Self { zoom, x: column, y }
    }
}

pub fn parse_tile_spec(value: &str) -> Result<TileCoord> {
    let parts: Vec<&str> = value.split('/').collect();
    if parts.len() != 3 {
        anyhow::bail!("tile must be in z/x/y format");
    }
    let zoom = parts[0].parse::<u8>().context("invalid tile zoom")?;
    let x = parts[1].parse::<u32>().context("invalid tile x")?;
    let y = parts[2].parse::<u32>().context("invalid tile y")?;
    if zoom > 32 || (x as u64) >> zoom != 0 || (y as u64) >> zoom != 0 {
        anyhow::bail!("tile {zoom}/{x}/{y} is outside the zoom {zoom} grid");
    }
    Ok(TileCoord { zoom, x, y })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PyramidMetadata {
    pub name: String,
    pub description: String,
    pub format: String,
    pub bounds: Option<[f64; 4]>,
    pub center: Option<(f64, f64)>,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub detail: u8,
    pub scales: DensityScales,
}

impl PyramidMetadata {
    pub fn entries(&self) -> Result<Vec<(String, String)>> {
        let mut rows = vec![
            ("name".to_string(), self.name.clone()),
            ("description".to_string(), self.description.clone()),
            ("format".to_string(), self.format.clone()),
            ("type".to_string(), "overlay".to_string()),
            ("minzoom".to_string(), self.min_zoom.to_string()),
            ("maxzoom".to_string(), self.max_zoom.to_string()),
        ];
        if let Some([west, south, east, north]) = self.bounds {
            rows.push((
                "bounds".to_string(),
                format!("{west:.6},{south:.6},{east:.6},{north:.6}"),
            ));
        }
        if let Some((lon, lat)) = self.center {
            rows.push((
                "center".to_string(),
                format!("{lon:.6},{lat:.6},{}", self.max_zoom),
            ));
        }
        if self.format == "pbf" {
            let layers = serde_json::json!({
                "vector_layers": [{
                    "id": LAYER_NAME,
                    "description": "",
                    "minzoom": self.min_zoom,
                    "maxzoom": self.max_zoom,
                    "fields": { DENSITY_ATTRIBUTE: "Number" },
                }]
            });
            rows.push(("json".to_string(), layers.to_string()));
        }
        rows.push((
            "density_scales".to_string(),
            serde_json::to_string(&self.scales).context("serialize density scales")?,
        ));
        rows.push(("levels".to_string(), self.scales.levels.to_string()));
        rows.push(("gamma".to_string(), self.scales.gamma.to_string()));
        rows.push(("detail".to_string(), self.detail.to_string()));
        Ok(rows)
    }
}
