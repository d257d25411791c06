use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use geo_types::{Geometry, LineString, MultiPoint, MultiPolygon, Point, Polygon};
use mvt::{GeomData, GeomEncoder, GeomType};
use tracing::{debug, warn};

use crate::error::IntegrityError;
use crate::pyramid::normalize::DensityScales;
use crate::pyramid::tile::Tile;
use crate::pyramid::types::{
    FeatureGrouping, FeatureShape, PyramidOptions, TileEncoding, DENSITY_ATTRIBUTE, LAYER_NAME,
    VECTOR_EXTENT_BITS,
};

pub const VECTOR_EXTENT: u32 = 1 << VECTOR_EXTENT_BITS;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedTile {
    pub bytes: Vec<u8>,
    pub features: usize,
    pub min_level: u32,
}

pub fn encode_tile(
    tile: &Tile,
    scales: &DensityScales,
    options: &PyramidOptions,
) -> Result<Option<EncodedTile>> {
    let leveled = tile
        .occupied()
        .into_iter()
        .map(|(cell, count)| (cell, scales.level(count, tile.zoom())))
        .collect::<Vec<_>>();

    let mut min_level = options.min_level;
    loop {
        let cells = leveled
            .iter()
            .copied()
            .filter(|&(_, level)| level >= min_level)
            .collect::<Vec<_>>();
        if cells.is_empty() {
            if min_level > options.min_level {
                warn!(
                    "tile {}/{}/{} could not be made small enough and was left empty",
                    tile.zoom(),
                    tile.x(),
                    tile.y()
                );
            }
            return Ok(None);
        }

        let (bytes, features) = match options.encoding {
            TileEncoding::Vector => encode_vector(tile, &cells, options)?,
            TileEncoding::Raster => encode_raster(tile, &cells, options.levels)?,
        };
        if bytes.len() <= options.max_tile_bytes {
            return Ok(Some(EncodedTile {
                bytes,
                features,
                min_level,
            }));
        }
        if !options.incremental_threshold {
            return Err(IntegrityError::TileTooLarge {
                zoom: tile.zoom(),
                x: tile.x(),
                y: tile.y(),
                bytes: bytes.len(),
                limit: options.max_tile_bytes,
            }
            .into());
        }

        let lowest = cells.iter().map(|&(_, level)| level).min().unwrap_or(min_level);
        min_level = lowest + 1;
        debug!(
            zoom = tile.zoom(),
            x = tile.x(),
            y = tile.y(),
            bytes = bytes.len(),
            min_level,
            "tile too big, raising threshold"
        );
    }
}

fn encode_vector(
    tile: &Tile,
    cells: &[(u32, u32)],
    options: &PyramidOptions,
) -> Result<(Vec<u8>, usize)> {
    let size = 1u32 << (VECTOR_EXTENT_BITS - tile.detail());
    let groups: Vec<(u32, Vec<u32>)> = match options.grouping {
        FeatureGrouping::Cells => cells.iter().map(|&(cell, level)| (level, vec![cell])).collect(),
        FeatureGrouping::Buckets => {
            let mut buckets: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
            for &(cell, level) in cells {
                buckets.entry(level).or_default().push(cell);
            }
            buckets.into_iter().collect()
        }
    };

    let mut vector = mvt::Tile::new(VECTOR_EXTENT);
    let mut layer = vector.create_layer(LAYER_NAME);
    let features = groups.len();
    for (level, members) in groups {
        let geometry = cell_geometry(&members, tile.side(), size, options.shape);
        let mut feature = layer.into_feature(encode_geometry(&geometry)?);
        feature.add_tag_uint(DENSITY_ATTRIBUTE, level as u64);
        layer = feature.into_layer();
    }
    vector
        .add_layer(layer)
        .map_err(|err| anyhow::anyhow!("add layer: {err}"))?;
    let raw = vector
        .to_bytes()
        .map_err(|err| anyhow::anyhow!("encode vector tile: {err}"))?;
    Ok((encode_tile_payload(&raw)?, features))
}

fn cell_geometry(cells: &[u32], side: u32, size: u32, shape: FeatureShape) -> Geometry<f32> {
    let corner = |cell: u32| {
        (
            ((cell % side) * size) as f32,
            ((cell / side) * size) as f32,
        )
    };
    match shape {
        FeatureShape::Points => {
            let mut points = cells
                .iter()
                .map(|&cell| {
                    let (x, y) = corner(cell);
                    Point::new(x, y)
                })
                .collect::<Vec<_>>();
            if points.len() == 1 {
                Geometry::Point(points.remove(0))
            } else {
                Geometry::MultiPoint(MultiPoint(points))
            }
        }
        FeatureShape::Polygons => {
            let size = size as f32;
            let mut squares = cells
                .iter()
                .map(|&cell| {
                    let (x, y) = corner(cell);
                    let ring = LineString::from(vec![
                        (x, y),
                        (x + size, y),
                        (x + size, y + size),
                        (x, y + size),
                        (x, y),
                    ]);
                    Polygon::new(ring, Vec::new())
                })
                .collect::<Vec<_>>();
            if squares.len() == 1 {
                Geometry::Polygon(squares.remove(0))
            } else {
                Geometry::MultiPolygon(MultiPolygon(squares))
            }
        }
    }
}

fn encode_ring(encoder: &mut GeomEncoder<f32>, ring: &LineString<f32>) -> Result<()> {
    let coords = ring.0.as_slice();
    let open = if coords.len() > 1 && coords.first() == coords.last() {
        &coords[..coords.len() - 1]
    } else {
        coords
    };
    for coord in open {
        encoder
            .add_point(coord.x, coord.y)
            .map_err(|err| anyhow::anyhow!("encode geometry: {err}"))?;
    }
    Ok(())
}

pub fn encode_geometry(geometry: &Geometry<f32>) -> Result<GeomData> {
    match geometry {
        Geometry::Point(point) => GeomEncoder::new(GeomType::Point)
            .point(point.x(), point.y())
            .and_then(|encoder| encoder.encode())
            .map_err(|err| anyhow::anyhow!("encode geometry: {err}")),
        Geometry::MultiPoint(MultiPoint(points)) => {
            let mut encoder = GeomEncoder::new(GeomType::Point);
            for point in points {
                encoder
                    .add_point(point.x(), point.y())
                    .map_err(|err| anyhow::anyhow!("encode geometry: {err}"))?;
            }
            encoder
                .encode()
                .map_err(|err| anyhow::anyhow!("encode geometry: {err}"))
        }
        Geometry::Polygon(polygon) => encode_polygons(std::slice::from_ref(polygon)),
        Geometry::MultiPolygon(MultiPolygon(polygons)) => encode_polygons(polygons),
        other => anyhow::bail!("cannot encode {other:?} as a density feature"),
    }
}

fn encode_polygons(polygons: &[Polygon<f32>]) -> Result<GeomData> {
    let mut encoder = GeomEncoder::new(GeomType::Polygon);
    let rings = polygons
        .iter()
        .flat_map(|polygon| std::iter::once(polygon.exterior()).chain(polygon.interiors()))
        .collect::<Vec<_>>();
    for (idx, ring) in rings.iter().enumerate() {
        encode_ring(&mut encoder, ring)?;
        if idx + 1 < rings.len() {
            encoder
                .complete_geom()
                .map_err(|err| anyhow::anyhow!("encode geometry: {err}"))?;
        }
    }
    encoder
        .encode()
        .map_err(|err| anyhow::anyhow!("encode geometry: {err}"))
}

fn encode_raster(tile: &Tile, cells: &[(u32, u32)], levels: u32) -> Result<(Vec<u8>, usize)> {
    let side = tile.side();
    let mut pixels = vec![0u8; side as usize * side as usize * 2];
    for &(cell, level) in cells {
        let alpha = (level as u64 + 1) * 255 / levels.max(1) as u64;
        pixels[cell as usize * 2 + 1] = alpha.min(255) as u8;
    }
    let image = image::GrayAlphaImage::from_raw(side, side, pixels)
        .ok_or_else(|| anyhow::anyhow!("raster buffer does not match a {side}x{side} tile"))?;
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .context("encode png tile")?;
    Ok((bytes, cells.len()))
}

pub fn decode_tile_payload(data: &[u8]) -> Result<Vec<u8>> {
    if data.starts_with(&[0x1f, 0x8b]) {
        let mut decoder = GzDecoder::new(data);
        let mut decoded = Vec::new();
        decoder
            .read_to_end(&mut decoded)
            .context("decode gzip tile data")?;
        Ok(decoded)
    } else {
        Ok(data.to_vec())
    }
}

pub fn encode_tile_payload(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).context("encode gzip tile data")?;
    let encoded = encoder.finish().context("finish gzip tile data")?;
    Ok(encoded)
}
