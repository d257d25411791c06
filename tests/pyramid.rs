use std::collections::BTreeMap;

use mvt_reader::feature::Value;
use mvt_reader::Reader;
use tile_density::error::IntegrityError;
use tile_density::index::{key_for, project, tile_key_range};
use tile_density::mbtiles::{MemoryTileSink, TileCoord};
use tile_density::pyramid::encode::decode_tile_payload;
use tile_density::pyramid::{
    build_pyramid, encode_tile, gather_statistics, scan_tiles, shard_ranges, DensityScales,
    FeatureGrouping, FeatureShape, PyramidOptions, Tile, TileEncoding, DENSITY_ATTRIBUTE,
    LAYER_NAME, MAX_RASTER_DETAIL,
};
use tile_density::record::{encode_record, RecordSlice};
use tile_density::util::{build_pool, Progress};

type TileCells = BTreeMap<(u8, u32, u32), Vec<(u32, i64)>>;

/// Sorted, aggregated record bytes for pseudo-random points.
fn sample_records(n: usize, seed: u64) -> Vec<u8> {
    let mut state = seed | 1;
    let mut next = || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };
    let mut keys = BTreeMap::<u64, u32>::new();
    for _ in 0..n {
        // Cluster half the points around one city so some cells get dense.
        let (lon, lat) = if next() % 2 == 0 {
            (
                139.7 + (next() % 1000) as f64 / 10_000.0,
                35.6 + (next() % 1000) as f64 / 10_000.0,
            )
        } else {
            (
                (next() % 3_600_000) as f64 / 10_000.0 - 180.0,
                (next() % 1_700_000) as f64 / 10_000.0 - 85.0,
            )
        };
        *keys.entry(key_for(lon, lat, 32)).or_default() += (next() % 5 + 1) as u32;
    }
    keys.into_iter()
        .flat_map(|(key, weight)| encode_record(key, weight))
        .collect()
}

fn scan_cells(records: RecordSlice<'_>, zooms: &[u8], detail: u8, workers: usize) -> TileCells {
    let pool = build_pool(4).expect("pool");
    let states = scan_tiles(
        records,
        zooms,
        detail,
        workers,
        &pool,
        &Progress::hidden(),
        Vec::new,
        |seen: &mut Vec<((u8, u32, u32), Vec<(u32, i64)>)>, tile: &Tile| {
            seen.push(((tile.zoom(), tile.x(), tile.y()), tile.occupied()));
            Ok(())
        },
    )
    .expect("scan");
    let mut tiles = TileCells::new();
    for (address, cells) in states.into_iter().flatten() {
        assert!(
            tiles.insert(address, cells).is_none(),
            "tile {address:?} visited twice"
        );
    }
    tiles
}

fn quiet_options() -> PyramidOptions {
    PyramidOptions {
        min_zoom: 0,
        max_zoom: 4,
        detail: 4,
        workers: 3,
        quiet: true,
        ..PyramidOptions::default()
    }
}

#[test]
fn shards_cover_the_records() {
    assert_eq!(shard_ranges(10, 3), vec![0..3, 3..6, 6..10]);
    assert_eq!(shard_ranges(0, 4), vec![0..0]);
    assert_eq!(shard_ranges(2, 8), vec![0..1, 1..2]);
    assert_eq!(shard_ranges(5, 0), vec![0..5]);
}

#[test]
fn parent_tiles_sum_their_children() {
    let bytes = sample_records(4_000, 11);
    let records = RecordSlice::new(&bytes).expect("slice");
    let total: i64 = records.iter().map(|r| r.weight as i64).sum();
    let zooms = [0u8, 1, 2, 3, 4, 5];
    let tiles = scan_cells(records, &zooms, 3, 5);

    let mut per_tile = BTreeMap::new();
    for (&(zoom, x, y), cells) in &tiles {
        per_tile.insert((zoom, x, y), cells.iter().map(|&(_, c)| c).sum::<i64>());
    }
    for &zoom in &zooms {
        let at_zoom: i64 = per_tile
            .iter()
            .filter(|((z, _, _), _)| *z == zoom)
            .map(|(_, total)| total)
            .sum();
        assert_eq!(at_zoom, total, "zoom {zoom}");
    }
    for (&(zoom, x, y), &parent) in per_tile.iter().filter(|((z, _, _), _)| *z < 5) {
        let children: i64 = [(0, 0), (1, 0), (0, 1), (1, 1)]
            .iter()
            .filter_map(|(dx, dy)| per_tile.get(&(zoom + 1, 2 * x + dx, 2 * y + dy)))
            .sum();
        assert_eq!(parent, children, "tile {zoom}/{x}/{y}");
    }
}

#[test]
fn stitched_tiles_match_a_single_worker_scan() {
    let bytes = sample_records(3_000, 5);
    let records = RecordSlice::new(&bytes).expect("slice");
    let zooms = [0u8, 2, 6];
    let single = scan_cells(records, &zooms, 5, 1);
    for workers in [2, 3, 7, 16] {
        assert_eq!(single, scan_cells(records, &zooms, 5, workers), "{workers} workers");
    }
    assert_eq!(single.keys().filter(|(z, _, _)| *z == 0).count(), 1);
}

#[test]
fn unsorted_records_stop_the_scan() {
    let bytes = [encode_record(5, 1), encode_record(3, 1)].concat();
    let records = RecordSlice::new(&bytes).expect("slice");
    let pool = build_pool(2).expect("pool");
    for workers in [1, 2] {
        let err = scan_tiles(
            records,
            &[0],
            2,
            workers,
            &pool,
            &Progress::hidden(),
            || (),
            |_, _| Ok(()),
        )
        .err()
        .expect("out of order");
        assert_eq!(
            err.downcast_ref::<IntegrityError>(),
            Some(&IntegrityError::OutOfOrder {
                previous: 5,
                found: 3
            })
        );
    }
}

#[test]
fn cells_locate_their_keys() {
    let key = key_for(-73.9857, 40.7484, 32);
    let (x, y) = project(-73.9857, 40.7484, 32);
    let mut tile = Tile::new(6);
    tile.reset(9, key);
    assert_eq!(tile.zoom(), 9);
    let (lo, hi) = tile.key_range();
    assert!(lo <= key && key <= hi);
    assert_eq!(lo, tile.id());

    let cell = tile.cell_of(key);
    let (ox, oy, size) = tile.cell_origin(cell);
    assert_eq!(size, 1 << (32 - 9 - 6));
    assert!(ox <= x && (x as u64) < ox as u64 + size);
    assert!(oy <= y && (y as u64) < oy as u64 + size);

    tile.add(key, 3);
    tile.add(key, 4);
    tile.add_cell(0, 0);
    assert_eq!(tile.occupied(), vec![(cell, 7)]);
    tile.reset(9, key);
    assert!(tile.is_empty());
    assert_eq!(tile.count(cell), 0);
}

#[test]
fn scales_default_to_one_without_data() {
    let scales = DensityScales::fit(0, &[None, None, Some(0.0)], 50, 2.5);
    assert_eq!(scales.scales, vec![1.0, 1.0, 1.0]);
    assert_eq!(scales.level(1, 1), 49);
    assert_eq!(scales.level(0, 1), 0);
}

#[test]
fn a_single_observed_zoom_sets_every_scale() {
    let scales = DensityScales::fit(3, &[None, Some(100.0), None], 50, 2.5);
    assert_eq!(scales.scales, vec![100.0, 100.0, 100.0]);
    assert_eq!(scales.scale(4), 100.0);
    assert_eq!(scales.scale(0), 100.0);
    assert_eq!(scales.scale(20), 100.0);
}

#[test]
fn scales_follow_a_log_linear_fit() {
    let e = std::f64::consts::E;
    let scales = DensityScales::fit(2, &[Some(e), Some(e * e), None, Some(e.powi(4))], 10, 2.0);
    for (i, scale) in scales.scales.iter().enumerate() {
        let expected = e.powi(i as i32 + 1);
        assert!((scale - expected).abs() < 1e-9 * expected, "{i}: {scale} vs {expected}");
    }

    let steep = DensityScales::fit(0, &[Some(1000.0), Some(1.0), None], 10, 2.0);
    assert!((steep.scales[0] - 1000.0).abs() < 1e-6);
    assert_eq!(steep.scales[2], 1.0);
}

#[test]
fn levels_are_bounded_and_monotonic() {
    let scales = DensityScales {
        min_zoom: 0,
        levels: 50,
        gamma: 2.5,
        scales: vec![1_000.0],
    };
    assert_eq!(scales.level(-3, 0), 0);
    assert_eq!(scales.level(1_000, 0), 49);
    assert_eq!(scales.level(1_000_000, 0), 49);
    let mut previous = 0;
    for count in 1..2_000 {
        let level = scales.level(count, 0);
        assert!(level >= previous && level < 50, "count {count}");
        previous = level;
    }
}

#[test]
fn representative_counts_land_in_their_level() {
    let scales = DensityScales {
        min_zoom: 0,
        levels: 50,
        gamma: 2.5,
        scales: vec![1_000_000.0],
    };
    for level in 0..50 {
        assert!(scales.representative_count(level, 0) >= 1);
    }
    for level in 30..50 {
        let count = scales.representative_count(level, 0);
        assert_eq!(scales.level(count, 0), level, "count {count}");
    }
}

fn staircase_tile() -> Tile {
    let (lo, _) = tile_key_range(3, 2, 5);
    let mut tile = Tile::new(4);
    tile.reset(3, lo);
    for cell in 0..200u32 {
        tile.add_cell(cell, cell as i64 + 1);
    }
    tile
}

fn staircase_scales() -> DensityScales {
    DensityScales::fit(3, &[Some(200.0)], 50, 2.5)
}

fn decode_features(bytes: &[u8]) -> Vec<mvt_reader::feature::Feature> {
    let payload = decode_tile_payload(bytes).expect("gunzip");
    let reader = Reader::new(payload).expect("reader");
    assert_eq!(reader.get_layer_names().expect("names"), vec![LAYER_NAME.to_string()]);
    reader.get_features(0).expect("features")
}

fn density_of(feature: &mvt_reader::feature::Feature) -> u64 {
    match feature
        .properties
        .as_ref()
        .and_then(|props| props.get(DENSITY_ATTRIBUTE))
    {
        Some(Value::UInt(level)) => *level,
        other => panic!("unexpected density value {other:?}"),
    }
}

#[test]
fn vector_tiles_carry_one_point_per_cell() {
    let tile = staircase_tile();
    let scales = staircase_scales();
    let options = PyramidOptions {
        detail: 4,
        ..PyramidOptions::default()
    };
    let encoded = encode_tile(&tile, &scales, &options)
        .expect("encode")
        .expect("tile");
    assert_eq!(encoded.features, 200);
    assert_eq!(encoded.min_level, 0);

    let features = decode_features(&encoded.bytes);
    assert_eq!(features.len(), 200);
    for (cell, feature) in features.iter().enumerate() {
        let count = cell as i64 + 1;
        assert_eq!(density_of(feature), scales.level(count, 3) as u64);
        match feature.get_geometry() {
            geo_types::Geometry::Point(point) => {
                assert_eq!(point.x(), ((cell % 16) * 256) as f32);
                assert_eq!(point.y(), ((cell / 16) * 256) as f32);
            }
            other => panic!("expected a point, got {other:?}"),
        }
    }
    assert_eq!(density_of(&features[199]), 49);
}

#[test]
fn bucket_grouping_emits_one_feature_per_level() {
    let tile = staircase_tile();
    let scales = staircase_scales();
    let options = PyramidOptions {
        detail: 4,
        grouping: FeatureGrouping::Buckets,
        shape: FeatureShape::Polygons,
        min_level: 20,
        ..PyramidOptions::default()
    };
    let encoded = encode_tile(&tile, &scales, &options)
        .expect("encode")
        .expect("tile");

    let mut levels = (0..200)
        .map(|cell| scales.level(cell + 1, 3))
        .filter(|&level| level >= 20)
        .collect::<Vec<_>>();
    levels.dedup();
    assert_eq!(encoded.features, levels.len());

    let features = decode_features(&encoded.bytes);
    let decoded = features.iter().map(density_of).collect::<Vec<_>>();
    assert_eq!(decoded, levels.iter().map(|&l| l as u64).collect::<Vec<_>>());
    for feature in &features {
        assert!(matches!(
            feature.get_geometry(),
            geo_types::Geometry::Polygon(_) | geo_types::Geometry::MultiPolygon(_)
        ));
    }
}

#[test]
fn raster_tiles_are_png() {
    let tile = staircase_tile();
    let options = PyramidOptions {
        detail: 4,
        encoding: TileEncoding::Raster,
        ..PyramidOptions::default()
    };
    let encoded = encode_tile(&tile, &staircase_scales(), &options)
        .expect("encode")
        .expect("tile");
    assert!(encoded.bytes.starts_with(&[0x89, b'P', b'N', b'G']));
    assert_eq!(encoded.features, 200);
}

#[test]
fn tiles_below_the_threshold_are_skipped() {
    let mut tile = Tile::new(4);
    tile.reset(3, tile_key_range(3, 1, 1).0);
    tile.add_cell(7, 1);
    let scales = DensityScales::fit(3, &[Some(1_000_000.0)], 50, 2.5);
    let options = PyramidOptions {
        detail: 4,
        min_level: 40,
        ..PyramidOptions::default()
    };
    assert_eq!(encode_tile(&tile, &scales, &options).expect("encode"), None);
}

#[test]
fn oversized_tiles_fail_without_incremental_threshold() {
    let tile = staircase_tile();
    let options = PyramidOptions {
        detail: 4,
        max_tile_bytes: 40,
        ..PyramidOptions::default()
    };
    let err = encode_tile(&tile, &staircase_scales(), &options)
        .err()
        .expect("too large");
    match err.downcast_ref::<IntegrityError>() {
        Some(IntegrityError::TileTooLarge {
            zoom, x, y, limit, ..
        }) => {
            assert_eq!((*zoom, *x, *y, *limit), (3, 2, 5, 40));
        }
        other => panic!("expected tile too large, got {other:?}"),
    }
}

#[test]
fn incremental_threshold_drops_low_levels_until_the_tile_fits() {
    let tile = staircase_tile();
    let scales = staircase_scales();
    let base = PyramidOptions {
        detail: 4,
        ..PyramidOptions::default()
    };
    let full = encode_tile(&tile, &scales, &base)
        .expect("encode")
        .expect("tile");
    let top = encode_tile(
        &tile,
        &scales,
        &PyramidOptions {
            min_level: 49,
            ..base.clone()
        },
    )
    .expect("encode")
    .expect("tile");
    assert!(top.bytes.len() < full.bytes.len());

    let limit = top.bytes.len();
    let options = PyramidOptions {
        max_tile_bytes: limit,
        incremental_threshold: true,
        ..base.clone()
    };
    let fitted = encode_tile(&tile, &scales, &options)
        .expect("encode")
        .expect("tile");
    assert!(fitted.bytes.len() <= limit);
    assert!(fitted.min_level > 0);
    assert!(fitted.features < 200);

    let hopeless = PyramidOptions {
        max_tile_bytes: 1,
        incremental_threshold: true,
        ..base
    };
    assert_eq!(encode_tile(&tile, &scales, &hopeless).expect("encode"), None);
}

#[test]
fn options_are_validated() {
    let ok = quiet_options();
    assert!(ok.validate().is_ok());
    for bad in [
        PyramidOptions {
            min_zoom: 5,
            max_zoom: 4,
            ..ok.clone()
        },
        PyramidOptions {
            max_zoom: 24,
            detail: 9,
            ..ok.clone()
        },
        PyramidOptions {
            detail: 13,
            max_zoom: 4,
            ..ok.clone()
        },
        PyramidOptions {
            levels: 0,
            ..ok.clone()
        },
        PyramidOptions {
            gamma: 0.0,
            ..ok.clone()
        },
        PyramidOptions {
            quantile: Some(1.5),
            ..ok.clone()
        },
    ] {
        assert!(bad.validate().is_err(), "{bad:?}");
    }
    let raster = PyramidOptions {
        detail: MAX_RASTER_DETAIL,
        max_zoom: 4,
        encoding: TileEncoding::Raster,
        ..ok.clone()
    };
    assert!(raster.validate().is_ok());
    let oversized = PyramidOptions {
        detail: 21,
        max_zoom: 11,
        encoding: TileEncoding::Raster,
        ..ok
    };
    assert!(oversized.validate().is_err());
}

#[test]
fn statistics_find_the_densest_cells() {
    let bytes = sample_records(2_000, 3);
    let records = RecordSlice::new(&bytes).expect("slice");
    let total: i64 = records.iter().map(|r| r.weight as i64).sum();
    let pool = build_pool(3).expect("pool");
    let (stats, scales) = gather_statistics(records, &quiet_options(), &pool).expect("stats");

    assert_eq!(stats.zooms.len(), 5);
    assert_eq!(stats.zooms[0].tiles, 1);
    for zoom in &stats.zooms {
        assert_eq!(zoom.total, total);
        assert!(zoom.max >= 1);
    }
    assert!(stats.zooms[0].max >= stats.zooms[4].max);
    assert_eq!(scales.scales.len(), 5);
    assert!(scales.scales.iter().all(|&s| s >= 1.0));

    // Half the points sit near Tokyo, so that is where the densest cell is.
    let (lon, lat) = stats.extent.center().expect("center");
    assert!((lon - 139.7).abs() < 12.0 && (lat - 35.6).abs() < 12.0, "{lon},{lat}");
    let [west, south, east, north] = stats.extent.lon_lat_bounds().expect("bounds");
    assert!(west < east && south < north);

    let quantile = PyramidOptions {
        quantile: Some(0.5),
        ..quiet_options()
    };
    let (median_stats, median_scales) =
        gather_statistics(records, &quantile, &pool).expect("stats");
    assert!(median_stats.zooms.iter().all(|zoom| zoom.sketch.is_some()));
    assert!(median_scales.scales.iter().all(|&s| s >= 1.0));
}

#[test]
fn pyramid_output_does_not_depend_on_worker_count() {
    let bytes = sample_records(3_000, 17);
    let records = RecordSlice::new(&bytes).expect("slice");
    let pool = build_pool(4).expect("pool");

    let mut single = MemoryTileSink::new();
    let summary = build_pyramid(
        records,
        &mut single,
        &PyramidOptions {
            workers: 1,
            ..quiet_options()
        },
        &pool,
    )
    .expect("build");
    let mut parallel = MemoryTileSink::new();
    let parallel_summary = build_pyramid(
        records,
        &mut parallel,
        &PyramidOptions {
            workers: 6,
            ..quiet_options()
        },
        &pool,
    )
    .expect("build");

    assert_eq!(single.tiles, parallel.tiles);
    assert_eq!(summary.tiles, single.tiles.len() as u64);
    assert_eq!(summary.tiles, parallel_summary.tiles);
    assert_eq!(summary.records, records.len() as u64);
    assert!(single.tiles.contains_key(&TileCoord::new(0, 0, 0)));
    assert_eq!(summary.zooms.len(), 5);
    for (zoom, report) in summary.zooms.iter().enumerate() {
        assert_eq!(report.zoom, zoom as u8);
        let written = single.tiles.keys().filter(|c| c.zoom == zoom as u8).count();
        assert_eq!(report.tiles, written as u64);
    }
    assert_eq!(
        summary.bytes,
        single.tiles.values().map(|t| t.len() as u64).sum::<u64>()
    );
}

#[test]
fn empty_input_builds_no_tiles() {
    let pool = build_pool(2).expect("pool");
    let mut sink = MemoryTileSink::new();
    let summary = build_pyramid(RecordSlice::empty(), &mut sink, &quiet_options(), &pool)
        .expect("build");
    assert_eq!(summary.tiles, 0);
    assert!(sink.tiles.is_empty());
    assert_eq!(summary.bounds, None);
    assert_eq!(summary.scales.scales, vec![1.0; 5]);
}
