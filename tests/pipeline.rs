use std::path::{Path, PathBuf};

use mvt_reader::Reader;
use rusqlite::Connection;
use tile_density::mbtiles::{read_density_scales, read_metadata, TileCoord};
use tile_density::merge::MergeOptions;
use tile_density::output::{ndjson_lines, text_lines};
use tile_density::error::IntegrityError;
use tile_density::pipeline::{
    build_tiles, create_index, decode_records, normalize_records, BuildReport, CreateOptions,
    TileOptions,
};
use tile_density::pyramid::encode::decode_tile_payload;
use tile_density::pyramid::{PyramidOptions, TileEncoding, LAYER_NAME};
use tile_density::record::{Record, RecordFile, RecordSink, RecordWriter};
use tile_density::sort::SortOptions;
use tile_density::util::build_pool;

const POINTS: &str = "\
# lon,lat,count
139.767,35.681,3
139.768,35.682
139.700,35.690,2
-73.9857,40.7484,5
2.2945,48.8584
0,0,2
not,a,point
200,10,1
";

fn quiet_sort() -> SortOptions {
    SortOptions {
        quiet: true,
        ..SortOptions::default()
    }
}

fn quiet_merge() -> MergeOptions {
    MergeOptions {
        workers: 2,
        quiet: true,
        ..MergeOptions::default()
    }
}

fn create_sample_index(dir: &Path) -> PathBuf {
    let csv = dir.join("points.csv");
    std::fs::write(&csv, POINTS).expect("write points");
    let index = dir.join("points.count");
    let pool = build_pool(2).expect("pool");
    let options = CreateOptions {
        sort: quiet_sort(),
        merge: quiet_merge(),
        ..CreateOptions::default()
    };
    let summary = create_index(&[csv], &index, &options, &pool).expect("create");
    assert_eq!(summary.points, 6);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.records, 6);
    index
}

fn tile_options() -> TileOptions {
    TileOptions {
        pyramid: PyramidOptions {
            max_zoom: 4,
            detail: 6,
            workers: 2,
            quiet: true,
            ..PyramidOptions::default()
        },
        sort: quiet_sort(),
        merge: quiet_merge(),
        ..TileOptions::default()
    }
}

fn build(input: &Path, output: &Path, options: &TileOptions) -> BuildReport {
    let pool = build_pool(2).expect("pool");
    build_tiles(input, output, options, &pool).expect("build tiles")
}

fn tile_rows(path: &Path) -> Vec<(u8, u32, u32, Vec<u8>)> {
    let conn = Connection::open(path).expect("open");
    let mut stmt = conn
        .prepare("SELECT zoom_level, tile_column, tile_row, tile_data FROM tiles ORDER BY 1, 2, 3")
        .expect("prepare");
    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))
        .expect("query")
        .collect::<Result<Vec<_>, _>>()
        .expect("rows")
}

#[test]
fn tiles_are_written_with_metadata() {
    let dir = tempfile::tempdir().expect("tempdir");
    let index = create_sample_index(dir.path());
    let output = dir.path().join("density.mbtiles");
    let report = build(&index, &output, &tile_options());

    let summary = &report.summary;
    assert_eq!(summary.records, 6);
    assert_eq!(summary.zooms.len(), 5);
    assert_eq!(summary.zooms[0].tiles, 1);
    let [west, south, east, north] = summary.bounds.expect("bounds");
    assert!(west <= -73.98 && east >= 139.76, "{west} {east}");
    assert!(south <= 0.0 && north >= 48.85, "{south} {north}");

    let conn = Connection::open(&output).expect("open");
    let metadata = read_metadata(&conn).expect("metadata");
    assert_eq!(metadata.get("name").map(String::as_str), Some("density"));
    assert_eq!(metadata.get("format").map(String::as_str), Some("pbf"));
    assert_eq!(metadata.get("minzoom").map(String::as_str), Some("0"));
    assert_eq!(metadata.get("maxzoom").map(String::as_str), Some("4"));
    assert_eq!(metadata.get("levels").map(String::as_str), Some("50"));
    assert!(metadata.get("json").expect("json").contains(LAYER_NAME));
    let scales = read_density_scales(&metadata).expect("scales");
    assert_eq!(scales, summary.scales);

    let rows = tile_rows(&output);
    assert_eq!(rows.len() as u64, summary.tiles);
    // Tokyo is XYZ tile 4/14/6, stored bottom-up as row 9.
    let (_, _, _, data) = rows
        .iter()
        .find(|(z, x, row, _)| (*z, *x, *row) == (4, 14, 9))
        .expect("tokyo tile");
    let reader = Reader::new(decode_tile_payload(data).expect("gunzip")).expect("reader");
    assert_eq!(reader.get_layer_names().expect("names"), vec![LAYER_NAME.to_string()]);
    // The three Tokyo points fall into two cells at this detail.
    let features = reader.get_features(0).expect("features");
    assert!(!features.is_empty() && features.len() <= 3, "{}", features.len());

    let lines = ndjson_lines(&report).expect("ndjson");
    assert!(lines[0].contains("\"type\":\"summary\""));
    assert!(lines.last().expect("last").contains("\"type\":\"density_scales\""));
    assert_eq!(lines.len(), 1 + 5 + 1);
    let text = text_lines(&report);
    assert!(text[0].starts_with("tiles: "));
    assert!(text.iter().any(|line| line.starts_with("z=4: ")));
}

#[test]
fn existing_output_needs_force() {
    let dir = tempfile::tempdir().expect("tempdir");
    let index = create_sample_index(dir.path());
    let output = dir.path().join("density.mbtiles");
    build(&index, &output, &tile_options());

    let pool = build_pool(2).expect("pool");
    assert!(build_tiles(&index, &output, &tile_options(), &pool).is_err());

    let forced = TileOptions {
        force: true,
        name: Some("points".to_string()),
        ..tile_options()
    };
    build(&index, &output, &forced);
    let conn = Connection::open(&output).expect("open");
    let metadata = read_metadata(&conn).expect("metadata");
    assert_eq!(metadata.get("name").map(String::as_str), Some("points"));
    assert_eq!(metadata.get("description").map(String::as_str), Some("points"));
}

#[test]
fn pyramid_can_be_retiled() {
    let dir = tempfile::tempdir().expect("tempdir");
    let index = create_sample_index(dir.path());
    let first = dir.path().join("first.mbtiles");
    let first_report = build(&index, &first, &tile_options());

    let second = dir.path().join("second.mbtiles");
    let report = build(&first, &second, &tile_options());
    let retiled = report.retiled.expect("retiled");
    assert_eq!(retiled.zoom, 4);
    assert_eq!(retiled.tiles, first_report.summary.zooms[4].tiles);
    assert!(retiled.cells >= 4);
    assert!(retiled.total >= retiled.cells);

    let rows = tile_rows(&second);
    assert!(rows.iter().any(|(z, _, _, _)| *z == 0));
    let first_tiles = tile_rows(&first)
        .into_iter()
        .map(|(z, x, y, _)| (z, x, y))
        .collect::<Vec<_>>();
    let second_tiles = rows.into_iter().map(|(z, x, y, _)| (z, x, y)).collect::<Vec<_>>();
    assert_eq!(first_tiles, second_tiles);
}

#[test]
fn raster_pyramids_are_png_and_cannot_be_retiled() {
    let dir = tempfile::tempdir().expect("tempdir");
    let index = create_sample_index(dir.path());
    let raster = dir.path().join("raster.mbtiles");
    let options = TileOptions {
        pyramid: PyramidOptions {
            encoding: TileEncoding::Raster,
            ..tile_options().pyramid
        },
        ..tile_options()
    };
    build(&index, &raster, &options);

    let conn = Connection::open(&raster).expect("open");
    let metadata = read_metadata(&conn).expect("metadata");
    assert_eq!(metadata.get("format").map(String::as_str), Some("png"));
    assert!(!metadata.contains_key("json"));
    for (_, _, _, data) in tile_rows(&raster) {
        assert!(data.starts_with(&[0x89, b'P', b'N', b'G']));
    }

    let pool = build_pool(2).expect("pool");
    let again = dir.path().join("again.mbtiles");
    assert!(build_tiles(&raster, &again, &tile_options(), &pool).is_err());
}

#[test]
fn decode_prints_records_in_key_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let index = create_sample_index(dir.path());

    let mut out = Vec::new();
    let lines = decode_records(&index, None, &mut out).expect("decode");
    assert_eq!(lines, 6);
    let text = String::from_utf8(out).expect("utf8");
    assert!(text.lines().any(|line| line == "0.000000,0.000000,2"), "{text}");
    let total: u64 = text
        .lines()
        .map(|line| line.rsplit(',').next().expect("count").parse::<u64>().expect("number"))
        .sum();
    assert_eq!(total, 3 + 1 + 2 + 5 + 1 + 2);

    let mut out = Vec::new();
    let lines = decode_records(&index, Some(TileCoord::new(4, 14, 6)), &mut out).expect("decode");
    assert_eq!(lines, 3);
    let text = String::from_utf8(out).expect("utf8");
    for line in text.lines() {
        assert!(line.starts_with("139.7"), "{line}");
    }
}

#[test]
fn create_reads_geojson_and_reduced_precision() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("points.geojson");
    std::fs::write(
        &input,
        r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","geometry":{"type":"Point","coordinates":[139.767,35.681]},"properties":{}},
            {"type":"Feature","geometry":{"type":"Point","coordinates":[139.7671,35.6811]},"properties":{}},
            {"type":"Feature","geometry":{"type":"MultiPoint","coordinates":[[0,0],[10,10]]},"properties":{}}
        ]}"#,
    )
    .expect("write");
    let output = dir.path().join("coarse.count");
    let pool = build_pool(2).expect("pool");
    let options = CreateOptions {
        bits: 12,
        sort: quiet_sort(),
        merge: quiet_merge(),
        ..CreateOptions::default()
    };
    let summary = create_index(&[input], &output, &options, &pool).expect("create");
    assert_eq!(summary.points, 4);
    assert_eq!(summary.records, 3);
}

fn write_index(path: &Path, records: &[(u64, u32)]) {
    let mut writer = RecordWriter::create(path).expect("create");
    for &(key, weight) in records {
        writer.push(key, weight).expect("push");
    }
    writer.finish().expect("finish");
}

#[test]
fn normalize_equalizes_tile_totals() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("uneven.count");
    let q = 1u64 << 62;
    write_index(
        &input,
        &[
            (1, 10),
            (2, 30),
            (q + 5, 7),
            (q + 5, 3),
            (q + 9, 10),
            (2 * q + 1, 1),
            (2 * q + 2, 1),
            (2 * q + 3, 1),
            (3 * q, 100),
        ],
    );
    let output = dir.path().join("even.count");
    let summary = normalize_records(&input, &output, 1, true).expect("normalize");
    assert_eq!(summary.bins, 4);
    assert_eq!(summary.max_bin, 100);
    assert_eq!(summary.input_records, 9);
    assert_eq!(summary.output_records, 8);

    let file = RecordFile::open(&output).expect("open");
    let records = file.records().iter().collect::<Vec<_>>();
    assert_eq!(
        records[..4],
        [
            Record { key: 1, weight: 25 },
            Record { key: 2, weight: 75 },
            Record {
                key: q + 5,
                weight: 50
            },
            Record {
                key: q + 9,
                weight: 50
            },
        ]
    );
    for bin in 0..4u64 {
        let in_bin = records.iter().filter(|r| r.key >> 62 == bin).collect::<Vec<_>>();
        let total: u64 = in_bin.iter().map(|r| r.weight as u64).sum();
        assert!(
            total.abs_diff(100) <= in_bin.len() as u64,
            "bin {bin}: {total}"
        );
    }
}

#[test]
fn normalize_at_zoom_zero_keeps_counts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("points.count");
    write_index(&input, &[(3, 4), (8, 6)]);
    let output = dir.path().join("same.count");
    let summary = normalize_records(&input, &output, 0, true).expect("normalize");
    assert_eq!(summary.bins, 1);
    assert_eq!(summary.max_bin, 10);
    let file = RecordFile::open(&output).expect("open");
    assert_eq!(
        file.records().iter().collect::<Vec<_>>(),
        vec![Record { key: 3, weight: 4 }, Record { key: 8, weight: 6 }]
    );

    assert!(normalize_records(&input, &input, 0, true).is_err());
    assert!(normalize_records(&input, &output, 33, true).is_err());
}

#[test]
fn normalize_rejects_unsorted_input() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("unsorted.count");
    write_index(&input, &[(9, 1), (4, 1)]);
    let err = normalize_records(&input, &dir.path().join("out.count"), 8, true)
        .err()
        .expect("out of order");
    assert_eq!(
        err.downcast_ref::<IntegrityError>(),
        Some(&IntegrityError::OutOfOrder {
            previous: 9,
            found: 4
        })
    );
}
