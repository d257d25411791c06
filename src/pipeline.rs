use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::error::IntegrityError;
use crate::format::{decide_point_format, PyramidSource};
use crate::index::{decode, key_for, tile_key_range, unproject, zoom_mask, MAX_ZOOM};
use crate::ingest::{read_points, IngestStats};
use crate::mbtiles::{open_readonly_mbtiles, MbtilesWriter, PyramidMetadata, TileCoord};
use crate::merge::{merge_into_file, same_file, FileStorage, MergeOptions, TempStorage};
use crate::pyramid::{build_pyramid, retile_records, PyramidOptions, PyramidSummary, RetileStats};
use crate::record::{RecordFile, RecordSink, RecordSlice, RecordWriter};
use crate::sort::{sort_file, SortOptions};
use crate::util::Progress;

#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub bits: u8,
    pub format: Option<String>,
    pub sort: SortOptions,
    pub merge: MergeOptions,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            bits: MAX_ZOOM,
            format: None,
            sort: SortOptions::default(),
            merge: MergeOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateSummary {
    pub inputs: usize,
    pub points: u64,
    pub skipped: u64,
    pub raw_records: u64,
    pub records: u64,
}

fn scratch_parent(output: &Path) -> &Path {
    output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

fn index_raw_file(
    raw: &Path,
    output: &Path,
    sort: &SortOptions,
    merge: &MergeOptions,
    pool: &rayon::ThreadPool,
    storage: &mut dyn TempStorage,
) -> Result<u64> {
    let runs = sort_file(raw, sort, pool)?;
    let file = RecordFile::open(raw)?;
    let records = file.records();
    let slices = runs
        .iter()
        .map(|run| records.slice(run.clone()))
        .collect::<Vec<_>>();
    merge_into_file(&slices, output, merge, pool, storage)
}

pub fn create_index(
    inputs: &[PathBuf],
    output: &Path,
    options: &CreateOptions,
    pool: &rayon::ThreadPool,
) -> Result<CreateSummary> {
    if options.bits == 0 || options.bits > MAX_ZOOM {
        anyhow::bail!("bit depth must be between 1 and {MAX_ZOOM}, got {}", options.bits);
    }
    if let Some(input) = inputs.iter().find(|input| same_file(input, output)) {
        anyhow::bail!("output {} is also an input", input.display());
    }

    let mut storage = FileStorage::new_in(scratch_parent(output))?;
    let raw = storage.path().join("raw.count");
    let mut writer = RecordWriter::create(&raw)?;
    let mut stats = IngestStats::default();
    let bits = options.bits;

    if inputs.is_empty() {
        let format = decide_point_format(None, options.format.as_deref())?;
        let stdin = io::stdin();
        let read = read_points(stdin.lock(), format, "<stdin>", &mut |point| {
            writer.push_total(key_for(point.lon, point.lat, bits), point.weight)
        })?;
        stats.merge(read);
    }
    for input in inputs {
        let format = decide_point_format(Some(input), options.format.as_deref())?;
        let file = File::open(input)
            .with_context(|| format!("failed to open {}", input.display()))?;
        let source = input.display().to_string();
        let read = read_points(BufReader::new(file), format, &source, &mut |point| {
            writer.push_total(key_for(point.lon, point.lat, bits), point.weight)
        })?;
        info!(input = %source, points = read.points, skipped = read.skipped, "read points");
        stats.merge(read);
    }
    let raw_records = writer.finish()?;

    let records = index_raw_file(&raw, output, &options.sort, &options.merge, pool, &mut storage)?;
    info!(
        output = %output.display(),
        points = stats.points,
        records,
        "created index"
    );
    Ok(CreateSummary {
        inputs: inputs.len(),
        points: stats.points,
        skipped: stats.skipped,
        raw_records,
        records,
    })
}

#[derive(Debug, Clone, Default)]
pub struct TileOptions {
    pub pyramid: PyramidOptions,
    pub sort: SortOptions,
    pub merge: MergeOptions,
    pub force: bool,
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildReport {
    pub input: String,
    pub output: String,
    pub retiled: Option<RetileStats>,
    pub summary: PyramidSummary,
}

pub fn build_tiles(
    input: &Path,
    output: &Path,
    options: &TileOptions,
    pool: &rayon::ThreadPool,
) -> Result<BuildReport> {
    options.pyramid.validate()?;
    if same_file(input, output) {
        anyhow::bail!("output {} is also the input", output.display());
    }

    let (retiled, summary) = match PyramidSource::from_path(input) {
        PyramidSource::Records => {
            let file = RecordFile::open(input)?;
            (None, write_pyramid(file.records(), output, options, pool)?)
        }
        PyramidSource::Mbtiles => {
            let conn = open_readonly_mbtiles(input)?;
            let mut storage = FileStorage::new_in(scratch_parent(output))?;
            let raw = storage.path().join("retile.count");
            let mut writer = RecordWriter::create(&raw)?;
            let retiled = retile_records(&conn, &mut writer)?;
            writer.finish()?;
            let index = storage.path().join("retile-index.count");
            index_raw_file(&raw, &index, &options.sort, &options.merge, pool, &mut storage)?;
            let file = RecordFile::open(&index)?;
            (Some(retiled), write_pyramid(file.records(), output, options, pool)?)
        }
    };

    Ok(BuildReport {
        input: input.display().to_string(),
        output: output.display().to_string(),
        retiled,
        summary,
    })
}

fn write_pyramid(
    records: RecordSlice<'_>,
    output: &Path,
    options: &TileOptions,
    pool: &rayon::ThreadPool,
) -> Result<PyramidSummary> {
    let pyramid = &options.pyramid;
    let mut writer = MbtilesWriter::create(output, options.force)?;
    let summary = build_pyramid(records, &mut writer, pyramid, pool)
        .with_context(|| format!("failed to build {}", output.display()))?;

    let name = options.name.clone().unwrap_or_else(|| {
        output
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "density".to_string())
    });
    let metadata = PyramidMetadata {
        description: options.description.clone().unwrap_or_else(|| name.clone()),
        name,
        format: pyramid.format_name().to_string(),
        bounds: summary.bounds,
        center: summary.center,
        min_zoom: pyramid.min_zoom,
        max_zoom: pyramid.max_zoom,
        detail: pyramid.detail,
        scales: summary.scales.clone(),
    };
    writer.finish(&metadata)?;
    Ok(summary)
}

pub fn decode_records<W: Write>(path: &Path, tile: Option<TileCoord>, out: &mut W) -> Result<u64> {
    let file = RecordFile::open(path)?;
    let records = file.records();
    let range = match tile {
        Some(tile) => {
            let (lo, hi) = tile_key_range(tile.zoom, tile.x, tile.y);
            let end = match hi.checked_add(1) {
                Some(next) => records.lower_bound(next, u64::MAX),
                None => records.len(),
            };
            records.lower_bound(lo, u64::MAX)..end
        }
        None => 0..records.len(),
    };

    let mut lines = 0u64;
    for record in records.slice(range).iter() {
        let (x, y) = decode(record.key);
        let (lon, lat) = unproject(x, y, MAX_ZOOM);
        writeln!(out, "{lon:.6},{lat:.6},{}", record.weight).context("write decoded record")?;
        lines += 1;
    }
    Ok(lines)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizeSummary {
    pub bins: u64,
    pub max_bin: u64,
    pub input_records: u64,
    pub output_records: u64,
}

fn for_each_bin<F>(records: RecordSlice<'_>, zoom: u8, mut visit: F) -> Result<()>
where
    F: FnMut(RecordSlice<'_>) -> Result<()>,
{
    let mask = zoom_mask(zoom);
    let mut start = 0;
    let mut previous = None;
    for i in 0..records.len() {
        let key = records.key(i);
        if let Some(previous) = previous {
            if key < previous {
                return Err(IntegrityError::OutOfOrder {
                    previous,
                    found: key,
                }
                .into());
            }
            if key & mask != previous & mask {
                visit(records.slice(start..i))?;
                start = i;
            }
        }
        previous = Some(key);
    }
    if start < records.len() {
        visit(records.slice(start..records.len()))?;
    }
    Ok(())
}

pub fn normalize_records(
    input: &Path,
    output: &Path,
    zoom: u8,
    quiet: bool,
) -> Result<NormalizeSummary> {
    if zoom > MAX_ZOOM {
        anyhow::bail!("zoom must be at most {MAX_ZOOM}, got {zoom}");
    }
    if same_file(input, output) {
        anyhow::bail!("output {} is also the input", output.display());
    }
    let file = RecordFile::open(input)?;
    let records = file.records();

    let mut bins = 0u64;
    let mut max_bin = 0u64;
    for_each_bin(records, zoom, |bin| {
        bins += 1;
        max_bin = max_bin.max(bin.iter().map(|r| r.weight as u64).sum());
        Ok(())
    })?;
    info!("normalize: {bins} bins at zoom {zoom}, densest holds {max_bin}");

    let progress = Progress::new("normalize", records.len() as u64, quiet);
    let mut writer = RecordWriter::create(output)?;
    for_each_bin(records, zoom, |bin| {
        let total: u64 = bin.iter().map(|r| r.weight as u64).sum();
        let factor = max_bin as f64 / total as f64;
        let mut current: Option<(u64, u64)> = None;
        for record in bin.iter() {
            match current.as_mut() {
                Some((key, sum)) if *key == record.key => *sum += record.weight as u64,
                _ => {
                    if let Some((key, sum)) = current.take() {
                        writer.push_total(key, (sum as f64 * factor).round() as u64)?;
                    }
                    current = Some((record.key, record.weight as u64));
                }
            }
        }
        if let Some((key, sum)) = current {
            writer.push_total(key, (sum as f64 * factor).round() as u64)?;
        }
        progress.inc(bin.len() as u64);
        Ok(())
    })?;
    progress.finish();
    let output_records = writer.finish()?;

    Ok(NormalizeSummary {
        bins,
        max_bin,
        input_records: records.len() as u64,
        output_records,
    })
}
