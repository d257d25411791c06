use std::io::BufRead;

use anyhow::{Context, Result};
use ::csv::{ReaderBuilder, StringRecord, Trim};
use tracing::warn;

use crate::ingest::{deliver, IngestStats, Point};

pub fn parse_record(record: &StringRecord) -> Option<Point> {
    if record.len() > 3 {
        return None;
    }
    let lon = record.get(0)?.parse::<f64>().ok()?;
    let lat = record.get(1)?.parse::<f64>().ok()?;
    let weight = match record.get(2) {
        Some(count) => count.parse::<u64>().ok()?,
        None => 1,
    };
    Some(Point { lon, lat, weight })
}

pub fn read_csv<R, F>(reader: R, source: &str, on_point: &mut F) -> Result<IngestStats>
where
    R: BufRead,
    F: FnMut(Point) -> Result<()>,
{
    let mut stats = IngestStats::default();
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(Trim::All)
        .from_reader(reader);
    let mut record = StringRecord::new();
    loop {
        match reader.read_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {}
            Err(err) if err.is_io_error() => {
                return Err(err).with_context(|| format!("failed to read {source}"));
            }
            Err(err) => {
                let line = err.position().map_or(0, |pos| pos.line());
                warn!("{source}:{line}: {err}");
                stats.skipped += 1;
                continue;
            }
        }
        let line = record.position().map_or(0, |pos| pos.line()) as usize;
        if record.iter().all(str::is_empty) {
            continue;
        }
        match parse_record(&record) {
            Some(point) => deliver(point, source, line, &mut stats, on_point)?,
            None => {
                let fields = record.iter().collect::<Vec<_>>().join(",");
                warn!("{source}:{line}: can't understand {fields}");
                stats.skipped += 1;
            }
        }
    }
    Ok(stats)
}
