use anyhow::Result;
use serde_json::json;

use crate::pipeline::BuildReport;

pub fn ndjson_lines(report: &BuildReport) -> Result<Vec<String>> {
    let summary = &report.summary;
    let mut lines = Vec::new();
    lines.push(serde_json::to_string(&json!({
        "type": "summary",
        "input": report.input,
        "output": report.output,
        "records": summary.records,
        "tiles": summary.tiles,
        "bytes": summary.bytes,
        "max_tile_bytes": summary.max_tile_bytes,
        "bounds": summary.bounds,
        "center": summary.center,
    }))?);

    if let Some(retiled) = report.retiled.as_ref() {
        lines.push(serde_json::to_string(&json!({
            "type": "retiled",
            "stats": retiled,
        }))?);
    }

    for zoom in summary.zooms.iter() {
        lines.push(serde_json::to_string(&json!({
            "type": "zoom",
            "zoom": zoom,
        }))?);
    }

    lines.push(serde_json::to_string(&json!({
        "type": "density_scales",
        "scales": summary.scales,
    }))?);

    Ok(lines)
}

pub fn text_lines(report: &BuildReport) -> Vec<String> {
    let summary = &report.summary;
    let mut lines = vec![format!(
        "tiles: {} total_bytes: {} max_bytes: {} records: {}",
        summary.tiles, summary.bytes, summary.max_tile_bytes, summary.records
    )];
    if let Some(retiled) = report.retiled.as_ref() {
        lines.push(format!(
            "retiled: z={} tiles={} features={} cells={}",
            retiled.zoom, retiled.tiles, retiled.features, retiled.cells
        ));
    }
    if let Some([west, south, east, north]) = summary.bounds {
        lines.push(format!("bounds: {west:.6},{south:.6},{east:.6},{north:.6}"));
    }
    if let Some((lon, lat)) = summary.center {
        lines.push(format!("center: {lon:.6},{lat:.6}"));
    }
    for zoom in summary.zooms.iter() {
        lines.push(format!(
            "z={}: tiles={} total_bytes={} max_bytes={} features={} max_count={} scale={:.2}",
            zoom.zoom,
            zoom.tiles,
            zoom.bytes,
            zoom.max_bytes,
            zoom.features,
            zoom.max_count,
            zoom.scale
        ));
        if zoom.thresholded > 0 {
            lines.push(format!(
                "z={}: {} tiles thresholded to fit",
                zoom.zoom, zoom.thresholded
            ));
        }
    }
    lines
}
