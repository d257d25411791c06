use std::io::{self, BufWriter, Write};

use anyhow::{Context, Result};
use clap::Parser;

use tile_density::cli::{Cli, Command, EncodingArg, GroupingArg, ReportFormat, ShapeArg};
use tile_density::mbtiles::parse_tile_spec;
use tile_density::merge::{merge_files, MergeOptions};
use tile_density::output::{ndjson_lines, text_lines};
use tile_density::pipeline::{
    build_tiles, create_index, decode_records, normalize_records, CreateOptions, TileOptions,
};
use tile_density::pyramid::{FeatureGrouping, FeatureShape, PyramidOptions, TileEncoding};
use tile_density::sort::SortOptions;
use tile_density::util::{build_pool, worker_count};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log);

    let workers = worker_count(cli.threads);
    let pool = build_pool(workers)?;
    let quiet = cli.quiet;

    match cli.command {
        Command::Create(args) => {
            let options = CreateOptions {
                bits: args.bits,
                format: args.input_format.clone(),
                sort: SortOptions {
                    chunk_bytes: args.chunk_bytes,
                    quiet,
                    ..SortOptions::default()
                },
                merge: MergeOptions {
                    workers,
                    fan_in: args.fan_in,
                    quiet,
                    ..MergeOptions::default()
                },
            };
            let summary = create_index(&args.inputs, &args.output, &options, &pool)?;
            println!(
                "create: output={} points={} skipped={} records={}",
                args.output.display(),
                summary.points,
                summary.skipped,
                summary.records
            );
        }
        Command::Merge(args) => {
            if args.zoom > 32 {
                anyhow::bail!("zoom must be at most 32, got {}", args.zoom);
            }
            let options = MergeOptions {
                zoom: args.zoom,
                workers,
                fan_in: args.fan_in,
                quiet,
                ..MergeOptions::default()
            };
            let summary = merge_files(&args.inputs, &args.output, &options, &pool)?;
            println!(
                "merge: output={} inputs={} input_records={} output_records={}",
                args.output.display(),
                summary.inputs,
                summary.input_records,
                summary.output_records
            );
        }
        Command::Tile(args) => {
            let options = TileOptions {
                pyramid: PyramidOptions {
                    min_zoom: args.min_zoom,
                    max_zoom: args.max_zoom,
                    detail: args.detail,
                    levels: args.levels,
                    gamma: args.gamma,
                    min_level: args.min_level,
                    max_tile_bytes: args.max_tile_bytes,
                    incremental_threshold: args.incremental,
                    quantile: args.quantile,
                    shape: match args.shape {
                        ShapeArg::Points => FeatureShape::Points,
                        ShapeArg::Polygons => FeatureShape::Polygons,
                    },
                    encoding: match args.encoding {
                        EncodingArg::Vector => TileEncoding::Vector,
                        EncodingArg::Raster => TileEncoding::Raster,
                    },
                    grouping: match args.grouping {
                        GroupingArg::Cells => FeatureGrouping::Cells,
                        GroupingArg::Buckets => FeatureGrouping::Buckets,
                    },
                    workers,
                    quiet,
                },
                sort: SortOptions {
                    quiet,
                    ..SortOptions::default()
                },
                merge: MergeOptions {
                    workers,
                    quiet,
                    ..MergeOptions::default()
                },
                force: args.force,
                name: args.name.clone(),
                description: args.description.clone(),
            };
            let report = build_tiles(&args.input, &args.output, &options, &pool)?;
            match args.report {
                ReportFormat::Json => {
                    let json = serde_json::to_string_pretty(&report)?;
                    println!("{}", json);
                }
                ReportFormat::Ndjson => {
                    for line in ndjson_lines(&report)? {
                        println!("{}", line);
                    }
                }
                ReportFormat::Text => {
                    for line in text_lines(&report) {
                        println!("{}", line);
                    }
                }
            }
        }
        Command::Decode(args) => {
            let tile = match args.tile.as_deref() {
                Some(value) => Some(parse_tile_spec(value)?),
                None => None,
            };
            let stdout = io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            decode_records(&args.input, tile, &mut out)?;
            out.flush().context("flush output")?;
        }
        Command::Normalize(args) => {
            let summary = normalize_records(&args.input, &args.output, args.zoom, quiet)?;
            println!(
                "normalize: output={} bins={} max_bin={} records={}",
                args.output.display(),
                summary.bins,
                summary.max_bin,
                summary.output_records
            );
        }
    }

    Ok(())
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(level).unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("info")
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}
