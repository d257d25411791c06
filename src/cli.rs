use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "tile-density", version, about = "Point density index and tile pyramid builder")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log level (error|warn|info|debug|trace)
    #[arg(long, global = true, default_value = "info")]
    pub log: String,

    /// Worker threads (default: available parallelism)
    #[arg(long, global = true)]
    pub threads: Option<usize>,

    /// Hide progress bars
    #[arg(long, global = true, alias = "no-progress", default_value_t = false)]
    pub quiet: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build a sorted record index from point files or stdin
    Create(CreateArgs),
    /// Merge record indexes into one
    Merge(MergeArgs),
    /// Build a density tile pyramid from a record index or an existing pyramid
    Tile(TileArgs),
    /// Print a record index as lon,lat,count lines
    Decode(DecodeArgs),
    /// Rescale a record index so every tile matches the densest one
    Normalize(NormalizeArgs),
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    pub inputs: Vec<PathBuf>,

    #[arg(long, short = 'o')]
    pub output: PathBuf,

    #[arg(long, short = 's', default_value_t = 32)]
    pub bits: u8,

    #[arg(long)]
    pub input_format: Option<String>,

    #[arg(long, default_value_t = 50 * 1024 * 1024)]
    pub chunk_bytes: usize,

    #[arg(long, default_value_t = 50)]
    pub fan_in: usize,
}

#[derive(Debug, Args)]
pub struct MergeArgs {
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    #[arg(long, short = 'o')]
    pub output: PathBuf,

    #[arg(long, short = 'z', default_value_t = 32)]
    pub zoom: u8,

    #[arg(long, default_value_t = 50)]
    pub fan_in: usize,
}

#[derive(Debug, Args)]
pub struct TileArgs {
    pub input: PathBuf,

    #[arg(long, short = 'o')]
    pub output: PathBuf,

    #[arg(long, default_value_t = 0)]
    pub min_zoom: u8,

    #[arg(long, short = 'z', default_value_t = 11)]
    pub max_zoom: u8,

    #[arg(long, short = 'd', default_value_t = 9)]
    pub detail: u8,

    #[arg(long, short = 'l', default_value_t = 50)]
    pub levels: u32,

    #[arg(long, short = 'g', default_value_t = 2.5)]
    pub gamma: f64,

    #[arg(long, default_value_t = 0)]
    pub min_level: u32,

    #[arg(long, default_value_t = 500_000)]
    pub max_tile_bytes: usize,

    #[arg(long, default_value_t = false)]
    pub incremental: bool,

    #[arg(long)]
    pub quantile: Option<f64>,

    #[arg(long, value_enum, default_value_t = ShapeArg::Points)]
    pub shape: ShapeArg,

    #[arg(long, value_enum, default_value_t = EncodingArg::Vector)]
    pub encoding: EncodingArg,

    #[arg(long, value_enum, default_value_t = GroupingArg::Cells)]
    pub grouping: GroupingArg,

    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub description: Option<String>,

    #[arg(long, short = 'f', default_value_t = false)]
    pub force: bool,

    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    pub report: ReportFormat,
}

#[derive(Debug, Args)]
pub struct DecodeArgs {
    pub input: PathBuf,

    #[arg(long)]
    pub tile: Option<String>,
}

#[derive(Debug, Args)]
pub struct NormalizeArgs {
    pub input: PathBuf,

    #[arg(long, short = 'o')]
    pub output: PathBuf,

    #[arg(long, short = 's', default_value_t = 32)]
    pub zoom: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ShapeArg {
    Points,
    Polygons,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EncodingArg {
    Vector,
    Raster,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GroupingArg {
    Cells,
    Buckets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
    Ndjson,
}
