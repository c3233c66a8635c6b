use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::coord::TileCoordinate;

#[derive(Debug, Parser)]
#[command(name = "vt-render", version, about = "Mapbox Vector Tile encoding, merging and rendering CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log level (error|warn|info|debug|trace)
    #[arg(long, default_value = "info")]
    pub log: String,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Summarize the layers of a tile buffer.
    Info(InfoArgs),
    Compress(CodecArgs),
    Decompress(CodecArgs),
    /// Encode one tile from a map definition.
    Encode(EncodeArgs),
    /// Encode a square block of tiles into an MBTiles file.
    Wafer(WaferArgs),
    /// Rasterize a tile with the styles of a map definition.
    Render(RenderArgs),
    /// Rasterize a tile with a built-in outline style.
    Preview(PreviewArgs),
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    pub input: PathBuf,

    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    pub output: ReportFormat,
}

#[derive(Debug, Args)]
pub struct CodecArgs {
    pub input: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Args)]
pub struct EncodeArgs {
    #[arg(long)]
    pub map: PathBuf,

    #[arg(long)]
    pub tile: String,

    #[arg(long)]
    pub output: PathBuf,

    #[arg(long)]
    pub scale_denom: Option<f64>,

    #[arg(long)]
    pub buffer_size: Option<i32>,

    #[arg(long)]
    pub image_format: Option<String>,

    /// Keep features no active rule matches.
    #[arg(long, default_value_t = false)]
    pub no_style_filter: bool,

    #[arg(long, default_value_t = false)]
    pub compress: bool,
}

#[derive(Debug, Args)]
pub struct WaferArgs {
    #[arg(long)]
    pub map: PathBuf,

    /// Top-left tile of the block.
    #[arg(long)]
    pub tile: String,

    #[arg(long, default_value_t = 8)]
    pub grid: u32,

    #[arg(long)]
    pub output: PathBuf,

    #[arg(long, default_value_t = false)]
    pub no_style_filter: bool,

    #[arg(long, default_value_t = false)]
    pub compress: bool,

    /// Abort on the first failing cell instead of leaving it empty.
    #[arg(long, default_value_t = false)]
    pub fail_fast: bool,

    #[arg(long, default_value_t = false)]
    pub no_progress: bool,
}

#[derive(Debug, Args)]
pub struct RenderArgs {
    #[arg(long)]
    pub map: PathBuf,

    #[arg(long)]
    pub tile_file: PathBuf,

    #[arg(long)]
    pub tile: String,

    #[arg(long)]
    pub output: PathBuf,

    /// Draw the tile as this descendant tile.
    #[arg(long)]
    pub overzoom: Option<String>,

    #[arg(long, default_value_t = 1.0)]
    pub scale_factor: f64,

    #[arg(long)]
    pub scale_denom: Option<f64>,

    /// Image side in pixels; defaults to the map width.
    #[arg(long)]
    pub size: Option<u32>,
}

#[derive(Debug, Args)]
pub struct PreviewArgs {
    pub input: PathBuf,

    #[arg(long)]
    pub tile: String,

    #[arg(long)]
    pub output: PathBuf,

    #[arg(long, default_value_t = 256)]
    pub size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
}

pub fn parse_tile_spec(value: &str) -> Result<TileCoordinate> {
    let trimmed = value.trim();
    let mut parts = trimmed.split('/');
    let zoom_str = parts.next().context("tile must be in z/x/y format")?;
    let x_str = parts.next().context("tile must be in z/x/y format")?;
    let y_str = parts.next().context("tile must be in z/x/y format")?;
    if parts.next().is_some() {
        anyhow::bail!("tile must be in z/x/y format");
    }
    let zoom: u8 = zoom_str.parse().context("invalid tile zoom")?;
    let x: u32 = x_str.parse().context("invalid tile x")?;
    let y: u32 = y_str.parse().context("invalid tile y")?;
    Ok(TileCoordinate::new(zoom, x, y)?)
}
