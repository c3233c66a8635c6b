use std::fs;

use anyhow::{Context, Result};
use clap::Parser;
use image::RgbaImage;
use tracing::info;

use vt_render::cli::{
    Cli, CodecArgs, Command, EncodeArgs, InfoArgs, PreviewArgs, RenderArgs, ReportFormat,
    WaferArgs, parse_tile_spec,
};
use vt_render::compression::{decode_tile_payload, compress_mvt, decompress_mvt};
use vt_render::coord::TileCoordinate;
use vt_render::encoder::{EncodeOptions, create_mvt_merc};
use vt_render::map::Map;
use vt_render::mbtiles::write_tiles;
use vt_render::merc_tile::{MergedTile, merge_compressed_buffer};
use vt_render::render::{RenderOptions, SimpleRasterizer, preview_mvt_merc, render_mvt_merc};
use vt_render::tile::TileInfo;
use vt_render::wafer::{WaferFailurePolicy, create_mvt_wafer_merc};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log);

    match cli.command {
        Command::Info(args) => run_info(args),
        Command::Compress(args) => run_codec(args, true),
        Command::Decompress(args) => run_codec(args, false),
        Command::Encode(args) => run_encode(args),
        Command::Wafer(args) => run_wafer(args),
        Command::Render(args) => run_render(args),
        Command::Preview(args) => run_preview(args),
    }
}

fn run_info(args: InfoArgs) -> Result<()> {
    let data = fs::read(&args.input)
        .with_context(|| format!("failed to read tile: {}", args.input.display()))?;
    let payload = decode_tile_payload(&data)?;
    let info = TileInfo::parse(&payload).context("failed to parse tile")?;
    let summary = info.summary();
    match args.output {
        ReportFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        ReportFormat::Text => {
            println!("layers: {}", info.layers_size());
            for layer in &summary {
                println!(
                    "{}: features={} raster_features={} extent={} version={}",
                    layer.name, layer.features, layer.raster_features, layer.extent, layer.version
                );
            }
        }
    }
    Ok(())
}

fn run_codec(args: CodecArgs, compress: bool) -> Result<()> {
    let data = fs::read(&args.input)
        .with_context(|| format!("failed to read: {}", args.input.display()))?;
    let out = if compress {
        compress_mvt(&data)?
    } else {
        decompress_mvt(&data)?
    };
    fs::write(&args.output, &out)
        .with_context(|| format!("failed to write: {}", args.output.display()))?;
    info!(input = data.len(), output = out.len(), "wrote {}", args.output.display());
    Ok(())
}

fn run_encode(args: EncodeArgs) -> Result<()> {
    let map = Map::load(&args.map)?;
    let coord = parse_tile_spec(&args.tile)?;
    let options = EncodeOptions {
        style_level_filter: !args.no_style_filter,
        scale_denom: args.scale_denom,
        buffer_size: args.buffer_size,
        image_format: args.image_format,
        compress: args.compress,
        ..EncodeOptions::default()
    };
    let buffer = create_mvt_merc(&map, &coord, &options)?;
    fs::write(&args.output, &buffer)
        .with_context(|| format!("failed to write: {}", args.output.display()))?;
    info!(tile = %coord, bytes = buffer.len(), "encoded tile");
    Ok(())
}

fn run_wafer(args: WaferArgs) -> Result<()> {
    if args.grid == 0 {
        anyhow::bail!("--grid must be at least 1");
    }
    let map = Map::load(&args.map)?;
    let origin = parse_tile_spec(&args.tile)?;
    let options = EncodeOptions {
        style_level_filter: !args.no_style_filter,
        compress: args.compress,
        ..EncodeOptions::default()
    };
    let policy = if args.fail_fast {
        WaferFailurePolicy::Propagate
    } else {
        WaferFailurePolicy::EmptyBuffer
    };
    let buffers = create_mvt_wafer_merc(&map, &origin, args.grid, &options, policy)?;
    let mut tiles = Vec::with_capacity(buffers.len());
    for (idx, buffer) in buffers.into_iter().enumerate() {
        let idx = idx as u32;
        let (row, col) = (idx / args.grid, idx % args.grid);
        // Out-of-world cells come back empty and are never written.
        if buffer.is_empty() {
            continue;
        }
        let coord = TileCoordinate::new(
            origin.z,
            origin.x.saturating_add(col),
            origin.y.saturating_add(row),
        )?;
        tiles.push((coord, buffer));
    }
    let name = args
        .map
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("wafer");
    write_tiles(&args.output, name, &tiles, !args.no_progress)?;
    Ok(())
}

fn load_tile(path: &std::path::Path, coord: TileCoordinate) -> Result<MergedTile> {
    let data = fs::read(path).with_context(|| format!("failed to read tile: {}", path.display()))?;
    let mut tile = MergedTile::new(coord);
    merge_compressed_buffer(&mut tile, &data)?;
    Ok(tile)
}

fn save_image(image: &RgbaImage, path: &std::path::Path) -> Result<()> {
    image
        .save(path)
        .with_context(|| format!("failed to write image: {}", path.display()))
}

fn run_render(args: RenderArgs) -> Result<()> {
    let map = Map::load(&args.map)?;
    let tile = load_tile(&args.tile_file, parse_tile_spec(&args.tile)?)?;
    let overzoom = args.overzoom.as_deref().map(parse_tile_spec).transpose()?;
    let size = args.size.unwrap_or(map.width);
    let mut image = RgbaImage::new(size, size);
    let options = RenderOptions {
        scale_factor: args.scale_factor,
        scale_denominator: args.scale_denom,
        ..RenderOptions::default()
    };
    let report = render_mvt_merc(&tile, &map, &mut image, &SimpleRasterizer, overzoom, &options)?;
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
    save_image(&image, &args.output)?;
    info!(
        layers = report.layers_rendered,
        features = report.features_rendered,
        "rendered {}",
        args.output.display()
    );
    Ok(())
}

fn run_preview(args: PreviewArgs) -> Result<()> {
    let tile = load_tile(&args.input, parse_tile_spec(&args.tile)?)?;
    let mut image = RgbaImage::new(args.size, args.size);
    let report = preview_mvt_merc(&tile, &mut image, &SimpleRasterizer)?;
    save_image(&image, &args.output)?;
    info!(features = report.features_rendered, "rendered {}", args.output.display());
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(level).unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("info")
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
