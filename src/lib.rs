pub mod cli;
pub mod clip;
pub mod compression;
pub mod coord;
pub mod encoder;
pub mod error;
pub mod map;
pub mod mbtiles;
pub mod merc_tile;
pub mod parallel;
pub mod raster;
pub mod render;
pub mod settings;
pub mod style;
pub mod tile;
pub mod wafer;

pub use compression::{compress_mvt, decompress_mvt};
pub use coord::{AffineParams, BBox, TileCoordinate, overzoom_transform};
pub use encoder::{EncodeOptions, Encoder, create_mvt_merc};
pub use error::{Result, TileError};
pub use map::{Map, MapLayer, Rule, Style, Symbolizer};
pub use merc_tile::{MergeReport, MergedTile, merge_compressed_buffer};
pub use parallel::{EncodeEntry, encode_parallel};
pub use render::{
    RenderOptions, RenderReport, Rasterizer, SimpleRasterizer, preview_mvt_merc,
    preview_mvt_merc_custom, render_mvt_merc,
};
pub use settings::Settings;
pub use tile::{TileInfo, VectorTile};
pub use wafer::{WaferFailurePolicy, create_mvt_wafer_merc};
