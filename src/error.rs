use crate::coord::TileCoordinate;

pub type Result<T> = std::result::Result<T, TileError>;

#[derive(Debug, thiserror::Error)]
pub enum TileError {
    #[error("malformed vector tile: {0}")]
    MalformedTile(String),

    #[error("corrupt compressed buffer: {0}")]
    CorruptBuffer(String),

    #[error("invalid tile coordinate z={z} x={x} y={y}")]
    InvalidCoordinate { z: u8, x: u32, y: u32 },

    #[error("tile {target} is not a descendant of {base}")]
    InvalidOverzoom {
        base: TileCoordinate,
        target: TileCoordinate,
    },

    #[error("tile layer '{0}' has no matching style layer")]
    StyleLayerMismatch(String),

    #[error("layer '{name}' extent {incoming} conflicts with existing extent {existing}")]
    LayerExtentConflict {
        name: String,
        existing: u32,
        incoming: u32,
    },

    #[error("failed to encode entries: {}", format_failures(.0))]
    EncodingFailure(Vec<(String, String)>),

    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("invalid map definition: {0}")]
    Style(String),

    #[error("rasterizer failed: {0}")]
    Rasterizer(String),

    #[error("thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(key, message)| format!("{key}: {message}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl TileError {
    pub fn malformed(message: impl Into<String>) -> Self {
        TileError::MalformedTile(message.into())
    }

    pub fn style(message: impl Into<String>) -> Self {
        TileError::Style(message.into())
    }
}
