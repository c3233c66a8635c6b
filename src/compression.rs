use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};

use crate::error::{Result, TileError};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    Zlib,
    Gzip,
}

pub fn detect_envelope(data: &[u8]) -> Option<Envelope> {
    if data.starts_with(&GZIP_MAGIC) {
        return Some(Envelope::Gzip);
    }
    match data {
        // CMF must declare deflate and the header pair must be a multiple of 31.
        [cmf, flg, ..] if cmf & 0x0f == 8 && (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 == 0 => {
            Some(Envelope::Zlib)
        }
        _ => None,
    }
}

pub fn is_compressed(data: &[u8]) -> bool {
    detect_envelope(data).is_some()
}

pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    compress_with(data, Envelope::Zlib)
}

pub fn compress_with(data: &[u8], envelope: Envelope) -> Result<Vec<u8>> {
    match envelope {
        Envelope::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        Envelope::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
    }
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoded = Vec::new();
    match detect_envelope(data) {
        Some(Envelope::Gzip) => {
            GzDecoder::new(data)
                .read_to_end(&mut decoded)
                .map_err(|err| TileError::CorruptBuffer(format!("gzip: {err}")))?;
        }
        Some(Envelope::Zlib) => {
            ZlibDecoder::new(data)
                .read_to_end(&mut decoded)
                .map_err(|err| TileError::CorruptBuffer(format!("zlib: {err}")))?;
        }
        None => {
            return Err(TileError::CorruptBuffer(
                "missing zlib or gzip header".to_string(),
            ));
        }
    }
    Ok(decoded)
}

/// Returns `data` decompressed when it carries an envelope, unchanged otherwise.
pub fn decode_tile_payload(data: &[u8]) -> Result<Vec<u8>> {
    if is_compressed(data) {
        decompress(data)
    } else {
        Ok(data.to_vec())
    }
}

pub fn compress_mvt(data: &[u8]) -> Result<Vec<u8>> {
    compress(data)
}

pub fn decompress_mvt(data: &[u8]) -> Result<Vec<u8>> {
    decompress(data)
}
