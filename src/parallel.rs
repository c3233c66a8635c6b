use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;

use image::DynamicImage;
use rayon::prelude::*;
use tracing::debug;

use crate::error::{Result, TileError};
use crate::raster::RasterFormat;
use crate::settings::Settings;

/// A value in a collection handed to [`encode_parallel`]. Only `Raster`
/// entries are encoded; everything else passes through untouched.
#[derive(Debug, Clone)]
pub enum EncodeEntry {
    Raster(DynamicImage),
    Encoded(Vec<u8>),
    Opaque(serde_json::Value),
}

impl EncodeEntry {
    pub fn as_encoded(&self) -> Option<&[u8]> {
        match self {
            EncodeEntry::Encoded(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Replaces every raster entry with its encoding in `format`. Successful
/// encodings are written even when other entries fail; the failures come
/// back together as [`TileError::EncodingFailure`].
pub fn encode_parallel<K>(
    entries: &mut HashMap<K, EncodeEntry>,
    format: &str,
    settings: &Settings,
) -> Result<()>
where
    K: Eq + Hash + Clone + Display + Send + Sync,
{
    let format: RasterFormat = format.parse()?;
    let rasters: Vec<(K, &DynamicImage)> = entries
        .iter()
        .filter_map(|(key, entry)| match entry {
            EncodeEntry::Raster(image) => Some((key.clone(), image)),
            _ => None,
        })
        .collect();
    if rasters.is_empty() {
        return Ok(());
    }

    let threads = settings.jobs_for(rasters.len());
    debug!(entries = rasters.len(), threads, %format, "encoding rasters");
    let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
    let results: Vec<(K, Result<Vec<u8>>)> = pool.install(|| {
        rasters
            .into_par_iter()
            .map(|(key, image)| {
                let encoded = format.encode(image);
                (key, encoded)
            })
            .collect()
    });

    let mut failures = Vec::new();
    for (key, result) in results {
        match result {
            Ok(bytes) => {
                entries.insert(key, EncodeEntry::Encoded(bytes));
            }
            Err(err) => failures.push((key.to_string(), err.to_string())),
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        failures.sort();
        Err(TileError::EncodingFailure(failures))
    }
}
