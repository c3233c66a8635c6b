use std::collections::HashMap;

use super::feature::{Feature, RawFeature};
use super::geometry::Geometry;
use super::pbf::{PbfReader, PbfWriter, WIRE_LEN, WIRE_VARINT};
use super::value::{Value, ValueKey};
use crate::error::{Result, TileError};

pub const DEFAULT_EXTENT: u32 = 4096;
pub const LAYER_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub name: String,
    pub extent: u32,
    pub version: u32,
    pub features: Vec<Feature>,
}

impl Layer {
    pub fn new(name: &str, extent: u32) -> Self {
        Layer {
            name: name.to_string(),
            extent,
            version: LAYER_VERSION,
            features: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn features_size(&self) -> usize {
        self.features.len()
    }

    pub fn features(&self, index: usize) -> Option<&Feature> {
        self.features.get(index)
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub(crate) fn read(data: &[u8]) -> Result<Layer> {
        let mut reader = PbfReader::new(data);
        let mut name = None;
        // Absent extent/version fields take the schema defaults.
        let mut extent = DEFAULT_EXTENT;
        let mut version = 1;
        let mut raw_features = Vec::new();
        let mut keys = Vec::new();
        let mut values = Vec::new();

        while reader.has_remaining() {
            match reader.read_key()? {
                (1, WIRE_LEN) => name = Some(reader.read_string()?),
                (2, WIRE_LEN) => raw_features.push(RawFeature::read(reader.read_bytes()?)?),
                (3, WIRE_LEN) => keys.push(reader.read_string()?),
                (4, WIRE_LEN) => values.push(Value::read(reader.read_bytes()?)?),
                (5, WIRE_VARINT) => extent = reader.read_u32()?,
                (15, WIRE_VARINT) => version = reader.read_u32()?,
                (_, wire_type) => reader.skip(wire_type)?,
            }
        }

        let name = name.ok_or_else(|| TileError::malformed("layer without a name"))?;
        if extent == 0 {
            return Err(TileError::malformed(format!("layer '{name}' has zero extent")));
        }
        let features = raw_features
            .into_iter()
            .map(|raw| raw.resolve(&keys, &values))
            .collect::<Result<Vec<_>>>()?;

        Ok(Layer {
            name,
            extent,
            version,
            features,
        })
    }

    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = PbfWriter::new();
        writer.write_varint_field(15, u64::from(self.version))?;
        writer.write_string_field(1, &self.name)?;

        let mut keys: Vec<&str> = Vec::new();
        let mut key_index: HashMap<&str, u32> = HashMap::new();
        let mut values: Vec<&Value> = Vec::new();
        let mut value_index: HashMap<ValueKey, u32> = HashMap::new();

        for feature in &self.features {
            let mut tags = Vec::with_capacity(feature.properties.len() * 2);
            for (key, value) in &feature.properties {
                let key_id = *key_index.entry(key.as_str()).or_insert_with(|| {
                    keys.push(key.as_str());
                    (keys.len() - 1) as u32
                });
                let value_id = *value_index.entry(value.key()).or_insert_with(|| {
                    values.push(value);
                    (values.len() - 1) as u32
                });
                tags.push(key_id);
                tags.push(value_id);
            }
            writer.write_bytes_field(2, &feature_bytes(feature, &tags)?)?;
        }

        for key in &keys {
            writer.write_string_field(3, key)?;
        }
        for value in &values {
            writer.write_bytes_field(4, &value.to_bytes()?)?;
        }
        writer.write_varint_field(5, u64::from(self.extent))?;
        Ok(writer.into_bytes())
    }
}

fn feature_bytes(feature: &Feature, tags: &[u32]) -> Result<Vec<u8>> {
    let mut writer = PbfWriter::new();
    if let Some(id) = feature.id {
        writer.write_varint_field(1, id)?;
    }
    if !tags.is_empty() {
        writer.write_packed_u32_field(2, tags)?;
    }
    match &feature.geometry {
        Geometry::Vector {
            geom_type,
            commands,
        } => {
            writer.write_varint_field(3, geom_type.as_wire())?;
            writer.write_packed_u32_field(4, commands)?;
        }
        Geometry::Raster(data) => {
            writer.write_bytes_field(5, data)?;
        }
    }
    Ok(writer.into_bytes())
}
