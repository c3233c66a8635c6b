use std::collections::BTreeMap;

use image::DynamicImage;

use super::geometry::{GeomType, Geometry, to_geo};
use super::pbf::{PbfReader, WIRE_LEN, WIRE_VARINT};
use super::value::Value;
use crate::error::{Result, TileError};

pub type Properties = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: Option<u64>,
    pub properties: Properties,
    pub geometry: Geometry,
}

#[derive(Debug, Default)]
pub(crate) struct RawFeature {
    pub id: Option<u64>,
    pub tags: Vec<u32>,
    pub geom_type: u64,
    pub commands: Vec<u32>,
    pub raster: Option<Vec<u8>>,
}

impl RawFeature {
    pub fn read(data: &[u8]) -> Result<RawFeature> {
        let mut reader = PbfReader::new(data);
        let mut feature = RawFeature::default();
        while reader.has_remaining() {
            match reader.read_key()? {
                (1, WIRE_VARINT) => feature.id = Some(reader.read_varint()?),
                (2, wire_type) => reader.read_repeated_u32(wire_type, &mut feature.tags)?,
                (3, WIRE_VARINT) => feature.geom_type = reader.read_varint()?,
                (4, wire_type) => reader.read_repeated_u32(wire_type, &mut feature.commands)?,
                (5, WIRE_LEN) => feature.raster = Some(reader.read_bytes()?.to_vec()),
                (_, wire_type) => reader.skip(wire_type)?,
            }
        }
        Ok(feature)
    }

    pub fn resolve(self, keys: &[String], values: &[Value]) -> Result<Feature> {
        if self.tags.len() % 2 != 0 {
            return Err(TileError::malformed("feature tags must come in key/value pairs"));
        }
        let mut properties = Properties::new();
        for pair in self.tags.chunks_exact(2) {
            let key = keys.get(pair[0] as usize).ok_or_else(|| {
                TileError::malformed(format!("tag key index {} out of range", pair[0]))
            })?;
            let value = values.get(pair[1] as usize).ok_or_else(|| {
                TileError::malformed(format!("tag value index {} out of range", pair[1]))
            })?;
            properties.insert(key.clone(), value.clone());
        }
        let geometry = match self.raster {
            Some(raster) => Geometry::Raster(raster),
            None => Geometry::Vector {
                geom_type: GeomType::from_wire(self.geom_type),
                commands: self.commands,
            },
        };
        Ok(Feature {
            id: self.id,
            properties,
            geometry,
        })
    }
}

impl Feature {
    pub fn new(id: Option<u64>, properties: Properties, geometry: Geometry) -> Self {
        Feature {
            id,
            properties,
            geometry,
        }
    }

    pub fn raster_feature(data: Vec<u8>) -> Self {
        Feature {
            id: None,
            properties: Properties::new(),
            geometry: Geometry::Raster(data),
        }
    }

    pub fn id(&self) -> Option<u64> {
        self.id
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn geom_type(&self) -> GeomType {
        match &self.geometry {
            Geometry::Vector { geom_type, .. } => *geom_type,
            Geometry::Raster(_) => GeomType::Unknown,
        }
    }

    pub fn has_raster(&self) -> bool {
        matches!(self.geometry, Geometry::Raster(_))
    }

    pub fn raster(&self) -> Option<&[u8]> {
        match &self.geometry {
            Geometry::Raster(data) => Some(data),
            Geometry::Vector { .. } => None,
        }
    }

    pub fn raster_image(&self) -> Result<DynamicImage> {
        let data = self
            .raster()
            .ok_or_else(|| TileError::malformed("feature carries no raster"))?;
        Ok(image::load_from_memory(data)?)
    }

    /// Tile-local geometry, `None` for raster features and empty command streams.
    pub fn to_geo(&self) -> Result<Option<geo_types::Geometry<f64>>> {
        match &self.geometry {
            Geometry::Vector {
                geom_type,
                commands,
            } => to_geo(*geom_type, commands),
            Geometry::Raster(_) => Ok(None),
        }
    }
}
