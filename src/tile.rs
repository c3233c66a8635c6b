mod feature;
mod geometry;
mod info;
mod layer;
mod pbf;
mod value;

pub use feature::{Feature, Properties};
pub use geometry::{GeomEncoder, GeomType, Geometry, decode_parts, ring_area, to_geo};
pub use info::{LayerSummary, TileInfo};
pub use layer::{DEFAULT_EXTENT, LAYER_VERSION, Layer};
pub use value::Value;

use pbf::{PbfReader, PbfWriter, WIRE_LEN};

use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorTile {
    pub layers: Vec<Layer>,
}

impl VectorTile {
    pub fn from_bytes(data: &[u8]) -> Result<VectorTile> {
        let mut reader = PbfReader::new(data);
        let mut layers = Vec::new();
        while reader.has_remaining() {
            match reader.read_key()? {
                (3, WIRE_LEN) => layers.push(Layer::read(reader.read_bytes()?)?),
                (_, wire_type) => reader.skip(wire_type)?,
            }
        }
        Ok(VectorTile { layers })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode_layers(&self.layers)
    }

    pub fn find_layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.layers.iter().all(Layer::is_empty)
    }
}

pub fn encode_layers(layers: &[Layer]) -> Result<Vec<u8>> {
    let mut writer = PbfWriter::new();
    for layer in layers {
        writer.write_bytes_field(3, &layer.to_bytes()?)?;
    }
    Ok(writer.into_bytes())
}
