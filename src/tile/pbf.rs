use varint_rs::{VarintReader, VarintWriter};

use crate::error::{Result, TileError};

pub const WIRE_VARINT: u8 = 0;
pub const WIRE_FIXED64: u8 = 1;
pub const WIRE_LEN: u8 = 2;
pub const WIRE_FIXED32: u8 = 5;

const MAX_VARINT_BYTES: usize = 10;

pub struct PbfReader<'a> {
    data: &'a [u8],
}

impl<'a> PbfReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        PbfReader { data }
    }

    pub fn has_remaining(&self) -> bool {
        !self.data.is_empty()
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        // The varint decoder shifts past 64 bits on overlong input, so bound it first.
        let terminated = self
            .data
            .iter()
            .take(MAX_VARINT_BYTES)
            .any(|byte| byte & 0x80 == 0);
        if !terminated {
            return Err(TileError::malformed("unterminated varint"));
        }
        self.data
            .read_u64_varint()
            .map_err(|err| TileError::malformed(format!("read varint: {err}")))
    }

    pub fn read_key(&mut self) -> Result<(u32, u8)> {
        let key = self.read_varint()?;
        let field = u32::try_from(key >> 3)
            .map_err(|_| TileError::malformed(format!("field number out of range: {key}")))?;
        if field == 0 {
            return Err(TileError::malformed("field number 0"));
        }
        Ok((field, (key & 0x7) as u8))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.data.len() {
            return Err(TileError::malformed(format!(
                "length {len} exceeds remaining {} bytes",
                self.data.len()
            )));
        }
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_varint()?;
        let len = usize::try_from(len)
            .map_err(|_| TileError::malformed(format!("length out of range: {len}")))?;
        self.take(len)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|err| TileError::malformed(format!("invalid utf-8 string: {err}")))
    }

    pub fn read_fixed32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_fixed64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let value = self.read_varint()?;
        u32::try_from(value).map_err(|_| TileError::malformed(format!("value {value} exceeds u32")))
    }

    /// Reads a repeated uint32 field in either packed or unpacked form.
    pub fn read_repeated_u32(&mut self, wire_type: u8, out: &mut Vec<u32>) -> Result<()> {
        match wire_type {
            WIRE_LEN => {
                let mut packed = PbfReader::new(self.read_bytes()?);
                while packed.has_remaining() {
                    out.push(packed.read_u32()?);
                }
                Ok(())
            }
            WIRE_VARINT => {
                out.push(self.read_u32()?);
                Ok(())
            }
            other => Err(TileError::malformed(format!(
                "wire type {other} is not valid for a repeated uint32"
            ))),
        }
    }

    pub fn skip(&mut self, wire_type: u8) -> Result<()> {
        match wire_type {
            WIRE_VARINT => {
                self.read_varint()?;
            }
            WIRE_FIXED64 => {
                self.take(8)?;
            }
            WIRE_LEN => {
                self.read_bytes()?;
            }
            WIRE_FIXED32 => {
                self.take(4)?;
            }
            other => return Err(TileError::malformed(format!("unsupported wire type {other}"))),
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct PbfWriter {
    buf: Vec<u8>,
}

impl PbfWriter {
    pub fn new() -> Self {
        PbfWriter::default()
    }

    pub fn write_key(&mut self, field: u32, wire_type: u8) -> Result<()> {
        self.buf
            .write_u64_varint((u64::from(field) << 3) | u64::from(wire_type))?;
        Ok(())
    }

    pub fn write_varint_field(&mut self, field: u32, value: u64) -> Result<()> {
        self.write_key(field, WIRE_VARINT)?;
        self.buf.write_u64_varint(value)?;
        Ok(())
    }

    pub fn write_bytes_field(&mut self, field: u32, bytes: &[u8]) -> Result<()> {
        self.write_key(field, WIRE_LEN)?;
        self.buf.write_usize_varint(bytes.len())?;
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    pub fn write_string_field(&mut self, field: u32, value: &str) -> Result<()> {
        self.write_bytes_field(field, value.as_bytes())
    }

    pub fn write_fixed32_field(&mut self, field: u32, value: u32) -> Result<()> {
        self.write_key(field, WIRE_FIXED32)?;
        self.buf.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_fixed64_field(&mut self, field: u32, value: u64) -> Result<()> {
        self.write_key(field, WIRE_FIXED64)?;
        self.buf.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_packed_u32_field(&mut self, field: u32, values: &[u32]) -> Result<()> {
        let mut packed = Vec::with_capacity(values.len());
        for value in values {
            packed.write_u32_varint(*value)?;
        }
        self.write_bytes_field(field, &packed)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

pub fn zigzag_encode(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

pub fn zigzag_decode(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

pub fn zigzag_encode64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn zigzag_decode64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zigzag_matches_protobuf_table() {
        assert_eq!(zigzag_encode(0), 0);
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
        assert_eq!(zigzag_encode(-2), 3);
        assert_eq!(zigzag_encode(i32::MAX), u32::MAX - 1);
        assert_eq!(zigzag_encode(i32::MIN), u32::MAX);
        for value in [-4096, -3, 0, 7, 4096, i32::MIN, i32::MAX] {
            assert_eq!(zigzag_decode(zigzag_encode(value)), value);
        }
        assert_eq!(zigzag_decode64(zigzag_encode64(-42)), -42);
    }

    #[test]
    fn packed_and_unpacked_uint32_are_both_accepted() {
        let mut writer = PbfWriter::new();
        writer.write_packed_u32_field(2, &[1, 300, 7]).expect("packed");
        writer.write_varint_field(2, 9).expect("unpacked");
        let bytes = writer.into_bytes();

        let mut reader = PbfReader::new(&bytes);
        let mut values = Vec::new();
        while reader.has_remaining() {
            let (field, wire_type) = reader.read_key().expect("key");
            assert_eq!(field, 2);
            reader
                .read_repeated_u32(wire_type, &mut values)
                .expect("values");
        }
        assert_eq!(values, vec![1, 300, 7, 9]);
    }

    #[test]
    fn truncated_length_is_malformed() {
        let bytes = [0x1a, 0x05, 0x01];
        let mut reader = PbfReader::new(&bytes);
        reader.read_key().expect("key");
        assert!(matches!(reader.read_bytes(), Err(TileError::MalformedTile(_))));
    }

    #[test]
    fn overlong_varint_is_malformed() {
        let bytes = [0xff; 12];
        let mut reader = PbfReader::new(&bytes);
        assert!(reader.read_varint().is_err());
    }
}
