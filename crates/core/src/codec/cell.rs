//! Table cell values
//!
//! A stored cell is `version(8) ++ indicator ++ payload`. The indicator byte
//! tells the reader how to interpret the payload; the property definition at
//! the cell's qualifier supplies the rest.

use super::scalar::{read_scalar, scalar_len, write_scalar};
use super::{encode_exact, ByteSink};
use crate::definition::{PropertyDefinition, PropertyKind};
use crate::error::{Error, Result};
use crate::value::Value;
use crate::varint::read_varint;
use crate::version::{Version, VERSION_BYTE_SIZE};

/// Leading byte of an encoded cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeIndicator {
    /// Deleted value
    Tombstone = 0x00,
    /// Scalar bytes or a container count
    Plain = 0x01,
    /// Type index followed by scalar bytes
    SimpleTagged = 0x02,
    /// Type index only; the payload lives in child cells
    ComplexTagged = 0x03,
    /// Embedded object exists; fields live in child cells
    EmbedMarker = 0x04,
}

impl TryFrom<u8> for TypeIndicator {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            0x00 => Ok(TypeIndicator::Tombstone),
            0x01 => Ok(TypeIndicator::Plain),
            0x02 => Ok(TypeIndicator::SimpleTagged),
            0x03 => Ok(TypeIndicator::ComplexTagged),
            0x04 => Ok(TypeIndicator::EmbedMarker),
            other => Err(Error::Decode(format!("unknown type indicator {other:#04x}"))),
        }
    }
}

/// Decoded content of one cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellValue {
    /// Deleted value
    Tombstone,
    /// Scalar value
    Scalar(Value),
    /// Element count of a list, set or map
    Count(u64),
    /// Multi-type value whose payload is a scalar
    SimpleTagged {
        /// Type index
        type_index: u32,
        /// Scalar payload
        value: Value,
    },
    /// Multi-type value whose payload is stored below it
    ComplexTagged(u32),
    /// Embedded object marker
    EmbedMarker,
}

impl CellValue {
    /// Indicator byte for this cell
    pub fn indicator(&self) -> TypeIndicator {
        match self {
            CellValue::Tombstone => TypeIndicator::Tombstone,
            CellValue::Scalar(_) | CellValue::Count(_) => TypeIndicator::Plain,
            CellValue::SimpleTagged { .. } => TypeIndicator::SimpleTagged,
            CellValue::ComplexTagged(_) => TypeIndicator::ComplexTagged,
            CellValue::EmbedMarker => TypeIndicator::EmbedMarker,
        }
    }

    /// Whether the cell marks a deletion
    pub fn is_tombstone(&self) -> bool {
        matches!(self, CellValue::Tombstone)
    }

    /// Write indicator and payload
    pub fn write(&self, sink: &mut dyn ByteSink) -> Result<()> {
        sink.put_u8(self.indicator() as u8);
        match self {
            CellValue::Tombstone | CellValue::EmbedMarker => Ok(()),
            CellValue::Scalar(value) => write_scalar(value, sink),
            CellValue::Count(count) => {
                sink.put_varint(*count);
                Ok(())
            }
            CellValue::SimpleTagged { type_index, value } => {
                sink.put_varint(u64::from(*type_index));
                write_scalar(value, sink)
            }
            CellValue::ComplexTagged(type_index) => {
                sink.put_varint(u64::from(*type_index));
                Ok(())
            }
        }
    }

    /// Encoded length without the version prefix
    pub fn byte_size(&self) -> Result<usize> {
        let payload = match self {
            CellValue::Tombstone | CellValue::EmbedMarker => 0,
            CellValue::Scalar(value) => scalar_len(value)?,
            CellValue::Count(count) => crate::varint::varint_len(*count),
            CellValue::SimpleTagged { type_index, value } => {
                crate::varint::varint_len(u64::from(*type_index)) + scalar_len(value)?
            }
            CellValue::ComplexTagged(type_index) => {
                crate::varint::varint_len(u64::from(*type_index))
            }
        };
        Ok(1 + payload)
    }

    /// Encode without the version prefix
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode_exact(|sink| self.write(sink))
    }

    /// Encode as `version ++ indicator ++ payload`
    pub fn to_versioned_bytes(&self, version: Version) -> Result<Vec<u8>> {
        encode_exact(|sink| {
            sink.put(&version.to_bytes());
            self.write(sink)
        })
    }

    /// Decode a cell stored at a qualifier with definition `def`
    pub fn decode(bytes: &[u8], def: &PropertyDefinition) -> Result<CellValue> {
        let (&first, payload) = bytes
            .split_first()
            .ok_or_else(|| Error::Decode("empty cell".into()))?;
        match TypeIndicator::try_from(first)? {
            TypeIndicator::Tombstone => Ok(CellValue::Tombstone),
            TypeIndicator::EmbedMarker => Ok(CellValue::EmbedMarker),
            TypeIndicator::Plain => match &def.kind {
                PropertyKind::Scalar(kind) => Ok(CellValue::Scalar(read_scalar(*kind, payload)?)),
                kind if kind.is_container() => {
                    let (count, used) = read_varint(payload)?;
                    expect_consumed(payload, used)?;
                    Ok(CellValue::Count(count))
                }
                other => Err(Error::Corruption(format!(
                    "plain cell for {} property '{}'",
                    other.name(),
                    def.name
                ))),
            },
            TypeIndicator::SimpleTagged => {
                let (type_index, used) = read_varint(payload)?;
                let type_index = type_index_from(type_index)?;
                let kind = match &def.kind {
                    PropertyKind::MultiType(types) => types
                        .get(&type_index)
                        .and_then(|t| t.scalar_kind())
                        .ok_or_else(|| {
                            Error::Corruption(format!(
                                "type {type_index} of '{}' is not a scalar type",
                                def.name
                            ))
                        })?,
                    _ => {
                        return Err(Error::Corruption(format!(
                            "tagged cell for non multi-type '{}'",
                            def.name
                        )))
                    }
                };
                Ok(CellValue::SimpleTagged {
                    type_index,
                    value: read_scalar(kind, &payload[used..])?,
                })
            }
            TypeIndicator::ComplexTagged => {
                let (type_index, used) = read_varint(payload)?;
                expect_consumed(payload, used)?;
                Ok(CellValue::ComplexTagged(type_index_from(type_index)?))
            }
        }
    }

    /// Decode a `version ++ cell` value
    pub fn decode_versioned(bytes: &[u8], def: &PropertyDefinition) -> Result<(Version, CellValue)> {
        let (version, rest) = split_version(bytes)?;
        Ok((version, CellValue::decode(rest, def)?))
    }
}

/// Split the leading version off a stored value
pub fn split_version(bytes: &[u8]) -> Result<(Version, &[u8])> {
    let version = Version::from_bytes(bytes)?;
    Ok((version, &bytes[VERSION_BYTE_SIZE..]))
}

fn expect_consumed(payload: &[u8], used: usize) -> Result<()> {
    if used == payload.len() {
        Ok(())
    } else {
        Err(Error::Decode(format!(
            "{} trailing bytes in cell",
            payload.len() - used
        )))
    }
}

fn type_index_from(raw: u64) -> Result<u32> {
    u32::try_from(raw).map_err(|_| Error::Decode(format!("type index {raw} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> PropertyDefinition {
        PropertyDefinition::multi_type(
            "contact",
            [
                (1, PropertyDefinition::text("email")),
                (2, PropertyDefinition::list("phones", PropertyDefinition::text("phone"))),
            ],
        )
    }

    #[test]
    fn test_scalar_cell() {
        let def = PropertyDefinition::int("age");
        let cell = CellValue::Scalar(Value::Int(-4));
        let bytes = cell.to_versioned_bytes(Version::new(9, 1)).unwrap();
        assert_eq!(bytes[8], TypeIndicator::Plain as u8);
        assert_eq!(bytes.len(), 8 + cell.byte_size().unwrap());
        let (version, decoded) = CellValue::decode_versioned(&bytes, &def).unwrap();
        assert_eq!(version, Version::new(9, 1));
        assert_eq!(decoded, cell);
    }

    #[test]
    fn test_count_cell() {
        let def = PropertyDefinition::set("s", PropertyDefinition::uint("i"));
        let bytes = CellValue::Count(300).to_bytes().unwrap();
        assert_eq!(CellValue::decode(&bytes, &def).unwrap(), CellValue::Count(300));
    }

    #[test]
    fn test_tagged_cells() {
        let simple = CellValue::SimpleTagged {
            type_index: 1,
            value: Value::Text("a@b".into()),
        };
        let bytes = simple.to_bytes().unwrap();
        assert_eq!(CellValue::decode(&bytes, &contact()).unwrap(), simple);

        let complex = CellValue::ComplexTagged(2);
        let bytes = complex.to_bytes().unwrap();
        assert_eq!(bytes, vec![0x03, 0x02]);
        assert_eq!(CellValue::decode(&bytes, &contact()).unwrap(), complex);
    }

    #[test]
    fn test_markers_need_no_payload() {
        let def = PropertyDefinition::text("t");
        assert_eq!(CellValue::Tombstone.to_bytes().unwrap(), vec![0x00]);
        assert_eq!(CellValue::decode(&[0x04], &def).unwrap(), CellValue::EmbedMarker);
    }

    #[test]
    fn test_corrupt_cells_rejected() {
        let def = PropertyDefinition::text("t");
        assert!(CellValue::decode(&[], &def).is_err());
        assert!(CellValue::decode(&[0x09], &def).is_err());
        assert!(CellValue::decode(&[0x02, 0x01, b'a'], &def).is_err());
        // simple tag pointing at a complex type
        assert!(CellValue::decode(&[0x02, 0x02], &contact()).is_err());
        assert!(CellValue::decode_versioned(&[0, 0, 1], &def).is_err());
    }
}
