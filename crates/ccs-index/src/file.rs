use ccs_codec::{read_record_at, ObjectRegistry, Primitive, RecordReader, Value};
use ccs_types::{CompilerMapKey, ObjectIdentifier, OnDiskLocation};

use crate::error::{IndexError, IndexResult};

const MAGIC: &[u8; 4] = b"CCSI";
const FOOTER_MAGIC: &[u8; 4] = b"CCSE";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 8;
/// data_len (8) + data crc (4) + index crc (4) + magic (4)
const FOOTER_LEN: usize = 20;

/// Where one object's record sits in the paired data file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocationEntry {
    pub id: ObjectIdentifier,
    pub offset: u64,
    pub length: u64,
    /// CRC32 of the record bytes.
    pub crc32: u32,
}

impl LocationEntry {
    pub fn location(&self, generation: u64) -> OnDiskLocation {
        OnDiskLocation::new(generation, self.offset, self.length)
    }
}

/// Persisted index for one store-file pair.
///
/// Layout:
/// ```text
/// "CCSI" | u32 version
/// [i64 id][LIST_OF_PRIMITIVES][3][INT offset][INT length][INT crc32] ... i64 -1
/// [i64 id][STR][32][key bytes]                                       ... i64 -1
/// u64 data_len | u32 data_crc32 | u32 index_crc32 | "CCSE"
/// ```
/// The index CRC covers every byte before it, so a torn write is caught
/// either by the missing footer magic or by the checksum.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexFile {
    pub locations: Vec<LocationEntry>,
    pub bindings: Vec<(CompilerMapKey, ObjectIdentifier)>,
    pub data_len: u64,
    pub data_crc32: u32,
}

impl IndexFile {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> IndexResult<Vec<u8>> {
        let mut registry = ObjectRegistry::new();
        for entry in &self.locations {
            let fields = [
                Primitive::Int(to_wire_u64(entry.offset)?),
                Primitive::Int(to_wire_u64(entry.length)?),
                Primitive::Int(i64::from(entry.crc32)),
            ];
            registry.define_list_of_primitives(entry.id, &fields)?;
        }
        registry.define_end_of_stream();
        for (key, id) in &self.bindings {
            registry.define_primitive(*id, &Primitive::Str(key.as_bytes().to_vec()))?;
        }
        registry.define_end_of_stream();

        let mut buf = Vec::with_capacity(HEADER_LEN + registry.bytecount() as usize + FOOTER_LEN);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(registry.as_bytes());
        buf.extend_from_slice(&self.data_len.to_le_bytes());
        buf.extend_from_slice(&self.data_crc32.to_le_bytes());
        let index_crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&index_crc.to_le_bytes());
        buf.extend_from_slice(FOOTER_MAGIC);
        Ok(buf)
    }

    /// Deserialize from bytes, validating framing, checksum, and every record.
    pub fn from_bytes(data: &[u8]) -> IndexResult<Self> {
        if data.len() < HEADER_LEN + FOOTER_LEN {
            return Err(IndexError::Truncated { len: data.len() });
        }
        if &data[0..4] != MAGIC {
            return Err(IndexError::InvalidMagic {
                expected: "CCSI".into(),
                actual: String::from_utf8_lossy(&data[0..4]).into(),
            });
        }
        let version = read_u32(&data[4..8]);
        if version != VERSION {
            return Err(IndexError::UnsupportedVersion(version));
        }

        let footer_start = data.len() - FOOTER_LEN;
        let footer = &data[footer_start..];
        if &footer[16..20] != FOOTER_MAGIC {
            return Err(IndexError::MissingFooter);
        }
        let data_len = read_u64(&footer[0..8]);
        let data_crc32 = read_u32(&footer[8..12]);
        let expected_crc = read_u32(&footer[12..16]);
        let actual_crc = crc32fast::hash(&data[..footer_start + 12]);
        if actual_crc != expected_crc {
            return Err(IndexError::ChecksumMismatch {
                what: "index",
                expected: expected_crc,
                actual: actual_crc,
            });
        }

        let body = &data[HEADER_LEN..footer_start];
        let mut reader = RecordReader::new(body);

        let mut locations = Vec::new();
        while let Some(record) = reader.next_record()? {
            locations.push(parse_location(record.id, &record.value, HEADER_LEN + record.offset)?);
        }

        let mut bindings = Vec::new();
        while let Some(record) = reader.next_record()? {
            let offset = HEADER_LEN + record.offset;
            let bytes = match &record.value {
                Value::Primitive(Primitive::Str(bytes)) => bytes,
                other => {
                    return Err(IndexError::Malformed {
                        offset,
                        reason: format!("expected key bytes, found {}", other.tag()),
                    })
                }
            };
            bindings.push((CompilerMapKey::from_slice(bytes)?, record.id));
        }

        if !reader.is_exhausted() {
            return Err(IndexError::Malformed {
                offset: HEADER_LEN + reader.position(),
                reason: "trailing bytes after binding section".into(),
            });
        }

        Ok(Self {
            locations,
            bindings,
            data_len,
            data_crc32,
        })
    }

    /// Check the paired data file against this index.
    ///
    /// Verifies the data file's length and checksum, that every location lies
    /// within it, and that the record at each location decodes, carries the
    /// expected identifier, spans exactly the recorded length, and matches
    /// its CRC.
    pub fn validate_against(&self, generation: u64, data: &[u8]) -> IndexResult<()> {
        let actual_len = data.len() as u64;
        if actual_len != self.data_len {
            return Err(IndexError::DataLengthMismatch {
                expected: self.data_len,
                actual: actual_len,
            });
        }
        let actual_crc = crc32fast::hash(data);
        if actual_crc != self.data_crc32 {
            return Err(IndexError::ChecksumMismatch {
                what: "data",
                expected: self.data_crc32,
                actual: actual_crc,
            });
        }

        for entry in &self.locations {
            let location = entry.location(generation);
            if !location.fits_within(actual_len) {
                return Err(IndexError::LocationOutOfBounds {
                    id: entry.id,
                    location,
                    data_len: actual_len,
                });
            }
            let start = entry.offset as usize;
            let end = start + entry.length as usize;
            let record = read_record_at(&data[..end], start)?;
            if record.id != entry.id || record.len as u64 != entry.length {
                return Err(IndexError::Malformed {
                    offset: start,
                    reason: format!(
                        "record {} ({} bytes) does not match index entry {} ({} bytes)",
                        record.id, record.len, entry.id, entry.length
                    ),
                });
            }
            let crc = crc32fast::hash(&data[start..end]);
            if crc != entry.crc32 {
                return Err(IndexError::ChecksumMismatch {
                    what: "record",
                    expected: entry.crc32,
                    actual: crc,
                });
            }
        }
        Ok(())
    }
}

fn parse_location(id: ObjectIdentifier, value: &Value, offset: usize) -> IndexResult<LocationEntry> {
    let malformed = |reason: &str| IndexError::Malformed {
        offset,
        reason: reason.to_string(),
    };
    let fields = value
        .as_list()
        .ok_or_else(|| malformed("location record is not a list of primitives"))?;
    let ints: Vec<i64> = fields.iter().filter_map(Primitive::as_int).collect();
    let &[raw_offset, raw_length, raw_crc] = ints.as_slice() else {
        return Err(malformed("location record must hold three integers"));
    };
    if ints.len() != fields.len() {
        return Err(malformed("location record must hold three integers"));
    }
    let offset_field = u64::try_from(raw_offset).map_err(|_| malformed("negative offset"))?;
    let length = u64::try_from(raw_length).map_err(|_| malformed("negative length"))?;
    let crc32 = u32::try_from(raw_crc).map_err(|_| malformed("crc out of range"))?;
    Ok(LocationEntry {
        id,
        offset: offset_field,
        length,
        crc32,
    })
}

fn to_wire_u64(value: u64) -> IndexResult<i64> {
    i64::try_from(value).map_err(|_| IndexError::Malformed {
        offset: 0,
        reason: format!("value {value} does not fit in a signed 64-bit field"),
    })
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(word)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccs_codec::CodecError;

    fn id(n: u64) -> ObjectIdentifier {
        ObjectIdentifier::new(n)
    }

    /// Two int records and a matching index.
    fn sample() -> (IndexFile, Vec<u8>) {
        let mut registry = ObjectRegistry::new();
        registry.define_primitive(id(3), &Primitive::Int(30)).unwrap();
        let split = registry.bytecount();
        registry.define_primitive(id(7), &Primitive::Int(70)).unwrap();
        let data = registry.into_bytes();

        let locations = vec![
            LocationEntry {
                id: id(3),
                offset: 0,
                length: split,
                crc32: crc32fast::hash(&data[..split as usize]),
            },
            LocationEntry {
                id: id(7),
                offset: split,
                length: data.len() as u64 - split,
                crc32: crc32fast::hash(&data[split as usize..]),
            },
        ];
        let index = IndexFile {
            locations,
            bindings: vec![(CompilerMapKey::from_raw([9; 32]), id(7))],
            data_len: data.len() as u64,
            data_crc32: crc32fast::hash(&data),
        };
        (index, data)
    }

    #[test]
    fn serialization_roundtrip() {
        let (index, _) = sample();
        let bytes = index.to_bytes().unwrap();
        assert_eq!(IndexFile::from_bytes(&bytes).unwrap(), index);
    }

    #[test]
    fn empty_index_roundtrip() {
        let index = IndexFile::default();
        let bytes = index.to_bytes().unwrap();
        let parsed = IndexFile::from_bytes(&bytes).unwrap();
        assert!(parsed.locations.is_empty() && parsed.bindings.is_empty());
        assert!(parsed.validate_against(0, &[]).is_ok());
    }

    #[test]
    fn validate_against_matching_data() {
        let (index, data) = sample();
        index.validate_against(1, &data).unwrap();
    }

    #[test]
    fn from_bytes_bad_magic() {
        let (index, _) = sample();
        let mut bytes = index.to_bytes().unwrap();
        bytes[0..4].copy_from_slice(b"BADM");
        let err = IndexFile::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, IndexError::InvalidMagic { .. }));
    }

    #[test]
    fn from_bytes_bad_version() {
        let (index, _) = sample();
        let mut bytes = index.to_bytes().unwrap();
        bytes[4..8].copy_from_slice(&99u32.to_le_bytes());
        let err = IndexFile::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, IndexError::UnsupportedVersion(99)));
    }

    #[test]
    fn from_bytes_truncated() {
        let err = IndexFile::from_bytes(b"CCSI").unwrap_err();
        assert!(matches!(err, IndexError::Truncated { len: 4 }));
    }

    #[test]
    fn torn_write_loses_footer() {
        let (index, _) = sample();
        let bytes = index.to_bytes().unwrap();
        let err = IndexFile::from_bytes(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, IndexError::MissingFooter));
    }

    #[test]
    fn flipped_byte_fails_checksum() {
        let (index, _) = sample();
        let mut bytes = index.to_bytes().unwrap();
        bytes[HEADER_LEN + 2] ^= 0xff;
        let err = IndexFile::from_bytes(&bytes).unwrap_err();
        assert!(matches!(
            err,
            IndexError::ChecksumMismatch { what: "index", .. }
        ));
    }

    #[test]
    fn truncated_data_file_is_rejected() {
        let (index, data) = sample();
        let err = index
            .validate_against(1, &data[..data.len() - 1])
            .unwrap_err();
        assert!(matches!(err, IndexError::DataLengthMismatch { .. }));
    }

    #[test]
    fn corrupted_data_file_is_rejected() {
        let (index, mut data) = sample();
        data[9] ^= 0x01;
        let err = index.validate_against(1, &data).unwrap_err();
        assert!(matches!(err, IndexError::ChecksumMismatch { what: "data", .. }));
    }

    #[test]
    fn out_of_bounds_location_is_rejected() {
        let (mut index, data) = sample();
        index.locations[1].length += 100;
        let err = index.validate_against(1, &data).unwrap_err();
        assert!(matches!(err, IndexError::LocationOutOfBounds { .. }));
    }

    #[test]
    fn mismatched_identifier_is_rejected() {
        let (mut index, data) = sample();
        index.locations[0].id = id(4);
        let err = index.validate_against(1, &data).unwrap_err();
        assert!(matches!(err, IndexError::Malformed { .. }));
    }

    #[test]
    fn record_with_malformed_tag_is_rejected() {
        let mut data = 0i64.to_le_bytes().to_vec();
        data.push(0xee);
        let index = IndexFile {
            locations: vec![LocationEntry {
                id: id(0),
                offset: 0,
                length: data.len() as u64,
                crc32: crc32fast::hash(&data),
            }],
            bindings: vec![],
            data_len: data.len() as u64,
            data_crc32: crc32fast::hash(&data),
        };
        let err = index.validate_against(0, &data).unwrap_err();
        assert!(matches!(
            err,
            IndexError::Codec(CodecError::UnknownTag { tag: 0xee, .. })
        ));
    }

    #[test]
    fn location_entry_builds_location() {
        let (index, _) = sample();
        let loc = index.locations[1].location(5);
        assert_eq!(loc.generation, 5);
        assert_eq!(loc.offset, index.locations[1].offset);
    }
}
