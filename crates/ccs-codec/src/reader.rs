use ccs_types::ObjectIdentifier;

use crate::error::{CodecError, CodecResult};
use crate::tag::Tag;
use crate::value::{Primitive, Value};
use crate::END_OF_STREAM;

/// One decoded record and the byte span it occupied.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub id: ObjectIdentifier,
    pub value: Value,
    /// Offset of the identifier prefix.
    pub offset: usize,
    /// Total bytes, identifier prefix included.
    pub len: usize,
}

/// Sequential reader over a tagged record stream.
///
/// The reader never trusts a length field: every count is checked against
/// the bytes that remain before anything is allocated.
#[derive(Debug)]
pub struct RecordReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Start reading at `pos`.
    pub fn at(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Returns `true` once every byte has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Read the next record, or `None` if the next word is the sentinel.
    pub fn next_record(&mut self) -> CodecResult<Option<Record>> {
        let offset = self.pos;
        let Some(id) = self.read_identifier_or_sentinel()? else {
            return Ok(None);
        };
        let value = self.read_value()?;
        Ok(Some(Record {
            id,
            value,
            offset,
            len: self.pos - offset,
        }))
    }

    /// Read an identifier, returning `None` for the end-of-stream sentinel.
    pub fn read_identifier_or_sentinel(&mut self) -> CodecResult<Option<ObjectIdentifier>> {
        let raw = self.read_i64()?;
        if raw == END_OF_STREAM {
            return Ok(None);
        }
        Ok(Some(ObjectIdentifier::from_wire(raw)?))
    }

    /// Read a tag byte followed by its payload.
    pub fn read_value(&mut self) -> CodecResult<Value> {
        let tag = self.read_tag()?;
        match tag {
            Tag::ListOfPrimitives => self.read_list().map(Value::List),
            Tag::Tuple => self.read_tuple().map(Value::Tuple),
            Tag::PackedHomogenousData => {
                let dtype_offset = self.pos;
                let dtype = match self.read_value()? {
                    Value::Primitive(Primitive::Str(bytes)) => String::from_utf8(bytes)
                        .map_err(|_| CodecError::InvalidUtf8 {
                            offset: dtype_offset,
                        })?,
                    other => return Err(CodecError::InvalidDescriptor { found: other.tag() }),
                };
                let bytes = self.read_blob()?.to_vec();
                Ok(Value::Packed { dtype, bytes })
            }
            t if t.is_opaque() => {
                let payload = self.read_blob()?.to_vec();
                Ok(Value::Opaque { tag: t, payload })
            }
            t => self.read_primitive_payload(t).map(Value::Primitive),
        }
    }

    pub fn read_tag(&mut self) -> CodecResult<Tag> {
        let offset = self.pos;
        let byte = self.read_u8()?;
        Tag::from_byte(byte).ok_or(CodecError::UnknownTag { offset, tag: byte })
    }

    pub fn read_u8(&mut self) -> CodecResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i64(&mut self) -> CodecResult<i64> {
        let bytes = self.take(8)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(bytes);
        Ok(i64::from_le_bytes(word))
    }

    pub fn read_f64(&mut self) -> CodecResult<f64> {
        let bits = self.read_i64()? as u64;
        Ok(f64::from_bits(bits))
    }

    /// Read an `i64` length and that many bytes.
    pub fn read_blob(&mut self) -> CodecResult<&'a [u8]> {
        let len = self.read_length(1)?;
        self.take(len)
    }

    fn read_primitive_payload(&mut self, tag: Tag) -> CodecResult<Primitive> {
        match tag {
            Tag::None => Ok(Primitive::None),
            Tag::Int => self.read_i64().map(Primitive::Int),
            Tag::Float => self.read_f64().map(Primitive::Float),
            Tag::Bool => {
                let offset = self.pos;
                match self.read_u8()? {
                    0 => Ok(Primitive::Bool(false)),
                    1 => Ok(Primitive::Bool(true)),
                    byte => Err(CodecError::InvalidBool { offset, byte }),
                }
            }
            Tag::Str => self.read_blob().map(|b| Primitive::Str(b.to_vec())),
            Tag::Long => Err(CodecError::Unsupported { tag }),
            found => Err(CodecError::NotPrimitive { found }),
        }
    }

    fn read_list(&mut self) -> CodecResult<Vec<Primitive>> {
        // Each element is at least one tag byte.
        let count = self.read_length(1)?;
        let mut items = Vec::with_capacity(count);
        let mut expected = None;
        for _ in 0..count {
            let tag = self.read_tag()?;
            if !tag.is_primitive() {
                return Err(CodecError::NotPrimitive { found: tag });
            }
            match expected {
                None => expected = Some(tag),
                Some(e) if e != tag => {
                    return Err(CodecError::HeterogeneousList {
                        expected: e,
                        found: tag,
                    })
                }
                Some(_) => {}
            }
            items.push(self.read_primitive_payload(tag)?);
        }
        Ok(items)
    }

    fn read_tuple(&mut self) -> CodecResult<Vec<ObjectIdentifier>> {
        let count = self.read_length(8)?;
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let raw = self.read_i64()?;
            ids.push(ObjectIdentifier::from_wire(raw)?);
        }
        Ok(ids)
    }

    /// Read a count whose elements occupy at least `min_element_size` bytes each.
    fn read_length(&mut self, min_element_size: usize) -> CodecResult<usize> {
        let offset = self.pos;
        let length = self.read_i64()?;
        if length < 0 {
            return Err(CodecError::NegativeLength { offset, length });
        }
        let needed = usize::try_from(length)
            .ok()
            .and_then(|n| n.checked_mul(min_element_size))
            .unwrap_or(usize::MAX);
        if needed > self.remaining() {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed,
                available: self.remaining(),
            });
        }
        Ok(length as usize)
    }

    fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        if n > self.remaining() {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}

/// Decode exactly one record starting at `offset`.
///
/// Fails if the word at `offset` is the end-of-stream sentinel.
pub fn read_record_at(data: &[u8], offset: usize) -> CodecResult<Record> {
    let mut reader = RecordReader::at(data, offset);
    reader
        .next_record()?
        .ok_or(CodecError::UnexpectedSentinel { offset })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::ObjectRegistry;
    use proptest::prelude::*;

    fn id(n: u64) -> ObjectIdentifier {
        ObjectIdentifier::new(n)
    }

    fn encode(value: &Value) -> Vec<u8> {
        let mut registry = ObjectRegistry::new();
        registry.define_value(id(1), value).unwrap();
        registry.into_bytes()
    }

    fn decode(bytes: &[u8]) -> Value {
        read_record_at(bytes, 0).unwrap().value
    }

    fn primitive_strategy() -> impl Strategy<Value = Primitive> {
        prop_oneof![
            Just(Primitive::None),
            any::<i64>().prop_map(Primitive::Int),
            (-1.0e12f64..1.0e12f64).prop_map(Primitive::Float),
            any::<bool>().prop_map(Primitive::Bool),
            proptest::collection::vec(any::<u8>(), 0..64).prop_map(Primitive::Str),
        ]
    }

    proptest! {
        #[test]
        fn primitive_roundtrip(p in primitive_strategy()) {
            let value = Value::Primitive(p);
            prop_assert_eq!(decode(&encode(&value)), value);
        }

        #[test]
        fn tuple_roundtrip(members in proptest::collection::vec(0u64..=i64::MAX as u64, 0..32)) {
            let ids: Vec<_> = members.into_iter().map(ObjectIdentifier::new).collect();
            let value = Value::Tuple(ids.clone());
            let decoded = decode(&encode(&value));
            prop_assert_eq!(decoded.as_tuple(), Some(ids.as_slice()));
        }

        #[test]
        fn int_list_roundtrip(items in proptest::collection::vec(any::<i64>(), 0..32)) {
            let value = Value::List(items.into_iter().map(Primitive::Int).collect());
            prop_assert_eq!(decode(&encode(&value)), value);
        }

        #[test]
        fn truncation_is_always_detected(cut in 1usize..24) {
            let bytes = encode(&Value::Primitive(Primitive::from("truncate me")));
            let cut = cut.min(bytes.len() - 1);
            let short = &bytes[..bytes.len() - cut];
            let is_truncated = matches!(
                read_record_at(short, 0),
                Err(CodecError::Truncated { .. })
            );
            prop_assert!(is_truncated);
        }
    }

    #[test]
    fn float_bits_survive() {
        for f in [f64::INFINITY, f64::NEG_INFINITY, -0.0, f64::MIN_POSITIVE] {
            let Value::Primitive(Primitive::Float(back)) =
                decode(&encode(&Value::Primitive(Primitive::Float(f))))
            else {
                panic!("expected a float");
            };
            assert_eq!(back.to_bits(), f.to_bits());
        }
        let Value::Primitive(Primitive::Float(nan)) =
            decode(&encode(&Value::Primitive(Primitive::Float(f64::NAN))))
        else {
            panic!("expected a float");
        };
        assert!(nan.is_nan());
    }

    #[test]
    fn packed_roundtrip() {
        let value = Value::Packed {
            dtype: "<f8".into(),
            bytes: 1.5f64.to_le_bytes().to_vec(),
        };
        assert_eq!(decode(&encode(&value)), value);
    }

    #[test]
    fn opaque_roundtrip_for_every_reserved_tag() {
        for tag in Tag::ALL.into_iter().filter(|t| t.is_opaque()) {
            let value = Value::Opaque {
                tag,
                payload: vec![tag.as_byte(); 3],
            };
            assert_eq!(decode(&encode(&value)), value);
        }
    }

    #[test]
    fn empty_list_roundtrip() {
        let value = Value::List(vec![]);
        assert_eq!(decode(&encode(&value)), value);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut bytes = 0i64.to_le_bytes().to_vec();
        bytes.push(99);
        assert_eq!(
            read_record_at(&bytes, 0).unwrap_err(),
            CodecError::UnknownTag { offset: 8, tag: 99 }
        );
    }

    #[test]
    fn zero_tag_is_rejected() {
        let mut bytes = 0i64.to_le_bytes().to_vec();
        bytes.push(0);
        assert!(matches!(
            read_record_at(&bytes, 0),
            Err(CodecError::UnknownTag { tag: 0, .. })
        ));
    }

    #[test]
    fn long_tag_on_disk_is_unsupported() {
        let mut bytes = 0i64.to_le_bytes().to_vec();
        bytes.push(Tag::Long.as_byte());
        assert_eq!(
            read_record_at(&bytes, 0).unwrap_err(),
            CodecError::Unsupported { tag: Tag::Long }
        );
    }

    #[test]
    fn invalid_bool_byte() {
        let mut bytes = 0i64.to_le_bytes().to_vec();
        bytes.push(Tag::Bool.as_byte());
        bytes.push(2);
        assert_eq!(
            read_record_at(&bytes, 0).unwrap_err(),
            CodecError::InvalidBool { offset: 9, byte: 2 }
        );
    }

    #[test]
    fn negative_length_is_rejected() {
        let mut bytes = 0i64.to_le_bytes().to_vec();
        bytes.push(Tag::Str.as_byte());
        bytes.extend_from_slice(&(-4i64).to_le_bytes());
        assert_eq!(
            read_record_at(&bytes, 0).unwrap_err(),
            CodecError::NegativeLength {
                offset: 9,
                length: -4
            }
        );
    }

    #[test]
    fn huge_tuple_count_does_not_allocate() {
        let mut bytes = 0i64.to_le_bytes().to_vec();
        bytes.push(Tag::Tuple.as_byte());
        bytes.extend_from_slice(&i64::MAX.to_le_bytes());
        assert!(matches!(
            read_record_at(&bytes, 0),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn heterogeneous_list_on_disk_is_rejected() {
        let mut bytes = 0i64.to_le_bytes().to_vec();
        bytes.push(Tag::ListOfPrimitives.as_byte());
        bytes.extend_from_slice(&2i64.to_le_bytes());
        bytes.push(Tag::Int.as_byte());
        bytes.extend_from_slice(&1i64.to_le_bytes());
        bytes.push(Tag::Bool.as_byte());
        bytes.push(1);
        assert_eq!(
            read_record_at(&bytes, 0).unwrap_err(),
            CodecError::HeterogeneousList {
                expected: Tag::Int,
                found: Tag::Bool
            }
        );
    }

    #[test]
    fn negative_member_identifier_is_rejected() {
        let mut bytes = 0i64.to_le_bytes().to_vec();
        bytes.push(Tag::Tuple.as_byte());
        bytes.extend_from_slice(&1i64.to_le_bytes());
        bytes.extend_from_slice(&(-1i64).to_le_bytes());
        assert!(matches!(
            read_record_at(&bytes, 0),
            Err(CodecError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn sentinel_at_offset_is_reported() {
        let bytes = END_OF_STREAM.to_le_bytes();
        assert_eq!(
            read_record_at(&bytes, 0).unwrap_err(),
            CodecError::UnexpectedSentinel { offset: 0 }
        );
    }

    #[test]
    fn record_span_covers_payload() {
        let bytes = encode(&Value::Primitive(Primitive::Int(7)));
        let record = read_record_at(&bytes, 0).unwrap();
        assert_eq!(record.len, 17);
        assert_eq!(record.len, bytes.len());
    }
}
