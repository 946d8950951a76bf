use ccs_types::ObjectIdentifier;

use crate::error::{CodecError, CodecResult};
use crate::tag::Tag;
use crate::value::{Primitive, Value};
use crate::END_OF_STREAM;

/// Builds a stream of tagged records in memory.
///
/// Each `define_*` call appends one self-locating record: the 8-byte object
/// identifier, the tag byte, then the payload. A failed call leaves the
/// buffer exactly as it was before the call.
#[derive(Debug, Default)]
pub struct ObjectRegistry {
    buf: Vec<u8>,
    next_object_id: u64,
}

impl ObjectRegistry {
    /// Create an empty registry whose identifiers start at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next stream-local identifier.
    pub fn allocate_object(&mut self) -> ObjectIdentifier {
        let id = ObjectIdentifier::new(self.next_object_id);
        self.next_object_id += 1;
        id
    }

    /// Append a scalar record.
    pub fn define_primitive(&mut self, id: ObjectIdentifier, value: &Primitive) -> CodecResult<()> {
        self.record(id, |buf| write_primitive(buf, value))
    }

    /// Append a record for any value, dispatching on its tag.
    pub fn define_value(&mut self, id: ObjectIdentifier, value: &Value) -> CodecResult<()> {
        self.record(id, |buf| write_value(buf, value))
    }

    /// Append a homogeneous list of primitives.
    pub fn define_list_of_primitives(
        &mut self,
        id: ObjectIdentifier,
        items: &[Primitive],
    ) -> CodecResult<()> {
        self.record(id, |buf| write_list(buf, items))
    }

    /// Append a tuple whose members are identifiers, not inline values.
    pub fn define_tuple(
        &mut self,
        id: ObjectIdentifier,
        member_ids: &[ObjectIdentifier],
    ) -> CodecResult<()> {
        self.record(id, |buf| write_tuple(buf, member_ids))
    }

    /// Append a raw byte blob described by `dtype`.
    pub fn define_packed_homogeneous_data(
        &mut self,
        id: ObjectIdentifier,
        dtype: &str,
        bytes: &[u8],
    ) -> CodecResult<()> {
        self.record(id, |buf| write_packed(buf, dtype, bytes))
    }

    /// Append a higher-level object kind whose payload is kept verbatim.
    pub fn define_opaque(&mut self, id: ObjectIdentifier, tag: Tag, payload: &[u8]) -> CodecResult<()> {
        self.record(id, |buf| write_opaque(buf, tag, payload))
    }

    /// Terminate the stream with the `-1` sentinel.
    pub fn define_end_of_stream(&mut self) {
        put_i64(&mut self.buf, END_OF_STREAM);
    }

    /// Number of bytes written so far.
    pub fn bytecount(&self) -> u64 {
        self.buf.len() as u64
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Drop all written bytes. The identifier counter keeps running.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    fn record<F>(&mut self, id: ObjectIdentifier, payload: F) -> CodecResult<()>
    where
        F: FnOnce(&mut Vec<u8>) -> CodecResult<()>,
    {
        let start = self.buf.len();
        let result = put_identifier(&mut self.buf, id).and_then(|()| payload(&mut self.buf));
        if result.is_err() {
            self.buf.truncate(start);
        }
        result
    }
}

pub(crate) fn put_i64(buf: &mut Vec<u8>, value: i64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_identifier(buf: &mut Vec<u8>, id: ObjectIdentifier) -> CodecResult<()> {
    put_i64(buf, id.to_wire()?);
    Ok(())
}

/// `i64` length prefix followed by the bytes.
pub(crate) fn put_blob(buf: &mut Vec<u8>, bytes: &[u8]) {
    put_i64(buf, bytes.len() as i64);
    buf.extend_from_slice(bytes);
}

/// Write a tag and payload for a scalar (no identifier prefix).
pub fn write_primitive(buf: &mut Vec<u8>, value: &Primitive) -> CodecResult<()> {
    match value {
        Primitive::None => buf.push(Tag::None.as_byte()),
        Primitive::Int(v) => {
            buf.push(Tag::Int.as_byte());
            put_i64(buf, *v);
        }
        // Arbitrary-precision integers have no encoding yet.
        Primitive::Long(_) => return Err(CodecError::Unsupported { tag: Tag::Long }),
        Primitive::Float(v) => {
            buf.push(Tag::Float.as_byte());
            buf.extend_from_slice(&v.to_bits().to_le_bytes());
        }
        Primitive::Bool(v) => {
            buf.push(Tag::Bool.as_byte());
            buf.push(u8::from(*v));
        }
        Primitive::Str(bytes) => {
            buf.push(Tag::Str.as_byte());
            put_blob(buf, bytes);
        }
    }
    Ok(())
}

/// Write a tag and payload for any value (no identifier prefix).
pub fn write_value(buf: &mut Vec<u8>, value: &Value) -> CodecResult<()> {
    match value {
        Value::Primitive(p) => write_primitive(buf, p),
        Value::List(items) => write_list(buf, items),
        Value::Tuple(ids) => write_tuple(buf, ids),
        Value::Packed { dtype, bytes } => write_packed(buf, dtype, bytes),
        Value::Opaque { tag, payload } => write_opaque(buf, *tag, payload),
    }
}

fn write_list(buf: &mut Vec<u8>, items: &[Primitive]) -> CodecResult<()> {
    if let Some(first) = items.first() {
        let expected = first.tag();
        if let Some(other) = items.iter().find(|p| p.tag() != expected) {
            return Err(CodecError::HeterogeneousList {
                expected,
                found: other.tag(),
            });
        }
    }
    buf.push(Tag::ListOfPrimitives.as_byte());
    put_i64(buf, items.len() as i64);
    for item in items {
        write_primitive(buf, item)?;
    }
    Ok(())
}

fn write_tuple(buf: &mut Vec<u8>, member_ids: &[ObjectIdentifier]) -> CodecResult<()> {
    buf.push(Tag::Tuple.as_byte());
    put_i64(buf, member_ids.len() as i64);
    for id in member_ids {
        put_identifier(buf, *id)?;
    }
    Ok(())
}

fn write_packed(buf: &mut Vec<u8>, dtype: &str, bytes: &[u8]) -> CodecResult<()> {
    buf.push(Tag::PackedHomogenousData.as_byte());
    write_primitive(buf, &Primitive::from(dtype))?;
    put_blob(buf, bytes);
    Ok(())
}

fn write_opaque(buf: &mut Vec<u8>, tag: Tag, payload: &[u8]) -> CodecResult<()> {
    if !tag.is_opaque() {
        return Err(CodecError::NotOpaque(tag));
    }
    buf.push(tag.as_byte());
    put_blob(buf, payload);
    Ok(())
}
