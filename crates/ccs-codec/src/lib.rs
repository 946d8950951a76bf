//! Tagged binary codec for the compiler cache store.
//!
//! Every record on disk has the shape
//!
//! ```text
//! [i64 objectId][u8 tag][payload]
//! ```
//!
//! where the tag selects the payload grammar (see [`Tag`]). All integers are
//! little-endian and fixed width, doubles are IEEE-754 bit patterns, and
//! strings and blobs are `i64`-length-prefixed. A stream may be terminated by
//! the sentinel identifier `-1`, which can never collide with a real
//! identifier.
//!
//! # Architecture
//!
//! - [`ObjectRegistry`]: appends records to an in-memory buffer and allocates
//!   stream-local identifiers
//! - [`RecordReader`]: walks a byte slice record by record, validating tags,
//!   lengths, and bounds
//! - [`Value`] / [`Primitive`]: the decoded form of a record's payload

pub mod error;
pub mod reader;
pub mod tag;
pub mod value;
pub mod writer;

pub use error::{CodecError, CodecResult};
pub use reader::{read_record_at, Record, RecordReader};
pub use tag::Tag;
pub use value::{Primitive, Value};
pub use writer::ObjectRegistry;

/// Wire value of the end-of-stream sentinel.
pub const END_OF_STREAM: i64 = -1;

#[cfg(test)]
mod tests {
    use super::*;
    use ccs_types::ObjectIdentifier;

    #[test]
    fn registry_stream_reads_back_in_order() {
        let mut registry = ObjectRegistry::new();
        let a = registry.allocate_object();
        let b = registry.allocate_object();
        let t = registry.allocate_object();
        registry.define_primitive(a, &Primitive::Int(3)).unwrap();
        registry
            .define_primitive(b, &Primitive::from("seven"))
            .unwrap();
        registry.define_tuple(t, &[a, b]).unwrap();
        registry.define_end_of_stream();

        let bytes = registry.into_bytes();
        let mut reader = RecordReader::new(&bytes);

        let first = reader.next_record().unwrap().unwrap();
        assert_eq!(first.id, a);
        assert_eq!(first.value, Value::Primitive(Primitive::Int(3)));

        let second = reader.next_record().unwrap().unwrap();
        assert_eq!(second.id, b);
        assert_eq!(second.value, Value::Primitive(Primitive::from("seven")));

        let third = reader.next_record().unwrap().unwrap();
        assert_eq!(third.id, t);
        assert_eq!(third.value, Value::Tuple(vec![a, b]));

        assert!(reader.next_record().unwrap().is_none());
        assert!(reader.is_exhausted());
    }

    #[test]
    fn records_are_independently_reparseable() {
        let mut registry = ObjectRegistry::new();
        registry
            .define_primitive(ObjectIdentifier::new(10), &Primitive::Float(2.5))
            .unwrap();
        let second_offset = registry.bytecount() as usize;
        registry
            .define_tuple(
                ObjectIdentifier::new(11),
                &[ObjectIdentifier::new(3), ObjectIdentifier::new(7)],
            )
            .unwrap();

        let bytes = registry.into_bytes();
        let record = read_record_at(&bytes, second_offset).unwrap();
        assert_eq!(record.id, ObjectIdentifier::new(11));
        assert_eq!(
            record.value,
            Value::Tuple(vec![ObjectIdentifier::new(3), ObjectIdentifier::new(7)])
        );
        assert_eq!(record.offset, second_offset);
        assert_eq!(record.offset + record.len, bytes.len());
    }

    #[test]
    fn sentinel_is_the_only_negative_identifier() {
        let mut registry = ObjectRegistry::new();
        registry.define_end_of_stream();
        assert_eq!(registry.as_bytes(), &END_OF_STREAM.to_le_bytes());
    }
}
