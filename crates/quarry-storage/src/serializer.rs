//! Consumed interfaces: record serialization and schema lookup.
//!
//! The storage core moves opaque byte records; turning a logical record into
//! bytes and back belongs to the layer above. These traits are the seam, and
//! [`BinarySerializer`] is the default implementation used by tests and by
//! embedders that have no serializer of their own.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use quarry_common::error::{QuarryError, QuarryResult};
use quarry_common::types::{varint, FileId};

/// A logical record value.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Ordered list of values.
    List(Vec<Document>),
    /// String-keyed map of values (an embedded document).
    Map(BTreeMap<String, Document>),
}

/// Turns logical records into byte buffers and back.
pub trait RecordSerializer: Send + Sync {
    /// Serializes a record.
    fn serialize(&self, record: &Document) -> QuarryResult<Vec<u8>>;
    /// Deserializes a record.
    fn deserialize(&self, bytes: &[u8]) -> QuarryResult<Document>;
}

/// Maps bucket file ids to logical type names and back.
pub trait SchemaRegistry: Send + Sync {
    /// Returns the logical type stored in a bucket.
    fn type_for_bucket(&self, bucket_id: FileId) -> Option<String>;
    /// Returns the bucket holding a logical type.
    fn bucket_for_type(&self, type_name: &str) -> Option<FileId>;
}

/// An in-memory [`SchemaRegistry`].
#[derive(Default)]
pub struct MapSchemaRegistry {
    by_bucket: RwLock<BTreeMap<FileId, String>>,
    by_type: RwLock<BTreeMap<String, FileId>>,
}

impl MapSchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a bucket/type association.
    pub fn register(&self, bucket_id: FileId, type_name: impl Into<String>) {
        let type_name = type_name.into();
        self.by_bucket.write().insert(bucket_id, type_name.clone());
        self.by_type.write().insert(type_name, bucket_id);
    }
}

impl SchemaRegistry for MapSchemaRegistry {
    fn type_for_bucket(&self, bucket_id: FileId) -> Option<String> {
        self.by_bucket.read().get(&bucket_id).cloned()
    }

    fn bucket_for_type(&self, type_name: &str) -> Option<FileId> {
        self.by_type.read().get(type_name).copied()
    }
}

/// The default tag-plus-varint binary codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinarySerializer;

const TAG_NULL: u8 = 0;
const TAG_BOOL_FALSE: u8 = 1;
const TAG_BOOL_TRUE: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_STRING: u8 = 5;
const TAG_BYTES: u8 = 6;
const TAG_LIST: u8 = 7;
const TAG_MAP: u8 = 8;

impl BinarySerializer {
    fn encode(out: &mut Vec<u8>, value: &Document) {
        match value {
            Document::Null => out.push(TAG_NULL),
            Document::Bool(false) => out.push(TAG_BOOL_FALSE),
            Document::Bool(true) => out.push(TAG_BOOL_TRUE),
            Document::Int(i) => {
                out.push(TAG_INT);
                varint::write_i64(out, *i);
            }
            Document::Float(f) => {
                out.push(TAG_FLOAT);
                out.extend_from_slice(&f.to_bits().to_le_bytes());
            }
            Document::String(s) => {
                out.push(TAG_STRING);
                varint::write_u64(out, s.len() as u64);
                out.extend_from_slice(s.as_bytes());
            }
            Document::Bytes(b) => {
                out.push(TAG_BYTES);
                varint::write_u64(out, b.len() as u64);
                out.extend_from_slice(b);
            }
            Document::List(items) => {
                out.push(TAG_LIST);
                varint::write_u64(out, items.len() as u64);
                for item in items {
                    Self::encode(out, item);
                }
            }
            Document::Map(fields) => {
                out.push(TAG_MAP);
                varint::write_u64(out, fields.len() as u64);
                for (name, field) in fields {
                    varint::write_u64(out, name.len() as u64);
                    out.extend_from_slice(name.as_bytes());
                    Self::encode(out, field);
                }
            }
        }
    }

    fn decode(buf: &mut &[u8]) -> QuarryResult<Document> {
        let corrupted = || QuarryError::corruption("truncated record");
        let tag = *buf.first().ok_or_else(corrupted)?;
        *buf = &buf[1..];
        Ok(match tag {
            TAG_NULL => Document::Null,
            TAG_BOOL_FALSE => Document::Bool(false),
            TAG_BOOL_TRUE => Document::Bool(true),
            TAG_INT => {
                let (value, n) = varint::read_i64(buf).ok_or_else(corrupted)?;
                *buf = &buf[n..];
                Document::Int(value)
            }
            TAG_FLOAT => {
                if buf.len() < 8 {
                    return Err(corrupted());
                }
                let bits = u64::from_le_bytes(buf[..8].try_into().unwrap());
                *buf = &buf[8..];
                Document::Float(f64::from_bits(bits))
            }
            TAG_STRING => {
                let bytes = Self::take_len_prefixed(buf)?;
                Document::String(
                    String::from_utf8(bytes)
                        .map_err(|_| QuarryError::corruption("record holds invalid UTF-8"))?,
                )
            }
            TAG_BYTES => Document::Bytes(Self::take_len_prefixed(buf)?),
            TAG_LIST => {
                let (count, n) = varint::read_u64(buf).ok_or_else(corrupted)?;
                *buf = &buf[n..];
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    items.push(Self::decode(buf)?);
                }
                Document::List(items)
            }
            TAG_MAP => {
                let (count, n) = varint::read_u64(buf).ok_or_else(corrupted)?;
                *buf = &buf[n..];
                let mut fields = BTreeMap::new();
                for _ in 0..count {
                    let name_bytes = Self::take_len_prefixed(buf)?;
                    let name = String::from_utf8(name_bytes)
                        .map_err(|_| QuarryError::corruption("field name holds invalid UTF-8"))?;
                    fields.insert(name, Self::decode(buf)?);
                }
                Document::Map(fields)
            }
            other => {
                return Err(QuarryError::corruption(format!(
                    "unknown record tag {:#04x}",
                    other
                )))
            }
        })
    }

    fn take_len_prefixed(buf: &mut &[u8]) -> QuarryResult<Vec<u8>> {
        let corrupted = || QuarryError::corruption("truncated record");
        let (len, n) = varint::read_u64(buf).ok_or_else(corrupted)?;
        *buf = &buf[n..];
        if buf.len() < len as usize {
            return Err(corrupted());
        }
        let bytes = buf[..len as usize].to_vec();
        *buf = &buf[len as usize..];
        Ok(bytes)
    }
}

impl RecordSerializer for BinarySerializer {
    fn serialize(&self, record: &Document) -> QuarryResult<Vec<u8>> {
        let mut out = Vec::new();
        Self::encode(&mut out, record);
        Ok(out)
    }

    fn deserialize(&self, bytes: &[u8]) -> QuarryResult<Document> {
        let mut buf = bytes;
        let value = Self::decode(&mut buf)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: Document) {
        let serializer = BinarySerializer;
        let bytes = serializer.serialize(&value).unwrap();
        assert_eq!(serializer.deserialize(&bytes).unwrap(), value);
    }

    #[test]
    fn test_scalars() {
        round_trip(Document::Null);
        round_trip(Document::Bool(true));
        round_trip(Document::Bool(false));
        round_trip(Document::Int(0));
        round_trip(Document::Int(-123_456_789));
        round_trip(Document::Float(2.5));
        round_trip(Document::String("hello".into()));
        round_trip(Document::Bytes(vec![0, 255, 1, 2]));
    }

    #[test]
    fn test_nested_document() {
        let mut address = BTreeMap::new();
        address.insert("city".to_string(), Document::String("Lisbon".into()));
        address.insert("zip".to_string(), Document::Int(1000));

        let mut doc = BTreeMap::new();
        doc.insert("name".to_string(), Document::String("alice".into()));
        doc.insert("address".to_string(), Document::Map(address));
        doc.insert(
            "tags".to_string(),
            Document::List(vec![
                Document::String("a".into()),
                Document::Int(7),
                Document::Null,
            ]),
        );

        round_trip(Document::Map(doc));
    }

    #[test]
    fn test_deserialize_garbage() {
        let serializer = BinarySerializer;
        assert!(serializer.deserialize(&[0xEE]).is_err());
        assert!(serializer.deserialize(&[TAG_STRING, 10, b'x']).is_err());
    }

    #[test]
    fn test_schema_registry() {
        let registry = MapSchemaRegistry::new();
        registry.register(FileId::new(3), "Person");
        assert_eq!(
            registry.type_for_bucket(FileId::new(3)),
            Some("Person".to_string())
        );
        assert_eq!(registry.bucket_for_type("Person"), Some(FileId::new(3)));
        assert_eq!(registry.bucket_for_type("Order"), None);
    }
}
