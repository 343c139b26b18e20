//! Compact self-describing binary codec for object graphs.
//!
//! Converts a live in-memory object graph (cycles, shared references,
//! typed arrays, nested instances included) into a byte stream and
//! recovers an equal graph from it. Over a naive per-field encoder it
//! buys four things: variable-length integers and a compressed string
//! form keep encodings small; pointer identity is preserved (two fields
//! naming the same node decode to the same node); cycles round-trip; and
//! a per-stream class-name dictionary amortises repeated type tags.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use graph_pack::{ClassDef, Config, FieldDef, FieldType, ObjectReader, ObjectWriter, Value};
//!
//! let mut conf = Config::new();
//! conf.define_class(
//!     ClassDef::new("Point")
//!         .field(FieldDef::new("x", FieldType::Int))
//!         .field(FieldDef::new("y", FieldType::Int)),
//! );
//! let conf = Arc::new(conf);
//!
//! let point = conf.new_object("Point").unwrap();
//! point.borrow_mut().set("x", Value::Int(3)).unwrap();
//! point.borrow_mut().set("y", Value::Int(-4)).unwrap();
//!
//! let mut writer = ObjectWriter::new(conf.clone());
//! let bytes = writer.write_object(&Value::Object(point)).unwrap();
//!
//! let mut reader = ObjectReader::new(conf, &bytes);
//! let back = reader.read_object().unwrap();
//! let back = back.as_object().unwrap().borrow();
//! assert!(matches!(back.get("x"), Some(Value::Int(3))));
//! ```

pub mod constants;
pub mod varint;

mod class_names;
mod compat;
mod config;
mod error;
mod meta;
mod queue;
mod reader;
mod refs;
mod registry;
mod serializer;
mod sites;
mod value;
mod writer;

pub use class_names::ClassNameRegistry;
pub use compat::{CompatFieldInput, CompatFieldOutput, FieldMap};
pub use config::{Config, ObjectCopier};
pub use error::PackError;
pub use meta::{
    ArrayElem, ClassDef, ClassDesc, FieldDef, FieldDesc, FieldType, ReadExternalFn, ReadLevelFn,
    ReadResolveFn, WriteExternalFn, WriteLevelFn,
};
pub use queue::ByteQueue;
pub use reader::{ConditionalCallback, ObjectReader, ValidationFn};
pub use refs::ObjectRegistry;
pub use serializer::{
    ObjSerializer, ScalarKind, ScalarSerializer, SerializerDelegate, SerializerRegistry,
    StringSerializer,
};
pub use value::{deep_eq, ArrRef, ArrayData, EnumValue, ObjRef, Object, Value};
pub use writer::ObjectWriter;
