//! Custom serializer plugins.
//!
//! A plugin takes over body encoding for one class. The table is open:
//! callers install handlers per class name, and a delegate can translate
//! classes the table does not know.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::PackError;
use crate::meta::{ClassDesc, FieldDesc};
use crate::reader::ObjectReader;
use crate::value::Value;
use crate::varint;
use crate::writer::ObjectWriter;

/// Per-class serialization plugin.
pub trait ObjSerializer: Send + Sync {
    /// Writes the body of `value`. The tag and any class code have already
    /// been emitted.
    fn write_object(
        &self,
        out: &mut ObjectWriter,
        value: &Value,
        desc: &Arc<ClassDesc>,
        referencee: &Arc<FieldDesc>,
    ) -> Result<(), PackError>;

    /// Fills `instance` from the stream. Not called when
    /// [`instantiate`](Self::instantiate) already consumed the body.
    fn read_object(
        &self,
        input: &mut ObjectReader<'_>,
        instance: &Value,
        desc: &Arc<ClassDesc>,
        referencee: &Arc<FieldDesc>,
    ) -> Result<(), PackError> {
        let _ = (input, instance, desc, referencee);
        Ok(())
    }

    /// Produces the instance itself, or `None` to fall back to the class
    /// descriptor's default instantiator. A serializer that returns
    /// `Some` is expected to have consumed the whole body.
    fn instantiate(
        &self,
        input: &mut ObjectReader<'_>,
        desc: &Arc<ClassDesc>,
        referencee: &Arc<FieldDesc>,
        stream_pos: usize,
    ) -> Result<Option<Value>, PackError> {
        let _ = (input, desc, referencee, stream_pos);
        Ok(None)
    }

    /// When true, instances of this class are never shared through
    /// handles: re-encounters emit a copy request instead.
    fn always_copy(&self) -> bool {
        false
    }

    /// Marks the encoding of this class as stable across language
    /// dialects.
    fn cross_language(&self) -> bool {
        false
    }
}

/// Fallback consulted when the table has no entry for a class.
pub trait SerializerDelegate: Send + Sync {
    fn serializer_for(&self, class: &str) -> Option<Arc<dyn ObjSerializer>>;
}

/// The per-configuration plugin table.
pub struct SerializerRegistry {
    handlers: HashMap<String, Arc<dyn ObjSerializer>>,
    delegate: Option<Arc<dyn SerializerDelegate>>,
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            delegate: None,
        }
    }

    pub fn register(&mut self, class: impl Into<String>, ser: Arc<dyn ObjSerializer>) {
        self.handlers.insert(class.into(), ser);
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn SerializerDelegate>) {
        self.delegate = Some(delegate);
    }

    pub fn lookup(&self, class: &str) -> Option<Arc<dyn ObjSerializer>> {
        if let Some(ser) = self.handlers.get(class) {
            return Some(ser.clone());
        }
        self.delegate.as_ref()?.serializer_for(class)
    }
}

/// Built-in serializer for strings: the body is the compressed string
/// form. `instantiate` consumes the body, so `read_object` never runs.
pub struct StringSerializer;

impl ObjSerializer for StringSerializer {
    fn write_object(
        &self,
        out: &mut ObjectWriter,
        value: &Value,
        _desc: &Arc<ClassDesc>,
        _referencee: &Arc<FieldDesc>,
    ) -> Result<(), PackError> {
        let s = value
            .as_str()
            .ok_or_else(|| PackError::TypeMismatch("expected a string".to_string()))?;
        varint::write_string_compressed(&mut out.buf, s);
        Ok(())
    }

    fn instantiate(
        &self,
        input: &mut ObjectReader<'_>,
        _desc: &Arc<ClassDesc>,
        _referencee: &Arc<FieldDesc>,
        _stream_pos: usize,
    ) -> Result<Option<Value>, PackError> {
        let s = varint::read_string_compressed(&mut input.buf)?;
        Ok(Some(Value::str(s)))
    }
}

/// Which boxed scalar a [`ScalarSerializer`] handles.
#[derive(Clone, Copy)]
pub enum ScalarKind {
    Byte,
    Short,
    Char,
    Float,
    Double,
}

/// Built-in serializer for the boxed scalars that have no dedicated tag.
/// Their bodies reuse the field-level primitive encodings.
pub struct ScalarSerializer(pub ScalarKind);

impl ObjSerializer for ScalarSerializer {
    fn write_object(
        &self,
        out: &mut ObjectWriter,
        value: &Value,
        _desc: &Arc<ClassDesc>,
        _referencee: &Arc<FieldDesc>,
    ) -> Result<(), PackError> {
        let w = &mut out.buf;
        match (self.0, value) {
            (ScalarKind::Byte, Value::Byte(v)) => w.i8(*v),
            (ScalarKind::Short, Value::Short(v)) => varint::write_c_short(w, *v),
            (ScalarKind::Char, Value::Char(v)) => varint::write_c_char(w, *v),
            (ScalarKind::Float, Value::Float(v)) => varint::write_c_float(w, *v),
            (ScalarKind::Double, Value::Double(v)) => varint::write_c_double(w, *v),
            _ => {
                return Err(PackError::TypeMismatch(
                    "boxed scalar does not match its class".to_string(),
                ))
            }
        }
        Ok(())
    }

    fn instantiate(
        &self,
        input: &mut ObjectReader<'_>,
        _desc: &Arc<ClassDesc>,
        _referencee: &Arc<FieldDesc>,
        _stream_pos: usize,
    ) -> Result<Option<Value>, PackError> {
        let r = &mut input.buf;
        let value = match self.0 {
            ScalarKind::Byte => Value::Byte(r.i8()?),
            ScalarKind::Short => Value::Short(varint::read_c_short(r)?),
            ScalarKind::Char => Value::Char(varint::read_c_char(r)?),
            ScalarKind::Float => Value::Float(varint::read_c_float(r)?),
            ScalarKind::Double => Value::Double(varint::read_c_double(r)?),
        };
        Ok(Some(value))
    }
}
