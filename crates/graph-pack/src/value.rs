//! The dynamic value model.
//!
//! A graph is built from [`Value`]s. Instances and arrays live behind
//! `Rc<RefCell<…>>` so the same node can appear at several positions and
//! in cycles; the codec preserves that pointer identity across a
//! round-trip.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::meta::{ArrayElem, ClassDesc, FieldType};

/// Shared handle to a class instance.
pub type ObjRef = Rc<RefCell<Object>>;

/// Shared handle to an array.
pub type ArrRef = Rc<RefCell<ArrayData>>;

/// A node of an object graph.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(Rc<String>),
    Enum(Rc<EnumValue>),
    Object(ObjRef),
    Array(ArrRef),
}

/// An enum constant: its class and ordinal.
pub struct EnumValue {
    pub desc: Arc<ClassDesc>,
    pub ordinal: usize,
}

impl EnumValue {
    pub fn name(&self) -> &str {
        self.desc
            .enum_constants
            .as_ref()
            .map(|c| c[self.ordinal].as_str())
            .unwrap_or("")
    }
}

/// A class instance: its descriptor and one value slot per field, in the
/// descriptor's canonical field order.
pub struct Object {
    pub desc: Arc<ClassDesc>,
    pub fields: Vec<Value>,
}

impl Object {
    /// Creates an instance with every field at its default.
    pub fn new(desc: &Arc<ClassDesc>) -> ObjRef {
        let fields = desc
            .fields
            .iter()
            .map(|f| Value::default_for(&f.ty))
            .collect();
        Rc::new(RefCell::new(Object {
            desc: desc.clone(),
            fields,
        }))
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        let field = self.desc.field_by_name(name)?;
        self.fields.get(field.slot)
    }

    /// Sets a field by name. Unknown names are rejected, which is the
    /// closest thing this model has to a reflective access failure.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), crate::error::PackError> {
        let slot = self
            .desc
            .field_by_name(name)
            .ok_or_else(|| {
                crate::error::PackError::IllegalFieldAccess(format!(
                    "no field '{name}' on '{}'",
                    self.desc.name
                ))
            })?
            .slot;
        self.fields[slot] = value;
        Ok(())
    }
}

/// Array payloads. Primitive arrays hold their elements directly; `Ref`
/// arrays hold tagged values and recurse through the codec per element.
pub enum ArrayData {
    Bool(Vec<bool>),
    Byte(Vec<i8>),
    Char(Vec<u16>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Ref { elem: Arc<str>, items: Vec<Value> },
}

impl ArrayData {
    pub fn len(&self) -> usize {
        match self {
            ArrayData::Bool(v) => v.len(),
            ArrayData::Byte(v) => v.len(),
            ArrayData::Char(v) => v.len(),
            ArrayData::Short(v) => v.len(),
            ArrayData::Int(v) => v.len(),
            ArrayData::Long(v) => v.len(),
            ArrayData::Float(v) => v.len(),
            ArrayData::Double(v) => v.len(),
            ArrayData::Ref { items, .. } => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn elem(&self) -> ArrayElem {
        match self {
            ArrayData::Bool(_) => ArrayElem::Bool,
            ArrayData::Byte(_) => ArrayElem::Byte,
            ArrayData::Char(_) => ArrayElem::Char,
            ArrayData::Short(_) => ArrayElem::Short,
            ArrayData::Int(_) => ArrayElem::Int,
            ArrayData::Long(_) => ArrayElem::Long,
            ArrayData::Float(_) => ArrayElem::Float,
            ArrayData::Double(_) => ArrayElem::Double,
            ArrayData::Ref { elem, .. } => ArrayElem::Ref(elem.clone()),
        }
    }

    /// The class name under which this array travels, e.g. `"int[]"`.
    pub fn class_name(&self) -> String {
        self.elem().array_class()
    }
}

impl Value {
    pub fn default_for(ty: &FieldType) -> Value {
        match ty {
            FieldType::Bool => Value::Bool(false),
            FieldType::Byte => Value::Byte(0),
            FieldType::Char => Value::Char(0),
            FieldType::Short => Value::Short(0),
            FieldType::Int => Value::Int(0),
            FieldType::Long => Value::Long(0),
            FieldType::Float => Value::Float(0.0),
            FieldType::Double => Value::Double(0.0),
            FieldType::Object(_) | FieldType::Array(_) => Value::Null,
        }
    }

    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(Rc::new(s.into()))
    }

    pub fn int_array(items: Vec<i32>) -> Value {
        Value::Array(Rc::new(RefCell::new(ArrayData::Int(items))))
    }

    pub fn ref_array(elem: impl Into<Arc<str>>, items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(ArrayData::Ref {
            elem: elem.into(),
            items,
        })))
    }

    pub fn array(data: ArrayData) -> Value {
        Value::Array(Rc::new(RefCell::new(data)))
    }

    /// Pointer identity of the heap node behind this value, if it has one.
    /// Inline primitives have no identity and are never registered.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::Str(s) => Some(Rc::as_ptr(s) as usize),
            Value::Enum(e) => Some(Rc::as_ptr(e) as usize),
            Value::Object(o) => Some(Rc::as_ptr(o) as usize),
            Value::Array(a) => Some(Rc::as_ptr(a) as usize),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_object(&self) -> Option<&ObjRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrRef> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Structural equality over two graphs, identity-aware: node pairs already
/// on the comparison path compare equal, so cycles terminate.
pub fn deep_eq(a: &Value, b: &Value) -> bool {
    fn go(a: &Value, b: &Value, seen: &mut Vec<(usize, usize)>) -> bool {
        match (a, b) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Byte(x), Value::Byte(y)) => x == y,
            (Value::Char(x), Value::Char(y)) => x == y,
            (Value::Short(x), Value::Short(y)) => x == y,
            (Value::Int(x), Value::Int(y)) => x == y,
            (Value::Long(x), Value::Long(y)) => x == y,
            (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
            (Value::Double(x), Value::Double(y)) => x.to_bits() == y.to_bits(),
            (Value::Str(x), Value::Str(y)) => x == y,
            (Value::Enum(x), Value::Enum(y)) => {
                x.desc.name == y.desc.name && x.ordinal == y.ordinal
            }
            (Value::Object(x), Value::Object(y)) => {
                let pair = (Rc::as_ptr(x) as usize, Rc::as_ptr(y) as usize);
                if seen.contains(&pair) {
                    return true;
                }
                seen.push(pair);
                let xo = x.borrow();
                let yo = y.borrow();
                let eq = xo.desc.name == yo.desc.name
                    && xo.fields.len() == yo.fields.len()
                    && xo
                        .fields
                        .iter()
                        .zip(yo.fields.iter())
                        .all(|(fx, fy)| go(fx, fy, seen));
                seen.pop();
                eq
            }
            (Value::Array(x), Value::Array(y)) => {
                let pair = (Rc::as_ptr(x) as usize, Rc::as_ptr(y) as usize);
                if seen.contains(&pair) {
                    return true;
                }
                seen.push(pair);
                let eq = match (&*x.borrow(), &*y.borrow()) {
                    (ArrayData::Bool(p), ArrayData::Bool(q)) => p == q,
                    (ArrayData::Byte(p), ArrayData::Byte(q)) => p == q,
                    (ArrayData::Char(p), ArrayData::Char(q)) => p == q,
                    (ArrayData::Short(p), ArrayData::Short(q)) => p == q,
                    (ArrayData::Int(p), ArrayData::Int(q)) => p == q,
                    (ArrayData::Long(p), ArrayData::Long(q)) => p == q,
                    (ArrayData::Float(p), ArrayData::Float(q)) => {
                        p.len() == q.len()
                            && p.iter().zip(q).all(|(u, v)| u.to_bits() == v.to_bits())
                    }
                    (ArrayData::Double(p), ArrayData::Double(q)) => {
                        p.len() == q.len()
                            && p.iter().zip(q).all(|(u, v)| u.to_bits() == v.to_bits())
                    }
                    (
                        ArrayData::Ref { items: p, .. },
                        ArrayData::Ref { items: q, .. },
                    ) => p.len() == q.len() && p.iter().zip(q).all(|(u, v)| go(u, v, seen)),
                    _ => false,
                };
                seen.pop();
                eq
            }
            _ => false,
        }
    }
    go(a, b, &mut Vec::new())
}

impl fmt::Debug for Value {
    /// Shallow on purpose: graphs can be cyclic, so nested objects and
    /// arrays print as pointers.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(v) => write!(f, "Bool({v})"),
            Value::Byte(v) => write!(f, "Byte({v})"),
            Value::Char(v) => write!(f, "Char({v})"),
            Value::Short(v) => write!(f, "Short({v})"),
            Value::Int(v) => write!(f, "Int({v})"),
            Value::Long(v) => write!(f, "Long({v})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::Double(v) => write!(f, "Double({v})"),
            Value::Str(v) => write!(f, "Str({v:?})"),
            Value::Enum(v) => write!(f, "Enum({}::{})", v.desc.name, v.name()),
            Value::Object(o) => {
                write!(f, "Object({}@{:p})", o.borrow().desc.name, Rc::as_ptr(o))
            }
            Value::Array(a) => {
                write!(f, "Array({}, len {})", a.borrow().class_name(), a.borrow().len())
            }
        }
    }
}
