//! Compatible mode: the legacy level-by-level protocol.
//!
//! Classes marked compatible are written and read by walking the
//! superclass chain root-first. A level with hooks hands the hook a
//! wrapper stream: its field-at-a-time methods delegate to the varint
//! codec, its object-at-a-time methods to the top-level state machines.
//! Hooks nest freely; a nested object with hooks of its own simply
//! recurses through the state machine and gets its own wrapper.

use std::sync::Arc;

use crate::error::PackError;
use crate::meta::{ClassDesc, FieldDesc, FieldType};
use crate::reader::{ObjectReader, ValidationFn};
use crate::value::Value;
use crate::varint::*;
use crate::writer::ObjectWriter;

/// The name→value map produced by a `read_fields` request and consumed by
/// `put_fields`.
#[derive(Default)]
pub struct FieldMap {
    entries: Vec<(String, Value)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.entries.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// The value under `name`, or `default` when the peer did not send
    /// the field.
    pub fn get_or(&self, name: &str, default: Value) -> Value {
        self.get(name).cloned().unwrap_or(default)
    }

    pub fn is_defaulted(&self, name: &str) -> bool {
        self.get(name).is_none()
    }
}

pub(crate) fn write_compatible(
    out: &mut ObjectWriter,
    value: &Value,
    desc: &Arc<ClassDesc>,
    referencee: &Arc<FieldDesc>,
) -> Result<(), PackError> {
    for level in 0..desc.comp_info.len() {
        if let Some(hook) = desc.comp_info[level].write_hook.clone() {
            let mut wrapper = CompatFieldOutput {
                out: &mut *out,
                desc: desc.clone(),
                level,
                referencee: referencee.clone(),
                target: value.clone(),
            };
            hook(&mut wrapper, value)?;
        } else {
            let fields = desc.comp_info[level].fields.clone();
            out.write_fields(value, &fields)?;
        }
    }
    Ok(())
}

pub(crate) fn read_compatible(
    input: &mut ObjectReader<'_>,
    instance: &Value,
    desc: &Arc<ClassDesc>,
    referencee: &Arc<FieldDesc>,
) -> Result<(), PackError> {
    for level in 0..desc.comp_info.len() {
        if let Some(hook) = desc.comp_info[level].read_hook.clone() {
            let mut wrapper = CompatFieldInput {
                input: &mut *input,
                desc: desc.clone(),
                level,
                referencee: referencee.clone(),
                target: instance.clone(),
            };
            hook(&mut wrapper, instance)?;
        } else {
            let fields = desc.comp_info[level].fields.clone();
            input.read_fields(&fields, instance)?;
        }
    }
    Ok(())
}

/// Wrapper stream handed to a level's write hook.
pub struct CompatFieldOutput<'w> {
    out: &'w mut ObjectWriter,
    desc: Arc<ClassDesc>,
    level: usize,
    referencee: Arc<FieldDesc>,
    target: Value,
}

impl CompatFieldOutput<'_> {
    pub fn write_boolean(&mut self, v: bool) {
        self.out.buf.u8(v as u8);
    }

    pub fn write_byte(&mut self, v: i8) {
        self.out.buf.i8(v);
    }

    pub fn write_char(&mut self, v: u16) {
        write_c_char(&mut self.out.buf, v);
    }

    pub fn write_short(&mut self, v: i16) {
        write_c_short(&mut self.out.buf, v);
    }

    pub fn write_int(&mut self, v: i32) {
        write_c_int(&mut self.out.buf, v);
    }

    pub fn write_long(&mut self, v: i64) {
        write_c_long(&mut self.out.buf, v);
    }

    pub fn write_float(&mut self, v: f32) {
        write_c_float(&mut self.out.buf, v);
    }

    pub fn write_double(&mut self, v: f64) {
        write_c_double(&mut self.out.buf, v);
    }

    pub fn write_utf(&mut self, s: &str) {
        write_string_utf(&mut self.out.buf, s);
    }

    /// Writes a nested value through the top-level state machine.
    pub fn write_object(&mut self, value: &Value) -> Result<(), PackError> {
        self.out.write_with_header(value, &self.referencee)
    }

    /// Writes this level's fields the way the default loop would.
    pub fn default_write_object(&mut self) -> Result<(), PackError> {
        let fields = self.desc.comp_info[self.level].fields.clone();
        self.out.write_fields(&self.target, &fields)
    }

    /// Ships a name→value map. Symmetric levels go positionally in
    /// field-array order; asymmetric levels as explicit pairs.
    pub fn put_fields(&mut self, map: &FieldMap) -> Result<(), PackError> {
        let level = &self.desc.comp_info[self.level];
        if level.symmetric {
            let fields = level.fields.clone();
            write_map_positional(self.out, &fields, map)
        } else {
            write_c_int(&mut self.out.buf, map.entries.len() as i32);
            let root = FieldDesc::root();
            for (name, value) in &map.entries {
                write_string_utf(&mut self.out.buf, name);
                self.out.write_with_header(value, &root)?;
            }
            Ok(())
        }
    }
}

/// Wrapper stream handed to a level's read hook.
pub struct CompatFieldInput<'r, 'a> {
    input: &'r mut ObjectReader<'a>,
    desc: Arc<ClassDesc>,
    level: usize,
    referencee: Arc<FieldDesc>,
    target: Value,
}

impl CompatFieldInput<'_, '_> {
    pub fn read_boolean(&mut self) -> Result<bool, PackError> {
        Ok(self.input.buf.u8()? != 0)
    }

    pub fn read_byte(&mut self) -> Result<i8, PackError> {
        Ok(self.input.buf.i8()?)
    }

    pub fn read_char(&mut self) -> Result<u16, PackError> {
        read_c_char(&mut self.input.buf)
    }

    pub fn read_short(&mut self) -> Result<i16, PackError> {
        read_c_short(&mut self.input.buf)
    }

    pub fn read_int(&mut self) -> Result<i32, PackError> {
        read_c_int(&mut self.input.buf)
    }

    pub fn read_long(&mut self) -> Result<i64, PackError> {
        read_c_long(&mut self.input.buf)
    }

    pub fn read_float(&mut self) -> Result<f32, PackError> {
        read_c_float(&mut self.input.buf)
    }

    pub fn read_double(&mut self) -> Result<f64, PackError> {
        read_c_double(&mut self.input.buf)
    }

    pub fn read_utf(&mut self) -> Result<String, PackError> {
        read_string_utf(&mut self.input.buf)
    }

    /// Reads a nested value through the top-level state machine.
    pub fn read_object(&mut self) -> Result<Value, PackError> {
        self.input.read_with_header(&self.referencee)
    }

    /// Reads this level's fields into the instance the way the default
    /// loop would.
    pub fn default_read_object(&mut self) -> Result<(), PackError> {
        let fields = self.desc.comp_info[self.level].fields.clone();
        self.input.read_fields(&fields, &self.target)
    }

    /// Produces the name→value map written by the peer's `put_fields`.
    pub fn read_fields(&mut self) -> Result<FieldMap, PackError> {
        let level = &self.desc.comp_info[self.level];
        if level.symmetric {
            let fields = level.fields.clone();
            read_positional_to_map(self.input, &fields)
        } else {
            let count = read_c_int(&mut self.input.buf)?;
            let mut map = FieldMap::new();
            let root = FieldDesc::root();
            for _ in 0..count {
                let name = read_string_utf(&mut self.input.buf)?;
                let value = self.input.read_with_header(&root)?;
                map.insert(name, value);
            }
            Ok(map)
        }
    }

    pub fn register_validation(&mut self, cb: ValidationFn, prio: i32) {
        self.input.register_validation(cb, prio);
    }
}

/// Positional map form: the level's field array in order, same encodings
/// as the default field loop, values sourced from the map (or defaults).
fn write_map_positional(
    out: &mut ObjectWriter,
    fields: &[Arc<FieldDesc>],
    map: &FieldMap,
) -> Result<(), PackError> {
    let mut mask = 0u8;
    let mut nbits = 0usize;
    for field in fields {
        let val = map.get_or(&field.name, Value::default_for(&field.ty));
        if matches!(field.ty, FieldType::Bool) {
            if nbits == 8 {
                out.buf.u8(mask);
                mask = 0;
                nbits = 0;
            }
            let Value::Bool(b) = val else {
                return Err(PackError::TypeMismatch(format!(
                    "field '{}' holds a foreign value",
                    field.name
                )));
            };
            mask = (mask << 1) | b as u8;
            nbits += 1;
            continue;
        }
        if nbits > 0 {
            out.buf.u8(mask << (8 - nbits));
            mask = 0;
            nbits = 0;
        }
        out.write_field_value(field, &val)?;
    }
    if nbits > 0 {
        out.buf.u8(mask << (8 - nbits));
    }
    Ok(())
}

fn read_positional_to_map(
    input: &mut ObjectReader<'_>,
    fields: &[Arc<FieldDesc>],
) -> Result<FieldMap, PackError> {
    let mut map = FieldMap::new();
    let mut mask = 0u8;
    let mut nbits = 8usize;
    for field in fields {
        if matches!(field.ty, FieldType::Bool) {
            if nbits == 8 {
                mask = input.buf.u8()?;
                nbits = 0;
            }
            let b = mask & 0x80 != 0;
            mask <<= 1;
            nbits += 1;
            map.insert(field.name.to_string(), Value::Bool(b));
            continue;
        }
        let val = input.read_field_value(field)?;
        map.insert(field.name.to_string(), val);
    }
    Ok(map)
}
