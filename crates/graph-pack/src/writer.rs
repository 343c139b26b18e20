//! The writer state machine.
//!
//! Every value emitted in a field context opens with a one-byte tag; the
//! tag decides the body. Selection order: NULL, then a handle when the
//! node is already registered, the one-of shortcut, the boxed-primitive
//! tags, arrays, enums, a prediction code when the concrete class has been
//! seen at this site, TYPED when it equals the declared type, and OBJECT
//! (class name plus body) as the general case.

use std::sync::Arc;

use graph_pack_buffers::Writer;

use crate::compat;
use crate::config::Config;
use crate::constants::*;
use crate::error::PackError;
use crate::meta::{ClassDesc, FieldDesc, FieldType};
use crate::refs::ObjectRegistry;
use crate::sites::SiteTable;
use crate::value::{ArrRef, ArrayData, Value};
use crate::varint::*;
use crate::class_names::ClassNameRegistry;

pub struct ObjectWriter {
    pub buf: Writer,
    conf: Arc<Config>,
    names: ClassNameRegistry,
    objects: ObjectRegistry,
    sites: SiteTable,
}

impl ObjectWriter {
    pub fn new(conf: Arc<Config>) -> Self {
        let caches = conf.borrow_caches();
        Self {
            buf: Writer::new(),
            conf,
            names: caches.names,
            objects: caches.objects,
            sites: caches.sites,
        }
    }

    pub fn conf(&self) -> &Arc<Config> {
        &self.conf
    }

    /// Encodes one object graph and returns its bytes. The writer resets
    /// itself first, so it can be reused stream after stream.
    pub fn write_object(&mut self, value: &Value) -> Result<Vec<u8>, PackError> {
        self.reset_for_reuse();
        let root = FieldDesc::root();
        self.write_with_header(value, &root)?;
        Ok(self.buf.flush())
    }

    /// Drops all per-stream state: codes, handles, prediction tables.
    pub fn reset_for_reuse(&mut self) {
        self.buf.reset();
        self.names.clear();
        self.names.seed(self.conf.dictionary().iter());
        self.objects.clear();
        self.objects.disabled = self.conf.is_struct_mode();
        self.sites.clear();
    }

    /// Emits `value` in the context of `referencee`. This is the entry
    /// point custom serializers use for nested objects.
    pub fn write_with_header(
        &mut self,
        value: &Value,
        referencee: &Arc<FieldDesc>,
    ) -> Result<(), PackError> {
        let pos = self.buf.x;

        if value.is_null() {
            self.buf.i8(NULL);
            return Ok(());
        }

        // A node already in the registry becomes a back-reference. Flat
        // nodes never get in, so they fall through to a fresh body.
        if !referencee.flat {
            if let Some(prev) = self.objects.previous_pos(value) {
                let copy = self
                    .desc_of(value, referencee)?
                    .and_then(|d| d.serializer.clone())
                    .map_or(false, |s| s.always_copy());
                self.buf.i8(if copy { COPYHANDLE } else { HANDLE });
                write_c_int(&mut self.buf, prev as i32);
                return Ok(());
            }
        }

        if let (Some(set), Value::Str(s)) = (&referencee.one_of, value) {
            if let Some(idx) = set.iter().position(|c| c.as_str() == s.as_str()) {
                if idx <= u8::MAX as usize {
                    // Registered like any other emission so a later
                    // reference to the same node becomes a handle.
                    if !referencee.flat {
                        self.objects.register_for_write(value, pos);
                    }
                    self.buf.i8(ONE_OF);
                    self.buf.u8(idx as u8);
                    return Ok(());
                }
            }
        }

        match value {
            Value::Bool(b) => {
                self.buf
                    .i8(if *b { BIG_BOOLEAN_TRUE } else { BIG_BOOLEAN_FALSE });
                Ok(())
            }
            Value::Int(v) => {
                self.buf.i8(BIG_INT);
                write_c_int(&mut self.buf, *v);
                Ok(())
            }
            Value::Long(v) => {
                self.buf.i8(BIG_LONG);
                write_c_long(&mut self.buf, *v);
                Ok(())
            }
            Value::Array(arr) => {
                if !referencee.flat {
                    self.objects.register_for_write(value, pos);
                }
                self.buf.i8(ARRAY);
                self.write_array(arr, referencee)
            }
            Value::Enum(e) => {
                let desc = e.desc.clone();
                if !referencee.flat && !desc.flat {
                    self.objects.register_for_write(value, pos);
                }
                self.buf.i8(ENUM);
                self.encode_class(&desc.name)?;
                if self.conf.is_cross_language() {
                    write_string_utf(&mut self.buf, e.name());
                } else {
                    write_c_int(&mut self.buf, e.ordinal as i32);
                }
                Ok(())
            }
            Value::Str(_)
            | Value::Byte(_)
            | Value::Short(_)
            | Value::Char(_)
            | Value::Float(_)
            | Value::Double(_)
            | Value::Object(_) => {
                let Some(desc) = self.desc_of(value, referencee)? else {
                    return Err(PackError::TypeMismatch("value has no class".to_string()));
                };
                if !referencee.flat && !desc.flat {
                    self.objects.register_for_write(value, pos);
                }
                if let Some(code) = self.sites.predict_code(referencee.site, &desc.name) {
                    self.buf.i8(code as i8);
                } else if referencee.declared_class() == Some(&*desc.name) {
                    self.buf.i8(TYPED);
                } else {
                    self.buf.i8(OBJECT);
                    self.encode_class(&desc.name)?;
                    self.sites.observe(referencee.site, &desc);
                }
                self.write_body(value, &desc, referencee)
            }
            Value::Null => unreachable!("handled above"),
        }
    }

    fn encode_class(&mut self, name: &Arc<str>) -> Result<(), PackError> {
        let ancestors = self.conf.classes().ancestors(name);
        self.names.encode(&mut self.buf, name, &ancestors);
        Ok(())
    }

    /// The concrete class of an object-shaped value, `None` for values
    /// whose tag carries the type (null, boxed bool/int/long, arrays).
    fn desc_of(
        &mut self,
        value: &Value,
        referencee: &Arc<FieldDesc>,
    ) -> Result<Option<Arc<ClassDesc>>, PackError> {
        let name = match value {
            Value::Object(o) => return Ok(Some(o.borrow().desc.clone())),
            Value::Enum(e) => return Ok(Some(e.desc.clone())),
            Value::Str(_) => "String",
            Value::Byte(_) => "Byte",
            Value::Short(_) => "Short",
            Value::Char(_) => "Char",
            Value::Float(_) => "Float",
            Value::Double(_) => "Double",
            _ => return Ok(None),
        };
        Ok(Some(self.resolve_cached(name, referencee)?))
    }

    /// Descriptor lookup through the site's one-entry inline cache.
    fn resolve_cached(
        &mut self,
        name: &str,
        referencee: &Arc<FieldDesc>,
    ) -> Result<Arc<ClassDesc>, PackError> {
        if let Some(desc) = self.sites.last(referencee.site, name) {
            return Ok(desc);
        }
        let desc = self.conf.get_desc(name)?;
        self.sites.set_last(referencee.site, desc.clone());
        Ok(desc)
    }

    fn write_body(
        &mut self,
        value: &Value,
        desc: &Arc<ClassDesc>,
        referencee: &Arc<FieldDesc>,
    ) -> Result<(), PackError> {
        if let Some(ser) = desc.serializer.clone() {
            return ser.write_object(self, value, desc, referencee);
        }
        if let Some(hook) = desc.write_external.clone() {
            return hook(self, value);
        }
        if desc.compatible_mode {
            return compat::write_compatible(self, value, desc, referencee);
        }
        let fields = desc.fields.clone();
        self.write_fields(value, &fields)
    }

    /// The default field loop: booleans packed eight to a byte, the other
    /// primitives inline, references recursing through the tag machinery.
    /// Contiguous conditional fields are preceded by a patched jump target
    /// so a reader may skip the group.
    pub(crate) fn write_fields(
        &mut self,
        value: &Value,
        fields: &[Arc<FieldDesc>],
    ) -> Result<(), PackError> {
        let obj = value
            .as_object()
            .ok_or_else(|| PackError::TypeMismatch("field loop needs an instance".to_string()))?
            .clone();

        let mut mask = 0u8;
        let mut nbits = 0usize;
        let mut cond_patch: Option<usize> = None;

        for field in fields {
            let val = obj.borrow().fields[field.slot].clone();

            if matches!(field.ty, FieldType::Bool) {
                if let Some(at) = cond_patch.take() {
                    let target = self.buf.x as u32;
                    self.buf.patch_u32(at, target);
                }
                if nbits == 8 {
                    self.buf.u8(mask);
                    mask = 0;
                    nbits = 0;
                }
                let Value::Bool(b) = val else {
                    return Err(field_mismatch(field));
                };
                mask = (mask << 1) | b as u8;
                nbits += 1;
                continue;
            }

            // The pending mask byte belongs before whatever this field
            // emits, the jump-target slot included.
            if nbits > 0 {
                self.buf.u8(mask << (8 - nbits));
                mask = 0;
                nbits = 0;
            }

            if is_conditional(field) {
                if cond_patch.is_none() {
                    cond_patch = Some(self.buf.x);
                    self.buf.u32(0);
                }
            } else if let Some(at) = cond_patch.take() {
                let target = self.buf.x as u32;
                self.buf.patch_u32(at, target);
            }

            self.write_field_value(field, &val)?;
        }

        if nbits > 0 {
            self.buf.u8(mask << (8 - nbits));
        }
        if let Some(at) = cond_patch {
            let target = self.buf.x as u32;
            self.buf.patch_u32(at, target);
        }
        Ok(())
    }

    /// Writes one non-boolean field slot.
    pub(crate) fn write_field_value(
        &mut self,
        field: &Arc<FieldDesc>,
        val: &Value,
    ) -> Result<(), PackError> {
        match (&field.ty, val) {
            (FieldType::Byte, Value::Byte(v)) => self.buf.i8(*v),
            (FieldType::Char, Value::Char(v)) => write_c_char(&mut self.buf, *v),
            (FieldType::Short, Value::Short(v)) => write_c_short(&mut self.buf, *v),
            (FieldType::Int, Value::Int(v)) => {
                if field.plain {
                    self.buf.i32(*v);
                } else {
                    write_c_int(&mut self.buf, *v);
                }
            }
            (FieldType::Long, Value::Long(v)) => write_c_long(&mut self.buf, *v),
            (FieldType::Float, Value::Float(v)) => write_c_float(&mut self.buf, *v),
            (FieldType::Double, Value::Double(v)) => write_c_double(&mut self.buf, *v),
            (FieldType::Object(_) | FieldType::Array(_), v) => {
                self.write_with_header(v, field)?;
            }
            _ => return Err(field_mismatch(field)),
        }
        Ok(())
    }

    fn write_array(&mut self, arr: &ArrRef, referencee: &Arc<FieldDesc>) -> Result<(), PackError> {
        let class: Arc<str> = Arc::from(arr.borrow().class_name().as_str());
        self.names.encode(&mut self.buf, &class, &[]);
        let len = arr.borrow().len();
        write_c_int(&mut self.buf, len as i32);

        // Reference elements recurse and may hold borrows of their own,
        // so they are cloned out before descending.
        let ref_items: Option<Vec<Value>> = match &*arr.borrow() {
            ArrayData::Ref { items, .. } => Some(items.clone()),
            _ => None,
        };
        if let Some(items) = ref_items {
            if referencee.thin {
                let mut written = 0usize;
                for (i, item) in items.iter().enumerate() {
                    if item.is_null() {
                        continue;
                    }
                    write_c_int(&mut self.buf, i as i32);
                    self.write_with_header(item, referencee)?;
                    written += 1;
                }
                if written < len {
                    write_c_int(&mut self.buf, len as i32);
                }
            } else {
                for item in &items {
                    self.write_with_header(item, referencee)?;
                }
            }
            return Ok(());
        }

        let data = arr.borrow();
        match &*data {
            ArrayData::Bool(v) => {
                for b in v {
                    self.buf.u8(*b as u8);
                }
            }
            ArrayData::Byte(v) => {
                for b in v {
                    self.buf.i8(*b);
                }
            }
            ArrayData::Char(v) => {
                for c in v {
                    write_c_char(&mut self.buf, *c);
                }
            }
            ArrayData::Short(v) => {
                for s in v {
                    self.buf.i16(*s);
                }
            }
            ArrayData::Int(v) => self.write_int_array(v, referencee),
            ArrayData::Long(v) => {
                for l in v {
                    self.buf.i64(*l);
                }
            }
            ArrayData::Float(v) => {
                for x in v {
                    self.buf.f32(*x);
                }
            }
            ArrayData::Double(v) => {
                for x in v {
                    self.buf.f64(*x);
                }
            }
            ArrayData::Ref { .. } => unreachable!("handled above"),
        }
        Ok(())
    }

    fn write_int_array(&mut self, v: &[i32], referencee: &Arc<FieldDesc>) {
        if referencee.thin {
            write_thin_ints(&mut self.buf, v);
        } else if referencee.compressed {
            write_compressed_ints(&mut self.buf, v);
        } else if referencee.plain {
            for x in v {
                self.buf.i32(*x);
            }
        } else {
            for x in v {
                write_c_int(&mut self.buf, *x);
            }
        }
    }
}

impl Drop for ObjectWriter {
    fn drop(&mut self) {
        self.conf.return_caches(crate::config::StreamCaches {
            names: std::mem::take(&mut self.names),
            objects: std::mem::take(&mut self.objects),
            sites: std::mem::take(&mut self.sites),
        });
    }
}

pub(crate) fn is_conditional(field: &FieldDesc) -> bool {
    field.conditional
        && matches!(
            field.ty,
            FieldType::Int | FieldType::Object(_) | FieldType::Array(_)
        )
}

fn field_mismatch(field: &FieldDesc) -> PackError {
    PackError::TypeMismatch(format!("field '{}' holds a foreign value", field.name))
}

/// Sparse pair form: `(index, value)` per non-zero entry, closed by a
/// terminator index equal to the length. A fully dense array carries no
/// terminator; the reader stops after `len` pairs.
fn write_thin_ints(w: &mut Writer, v: &[i32]) {
    let mut written = 0usize;
    for (i, x) in v.iter().enumerate() {
        if *x == 0 {
            continue;
        }
        write_c_int(w, i as i32);
        write_c_int(w, *x);
        written += 1;
    }
    if written < v.len() {
        write_c_int(w, v.len() as i32);
    }
}

/// One discriminator byte, then the sub-strategy body. The writer
/// trial-encodes every applicable strategy and keeps the smallest.
fn write_compressed_ints(w: &mut Writer, v: &[i32]) {
    let mut candidates: Vec<(u8, Writer)> = Vec::new();

    let mut varint = Writer::new();
    for x in v {
        write_c_int(&mut varint, *x);
    }
    candidates.push((COMPRESSED_VARINT, varint));

    if !v.is_empty() {
        let mut diff = Writer::new();
        write_c_int(&mut diff, v[0]);
        for pair in v.windows(2) {
            write_c_int(&mut diff, pair[1].wrapping_sub(pair[0]));
        }
        candidates.push((COMPRESSED_DIFF, diff));
    }

    let mut thin = Writer::new();
    write_thin_ints(&mut thin, v);
    candidates.push((COMPRESSED_THIN, thin));

    if let (Some(&min), Some(&max)) = (v.iter().min(), v.iter().max()) {
        if (max as i64) - (min as i64) <= i16::MAX as i64 {
            let mut offs = Writer::new();
            write_c_int(&mut offs, min);
            for x in v {
                offs.i16((x - min) as i16);
            }
            candidates.push((COMPRESSED_OFFSET_SHORT, offs));
        }
    }

    let (kind, body) = candidates
        .into_iter()
        .min_by_key(|(_, w)| w.len())
        .expect("at least the varint strategy applies");
    w.u8(kind);
    w.buf(body.written());
}
