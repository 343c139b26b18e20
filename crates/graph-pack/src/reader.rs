//! The reader state machine.
//!
//! Mirror of the writer: one tag byte is read per value, the tag selects
//! the body. Instances are registered against the position recorded
//! before their tag byte and before their bodies are filled, which is
//! what lets self-referential cycles close to the same node.

use std::rc::Rc;
use std::sync::Arc;

use graph_pack_buffers::Reader;

use crate::class_names::ClassNameRegistry;
use crate::compat;
use crate::config::Config;
use crate::constants::*;
use crate::error::PackError;
use crate::meta::{ArrayElem, ClassDesc, FieldDesc, FieldType};
use crate::refs::ObjectRegistry;
use crate::sites::SiteTable;
use crate::value::{ArrayData, EnumValue, Object, Value};
use crate::varint::*;
use crate::writer::is_conditional;

/// Reader-supplied policy for conditional skip-groups.
pub trait ConditionalCallback {
    /// `half_decoded` is the instance under construction; `jump_target`
    /// is where the stream resumes if the group is skipped.
    fn should_skip(
        &self,
        half_decoded: &Value,
        jump_target: usize,
        field: &Arc<FieldDesc>,
    ) -> bool;
}

/// Object-validation callback, run after the top-level read completes.
pub type ValidationFn = Rc<dyn Fn() -> Result<(), PackError>>;

struct CallbackEntry {
    cb: ValidationFn,
    prio: i32,
}

pub struct ObjectReader<'a> {
    pub buf: Reader<'a>,
    conf: Arc<Config>,
    names: ClassNameRegistry,
    objects: ObjectRegistry,
    sites: SiteTable,
    conditional: Option<Rc<dyn ConditionalCallback>>,
    callbacks: Vec<CallbackEntry>,
    depth: usize,
}

impl<'a> ObjectReader<'a> {
    pub fn new(conf: Arc<Config>, data: &'a [u8]) -> Self {
        let caches = conf.borrow_caches();
        Self {
            buf: Reader::new(data),
            conf,
            names: caches.names,
            objects: caches.objects,
            sites: caches.sites,
            conditional: None,
            callbacks: Vec::new(),
            depth: 0,
        }
    }

    pub fn conf(&self) -> &Arc<Config> {
        &self.conf
    }

    /// Resets every per-stream registry and retargets the reader at a new
    /// byte slice. Required after a failed read before reuse.
    pub fn reset_for_reuse(&mut self, data: &'a [u8]) {
        self.buf.reset(data);
        self.names.clear();
        self.names.seed(self.conf.dictionary().iter());
        self.objects.clear();
        self.objects.disabled = self.conf.is_struct_mode();
        self.sites.clear();
        self.callbacks.clear();
        self.depth = 0;
    }

    pub fn set_conditional_callback(&mut self, cb: Rc<dyn ConditionalCallback>) {
        self.conditional = Some(cb);
    }

    /// Registers a validation callback; all callbacks run in descending
    /// priority order once the top-level read finishes.
    pub fn register_validation(&mut self, cb: ValidationFn, prio: i32) {
        self.callbacks.push(CallbackEntry { cb, prio });
    }

    /// Decodes one object graph.
    pub fn read_object(&mut self) -> Result<Value, PackError> {
        self.depth += 1;
        let res = self.read_with_header(&FieldDesc::root());
        self.depth -= 1;
        if self.depth == 0 && res.is_ok() {
            self.process_validation();
        }
        res
    }

    /// Decodes one value in the context of `referencee`. This is the
    /// entry point custom serializers and hooks use for nested values.
    pub fn read_with_header(&mut self, referencee: &Arc<FieldDesc>) -> Result<Value, PackError> {
        let read_pos = self.buf.x;
        let code = self.buf.i8()?;
        let desc = match code {
            BIG_INT => return Ok(Value::Int(read_c_int(&mut self.buf)?)),
            BIG_LONG => return Ok(Value::Long(read_c_long(&mut self.buf)?)),
            BIG_BOOLEAN_TRUE => return Ok(Value::Bool(true)),
            BIG_BOOLEAN_FALSE => return Ok(Value::Bool(false)),
            NULL => return Ok(Value::Null),
            ONE_OF => {
                let idx = self.buf.u8()? as usize;
                let set = referencee
                    .one_of
                    .as_ref()
                    .ok_or(PackError::MalformedTag(ONE_OF))?;
                let constant = set.get(idx).ok_or(PackError::MalformedTag(ONE_OF))?;
                let val = Value::str(constant.clone());
                // Mirror of the writer: the peer registered this node, so
                // handles may point back at this position.
                if !referencee.flat {
                    self.objects.register_for_read(read_pos, &val);
                }
                return Ok(val);
            }
            HANDLE => {
                let pos = read_c_int(&mut self.buf)? as usize;
                return self
                    .objects
                    .get_registered(pos)
                    .ok_or(PackError::UnresolvedHandle(pos));
            }
            COPYHANDLE => {
                let pos = read_c_int(&mut self.buf)? as usize;
                return self.copy_from(pos);
            }
            ARRAY => return self.read_array(referencee, read_pos),
            ENUM => {
                let desc = self.read_class(referencee)?;
                let constants = desc
                    .enum_constants
                    .clone()
                    .ok_or_else(|| PackError::TypeMismatch(format!("'{}' is not an enum", desc.name)))?;
                let ordinal = if self.conf.is_cross_language() {
                    let name = read_string_utf(&mut self.buf)?;
                    constants.iter().position(|c| *c == name).ok_or_else(|| {
                        PackError::IllegalFieldAccess(format!(
                            "no constant '{name}' on '{}'",
                            desc.name
                        ))
                    })?
                } else {
                    let ordinal = read_c_int(&mut self.buf)?;
                    if ordinal < 0 || ordinal as usize >= constants.len() {
                        return Err(PackError::IllegalFieldAccess(format!(
                            "ordinal {ordinal} out of range on '{}'",
                            desc.name
                        )));
                    }
                    ordinal as usize
                };
                let val = Value::Enum(Rc::new(EnumValue {
                    desc: desc.clone(),
                    ordinal,
                }));
                if !referencee.flat && !desc.flat {
                    self.objects.register_for_read(read_pos, &val);
                }
                return Ok(val);
            }
            TYPED => {
                let name = referencee
                    .declared_class()
                    .ok_or(PackError::MalformedTag(TYPED))?
                    .to_string();
                self.resolve_cached(&name, referencee)?
            }
            OBJECT => {
                let desc = self.read_class(referencee)?;
                self.sites.observe(referencee.site, &desc);
                desc
            }
            code if code > 0 => self
                .sites
                .class_at(referencee.site, code as usize)
                .ok_or(PackError::MalformedTag(code))?,
            other => return Err(PackError::MalformedTag(other)),
        };
        self.read_instance(desc, referencee, read_pos)
    }

    /// TYPED, OBJECT and prediction tags join here: materialise, register,
    /// fill, resolve.
    fn read_instance(
        &mut self,
        desc: Arc<ClassDesc>,
        referencee: &Arc<FieldDesc>,
        read_pos: usize,
    ) -> Result<Value, PackError> {
        let ser = desc.serializer.clone();
        let mut body_consumed = false;
        let instance = match &ser {
            Some(ser) => match ser.instantiate(self, &desc, referencee, read_pos)? {
                Some(v) => {
                    body_consumed = true;
                    v
                }
                None => self.default_instance(&desc)?,
            },
            None => self.default_instance(&desc)?,
        };

        let always_copy = ser.as_ref().map_or(false, |s| s.always_copy());
        if !referencee.flat && !desc.flat && !always_copy {
            self.objects.register_for_read(read_pos, &instance);
        }

        if let Some(ser) = &ser {
            if !body_consumed {
                ser.read_object(self, &instance, &desc, referencee)?;
            }
        } else if let Some(hook) = desc.read_external.clone() {
            hook(self, &instance)?;
        } else if desc.compatible_mode {
            compat::read_compatible(self, &instance, &desc, referencee)?;
        } else {
            let fields = desc.fields.clone();
            self.read_fields(&fields, &instance)?;
        }

        if let Some(resolve) = &desc.read_resolve {
            if let Some(substitute) = resolve(&instance) {
                tracing::debug!(class = &*desc.name, "read-resolve replaced instance");
                self.objects.replace(&instance, &substitute, read_pos);
                return Ok(substitute);
            }
        }
        Ok(instance)
    }

    fn default_instance(&self, desc: &Arc<ClassDesc>) -> Result<Value, PackError> {
        if !desc.instantiable || desc.is_enum() {
            return Err(PackError::InstantiationFailed(desc.name.to_string()));
        }
        Ok(Value::Object(Object::new(desc)))
    }

    fn read_class(&mut self, referencee: &Arc<FieldDesc>) -> Result<Arc<ClassDesc>, PackError> {
        let name = self.names.decode(&mut self.buf)?;
        self.resolve_cached(&name, referencee)
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

    /// The default field loop, mirror of the writer's.
    pub(crate) fn read_fields(
        &mut self,
        fields: &[Arc<FieldDesc>],
        instance: &Value,
    ) -> Result<(), PackError> {
        let obj = instance
            .as_object()
            .ok_or_else(|| PackError::TypeMismatch("field loop needs an instance".to_string()))?
            .clone();

        let mut mask = 0u8;
        let mut nbits = 8usize;
        let mut have_target = false;
        let mut skipping = false;

        for field in fields {
            if matches!(field.ty, FieldType::Bool) {
                have_target = false;
                skipping = false;
                if nbits == 8 {
                    mask = self.buf.u8()?;
                    nbits = 0;
                }
                let b = mask & 0x80 != 0;
                mask <<= 1;
                nbits += 1;
                obj.borrow_mut().fields[field.slot] = Value::Bool(b);
                continue;
            }

            if is_conditional(field) {
                if !have_target {
                    have_target = true;
                    let target = self.buf.u32()? as usize;
                    skipping = self.should_skip(instance, target, field);
                    if skipping {
                        self.buf.x = target;
                    }
                }
                if skipping {
                    continue;
                }
            } else {
                have_target = false;
                skipping = false;
            }

            let val = self.read_field_value(field)?;
            obj.borrow_mut().fields[field.slot] = val;
        }
        Ok(())
    }

    /// Reads one non-boolean field slot.
    pub(crate) fn read_field_value(&mut self, field: &Arc<FieldDesc>) -> Result<Value, PackError> {
        Ok(match &field.ty {
            FieldType::Bool => unreachable!("booleans are mask-packed by the field loop"),
            FieldType::Byte => Value::Byte(self.buf.i8()?),
            FieldType::Char => Value::Char(read_c_char(&mut self.buf)?),
            FieldType::Short => Value::Short(read_c_short(&mut self.buf)?),
            FieldType::Int => Value::Int(if field.plain {
                self.buf.i32()?
            } else {
                read_c_int(&mut self.buf)?
            }),
            FieldType::Long => Value::Long(read_c_long(&mut self.buf)?),
            FieldType::Float => Value::Float(read_c_float(&mut self.buf)?),
            FieldType::Double => Value::Double(read_c_double(&mut self.buf)?),
            FieldType::Object(_) | FieldType::Array(_) => self.read_with_header(field)?,
        })
    }

    fn should_skip(&self, half_decoded: &Value, target: usize, field: &Arc<FieldDesc>) -> bool {
        self.conditional
            .as_ref()
            .map_or(false, |cb| cb.should_skip(half_decoded, target, field))
    }

    fn read_array(
        &mut self,
        referencee: &Arc<FieldDesc>,
        read_pos: usize,
    ) -> Result<Value, PackError> {
        let class = self.names.decode(&mut self.buf)?;
        let elem = ArrayElem::from_array_class(&class)
            .ok_or_else(|| PackError::TypeMismatch(format!("'{class}' is not an array class")))?;
        let len = read_c_int(&mut self.buf)?;
        if len == -1 {
            return Ok(Value::Null);
        }
        if len < 0 {
            return Err(PackError::MalformedTag(ARRAY));
        }
        let len = len as usize;

        let data = match &elem {
            ArrayElem::Bool => ArrayData::Bool(vec![false; len]),
            ArrayElem::Byte => ArrayData::Byte(vec![0; len]),
            ArrayElem::Char => ArrayData::Char(vec![0; len]),
            ArrayElem::Short => ArrayData::Short(vec![0; len]),
            ArrayElem::Int => ArrayData::Int(vec![0; len]),
            ArrayElem::Long => ArrayData::Long(vec![0; len]),
            ArrayElem::Float => ArrayData::Float(vec![0.0; len]),
            ArrayElem::Double => ArrayData::Double(vec![0.0; len]),
            ArrayElem::Ref(name) => ArrayData::Ref {
                elem: name.clone(),
                items: vec![Value::Null; len],
            },
        };
        let arr = std::rc::Rc::new(std::cell::RefCell::new(data));
        let val = Value::Array(arr.clone());
        // Registered before the elements are read so cycles through the
        // array close onto it.
        if !referencee.flat {
            self.objects.register_for_read(read_pos, &val);
        }

        if matches!(elem, ArrayElem::Ref(_)) {
            if referencee.thin {
                // At most `len` pairs; a dense array has no terminator.
                for _ in 0..len {
                    let idx = read_c_int(&mut self.buf)? as usize;
                    if idx >= len {
                        break;
                    }
                    let item = self.read_with_header(referencee)?;
                    if let ArrayData::Ref { items, .. } = &mut *arr.borrow_mut() {
                        items[idx] = item;
                    }
                }
            } else {
                for i in 0..len {
                    let item = self.read_with_header(referencee)?;
                    if let ArrayData::Ref { items, .. } = &mut *arr.borrow_mut() {
                        items[i] = item;
                    }
                }
            }
            return Ok(val);
        }

        let mut data = arr.borrow_mut();
        match &mut *data {
            ArrayData::Bool(v) => {
                for slot in v.iter_mut() {
                    *slot = self.buf.u8()? != 0;
                }
            }
            ArrayData::Byte(v) => {
                for slot in v.iter_mut() {
                    *slot = self.buf.i8()?;
                }
            }
            ArrayData::Char(v) => {
                for slot in v.iter_mut() {
                    *slot = read_c_char(&mut self.buf)?;
                }
            }
            ArrayData::Short(v) => {
                for slot in v.iter_mut() {
                    *slot = self.buf.i16()?;
                }
            }
            ArrayData::Int(v) => self.read_int_array(v, referencee)?,
            ArrayData::Long(v) => {
                for slot in v.iter_mut() {
                    *slot = self.buf.i64()?;
                }
            }
            ArrayData::Float(v) => {
                for slot in v.iter_mut() {
                    *slot = self.buf.f32()?;
                }
            }
            ArrayData::Double(v) => {
                for slot in v.iter_mut() {
                    *slot = self.buf.f64()?;
                }
            }
            ArrayData::Ref { .. } => unreachable!("handled above"),
        }
        drop(data);
        Ok(val)
    }

    fn read_int_array(
        &mut self,
        out: &mut [i32],
        referencee: &Arc<FieldDesc>,
    ) -> Result<(), PackError> {
        if referencee.thin {
            self.read_thin_ints(out)
        } else if referencee.compressed {
            let kind = self.buf.u8()?;
            match kind {
                COMPRESSED_DIFF => self.read_diff_ints(out),
                COMPRESSED_VARINT => self.read_varint_ints(out),
                COMPRESSED_THIN => self.read_thin_ints(out),
                COMPRESSED_OFFSET_SHORT => self.read_offset_short_ints(out),
                other => Err(PackError::MalformedTag(other as i8)),
            }
        } else if referencee.plain {
            for slot in out.iter_mut() {
                *slot = self.buf.i32()?;
            }
            Ok(())
        } else {
            self.read_varint_ints(out)
        }
    }

    fn read_varint_ints(&mut self, out: &mut [i32]) -> Result<(), PackError> {
        for slot in out.iter_mut() {
            *slot = read_c_int(&mut self.buf)?;
        }
        Ok(())
    }

    fn read_diff_ints(&mut self, out: &mut [i32]) -> Result<(), PackError> {
        if out.is_empty() {
            return Ok(());
        }
        out[0] = read_c_int(&mut self.buf)?;
        for i in 1..out.len() {
            out[i] = out[i - 1].wrapping_add(read_c_int(&mut self.buf)?);
        }
        Ok(())
    }

    fn read_thin_ints(&mut self, out: &mut [i32]) -> Result<(), PackError> {
        for _ in 0..out.len() {
            let idx = read_c_int(&mut self.buf)? as usize;
            if idx >= out.len() {
                break;
            }
            out[idx] = read_c_int(&mut self.buf)?;
        }
        Ok(())
    }

    fn read_offset_short_ints(&mut self, out: &mut [i32]) -> Result<(), PackError> {
        let base = read_c_int(&mut self.buf)?;
        for slot in out.iter_mut() {
            *slot = base.wrapping_add(self.buf.i16()? as i32);
        }
        Ok(())
    }

    /// The copy mechanism behind copy-requesting back-references: a
    /// pluggable copier gets the first shot; the fallback re-decodes the
    /// original's bytes in a forked sub-context, so the result is
    /// structurally equal but a distinct node, and nothing the sub-read
    /// registers leaks back into this stream.
    fn copy_from(&mut self, pos: usize) -> Result<Value, PackError> {
        if let Some(copier) = self.conf.copier().cloned() {
            if let Some(original) = self.objects.get_registered(pos) {
                if let Some(copy) = copier.copy(&original, &self.conf) {
                    return Ok(copy);
                }
            }
        }
        let mut sub = self.objects.fork();
        std::mem::swap(&mut self.objects, &mut sub);
        self.buf.push(pos);
        let res = self.read_with_header(&FieldDesc::root());
        let popped = self.buf.pop();
        std::mem::swap(&mut self.objects, &mut sub);
        popped?;
        res
    }

    fn process_validation(&mut self) {
        self.callbacks.sort_by(|a, b| b.prio.cmp(&a.prio));
        for entry in self.callbacks.drain(..) {
            if let Err(err) = (entry.cb)() {
                tracing::warn!("object validation callback failed: {err}");
            }
        }
    }
}

impl Drop for ObjectReader<'_> {
    fn drop(&mut self) {
        self.conf.return_caches(crate::config::StreamCaches {
            names: std::mem::take(&mut self.names),
            objects: std::mem::take(&mut self.objects),
            sites: std::mem::take(&mut self.sites),
        });
    }
}
