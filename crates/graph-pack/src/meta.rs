//! Class and field metadata.
//!
//! [`ClassDef`] / [`FieldDef`] are the caller-facing raw definitions (the
//! codec has no runtime reflection, so callers declare the shape of their
//! classes up front). [`ClassDesc`] / [`FieldDesc`] are the immutable
//! descriptors the codec actually works with, built lazily on first use by
//! the metadata cache with fields in canonical order.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::compat::{CompatFieldInput, CompatFieldOutput};
use crate::error::PackError;
use crate::reader::ObjectReader;
use crate::serializer::ObjSerializer;
use crate::value::Value;
use crate::writer::ObjectWriter;

/// Hook returning a substitute for a freshly read instance, or `None` to
/// keep the instance as is.
pub type ReadResolveFn = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// Externalizable write hook: the class serializes its own body.
pub type WriteExternalFn =
    Arc<dyn Fn(&mut ObjectWriter, &Value) -> Result<(), PackError> + Send + Sync>;

/// Externalizable read hook: the class fills its own body from the stream.
pub type ReadExternalFn =
    Arc<dyn Fn(&mut ObjectReader<'_>, &Value) -> Result<(), PackError> + Send + Sync>;

/// Compatible-mode per-level write hook.
pub type WriteLevelFn =
    Arc<dyn Fn(&mut CompatFieldOutput<'_>, &Value) -> Result<(), PackError> + Send + Sync>;

/// Compatible-mode per-level read hook.
pub type ReadLevelFn =
    Arc<dyn Fn(&mut CompatFieldInput<'_, '_>, &Value) -> Result<(), PackError> + Send + Sync>;

/// Element type of an array field or array value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArrayElem {
    Bool,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    /// Reference elements; the name is the declared element class
    /// (`"Object"` when open).
    Ref(Arc<str>),
}

impl ArrayElem {
    /// The array class name under which arrays of this element travel,
    /// e.g. `"int[]"` or `"Point[]"`.
    pub fn array_class(&self) -> String {
        match self {
            ArrayElem::Bool => "boolean[]".to_string(),
            ArrayElem::Byte => "byte[]".to_string(),
            ArrayElem::Char => "char[]".to_string(),
            ArrayElem::Short => "short[]".to_string(),
            ArrayElem::Int => "int[]".to_string(),
            ArrayElem::Long => "long[]".to_string(),
            ArrayElem::Float => "float[]".to_string(),
            ArrayElem::Double => "double[]".to_string(),
            ArrayElem::Ref(name) => format!("{name}[]"),
        }
    }

    /// Parses an array class name back into its element type.
    pub fn from_array_class(name: &str) -> Option<ArrayElem> {
        let elem = name.strip_suffix("[]")?;
        Some(match elem {
            "boolean" => ArrayElem::Bool,
            "byte" => ArrayElem::Byte,
            "char" => ArrayElem::Char,
            "short" => ArrayElem::Short,
            "int" => ArrayElem::Int,
            "long" => ArrayElem::Long,
            "float" => ArrayElem::Float,
            "double" => ArrayElem::Double,
            other => ArrayElem::Ref(Arc::from(other)),
        })
    }
}

/// Declared type of a field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldType {
    Bool,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    /// Reference field; `None` means the site accepts any class.
    Object(Option<Arc<str>>),
    Array(ArrayElem),
}

impl FieldType {
    /// Primitive, non-array types are read and written inline without a
    /// tag byte.
    pub fn is_integral(&self) -> bool {
        !matches!(self, FieldType::Object(_) | FieldType::Array(_))
    }

    fn order_rank(&self) -> u8 {
        match self {
            FieldType::Bool => 0,
            FieldType::Byte => 1,
            FieldType::Char => 2,
            FieldType::Short => 3,
            FieldType::Int => 4,
            FieldType::Long => 5,
            FieldType::Float => 6,
            FieldType::Double => 7,
            FieldType::Array(_) => 8,
            FieldType::Object(_) => 9,
        }
    }
}

/// Caller-supplied raw field definition.
#[derive(Clone)]
pub struct FieldDef {
    pub name: String,
    pub ty: FieldType,
    pub plain: bool,
    pub conditional: bool,
    pub compressed: bool,
    pub thin: bool,
    pub flat: bool,
    pub one_of: Option<Arc<[String]>>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            plain: false,
            conditional: false,
            compressed: false,
            thin: false,
            flat: false,
            one_of: None,
        }
    }

    /// Fixed-width encoding for an int field or int array.
    pub fn plain(mut self) -> Self {
        self.plain = true;
        self
    }

    /// The field participates in the reader-skippable conditional group.
    pub fn conditional(mut self) -> Self {
        self.conditional = true;
        self
    }

    /// Int arrays pick the smallest of the compressed sub-strategies.
    pub fn compressed(mut self) -> Self {
        self.compressed = true;
        self
    }

    /// Sparse pair encoding for arrays.
    pub fn thin(mut self) -> Self {
        self.thin = true;
        self
    }

    /// Identity is not preserved for values written through this field.
    pub fn flat(mut self) -> Self {
        self.flat = true;
        self
    }

    /// Declares the small enumerated set of values this site can take.
    pub fn one_of<I, S>(mut self, constants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: Vec<String> = constants.into_iter().map(Into::into).collect();
        self.one_of = Some(Arc::from(set));
        self
    }
}

/// Caller-supplied raw class definition, the reflector's output.
#[derive(Clone)]
pub struct ClassDef {
    pub name: String,
    pub super_name: Option<String>,
    pub fields: Vec<FieldDef>,
    pub enum_constants: Option<Arc<[String]>>,
    pub flat: bool,
    pub compatible: bool,
    pub symmetric: bool,
    pub instantiable: bool,
    pub read_resolve: Option<ReadResolveFn>,
    pub write_external: Option<WriteExternalFn>,
    pub read_external: Option<ReadExternalFn>,
    pub write_level: Option<WriteLevelFn>,
    pub read_level: Option<ReadLevelFn>,
}

impl ClassDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            super_name: None,
            fields: Vec::new(),
            enum_constants: None,
            flat: false,
            compatible: false,
            symmetric: true,
            instantiable: true,
            read_resolve: None,
            write_external: None,
            read_external: None,
            write_level: None,
            read_level: None,
        }
    }

    /// Defines an enum class with the given constants, ordinal order.
    pub fn new_enum<I, S>(name: impl Into<String>, constants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut def = Self::new(name);
        let set: Vec<String> = constants.into_iter().map(Into::into).collect();
        def.enum_constants = Some(Arc::from(set));
        def
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn super_class(mut self, name: impl Into<String>) -> Self {
        self.super_name = Some(name.into());
        self
    }

    /// Instances of this class are always inlined, never handles.
    pub fn flat(mut self) -> Self {
        self.flat = true;
        self
    }

    /// The class cannot be default-instantiated; reads require a custom
    /// serializer providing `instantiate`.
    pub fn not_instantiable(mut self) -> Self {
        self.instantiable = false;
        self
    }

    /// Opts the class into the legacy level-by-level protocol.
    pub fn compatible(mut self) -> Self {
        self.compatible = true;
        self
    }

    /// Marks this level's field set asymmetric: `read_fields` payloads are
    /// shipped as explicit name/value pairs instead of positionally.
    pub fn asymmetric(mut self) -> Self {
        self.symmetric = false;
        self
    }

    pub fn read_resolve(mut self, hook: ReadResolveFn) -> Self {
        self.read_resolve = Some(hook);
        self
    }

    pub fn externalizable(mut self, write: WriteExternalFn, read: ReadExternalFn) -> Self {
        self.write_external = Some(write);
        self.read_external = Some(read);
        self
    }

    /// Installs this level's compatible-mode hooks.
    pub fn level_hooks(mut self, write: WriteLevelFn, read: ReadLevelFn) -> Self {
        self.write_level = Some(write);
        self.read_level = Some(read);
        self
    }
}

static NEXT_SITE: AtomicU32 = AtomicU32::new(1);

/// Immutable per-field descriptor.
pub struct FieldDesc {
    pub name: Arc<str>,
    pub ty: FieldType,
    /// Index of this field's slot in the instance's field vector.
    pub slot: usize,
    /// Process-unique id keying the per-stream prediction tables.
    pub site: u32,
    pub plain: bool,
    pub conditional: bool,
    pub compressed: bool,
    pub thin: bool,
    pub flat: bool,
    pub one_of: Option<Arc<[String]>>,
}

impl FieldDesc {
    fn from_def(def: &FieldDef, slot: usize, ignore_annotations: bool) -> Self {
        Self {
            name: Arc::from(def.name.as_str()),
            ty: def.ty.clone(),
            slot,
            site: NEXT_SITE.fetch_add(1, Ordering::Relaxed),
            plain: def.plain && !ignore_annotations,
            conditional: def.conditional && !ignore_annotations,
            compressed: def.compressed && !ignore_annotations,
            thin: def.thin && !ignore_annotations,
            flat: def.flat && !ignore_annotations,
            one_of: def.one_of.clone(),
        }
    }

    /// The anonymous field context used for top-level reads and writes and
    /// for array elements without a dedicated site.
    pub fn root() -> Arc<FieldDesc> {
        Arc::new(FieldDesc {
            name: Arc::from(""),
            ty: FieldType::Object(None),
            slot: 0,
            site: 0,
            plain: false,
            conditional: false,
            compressed: false,
            thin: false,
            flat: false,
            one_of: None,
        })
    }

    pub fn is_integral(&self) -> bool {
        self.ty.is_integral()
    }

    /// The class name the TYPED tag binds to at this site, if any.
    pub fn declared_class(&self) -> Option<&str> {
        match &self.ty {
            FieldType::Object(Some(name)) => Some(name),
            FieldType::Array(elem) => {
                // Arrays carry their own class code; TYPED never applies.
                let _ = elem;
                None
            }
            _ => None,
        }
    }
}

/// One level of the compatible-mode superclass chain.
pub struct CompatLevel {
    pub class: Arc<str>,
    /// Fields declared at this level, canonical order.
    pub fields: Vec<Arc<FieldDesc>>,
    pub write_hook: Option<WriteLevelFn>,
    pub read_hook: Option<ReadLevelFn>,
    pub symmetric: bool,
}

/// Immutable class descriptor. Built once per class by the metadata cache,
/// never mutated afterwards.
pub struct ClassDesc {
    pub name: Arc<str>,
    pub super_name: Option<Arc<str>>,
    /// All fields of the class including inherited ones, canonical order:
    /// primitives grouped by type (booleans first, so they pack), then
    /// arrays and references, tiebreak by name.
    pub fields: Vec<Arc<FieldDesc>>,
    /// Superclass chain levels, root first. Non-empty only for
    /// compatible-mode classes.
    pub comp_info: Vec<CompatLevel>,
    pub enum_constants: Option<Arc<[String]>>,
    pub flat: bool,
    pub externalizable: bool,
    pub compatible_mode: bool,
    pub instantiable: bool,
    pub serializer: Option<Arc<dyn ObjSerializer>>,
    pub read_resolve: Option<ReadResolveFn>,
    pub write_external: Option<WriteExternalFn>,
    pub read_external: Option<ReadExternalFn>,
}

impl ClassDesc {
    /// Builds the descriptor for `def`. `chain` is the superclass chain
    /// root-first, ending with `def` itself; `serializer` is the custom
    /// serializer resolved from the plugin table, if any.
    pub(crate) fn build(
        chain: &[ClassDef],
        serializer: Option<Arc<dyn ObjSerializer>>,
        ignore_annotations: bool,
    ) -> Arc<ClassDesc> {
        let def = chain.last().expect("chain includes the class itself");

        // Collect (level index, field def) pairs over the whole chain,
        // then sort canonically and assign slots.
        let mut tagged: Vec<(usize, &FieldDef)> = Vec::new();
        for (level, level_def) in chain.iter().enumerate() {
            for field in &level_def.fields {
                tagged.push((level, field));
            }
        }
        tagged.sort_by(|(_, a), (_, b)| {
            a.ty.order_rank()
                .cmp(&b.ty.order_rank())
                .then_with(|| a.name.cmp(&b.name))
        });

        let mut fields = Vec::with_capacity(tagged.len());
        let mut by_level: Vec<Vec<Arc<FieldDesc>>> = vec![Vec::new(); chain.len()];
        for (slot, (level, field_def)) in tagged.iter().enumerate() {
            let desc = Arc::new(FieldDesc::from_def(field_def, slot, ignore_annotations));
            by_level[*level].push(desc.clone());
            fields.push(desc);
        }

        let comp_info = if def.compatible {
            chain
                .iter()
                .zip(by_level)
                .map(|(level_def, level_fields)| CompatLevel {
                    class: Arc::from(level_def.name.as_str()),
                    fields: level_fields,
                    write_hook: level_def.write_level.clone(),
                    read_hook: level_def.read_level.clone(),
                    symmetric: level_def.symmetric,
                })
                .collect()
        } else {
            Vec::new()
        };

        Arc::new(ClassDesc {
            name: Arc::from(def.name.as_str()),
            super_name: def.super_name.as_deref().map(Arc::from),
            fields,
            comp_info,
            enum_constants: def.enum_constants.clone(),
            flat: def.flat,
            externalizable: def.write_external.is_some() && def.read_external.is_some(),
            compatible_mode: def.compatible,
            instantiable: def.instantiable,
            serializer,
            read_resolve: def.read_resolve.clone(),
            write_external: def.write_external.clone(),
            read_external: def.read_external.clone(),
        })
    }

    pub fn is_enum(&self) -> bool {
        self.enum_constants.is_some()
    }

    pub fn field_by_name(&self, name: &str) -> Option<&Arc<FieldDesc>> {
        self.fields.iter().find(|f| &*f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_field_order_groups_primitives() {
        let def = ClassDef::new("Mixed")
            .field(FieldDef::new("ref_b", FieldType::Object(None)))
            .field(FieldDef::new("z", FieldType::Int))
            .field(FieldDef::new("a", FieldType::Int))
            .field(FieldDef::new("flag2", FieldType::Bool))
            .field(FieldDef::new("flag1", FieldType::Bool))
            .field(FieldDef::new("arr", FieldType::Array(ArrayElem::Int)))
            .field(FieldDef::new("d", FieldType::Double));
        let desc = ClassDesc::build(&[def], None, false);
        let names: Vec<&str> = desc.fields.iter().map(|f| &*f.name).collect();
        assert_eq!(names, ["flag1", "flag2", "a", "z", "d", "arr", "ref_b"]);
        // Slots follow canonical order.
        for (i, f) in desc.fields.iter().enumerate() {
            assert_eq!(f.slot, i);
        }
    }

    #[test]
    fn ignore_annotations_clears_flags() {
        let def = ClassDef::new("Annotated")
            .field(FieldDef::new("xs", FieldType::Array(ArrayElem::Int)).thin());
        let desc = ClassDesc::build(&[def.clone()], None, true);
        assert!(!desc.fields[0].thin);
        let desc = ClassDesc::build(&[def], None, false);
        assert!(desc.fields[0].thin);
    }

    #[test]
    fn compat_chain_levels_keep_own_fields() {
        let base = ClassDef::new("Base").field(FieldDef::new("base_x", FieldType::Int));
        let derived = ClassDef::new("Derived")
            .super_class("Base")
            .compatible()
            .field(FieldDef::new("y", FieldType::Int));
        let desc = ClassDesc::build(&[base, derived], None, false);
        assert_eq!(desc.comp_info.len(), 2);
        assert_eq!(&*desc.comp_info[0].class, "Base");
        assert_eq!(&*desc.comp_info[0].fields[0].name, "base_x");
        assert_eq!(&*desc.comp_info[1].fields[0].name, "y");
        // Merged field list spans both levels.
        assert_eq!(desc.fields.len(), 2);
    }

    #[test]
    fn array_class_names_roundtrip() {
        for elem in [
            ArrayElem::Bool,
            ArrayElem::Int,
            ArrayElem::Double,
            ArrayElem::Ref(Arc::from("Point")),
        ] {
            let name = elem.array_class();
            assert_eq!(ArrayElem::from_array_class(&name).unwrap(), elem);
        }
        assert!(ArrayElem::from_array_class("int").is_none());
    }
}
