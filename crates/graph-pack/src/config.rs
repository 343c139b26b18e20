//! Codec configuration.
//!
//! A [`Config`] owns the process-wide class metadata cache, the custom
//! serializer table, the global class-name dictionary, and the behaviour
//! knobs. Writers and readers share it through an `Arc`. Per-stream
//! registries are borrowed from a per-thread reuse pool so stream setup is
//! allocation-free on the hot path.

use std::cell::RefCell;
use std::sync::Arc;

use crate::class_names::ClassNameRegistry;
use crate::constants::{BUILTIN_CLASSES, DEFAULT_READ_EXTERNAL_READ_AHEAD};
use crate::error::PackError;
use crate::meta::{ClassDef, ClassDesc};
use crate::refs::ObjectRegistry;
use crate::registry::ClassRegistry;
use crate::serializer::{
    ObjSerializer, ScalarKind, ScalarSerializer, SerializerDelegate, StringSerializer,
};
use crate::sites::SiteTable;
use crate::value::{EnumValue, ObjRef, Object, Value};

/// Pluggable copy strategy consulted when a copy-requesting back-reference
/// is read. Returning `None` falls back to re-decoding the original's
/// bytes.
pub trait ObjectCopier: Send + Sync {
    fn copy(&self, value: &Value, conf: &Arc<Config>) -> Option<Value>;
}

pub struct Config {
    classes: ClassRegistry,
    dictionary: Vec<Arc<str>>,
    struct_mode: bool,
    cross_language: bool,
    read_external_read_ahead: usize,
    copier: Option<Arc<dyn ObjectCopier>>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// A configuration with the built-in classes (strings, boxed scalars)
    /// installed and default knobs.
    pub fn new() -> Self {
        let classes = ClassRegistry::new(false);
        classes.define(ClassDef::new("String"));
        classes.register_serializer("String", Arc::new(StringSerializer));
        for (name, kind) in [
            ("Byte", ScalarKind::Byte),
            ("Short", ScalarKind::Short),
            ("Char", ScalarKind::Char),
            ("Float", ScalarKind::Float),
            ("Double", ScalarKind::Double),
        ] {
            classes.define(ClassDef::new(name));
            classes.register_serializer(name, Arc::new(ScalarSerializer(kind)));
        }
        Self {
            classes,
            dictionary: BUILTIN_CLASSES.iter().map(|&s| Arc::from(s)).collect(),
            struct_mode: false,
            cross_language: false,
            read_external_read_ahead: DEFAULT_READ_EXTERNAL_READ_AHEAD,
            copier: None,
        }
    }

    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    /// Registers a class definition.
    pub fn define_class(&self, def: ClassDef) {
        self.classes.define(def);
    }

    pub fn register_serializer(&self, class: impl Into<String>, ser: Arc<dyn ObjSerializer>) {
        self.classes.register_serializer(class, ser);
    }

    pub fn set_serializer_delegate(&self, delegate: Arc<dyn SerializerDelegate>) {
        self.classes.set_serializer_delegate(delegate);
    }

    /// Adds a class name to the global dictionary; both peers then agree
    /// on its code without bytes on the wire. Call before any stream is
    /// opened and identically on both sides.
    pub fn add_to_dictionary(&mut self, name: impl Into<Arc<str>>) {
        self.dictionary.push(name.into());
    }

    pub fn dictionary(&self) -> &[Arc<str>] {
        &self.dictionary
    }

    /// When set, identity is not preserved: no handles, every reference
    /// inlined.
    pub fn set_struct_mode(&mut self, on: bool) {
        self.struct_mode = on;
    }

    pub fn is_struct_mode(&self) -> bool {
        self.struct_mode
    }

    /// When set, enums travel by name and the encoding avoids
    /// dialect-specific shortcuts.
    pub fn set_cross_language(&mut self, on: bool) {
        self.cross_language = on;
    }

    pub fn is_cross_language(&self) -> bool {
        self.cross_language
    }

    /// When set, field-level annotations (plain, thin, compressed, flat,
    /// conditional) are ignored and the default encodings are used.
    pub fn set_ignore_annotations(&mut self, on: bool) {
        self.classes.set_ignore_annotations(on);
    }

    /// Advisory sizing hint for externalizable bodies.
    pub fn set_read_external_read_ahead(&mut self, bytes: usize) {
        self.read_external_read_ahead = bytes;
    }

    pub fn read_external_read_ahead(&self) -> usize {
        self.read_external_read_ahead
    }

    pub fn set_copier(&mut self, copier: Arc<dyn ObjectCopier>) {
        self.copier = Some(copier);
    }

    pub fn copier(&self) -> Option<&Arc<dyn ObjectCopier>> {
        self.copier.as_ref()
    }

    /// Creates an instance of a registered class with default fields.
    pub fn new_object(&self, class: &str) -> Result<ObjRef, PackError> {
        let desc = self.classes.get_desc(class)?;
        Ok(Object::new(&desc))
    }

    /// Looks up an enum constant by name.
    pub fn enum_value(&self, class: &str, constant: &str) -> Result<Value, PackError> {
        let desc = self.classes.get_desc(class)?;
        let ordinal = desc
            .enum_constants
            .as_ref()
            .and_then(|set| set.iter().position(|c| c == constant))
            .ok_or_else(|| {
                PackError::IllegalFieldAccess(format!("no constant '{constant}' on '{class}'"))
            })?;
        Ok(Value::Enum(std::rc::Rc::new(EnumValue { desc, ordinal })))
    }

    pub fn get_desc(&self, class: &str) -> Result<Arc<ClassDesc>, PackError> {
        self.classes.get_desc(class)
    }

    /// Borrows cleared per-stream registries from the per-thread pool.
    pub(crate) fn borrow_caches(&self) -> StreamCaches {
        let mut caches = POOL
            .with(|pool| pool.borrow_mut().pop())
            .unwrap_or_default();
        caches.names.clear();
        caches.names.seed(self.dictionary.iter());
        caches.objects.clear();
        caches.objects.disabled = self.struct_mode;
        caches.sites.clear();
        caches
    }

    /// Returns registries to the pool for the next stream on this thread.
    /// Cleared on the way in: pooled registries must not keep stream
    /// values alive past the encode or decode that used them.
    pub(crate) fn return_caches(&self, mut caches: StreamCaches) {
        caches.objects.clear();
        caches.names.clear();
        caches.sites.clear();
        POOL.with(|pool| {
            let mut pool = pool.borrow_mut();
            if pool.len() < POOL_LIMIT {
                pool.push(caches);
            }
        });
    }
}

const POOL_LIMIT: usize = 8;

#[derive(Default)]
pub(crate) struct StreamCaches {
    pub names: ClassNameRegistry,
    pub objects: ObjectRegistry,
    pub sites: SiteTable,
}

thread_local! {
    static POOL: RefCell<Vec<StreamCaches>> = RefCell::new(Vec::new());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_resolve() {
        let conf = Config::new();
        assert!(conf.get_desc("String").unwrap().serializer.is_some());
        assert!(conf.get_desc("Double").unwrap().serializer.is_some());
    }

    #[test]
    fn enum_value_lookup() {
        let conf = Config::new();
        conf.define_class(ClassDef::new_enum("Color", ["GREEN", "BLUE", "RED"]));
        let red = conf.enum_value("Color", "RED").unwrap();
        match red {
            Value::Enum(e) => {
                assert_eq!(e.ordinal, 2);
                assert_eq!(e.name(), "RED");
            }
            other => panic!("expected enum, got {other:?}"),
        }
        assert!(conf.enum_value("Color", "MAUVE").is_err());
    }

    #[test]
    fn pooled_caches_come_back_cleared() {
        let conf = Config::new();
        let mut caches = conf.borrow_caches();
        caches.names.register(Arc::from("Transient"));
        let v = Value::str("x");
        caches.objects.register_for_write(&v, 3);
        conf.return_caches(caches);

        let caches = conf.borrow_caches();
        assert!(caches.names.code_of("Transient").is_none());
        // Dictionary seeding is present.
        assert!(caches.names.code_of("String").is_some());
        conf.return_caches(caches);
    }
}
