//! Process-wide class metadata cache.
//!
//! Descriptor construction is expensive; lookups are frequent. The cache
//! uses a read-biased scheme: an optimistic read-locked lookup, and on a
//! miss the descriptor is built outside any lock and inserted under a
//! write lock with a double check.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::PackError;
use crate::meta::{ClassDef, ClassDesc};
use crate::serializer::{ObjSerializer, SerializerDelegate, SerializerRegistry};

/// The metadata cache: registered raw definitions plus lazily built
/// descriptors, and the custom-serializer table consulted at build time.
pub struct ClassRegistry {
    defs: RwLock<HashMap<Arc<str>, ClassDef>>,
    infos: RwLock<HashMap<Arc<str>, Arc<ClassDesc>>>,
    serializers: RwLock<SerializerRegistry>,
    ignore_annotations: bool,
}

impl ClassRegistry {
    pub fn new(ignore_annotations: bool) -> Self {
        Self {
            defs: RwLock::new(HashMap::new()),
            infos: RwLock::new(HashMap::new()),
            serializers: RwLock::new(SerializerRegistry::new()),
            ignore_annotations,
        }
    }

    pub fn is_ignore_annotations(&self) -> bool {
        self.ignore_annotations
    }

    /// Only affects descriptors built after the call; set it before any
    /// stream touches the classes involved.
    pub(crate) fn set_ignore_annotations(&mut self, on: bool) {
        self.ignore_annotations = on;
    }

    /// Registers a raw class definition. A descriptor is only built when
    /// the class is first used in a stream.
    pub fn define(&self, def: ClassDef) {
        let name: Arc<str> = Arc::from(def.name.as_str());
        self.defs.write().unwrap().insert(name, def);
    }

    pub fn register_serializer(&self, class: impl Into<String>, ser: Arc<dyn ObjSerializer>) {
        self.serializers.write().unwrap().register(class, ser);
    }

    pub fn set_serializer_delegate(&self, delegate: Arc<dyn SerializerDelegate>) {
        self.serializers.write().unwrap().set_delegate(delegate);
    }

    /// Looks up (building on first use) the descriptor for `name`.
    pub fn get_desc(&self, name: &str) -> Result<Arc<ClassDesc>, PackError> {
        if let Some(desc) = self.infos.read().unwrap().get(name) {
            return Ok(desc.clone());
        }

        // Build outside the write lock; descriptor construction walks the
        // superclass chain and may be slow.
        let chain = self.chain_for(name)?;
        let serializer = self.serializers.read().unwrap().lookup(name);
        let desc = ClassDesc::build(&chain, serializer, self.ignore_annotations);

        let mut infos = self.infos.write().unwrap();
        // Double check: another thread may have built it meanwhile; the
        // first inserted descriptor wins so all users share one.
        if let Some(existing) = infos.get(name) {
            return Ok(existing.clone());
        }
        infos.insert(Arc::from(name), desc.clone());
        Ok(desc)
    }

    /// Superclass chain root-first, ending with the class itself.
    fn chain_for(&self, name: &str) -> Result<Vec<ClassDef>, PackError> {
        let defs = self.defs.read().unwrap();
        let mut chain = Vec::new();
        let mut cursor = Some(name.to_string());
        while let Some(current) = cursor {
            let def = defs
                .get(current.as_str())
                .ok_or_else(|| PackError::UnregisteredClass(current.clone()))?;
            cursor = def.super_name.clone();
            chain.push(def.clone());
        }
        chain.reverse();
        Ok(chain)
    }

    /// Ancestor class names of `name`, nearest first. Used by the
    /// class-name registry to install snippets.
    pub fn ancestors(&self, name: &str) -> Vec<Arc<str>> {
        let defs = self.defs.read().unwrap();
        let mut out = Vec::new();
        let mut cursor = defs.get(name).and_then(|d| d.super_name.clone());
        while let Some(current) = cursor {
            cursor = defs.get(current.as_str()).and_then(|d| d.super_name.clone());
            out.push(Arc::from(current.as_str()));
        }
        out
    }
}
