//! Per-stream class-name registry.
//!
//! Maps class names to small integer codes in both directions. The first
//! time a class is named in a stream it travels as a UTF string plus a
//! freshly assigned code (and snippets: ancestor names installed
//! speculatively so later references to them are a single code). Every
//! later reference is the code alone. Codes are stable within a stream,
//! never across streams.

use std::collections::HashMap;
use std::sync::Arc;

use graph_pack_buffers::{Reader, Writer};

use crate::constants::{FIRST_CLASS_CODE, NEW_CLASS};
use crate::error::PackError;
use crate::varint::{read_c_int, read_string_utf, write_c_int, write_string_utf};

pub struct ClassNameRegistry {
    code_by_name: HashMap<Arc<str>, u32>,
    name_by_code: HashMap<u32, Arc<str>>,
    next_code: u32,
}

impl Default for ClassNameRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassNameRegistry {
    pub fn new() -> Self {
        Self {
            code_by_name: HashMap::new(),
            name_by_code: HashMap::new(),
            next_code: FIRST_CLASS_CODE,
        }
    }

    /// Drops all per-stream codes. The caller re-seeds afterwards.
    pub fn clear(&mut self) {
        self.code_by_name.clear();
        self.name_by_code.clear();
        self.next_code = FIRST_CLASS_CODE;
    }

    /// Seeds the registry from the global dictionary. Both peers seed from
    /// the same dictionary, so the assigned codes agree without any bytes
    /// on the wire.
    pub fn seed<'a>(&mut self, dictionary: impl IntoIterator<Item = &'a Arc<str>>) {
        for name in dictionary {
            self.register(name.clone());
        }
    }

    /// Assigns the next code to `name` unless it already has one.
    pub fn register(&mut self, name: Arc<str>) -> u32 {
        if let Some(&code) = self.code_by_name.get(&name) {
            return code;
        }
        let code = self.next_code;
        self.next_code += 1;
        self.code_by_name.insert(name.clone(), code);
        self.name_by_code.insert(code, name);
        code
    }

    pub fn code_of(&self, name: &str) -> Option<u32> {
        self.code_by_name.get(name).copied()
    }

    /// Emits a class reference. Known classes are a single varint code;
    /// new classes are the zero sentinel, the UTF name, and the snippet
    /// list (not-yet-coded ancestors, nearest first). Idempotent within a
    /// stream.
    pub fn encode(&mut self, w: &mut Writer, name: &Arc<str>, ancestors: &[Arc<str>]) {
        if let Some(&code) = self.code_by_name.get(name) {
            write_c_int(w, code as i32);
            return;
        }
        write_c_int(w, NEW_CLASS);
        write_string_utf(w, name);
        let missing: Vec<&Arc<str>> = ancestors
            .iter()
            .filter(|a| !self.code_by_name.contains_key(*a))
            .collect();
        write_c_int(w, missing.len() as i32);
        for ancestor in &missing {
            write_string_utf(w, ancestor);
        }
        self.register(name.clone());
        let missing: Vec<Arc<str>> = missing.into_iter().cloned().collect();
        for ancestor in missing {
            self.register(ancestor);
        }
    }

    /// Mirror of [`encode`](Self::encode).
    pub fn decode(&mut self, r: &mut Reader) -> Result<Arc<str>, PackError> {
        let code = read_c_int(r)?;
        if code != NEW_CLASS {
            return self
                .name_by_code
                .get(&(code as u32))
                .cloned()
                .ok_or(PackError::UnknownClass(code));
        }
        let name: Arc<str> = Arc::from(read_string_utf(r)?.as_str());
        let snippets = read_c_int(r)?;
        if snippets < 0 {
            return Err(PackError::UnknownClass(snippets));
        }
        let mut ancestors = Vec::with_capacity(snippets as usize);
        for _ in 0..snippets {
            ancestors.push(Arc::<str>::from(read_string_utf(r)?.as_str()));
        }
        self.register(name.clone());
        for ancestor in ancestors {
            self.register(ancestor);
        }
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arc(s: &str) -> Arc<str> {
        Arc::from(s)
    }

    #[test]
    fn first_reference_ships_name_then_code_only() {
        let mut enc = ClassNameRegistry::new();
        let mut w = Writer::new();
        enc.encode(&mut w, &arc("Point"), &[]);
        let first = w.len();
        enc.encode(&mut w, &arc("Point"), &[]);
        // Second reference is the single-byte code.
        assert_eq!(w.len() - first, 1);

        let bytes = w.flush();
        let mut dec = ClassNameRegistry::new();
        let mut r = Reader::new(&bytes);
        assert_eq!(&*dec.decode(&mut r).unwrap(), "Point");
        assert_eq!(&*dec.decode(&mut r).unwrap(), "Point");
    }

    #[test]
    fn snippets_install_ancestor_codes() {
        let mut enc = ClassNameRegistry::new();
        let mut w = Writer::new();
        enc.encode(&mut w, &arc("Derived"), &[arc("Base"), arc("Root")]);
        let after_new = w.len();
        enc.encode(&mut w, &arc("Base"), &[arc("Root")]);
        // Ancestor was installed as a snippet: a single byte.
        assert_eq!(w.len() - after_new, 1);

        let bytes = w.flush();
        let mut dec = ClassNameRegistry::new();
        let mut r = Reader::new(&bytes);
        assert_eq!(&*dec.decode(&mut r).unwrap(), "Derived");
        assert_eq!(&*dec.decode(&mut r).unwrap(), "Base");
    }

    #[test]
    fn dictionary_seed_needs_no_bytes() {
        let dict = [arc("String"), arc("int[]")];
        let mut enc = ClassNameRegistry::new();
        enc.seed(dict.iter());
        let mut dec = ClassNameRegistry::new();
        dec.seed(dict.iter());

        let mut w = Writer::new();
        enc.encode(&mut w, &arc("String"), &[]);
        assert_eq!(w.len(), 1);
        let bytes = w.flush();
        let mut r = Reader::new(&bytes);
        assert_eq!(&*dec.decode(&mut r).unwrap(), "String");
    }

    #[test]
    fn unknown_code_is_an_error() {
        let mut dec = ClassNameRegistry::new();
        let mut w = Writer::new();
        write_c_int(&mut w, 99);
        let bytes = w.flush();
        let mut r = Reader::new(&bytes);
        assert!(matches!(
            dec.decode(&mut r),
            Err(PackError::UnknownClass(99))
        ));
    }

    #[test]
    fn clear_resets_codes() {
        let mut reg = ClassNameRegistry::new();
        let first = reg.register(arc("A"));
        reg.clear();
        let second = reg.register(arc("B"));
        assert_eq!(first, second);
    }
}
