//! Class bytecode lookup capability handed to the manager by the host.

use std::collections::BTreeMap;
use std::io;

/// Source of class bytecode, keyed by dot-form class names
/// (`java.lang.String`).
pub trait ClassProvider: Send + Sync {
    /// Bytecode of a single class.
    fn get_class(&self, name: &str) -> io::Result<Vec<u8>>;

    /// Names of every class this provider can serve; bytes are fetched
    /// lazily through [`Self::get_class`]. Used for wildcard transformer
    /// registration.
    fn class_names(&self) -> Vec<String>;
}

/// In-memory provider over a name-to-bytes map.
#[derive(Debug, Default)]
pub struct MapClassProvider {
    classes: BTreeMap<String, Vec<u8>>,
}

impl MapClassProvider {
    pub fn new() -> MapClassProvider {
        MapClassProvider::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.classes.insert(name.into(), bytes);
    }
}

impl ClassProvider for MapClassProvider {
    fn get_class(&self, name: &str) -> io::Result<Vec<u8>> {
        self.classes.get(name).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("class not found: {}", name))
        })
    }

    fn class_names(&self) -> Vec<String> {
        self.classes.keys().cloned().collect()
    }
}
