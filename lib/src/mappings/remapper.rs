//! Map-backed identifier remapper.
//!
//! Keys follow the mapping file conventions:
//!
//! - class: internal name (`a/b/C`)
//! - method: `owner.name(desc)returnDesc`
//! - field: `owner.name:desc` (an empty desc matches any descriptor)

use std::collections::HashMap;
use std::sync::OnceLock;

pub struct MapRemapper {
    mappings: HashMap<String, String>,
    /// Lazily built inverse, dropped on any mutation.
    reverse: OnceLock<Box<MapRemapper>>,
}

impl Default for MapRemapper {
    fn default() -> Self {
        MapRemapper::new()
    }
}

impl Clone for MapRemapper {
    fn clone(&self) -> Self {
        MapRemapper {
            mappings: self.mappings.clone(),
            reverse: OnceLock::new(),
        }
    }
}

impl std::fmt::Debug for MapRemapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapRemapper")
            .field("mappings", &self.mappings)
            .finish()
    }
}

impl PartialEq for MapRemapper {
    fn eq(&self, other: &Self) -> bool {
        self.mappings == other.mappings
    }
}

impl MapRemapper {
    pub fn new() -> MapRemapper {
        MapRemapper {
            mappings: HashMap::new(),
            reverse: OnceLock::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn mappings(&self) -> &HashMap<String, String> {
        &self.mappings
    }

    fn invalidate(&mut self) {
        self.reverse = OnceLock::new();
    }

    /// Class names are in the slash form.
    pub fn add_class_mapping(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.mappings.insert(from.into(), to.into());
        self.invalidate();
    }

    pub fn add_method_mapping(&mut self, owner: &str, name: &str, desc: &str, target: &str) {
        self.mappings
            .insert(format!("{}.{}{}", owner, name, desc), target.to_string());
        self.invalidate();
    }

    /// An empty `desc` registers a descriptor-agnostic field mapping.
    pub fn add_field_mapping(&mut self, owner: &str, name: &str, desc: &str, target: &str) {
        self.mappings
            .insert(format!("{}.{}:{}", owner, name, desc), target.to_string());
        self.invalidate();
    }

    /// Copy all mappings from another remapper into this one.
    pub fn copy_from(&mut self, other: &MapRemapper) {
        self.mappings
            .extend(other.mappings.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.invalidate();
    }

    pub fn map(&self, key: &str) -> Option<&str> {
        self.mappings.get(key).map(String::as_str)
    }

    /// Like [`Self::map`] but falls back to the key itself.
    pub fn map_safe<'a>(&'a self, key: &'a str) -> &'a str {
        self.map(key).unwrap_or(key)
    }

    /// Map an internal class name; array descriptors map their element type.
    pub fn map_class_name(&self, name: &str) -> String {
        if let Some(elem) = name.strip_prefix('[') {
            return format!("[{}", self.map_desc(elem));
        }
        self.map_safe(name).to_string()
    }

    pub fn map_method_name(&self, owner: &str, name: &str, desc: &str) -> String {
        self.map(&format!("{}.{}{}", owner, name, desc))
            .unwrap_or(name)
            .to_string()
    }

    pub fn map_field_name(&self, owner: &str, name: &str, desc: &str) -> String {
        if let Some(mapped) = self.map(&format!("{}.{}:{}", owner, name, desc)) {
            return mapped.to_string();
        }
        self.map(&format!("{}.{}:", owner, name))
            .unwrap_or(name)
            .to_string()
    }

    /// Rewrite the class references inside a field descriptor.
    pub fn map_desc(&self, desc: &str) -> String {
        let mut out = String::with_capacity(desc.len());
        let mut chars = desc.chars();
        while let Some(c) = chars.next() {
            if c != 'L' {
                out.push(c);
                continue;
            }
            let mut name = String::new();
            for n in chars.by_ref() {
                if n == ';' {
                    break;
                }
                name.push(n);
            }
            out.push('L');
            out.push_str(self.map_safe(&name));
            out.push(';');
        }
        out
    }

    pub fn map_method_desc(&self, desc: &str) -> String {
        self.map_desc(desc)
    }

    /// The inverse remapper, built on first use and cached until the next
    /// mutation.
    pub fn reverse(&self) -> &MapRemapper {
        self.reverse.get_or_init(|| {
            let mut reversed = MapRemapper::new();
            // classes first so member owners can be mapped through
            for (key, value) in &self.mappings {
                if !key.contains('.') {
                    reversed.add_class_mapping(value.clone(), key.clone());
                }
            }
            for (key, value) in &self.mappings {
                let Some(dot) = key.find('.') else { continue };
                let owner = &key[..dot];
                let member = &key[dot + 1..];
                if let Some(colon) = member.find(':') {
                    let name = &member[..colon];
                    let desc = &member[colon + 1..];
                    if desc.is_empty() {
                        reversed.add_field_mapping(self.map_safe(owner), value, "", name);
                    } else {
                        reversed.add_field_mapping(
                            self.map_safe(owner),
                            value,
                            &self.map_desc(desc),
                            name,
                        );
                    }
                } else if let Some(paren) = member.find('(') {
                    let name = &member[..paren];
                    let desc = &member[paren..];
                    reversed.add_method_mapping(
                        self.map_safe(owner),
                        value,
                        &self.map_method_desc(desc),
                        name,
                    );
                }
            }
            Box::new(reversed)
        })
    }
}

impl<const N: usize> From<[(&str, &str); N]> for MapRemapper {
    fn from(pairs: [(&str, &str); N]) -> Self {
        let mut remapper = MapRemapper::new();
        for (from, to) in pairs {
            remapper.add_class_mapping(from, to);
        }
        remapper
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_mapping_falls_back_to_any_descriptor() {
        let mut remapper = MapRemapper::new();
        remapper.add_field_mapping("a/B", "count", "", "size");
        assert_eq!(remapper.map_field_name("a/B", "count", "I"), "size");
        remapper.add_field_mapping("a/B", "count", "J", "longSize");
        assert_eq!(remapper.map_field_name("a/B", "count", "J"), "longSize");
        assert_eq!(remapper.map_field_name("a/B", "count", "I"), "size");
    }

    #[test]
    fn descriptors_are_rewritten() {
        let mut remapper = MapRemapper::new();
        remapper.add_class_mapping("a/B", "x/Y");
        assert_eq!(remapper.map_desc("(La/B;I)La/B;"), "(Lx/Y;I)Lx/Y;");
        assert_eq!(remapper.map_class_name("[[La/B;"), "[[Lx/Y;");
    }

    #[test]
    fn reverse_of_reverse_is_identity() {
        let mut remapper = MapRemapper::new();
        remapper.add_class_mapping("a/B", "x/Y");
        remapper.add_method_mapping("a/B", "run", "()V", "execute");
        remapper.add_field_mapping("a/B", "count", "I", "size");

        let double = remapper.reverse().reverse();
        assert_eq!(double, &remapper);
    }

    #[test]
    fn reverse_cache_invalidated_on_mutation() {
        let mut remapper = MapRemapper::new();
        remapper.add_class_mapping("a/B", "x/Y");
        assert_eq!(remapper.reverse().map_class_name("x/Y"), "a/B");
        remapper.add_class_mapping("c/D", "z/W");
        assert_eq!(remapper.reverse().map_class_name("z/W"), "c/D");
    }
}
