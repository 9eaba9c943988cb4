//! Descriptor parsing, member declarations and instruction helpers.

pub mod code;
pub mod descriptors;
pub mod member;

pub use descriptors::{BaseType, Descriptor, FieldType, MethodDescriptor, Width};
pub use member::MemberDeclaration;

/// Convert a slash-form internal name to the dot form used by class loaders.
pub fn dot(name: &str) -> String {
    name.replace('/', ".")
}

/// Convert a dot-form class name to the slash-form internal name.
pub fn slash(name: &str) -> String {
    name.replace('.', "/")
}
