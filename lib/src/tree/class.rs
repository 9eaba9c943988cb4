//! Typed tree over a parsed class file.
//!
//! Nodes hold symbolic names instead of constant pool indices; the pool is
//! rebuilt on write. Everything is plain owned data so a registered
//! transformer node can be deep-cloned per application.

use crate::tree::insn::{ConstantValue, InsnList, LabelId};
use crate::tree::opcodes::{ACC_INTERFACE, ACC_STATIC};

/// Semantic representation of a class.
#[derive(Debug, Clone, Default)]
pub struct ClassNode {
    pub minor_version: u16,
    pub major_version: u16,
    pub access: u16,
    /// Internal name (`a/b/C`).
    pub name: String,
    /// Internal name of the superclass; `None` only for `java/lang/Object`.
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub source_file: Option<String>,
    pub fields: Vec<FieldNode>,
    pub methods: Vec<MethodNode>,
    pub inner_classes: Vec<InnerClassNode>,
    pub visible_annotations: Vec<AnnotationNode>,
    pub invisible_annotations: Vec<AnnotationNode>,
}

impl ClassNode {
    /// A minimal public class extending `java/lang/Object`.
    pub fn new(name: impl Into<String>, major_version: u16) -> ClassNode {
        ClassNode {
            minor_version: 0,
            major_version,
            access: crate::tree::opcodes::ACC_PUBLIC | crate::tree::opcodes::ACC_SUPER,
            name: name.into(),
            super_name: Some(String::from("java/lang/Object")),
            ..ClassNode::default()
        }
    }

    pub fn is_interface(&self) -> bool {
        self.access & ACC_INTERFACE != 0
    }

    pub fn find_method(&self, name: &str, desc: &str) -> Option<&MethodNode> {
        self.methods.iter().find(|m| m.name == name && m.desc == desc)
    }

    pub fn find_method_mut(&mut self, name: &str, desc: &str) -> Option<&mut MethodNode> {
        self.methods
            .iter_mut()
            .find(|m| m.name == name && m.desc == desc)
    }

    pub fn find_field(&self, name: &str) -> Option<&FieldNode> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Indices of methods matching a `name` or `name(desc)ret` pattern.
    pub fn methods_matching(&self, pattern: &str) -> Vec<usize> {
        let (name, desc) = match pattern.find('(') {
            Some(at) => (&pattern[..at], Some(&pattern[at..])),
            None => (pattern, None),
        };
        self.methods
            .iter()
            .enumerate()
            .filter(|(_, m)| m.name == name && desc.map_or(true, |d| m.desc == d))
            .map(|(i, _)| i)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct FieldNode {
    pub access: u16,
    pub name: String,
    pub desc: String,
    pub constant_value: Option<ConstantValue>,
    pub visible_annotations: Vec<AnnotationNode>,
    pub invisible_annotations: Vec<AnnotationNode>,
}

impl FieldNode {
    pub fn new(access: u16, name: impl Into<String>, desc: impl Into<String>) -> FieldNode {
        FieldNode {
            access,
            name: name.into(),
            desc: desc.into(),
            constant_value: None,
            visible_annotations: vec![],
            invisible_annotations: vec![],
        }
    }

    pub fn is_static(&self) -> bool {
        self.access & ACC_STATIC != 0
    }
}

#[derive(Debug, Clone)]
pub struct MethodNode {
    pub access: u16,
    pub name: String,
    pub desc: String,
    /// Internal names of declared thrown exceptions.
    pub exceptions: Vec<String>,
    /// `None` for `native` and `abstract` methods.
    pub code: Option<MethodBody>,
    pub visible_annotations: Vec<AnnotationNode>,
    pub invisible_annotations: Vec<AnnotationNode>,
    /// Indexed by parameter position; empty when the attribute is absent.
    pub invisible_parameter_annotations: Vec<Vec<AnnotationNode>>,
}

impl MethodNode {
    pub fn new(access: u16, name: impl Into<String>, desc: impl Into<String>) -> MethodNode {
        MethodNode {
            access,
            name: name.into(),
            desc: desc.into(),
            exceptions: vec![],
            code: Some(MethodBody::default()),
            visible_annotations: vec![],
            invisible_annotations: vec![],
            invisible_parameter_annotations: vec![],
        }
    }

    pub fn is_static(&self) -> bool {
        self.access & ACC_STATIC != 0
    }
}

/// The `Code` attribute of one method.
#[derive(Debug, Clone, Default)]
pub struct MethodBody {
    pub insns: InsnList,
    pub try_catch_blocks: Vec<TryCatchNode>,
    pub local_variables: Vec<LocalVariableNode>,
    /// As parsed; the writer recomputes both on emit.
    pub max_stack: u16,
    pub max_locals: u16,
    next_label: LabelId,
}

impl MethodBody {
    /// Assemble a body from parsed parts; the label allocator starts past
    /// the highest id referenced by `insns`.
    pub fn from_parts(
        insns: InsnList,
        try_catch_blocks: Vec<TryCatchNode>,
        local_variables: Vec<LocalVariableNode>,
        max_stack: u16,
        max_locals: u16,
    ) -> MethodBody {
        let mut body = MethodBody {
            insns,
            try_catch_blocks,
            local_variables,
            max_stack,
            max_locals,
            next_label: 0,
        };
        let mut highest = 0;
        for insn in &body.insns {
            if let crate::tree::insn::Insn::Label(id) = insn {
                highest = highest.max(id + 1);
            }
        }
        body.next_label = highest;
        body
    }

    /// Allocate a label id unused in this body.
    pub fn new_label(&mut self) -> LabelId {
        let id = self.next_label;
        self.next_label += 1;
        id
    }

    /// Bump the allocator past externally created label ids (used by the
    /// reader after materializing labels from bytecode offsets).
    pub fn reserve_labels(&mut self, count: LabelId) {
        self.next_label = self.next_label.max(count);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryCatchNode {
    pub start: LabelId,
    pub end: LabelId,
    pub handler: LabelId,
    /// `None` is the catch-all entry used by `finally` blocks.
    pub catch_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LocalVariableNode {
    pub name: String,
    pub desc: String,
    pub start: LabelId,
    pub end: LabelId,
    pub index: u16,
}

#[derive(Debug, Clone)]
pub struct InnerClassNode {
    pub name: String,
    pub outer_name: Option<String>,
    pub inner_name: Option<String>,
    pub access: u16,
}

/// One annotation instance: descriptor plus named element values in
/// declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationNode {
    pub desc: String,
    pub values: Vec<(String, AnnotationValue)>,
}

impl AnnotationNode {
    pub fn new(desc: impl Into<String>) -> AnnotationNode {
        AnnotationNode {
            desc: desc.into(),
            values: vec![],
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: AnnotationValue) -> AnnotationNode {
        self.values.push((name.into(), value));
        self
    }

    pub fn get(&self, name: &str) -> Option<&AnnotationValue> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// An annotation element value (JVMS §4.7.16.1).
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationValue {
    Byte(i8),
    Char(u16),
    Short(i16),
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Enum { desc: String, value: String },
    /// Class literal, stored as a field descriptor (`Ljava/lang/String;`).
    Class(String),
    Annotation(AnnotationNode),
    Array(Vec<AnnotationValue>),
}

impl AnnotationValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AnnotationValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AnnotationValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            AnnotationValue::Int(i) => Some(*i),
            AnnotationValue::Short(i) => Some(*i as i32),
            AnnotationValue::Byte(i) => Some(*i as i32),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[AnnotationValue]> {
        match self {
            AnnotationValue::Array(values) => Some(values),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_pattern_matching() {
        let mut class = ClassNode::new("a/B", 52);
        class.methods.push(MethodNode::new(0, "add", "(II)I"));
        class.methods.push(MethodNode::new(0, "add", "(JJ)J"));
        class.methods.push(MethodNode::new(0, "sub", "(II)I"));

        assert_eq!(class.methods_matching("add"), vec![0, 1]);
        assert_eq!(class.methods_matching("add(JJ)J"), vec![1]);
        assert!(class.methods_matching("mul").is_empty());
    }

    #[test]
    fn label_allocation_skips_reserved() {
        let mut body = MethodBody::default();
        body.reserve_labels(4);
        assert_eq!(body.new_label(), 4);
        assert_eq!(body.new_label(), 5);
    }
}
