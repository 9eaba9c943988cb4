//! Shared fixtures: hand-built target and transformer classes.
#![allow(dead_code)]

use classweave::transform::annotations;
use classweave::tree::insn::{ConstantValue, Insn};
use classweave::tree::opcodes::*;
use classweave::tree::{AnnotationNode, AnnotationValue, ClassNode, FieldNode, MethodNode};

pub const CALCULATOR: &str = "test/Calculator";
pub const HOOKS: &str = "test/Hooks";

pub fn method_with_insns(
    access: u16,
    name: &str,
    desc: &str,
    insns: Vec<Insn>,
) -> MethodNode {
    let mut method = MethodNode::new(access, name, desc);
    method.code.as_mut().unwrap().insns.extend(insns);
    method
}

/// A small static calculator with one method per scenario.
pub fn calculator() -> ClassNode {
    let mut class = ClassNode::new(CALCULATOR, 52);

    class.methods.push(method_with_insns(
        ACC_PUBLIC | ACC_STATIC,
        "add",
        "(II)I",
        vec![
            Insn::Var {
                opcode: ILOAD,
                var: 0,
            },
            Insn::Var {
                opcode: ILOAD,
                var: 1,
            },
            Insn::Simple { opcode: IADD },
            Insn::Simple { opcode: IRETURN },
        ],
    ));
    class.methods.push(method_with_insns(
        ACC_PUBLIC | ACC_STATIC,
        "five",
        "()I",
        vec![
            Insn::Simple { opcode: ICONST_5 },
            Insn::Simple { opcode: IRETURN },
        ],
    ));
    class.methods.push(method_with_insns(
        ACC_PUBLIC | ACC_STATIC,
        "upper",
        "()Ljava/lang/String;",
        vec![
            Insn::Ldc(ConstantValue::String(String::from("hi"))),
            Insn::Method {
                opcode: INVOKEVIRTUAL,
                owner: String::from("java/lang/String"),
                name: String::from("toUpperCase"),
                desc: String::from("()Ljava/lang/String;"),
                interface: false,
            },
            Insn::Simple { opcode: ARETURN },
        ],
    ));
    class.methods.push(method_with_insns(
        ACC_PUBLIC | ACC_STATIC,
        "max",
        "()I",
        vec![
            Insn::Field {
                opcode: GETSTATIC,
                owner: String::from("java/lang/Integer"),
                name: String::from("MAX_VALUE"),
                desc: String::from("I"),
            },
            Insn::Simple { opcode: IRETURN },
        ],
    ));

    class
}

/// An empty transformer class targeting the calculator.
pub fn hooks_class() -> ClassNode {
    let mut class = ClassNode::new(HOOKS, 52);
    class.invisible_annotations.push(
        AnnotationNode::new(annotations::TRANSFORMER).with(
            "value",
            AnnotationValue::Array(vec![AnnotationValue::Class(format!("L{};", CALCULATOR))]),
        ),
    );
    class
}

pub fn target_annotation(kind: &str, target: &str) -> AnnotationValue {
    AnnotationValue::Annotation(
        AnnotationNode::new(annotations::TARGET)
            .with("value", AnnotationValue::String(kind.to_string()))
            .with("target", AnnotationValue::String(target.to_string())),
    )
}

pub fn inject_annotation(method: &str, target: AnnotationValue, cancellable: bool) -> AnnotationNode {
    AnnotationNode::new(annotations::INJECT)
        .with("method", AnnotationValue::String(method.to_string()))
        .with("target", AnnotationValue::Array(vec![target]))
        .with("cancellable", AnnotationValue::Bool(cancellable))
}

/// Real instructions of a method, pseudo nodes skipped.
pub fn real_insns<'a>(class: &'a ClassNode, name: &str) -> Vec<&'a Insn> {
    let method = class
        .methods
        .iter()
        .find(|m| m.name == name)
        .unwrap_or_else(|| panic!("method '{}' not found", name));
    method
        .code
        .as_ref()
        .expect("method has code")
        .insns
        .iter()
        .filter(|insn| !insn.is_pseudo())
        .collect()
}

pub fn find_method<'a>(class: &'a ClassNode, prefix: &str) -> Option<&'a MethodNode> {
    class.methods.iter().find(|m| m.name.starts_with(prefix))
}

pub fn counter_field() -> FieldNode {
    FieldNode::new(ACC_PRIVATE | ACC_STATIC, "counter", "I")
}
