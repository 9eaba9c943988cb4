//! Remapping pass over a class node.

use crate::mappings::MapRemapper;
use crate::tree::insn::{BootstrapArg, ConstantValue, Handle, Insn};
use crate::tree::{AnnotationNode, AnnotationValue, ClassNode, MethodBody};
use crate::util::MemberDeclaration;

/// Rewrite every identifier in `node` through `remapper`.
///
/// Used to align a cloned transformer node with the target's current
/// (possibly obfuscated) identifiers before the handler chain runs.
/// Remapping an already remapped node is a no-op as long as the mapping's
/// domain and range are disjoint, which holds for obfuscation maps.
pub fn remap_class(node: &mut ClassNode, remapper: &MapRemapper) {
    if remapper.is_empty() {
        return;
    }
    let owner = node.name.clone();

    node.name = remapper.map_class_name(&node.name);
    if let Some(super_name) = &node.super_name {
        node.super_name = Some(remapper.map_class_name(super_name));
    }
    for interface in &mut node.interfaces {
        *interface = remapper.map_class_name(interface);
    }
    for inner in &mut node.inner_classes {
        inner.name = remapper.map_class_name(&inner.name);
        if let Some(outer) = &inner.outer_name {
            inner.outer_name = Some(remapper.map_class_name(outer));
        }
    }

    for field in &mut node.fields {
        field.name = remapper.map_field_name(&owner, &field.name, &field.desc);
        field.desc = remapper.map_desc(&field.desc);
        remap_annotations(&mut field.visible_annotations, remapper);
        remap_annotations(&mut field.invisible_annotations, remapper);
    }

    for method in &mut node.methods {
        if method.name != "<init>" && method.name != "<clinit>" {
            method.name = remapper.map_method_name(&owner, &method.name, &method.desc);
        }
        method.desc = remapper.map_method_desc(&method.desc);
        for exception in &mut method.exceptions {
            *exception = remapper.map_class_name(exception);
        }
        remap_annotations(&mut method.visible_annotations, remapper);
        remap_annotations(&mut method.invisible_annotations, remapper);
        for annotations in &mut method.invisible_parameter_annotations {
            remap_annotations(annotations, remapper);
        }
        if let Some(body) = &mut method.code {
            remap_body(body, remapper);
        }
    }

    remap_annotations(&mut node.visible_annotations, remapper);
    remap_annotations(&mut node.invisible_annotations, remapper);
}

fn remap_body(body: &mut MethodBody, remapper: &MapRemapper) {
    for insn in body.insns.iter_mut() {
        match insn {
            Insn::Field {
                owner, name, desc, ..
            } => {
                *name = remapper.map_field_name(owner, name, desc);
                *owner = remapper.map_class_name(owner);
                *desc = remapper.map_desc(desc);
            }
            Insn::Method {
                owner, name, desc, ..
            } => {
                *name = remapper.map_method_name(owner, name, desc);
                *owner = remapper.map_class_name(owner);
                *desc = remapper.map_method_desc(desc);
            }
            Insn::Type { class, .. } => *class = remapper.map_class_name(class),
            Insn::Ldc(constant) => remap_constant(constant, remapper),
            Insn::InvokeDynamic {
                desc, bootstrap, ..
            } => {
                *desc = remapper.map_method_desc(desc);
                remap_handle(&mut bootstrap.handle, remapper);
                for arg in &mut bootstrap.args {
                    match arg {
                        BootstrapArg::Const(constant) => remap_constant(constant, remapper),
                        BootstrapArg::Handle(handle) => remap_handle(handle, remapper),
                    }
                }
            }
            Insn::MultiANewArray { desc, .. } => *desc = remapper.map_class_name(desc),
            _ => {}
        }
    }
    for block in &mut body.try_catch_blocks {
        if let Some(catch_type) = &block.catch_type {
            block.catch_type = Some(remapper.map_class_name(catch_type));
        }
    }
    for local in &mut body.local_variables {
        local.desc = remapper.map_desc(&local.desc);
    }
}

fn remap_handle(handle: &mut Handle, remapper: &MapRemapper) {
    if handle.desc.starts_with('(') {
        handle.name = remapper.map_method_name(&handle.owner, &handle.name, &handle.desc);
        handle.desc = remapper.map_method_desc(&handle.desc);
    } else {
        handle.name = remapper.map_field_name(&handle.owner, &handle.name, &handle.desc);
        handle.desc = remapper.map_desc(&handle.desc);
    }
    handle.owner = remapper.map_class_name(&handle.owner);
}

fn remap_constant(constant: &mut ConstantValue, remapper: &MapRemapper) {
    match constant {
        ConstantValue::Class(name) => *name = remapper.map_class_name(name),
        ConstantValue::MethodType(desc) => *desc = remapper.map_method_desc(desc),
        ConstantValue::MethodHandle(handle) => remap_handle(handle, remapper),
        _ => {}
    }
}

fn remap_annotations(annotations: &mut [AnnotationNode], remapper: &MapRemapper) {
    for annotation in annotations {
        remap_annotation(annotation, remapper);
    }
}

/// Rewrite `Type`-valued attributes and string member declarations inside
/// an annotation; plain strings are left alone.
fn remap_annotation(annotation: &mut AnnotationNode, remapper: &MapRemapper) {
    annotation.desc = remapper.map_desc(&annotation.desc);
    for (_, value) in &mut annotation.values {
        remap_annotation_value(value, remapper);
    }
}

fn remap_annotation_value(value: &mut AnnotationValue, remapper: &MapRemapper) {
    match value {
        AnnotationValue::Class(desc) => *desc = remapper.map_desc(desc),
        AnnotationValue::Enum { desc, .. } => *desc = remapper.map_desc(desc),
        AnnotationValue::Annotation(nested) => remap_annotation(nested, remapper),
        AnnotationValue::Array(values) => {
            for value in values {
                remap_annotation_value(value, remapper);
            }
        }
        AnnotationValue::String(text) => {
            if let Some(decl) = MemberDeclaration::parse(text) {
                let mapped = if decl.is_field() {
                    MemberDeclaration::new(
                        remapper.map_class_name(&decl.owner),
                        remapper.map_field_name(&decl.owner, &decl.name, &decl.desc),
                        remapper.map_desc(&decl.desc),
                    )
                } else {
                    MemberDeclaration::new(
                        remapper.map_class_name(&decl.owner),
                        remapper.map_method_name(&decl.owner, &decl.name, &decl.desc),
                        remapper.map_method_desc(&decl.desc),
                    )
                };
                *text = mapped.render();
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::opcodes::*;
    use crate::tree::MethodNode;

    fn sample() -> ClassNode {
        let mut node = ClassNode::new("t/Hook", 52);
        let mut method = MethodNode::new(0, "run", "(La/B;)V");
        let body = method.code.as_mut().unwrap();
        body.insns.push(Insn::Field {
            opcode: GETFIELD,
            owner: String::from("a/B"),
            name: String::from("count"),
            desc: String::from("I"),
        });
        body.insns.push(Insn::Method {
            opcode: INVOKEVIRTUAL,
            owner: String::from("a/B"),
            name: String::from("run"),
            desc: String::from("()V"),
            interface: false,
        });
        node.methods.push(method);
        node
    }

    #[test]
    fn rewrites_member_references() {
        let mut node = sample();
        let mut remapper = MapRemapper::new();
        remapper.add_class_mapping("a/B", "x/Y");
        remapper.add_field_mapping("a/B", "count", "I", "size");
        remap_class(&mut node, &remapper);

        let body = node.methods[0].code.as_ref().unwrap();
        assert_eq!(
            body.insns.get(0),
            Some(&Insn::Field {
                opcode: GETFIELD,
                owner: String::from("x/Y"),
                name: String::from("size"),
                desc: String::from("I"),
            })
        );
        assert_eq!(node.methods[0].desc, "(Lx/Y;)V");
    }

    #[test]
    fn remapping_is_idempotent() {
        let mut once = sample();
        let mut remapper = MapRemapper::new();
        remapper.add_class_mapping("a/B", "x/Y");
        remap_class(&mut once, &remapper);
        let mut twice = once.clone();
        remap_class(&mut twice, &remapper);

        let a = once.methods[0].code.as_ref().unwrap();
        let b = twice.methods[0].code.as_ref().unwrap();
        assert_eq!(a.insns, b.insns);
        assert_eq!(once.methods[0].desc, twice.methods[0].desc);
    }

    #[test]
    fn annotation_member_strings_are_remapped() {
        let mut annotation = AnnotationNode::new("Lclassweave/annotations/Target;").with(
            "target",
            AnnotationValue::String(String::from("La/B;run()V")),
        );
        let mut remapper = MapRemapper::new();
        remapper.add_class_mapping("a/B", "x/Y");
        remap_annotation(&mut annotation, &remapper);
        assert_eq!(
            annotation.get("target").unwrap().as_str(),
            Some("Lx/Y;run()V")
        );
    }
}
