//! End-to-end pipeline scenarios: register transformers, transform a
//! hand-built target class and assert on the rewritten instructions.

mod common;

use common::*;

use classweave::classfile::{read_class, write_class};
use classweave::runtime;
use classweave::transform::annotations;
use classweave::tree::insn::Insn;
use classweave::tree::opcodes::*;
use classweave::tree::{AnnotationNode, AnnotationValue};
use classweave::{FailStrategy, MapClassProvider, TransformerManager};
use std::sync::Arc;

fn manager() -> TransformerManager {
    TransformerManager::new(Arc::new(MapClassProvider::new()))
}

fn transform_calculator(manager: &TransformerManager) -> classweave::tree::ClassNode {
    let bytes = write_class(&calculator()).expect("emit calculator");
    let transformed = manager
        .transform("test.Calculator", &bytes)
        .expect("calculator should be transformed");
    read_class(&transformed).expect("parse transformed calculator")
}

#[test]
fn untouched_class_stays_untouched() {
    let manager = manager();
    let bytes = write_class(&calculator()).unwrap();
    assert!(manager.transform("test.Calculator", &bytes).is_none());
}

#[test]
fn head_inject_without_args_or_callback() {
    let manager = manager();
    let mut hooks = hooks_class();
    hooks.fields.push(counter_field());
    let mut hook = method_with_insns(
        ACC_PRIVATE | ACC_STATIC,
        "hook",
        "()V",
        vec![
            Insn::Field {
                opcode: GETSTATIC,
                owner: HOOKS.to_string(),
                name: String::from("counter"),
                desc: String::from("I"),
            },
            Insn::Simple { opcode: ICONST_1 },
            Insn::Simple { opcode: IADD },
            Insn::Field {
                opcode: PUTSTATIC,
                owner: HOOKS.to_string(),
                name: String::from("counter"),
                desc: String::from("I"),
            },
            Insn::Simple { opcode: RETURN },
        ],
    );
    hook.invisible_annotations
        .push(inject_annotation("add", target_annotation("HEAD", ""), false));
    hooks.methods.push(hook);
    manager.add_transformer_node(hooks).unwrap();

    let result = transform_calculator(&manager);

    // the call to the copied hook lands before the original first insn
    let insns = real_insns(&result, "add");
    match insns[0] {
        Insn::Method {
            opcode: INVOKESTATIC,
            owner,
            name,
            desc,
            ..
        } => {
            assert_eq!(owner, CALCULATOR);
            assert!(name.starts_with("hook$"));
            assert_eq!(desc, "()V");
        }
        other => panic!("expected injected call at head, found {:?}", other),
    }
    assert_eq!(insns[1], &Insn::Var { opcode: ILOAD, var: 0 });

    // the counter field was copied and the hook rewritten against the target
    assert!(result.find_field("counter").is_some());
    let copied = find_method(&result, "hook$").expect("copied hook method");
    let owners: Vec<&str> = copied
        .code
        .as_ref()
        .unwrap()
        .insns
        .iter()
        .filter_map(|insn| match insn {
            Insn::Field { owner, .. } => Some(owner.as_str()),
            _ => None,
        })
        .collect();
    assert!(owners.iter().all(|owner| *owner == CALCULATOR));
}

#[test]
fn return_inject_with_cancellable_callback() {
    let manager = manager();
    let mut hooks = hooks_class();
    let mut hook = method_with_insns(
        ACC_PRIVATE | ACC_STATIC,
        "onReturn",
        format!("({})V", runtime::CALLBACK_DESC).as_str(),
        vec![Insn::Simple { opcode: RETURN }],
    );
    hook.invisible_annotations.push(inject_annotation(
        "add",
        target_annotation("RETURN", ""),
        true,
    ));
    hooks.methods.push(hook);
    manager.add_transformer_node(hooks).unwrap();

    let result = transform_calculator(&manager);
    let insns = real_insns(&result, "add");

    // capture of the pre-return value into a fresh slot
    assert_eq!(insns[3], &Insn::Var { opcode: ISTORE, var: 3 });
    assert_eq!(
        insns[4],
        &Insn::Type {
            opcode: NEW,
            class: runtime::CALLBACK.to_string()
        }
    );
    // cancellable callbacks are constructed with ICONST_1
    assert_eq!(insns[6], &Insn::Simple { opcode: ICONST_1 });

    let names: Vec<&str> = insns
        .iter()
        .filter_map(|insn| match insn {
            Insn::Method { name, .. } => Some(name.as_str()),
            _ => None,
        })
        .collect();
    assert!(names.contains(&runtime::CALLBACK_IS_CANCELLED));
    assert!(names.contains(&runtime::CALLBACK_GET_RETURN_VALUE));
    assert!(names.contains(&"intValue"));

    // slot arithmetic: callback + captured value on top of the original two
    let body = result.find_method("add", "(II)I").unwrap().code.as_ref().unwrap();
    assert!(body.max_locals <= 2 + 2);
}

#[test]
fn invoke_redirect_replaces_call_site() {
    let manager = manager();
    let mut hooks = hooks_class();
    let mut hook = method_with_insns(
        ACC_PRIVATE | ACC_STATIC,
        "exclaim",
        "(Ljava/lang/String;)Ljava/lang/String;",
        vec![
            Insn::Var {
                opcode: ALOAD,
                var: 0,
            },
            Insn::Simple { opcode: ARETURN },
        ],
    );
    hook.invisible_annotations.push(
        AnnotationNode::new(annotations::REDIRECT)
            .with("method", AnnotationValue::String(String::from("upper")))
            .with(
                "target",
                target_annotation("INVOKE", "Ljava/lang/String;toUpperCase()Ljava/lang/String;"),
            ),
    );
    hooks.methods.push(hook);
    manager.add_transformer_node(hooks).unwrap();

    let result = transform_calculator(&manager);
    let insns = real_insns(&result, "upper");

    assert!(
        !insns.iter().any(|insn| matches!(
            insn,
            Insn::Method { name, .. } if name == "toUpperCase"
        )),
        "redirected invocation must be gone"
    );
    assert!(insns.iter().any(|insn| matches!(
        insn,
        Insn::Method {
            opcode: INVOKESTATIC,
            owner,
            name,
            desc,
            ..
        } if owner == CALCULATOR
            && name.starts_with("exclaim$")
            && desc == "(Ljava/lang/String;)Ljava/lang/String;"
    )));
}

#[test]
fn static_field_get_redirect() {
    let manager = manager();
    let mut hooks = hooks_class();
    let mut hook = method_with_insns(
        ACC_PRIVATE | ACC_STATIC,
        "zero",
        "()I",
        vec![
            Insn::Simple { opcode: ICONST_0 },
            Insn::Simple { opcode: IRETURN },
        ],
    );
    hook.invisible_annotations.push(
        AnnotationNode::new(annotations::REDIRECT)
            .with("method", AnnotationValue::String(String::from("max")))
            .with(
                "target",
                target_annotation("FIELD", "Ljava/lang/Integer;MAX_VALUE:I"),
            ),
    );
    hooks.methods.push(hook);
    manager.add_transformer_node(hooks).unwrap();

    let result = transform_calculator(&manager);
    let insns = real_insns(&result, "max");

    assert!(!insns
        .iter()
        .any(|insn| matches!(insn, Insn::Field { .. })));
    assert!(matches!(
        insns[0],
        Insn::Method {
            opcode: INVOKESTATIC,
            name,
            desc,
            ..
        } if name.starts_with("zero$") && desc == "()I"
    ));
}

#[test]
fn modify_constant_wraps_the_load() {
    let manager = manager();
    let mut hooks = hooks_class();
    let mut hook = method_with_insns(
        ACC_PRIVATE | ACC_STATIC,
        "twice",
        "(I)I",
        vec![
            Insn::Var {
                opcode: ILOAD,
                var: 0,
            },
            Insn::Simple { opcode: ICONST_2 },
            Insn::Simple { opcode: IMUL },
            Insn::Simple { opcode: IRETURN },
        ],
    );
    hook.invisible_annotations.push(
        AnnotationNode::new(annotations::MODIFY_CONSTANT)
            .with("method", AnnotationValue::String(String::from("five")))
            .with(
                "constant",
                AnnotationValue::Annotation(
                    AnnotationNode::new(annotations::CONSTANT)
                        .with("intValue", AnnotationValue::Int(5)),
                ),
            ),
    );
    hooks.methods.push(hook);
    manager.add_transformer_node(hooks).unwrap();

    let result = transform_calculator(&manager);
    let insns = real_insns(&result, "five");

    assert_eq!(insns[0], &Insn::Simple { opcode: ICONST_5 });
    assert!(matches!(
        insns[1],
        Insn::Method {
            opcode: INVOKESTATIC,
            name,
            desc,
            ..
        } if name.starts_with("twice$") && desc == "(I)I"
    ));
    assert_eq!(insns[2], &Insn::Simple { opcode: IRETURN });
}

#[test]
fn inline_method_dissolves_into_call_sites() {
    let manager = manager();
    let mut hooks = hooks_class();

    // a helper the hook calls; @Inline keeps it out of the target
    let mut helper = method_with_insns(
        ACC_PRIVATE | ACC_STATIC,
        "helper",
        "()I",
        vec![
            Insn::Simple { opcode: ICONST_5 },
            Insn::Simple { opcode: IRETURN },
        ],
    );
    helper
        .invisible_annotations
        .push(AnnotationNode::new(annotations::INLINE));
    hooks.methods.push(helper);

    let mut hook = method_with_insns(
        ACC_PRIVATE | ACC_STATIC,
        "hook",
        "()V",
        vec![
            Insn::Method {
                opcode: INVOKESTATIC,
                owner: HOOKS.to_string(),
                name: String::from("helper"),
                desc: String::from("()I"),
                interface: false,
            },
            Insn::Simple { opcode: POP },
            Insn::Simple { opcode: RETURN },
        ],
    );
    hook.invisible_annotations
        .push(inject_annotation("add", target_annotation("HEAD", ""), false));
    hooks.methods.push(hook);
    manager.add_transformer_node(hooks).unwrap();

    let result = transform_calculator(&manager);

    // the helper was dissolved into its caller, not copied as a member
    assert!(
        !result.methods.iter().any(|m| m.name.starts_with("helper")),
        "inlined method must not survive as a member"
    );
    let copied = find_method(&result, "hook$").expect("copied hook method");
    let insns: Vec<&Insn> = copied
        .code
        .as_ref()
        .unwrap()
        .insns
        .iter()
        .filter(|insn| !insn.is_pseudo())
        .collect();
    assert!(
        !insns.iter().any(|insn| matches!(insn, Insn::Method { .. })),
        "the call site must be gone"
    );
    let ops: Vec<u8> = insns.iter().filter_map(|insn| insn.opcode()).collect();
    assert_eq!(ops, vec![ICONST_5, GOTO, POP, RETURN]);
}

#[test]
fn shadow_prototype_is_stripped_and_resolves_to_target_member() {
    let manager = manager();
    let mut hooks = hooks_class();

    let mut prototype = method_with_insns(ACC_PRIVATE | ACC_STATIC, "add", "(II)I", vec![]);
    prototype
        .invisible_annotations
        .push(AnnotationNode::new(annotations::SHADOW));
    hooks.methods.push(prototype);

    // a plain helper referencing the shadowed method; copied by the
    // member copy with its owner rewritten
    hooks.methods.push(method_with_insns(
        ACC_PRIVATE | ACC_STATIC,
        "callAdd",
        "()I",
        vec![
            Insn::Simple { opcode: ICONST_1 },
            Insn::Simple { opcode: ICONST_2 },
            Insn::Method {
                opcode: INVOKESTATIC,
                owner: HOOKS.to_string(),
                name: String::from("add"),
                desc: String::from("(II)I"),
                interface: false,
            },
            Insn::Simple { opcode: IRETURN },
        ],
    ));
    manager.add_transformer_node(hooks).unwrap();

    let result = transform_calculator(&manager);

    // the prototype itself must not have been copied over the real method
    assert_eq!(
        result.methods.iter().filter(|m| m.name == "add").count(),
        1
    );
    let call_add = result.find_method("callAdd", "()I").expect("copied helper");
    assert!(call_add
        .code
        .as_ref()
        .unwrap()
        .insns
        .iter()
        .any(|insn| matches!(
            insn,
            Insn::Method { owner, name, .. } if owner == CALCULATOR && name == "add"
        )));
}

#[test]
fn override_replaces_method_and_keeps_the_original() {
    let manager = manager();
    let mut hooks = hooks_class();
    let mut replacement = method_with_insns(
        ACC_PUBLIC | ACC_STATIC,
        "add",
        "(II)I",
        vec![
            Insn::Simple { opcode: ICONST_0 },
            Insn::Simple { opcode: IRETURN },
        ],
    );
    replacement
        .invisible_annotations
        .push(AnnotationNode::new(annotations::OVERRIDE));
    hooks.methods.push(replacement);
    manager.add_transformer_node(hooks).unwrap();

    let result = transform_calculator(&manager);

    let ops: Vec<u8> = real_insns(&result, "add")
        .iter()
        .filter_map(|insn| insn.opcode())
        .collect();
    assert_eq!(ops, vec![ICONST_0, IRETURN]);

    // the replaced body survives under an alias for super-style calls
    let original = find_method(&result, "add$original").expect("preserved original");
    assert_ne!(original.access & ACC_SYNTHETIC, 0);
    let ops: Vec<u8> = original
        .code
        .as_ref()
        .unwrap()
        .insns
        .iter()
        .filter_map(|insn| insn.opcode())
        .collect();
    assert_eq!(ops, vec![ILOAD, ILOAD, IADD, IRETURN]);
}

#[test]
fn upgrade_discards_the_original_body() {
    let manager = manager();
    let mut hooks = hooks_class();
    let mut upgraded = method_with_insns(
        ACC_PUBLIC | ACC_STATIC,
        "five",
        "()I",
        vec![
            Insn::Simple { opcode: ICONST_3 },
            Insn::Simple { opcode: IRETURN },
        ],
    );
    upgraded
        .invisible_annotations
        .push(AnnotationNode::new(annotations::UPGRADE));
    hooks.methods.push(upgraded);
    manager.add_transformer_node(hooks).unwrap();

    let result = transform_calculator(&manager);

    let ops: Vec<u8> = real_insns(&result, "five")
        .iter()
        .filter_map(|insn| insn.opcode())
        .collect();
    assert_eq!(ops, vec![ICONST_3, IRETURN]);
    // no alias, no copy: the original body is gone
    assert!(!result.methods.iter().any(|m| m.name.starts_with("five$")));
}

#[test]
fn wrap_catch_surrounds_the_method_with_a_handler() {
    let manager = manager();
    let mut hooks = hooks_class();
    let mut recover = method_with_insns(
        ACC_PRIVATE | ACC_STATIC,
        "recover",
        "(Ljava/lang/RuntimeException;)I",
        vec![
            Insn::Simple { opcode: ICONST_0 },
            Insn::Simple { opcode: IRETURN },
        ],
    );
    recover.invisible_annotations.push(
        AnnotationNode::new(annotations::WRAP_CATCH)
            .with("value", AnnotationValue::String(String::from("five"))),
    );
    hooks.methods.push(recover);
    manager.add_transformer_node(hooks).unwrap();

    let result = transform_calculator(&manager);

    let body = result.find_method("five", "()I").unwrap().code.as_ref().unwrap();
    assert_eq!(body.try_catch_blocks.len(), 1);
    assert_eq!(
        body.try_catch_blocks[0].catch_type.as_deref(),
        Some("java/lang/RuntimeException")
    );

    // the handler tail calls the copied transformer method and returns
    let insns = real_insns(&result, "five");
    assert!(matches!(
        insns[insns.len() - 2],
        Insn::Method {
            opcode: INVOKESTATIC,
            name,
            desc,
            ..
        } if name.starts_with("recover$") && desc == "(Ljava/lang/RuntimeException;)I"
    ));
    assert_eq!(insns[insns.len() - 1], &Insn::Simple { opcode: IRETURN });
    assert!(find_method(&result, "recover$").is_some());
}

#[test]
fn wildcard_registration_skips_foreign_packages() {
    let mut provider = MapClassProvider::new();

    let mut a = hooks_class();
    a.name = String::from("pkg/A");
    let mut hook = method_with_insns(
        ACC_PRIVATE | ACC_STATIC,
        "hook",
        "()V",
        vec![Insn::Simple { opcode: RETURN }],
    );
    hook.invisible_annotations
        .push(inject_annotation("add", target_annotation("HEAD", ""), false));
    a.methods.push(hook.clone());
    provider.insert("pkg.A", write_class(&a).unwrap());

    let mut b = hooks_class();
    b.name = String::from("pkg/sub/B");
    b.methods.push(hook);
    provider.insert("pkg.sub.B", write_class(&b).unwrap());

    // annotated but outside the package: never registered
    let mut c = hooks_class();
    c.name = String::from("other/C");
    provider.insert("other.C", write_class(&c).unwrap());

    // not a transformer at all: silently skipped by wildcards
    let plain = classweave::tree::ClassNode::new("pkg/Plain", 52);
    provider.insert("pkg.Plain", write_class(&plain).unwrap());

    let manager = TransformerManager::new(Arc::new(provider));
    manager.add_transformer("pkg.**").unwrap();

    let result = transform_calculator(&manager);
    let hooks: Vec<&str> = result
        .methods
        .iter()
        .map(|m| m.name.as_str())
        .filter(|name| name.starts_with("hook$"))
        .collect();
    assert_eq!(hooks.len(), 2, "both package transformers apply: {:?}", hooks);
}

#[test]
fn single_level_wildcard_ignores_subpackages() {
    let mut provider = MapClassProvider::new();
    let mut a = hooks_class();
    a.name = String::from("pkg/A");
    let mut hook = method_with_insns(
        ACC_PRIVATE | ACC_STATIC,
        "hook",
        "()V",
        vec![Insn::Simple { opcode: RETURN }],
    );
    hook.invisible_annotations
        .push(inject_annotation("add", target_annotation("HEAD", ""), false));
    a.methods.push(hook.clone());
    provider.insert("pkg.A", write_class(&a).unwrap());

    let mut b = hooks_class();
    b.name = String::from("pkg/sub/B");
    b.methods.push(hook);
    provider.insert("pkg.sub.B", write_class(&b).unwrap());

    let manager = TransformerManager::new(Arc::new(provider));
    manager.add_transformer("pkg.*").unwrap();

    let result = transform_calculator(&manager);
    let hooks: Vec<&str> = result
        .methods
        .iter()
        .map(|m| m.name.as_str())
        .filter(|name| name.starts_with("hook$"))
        .collect();
    assert_eq!(hooks.len(), 1);
}

#[test]
fn re_registration_replaces_instead_of_duplicating() {
    let manager = manager();
    let build = || {
        let mut hooks = hooks_class();
        let mut hook = method_with_insns(
            ACC_PRIVATE | ACC_STATIC,
            "hook",
            "()V",
            vec![Insn::Simple { opcode: RETURN }],
        );
        hook.invisible_annotations
            .push(inject_annotation("add", target_annotation("HEAD", ""), false));
        hooks.methods.push(hook);
        hooks
    };
    manager.add_transformer_node(build()).unwrap();
    manager.add_transformer_node(build()).unwrap();

    let result = transform_calculator(&manager);
    let injected = real_insns(&result, "add")
        .iter()
        .filter(|insn| matches!(insn, Insn::Method { .. }))
        .count();
    assert_eq!(injected, 1, "the second registration replaces the first");
}

#[test]
fn repeated_transformation_is_deterministic() {
    let manager = manager();
    let mut hooks = hooks_class();
    let mut hook = method_with_insns(
        ACC_PRIVATE | ACC_STATIC,
        "hook",
        "()V",
        vec![Insn::Simple { opcode: RETURN }],
    );
    hook.invisible_annotations
        .push(inject_annotation("add", target_annotation("HEAD", ""), false));
    hooks.methods.push(hook);
    manager.add_transformer_node(hooks).unwrap();

    let bytes = write_class(&calculator()).unwrap();
    let first = manager.transform("test.Calculator", &bytes).unwrap();
    let second = manager.transform("test.Calculator", &bytes).unwrap();
    assert_eq!(first, second);
}

#[test]
fn missing_target_cancels_under_cancel_strategy() {
    let manager = manager();
    manager.set_fail_strategy(FailStrategy::Cancel);
    let mut hooks = hooks_class();
    let mut hook = method_with_insns(
        ACC_PRIVATE | ACC_STATIC,
        "hook",
        "()V",
        vec![Insn::Simple { opcode: RETURN }],
    );
    hook.invisible_annotations.push(inject_annotation(
        "doesNotExist",
        target_annotation("HEAD", ""),
        false,
    ));
    hooks.methods.push(hook);
    manager.add_transformer_node(hooks).unwrap();

    let bytes = write_class(&calculator()).unwrap();
    assert!(manager.transform("test.Calculator", &bytes).is_none());
}

#[test]
fn optional_target_failures_are_tolerated() {
    let manager = manager();
    let mut hooks = hooks_class();
    let mut hook = method_with_insns(
        ACC_PRIVATE | ACC_STATIC,
        "hook",
        "()V",
        vec![Insn::Simple { opcode: RETURN }],
    );
    let optional_target = AnnotationValue::Annotation(
        AnnotationNode::new(annotations::TARGET)
            .with("value", AnnotationValue::String(String::from("INVOKE")))
            .with(
                "target",
                AnnotationValue::String(String::from("La/B;missing()V")),
            )
            .with("optional", AnnotationValue::Bool(true)),
    );
    hook.invisible_annotations
        .push(inject_annotation("add", optional_target, false));
    hooks.methods.push(hook);
    manager.add_transformer_node(hooks).unwrap();

    let result = transform_calculator(&manager);
    // nothing was injected but the hook itself was still copied
    assert!(find_method(&result, "hook$").is_some());
    assert_eq!(real_insns(&result, "add").len(), 4);
}
