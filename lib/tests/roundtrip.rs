//! Reader/writer round trips over hand-built classes.

mod common;

use common::*;

use classweave::classfile::{read_class, write_class};
use classweave::tree::insn::{ConstantValue, Insn};
use classweave::tree::opcodes::*;
use classweave::tree::{
    AnnotationNode, AnnotationValue, ClassNode, FieldNode, TryCatchNode,
};

#[test]
fn calculator_round_trips() {
    let original = calculator();
    let bytes = write_class(&original).expect("emit");
    let parsed = read_class(&bytes).expect("parse");

    assert_eq!(parsed.name, original.name);
    assert_eq!(parsed.super_name.as_deref(), Some("java/lang/Object"));
    assert_eq!(parsed.methods.len(), original.methods.len());
    for method in &original.methods {
        let round = parsed
            .find_method(&method.name, &method.desc)
            .unwrap_or_else(|| panic!("method '{}' lost", method.name));
        let original_insns: Vec<&Insn> = method
            .code
            .as_ref()
            .unwrap()
            .insns
            .iter()
            .filter(|i| !i.is_pseudo())
            .collect();
        let round_insns: Vec<&Insn> = round
            .code
            .as_ref()
            .unwrap()
            .insns
            .iter()
            .filter(|i| !i.is_pseudo())
            .collect();
        assert_eq!(round_insns, original_insns, "in method '{}'", method.name);
    }
}

#[test]
fn emitted_bytes_are_stable() {
    let class = calculator();
    let first = write_class(&class).unwrap();
    let second = write_class(&read_class(&first).unwrap()).unwrap();
    let third = write_class(&read_class(&second).unwrap()).unwrap();
    assert_eq!(second, third);
}

#[test]
fn branches_and_exception_handlers_survive() {
    let mut class = ClassNode::new("test/Branchy", 52);
    let mut method = method_with_insns(ACC_PUBLIC | ACC_STATIC, "abs", "(I)I", vec![]);
    {
        let body = method.code.as_mut().unwrap();
        let negative = body.new_label();
        let start = body.new_label();
        let end = body.new_label();
        let handler = body.new_label();
        body.insns.extend(vec![
            Insn::Label(start),
            Insn::Var {
                opcode: ILOAD,
                var: 0,
            },
            Insn::Jump {
                opcode: IFLT,
                label: negative,
            },
            Insn::Var {
                opcode: ILOAD,
                var: 0,
            },
            Insn::Simple { opcode: IRETURN },
            Insn::Label(negative),
            Insn::Var {
                opcode: ILOAD,
                var: 0,
            },
            Insn::Simple { opcode: INEG },
            Insn::Simple { opcode: IRETURN },
            Insn::Label(end),
            Insn::Label(handler),
            Insn::Simple { opcode: POP },
            Insn::Simple { opcode: ICONST_0 },
            Insn::Simple { opcode: IRETURN },
        ]);
        body.try_catch_blocks.push(TryCatchNode {
            start,
            end,
            handler,
            catch_type: Some(String::from("java/lang/ArithmeticException")),
        });
    }
    class.methods.push(method);

    let parsed = read_class(&write_class(&class).unwrap()).unwrap();
    let round = parsed.find_method("abs", "(I)I").unwrap();
    let body = round.code.as_ref().unwrap();

    assert_eq!(body.try_catch_blocks.len(), 1);
    assert_eq!(
        body.try_catch_blocks[0].catch_type.as_deref(),
        Some("java/lang/ArithmeticException")
    );
    let jumps: Vec<u8> = body
        .insns
        .iter()
        .filter_map(|insn| match insn {
            Insn::Jump { opcode, .. } => Some(*opcode),
            _ => None,
        })
        .collect();
    assert_eq!(jumps, vec![IFLT]);
    // the branch target resolves to a label that is actually placed
    let target = body
        .insns
        .iter()
        .find_map(|insn| match insn {
            Insn::Jump { label, .. } => Some(*label),
            _ => None,
        })
        .unwrap();
    assert!(body
        .insns
        .iter()
        .any(|insn| matches!(insn, Insn::Label(id) if *id == target)));
}

#[test]
fn switches_and_wide_constants_survive() {
    let mut class = ClassNode::new("test/Switchy", 52);
    let mut method = method_with_insns(ACC_PUBLIC | ACC_STATIC, "pick", "(I)J", vec![]);
    {
        let body = method.code.as_mut().unwrap();
        let one = body.new_label();
        let other = body.new_label();
        body.insns.extend(vec![
            Insn::Var {
                opcode: ILOAD,
                var: 0,
            },
            Insn::TableSwitch {
                default: other,
                low: 1,
                high: 1,
                labels: vec![one],
            },
            Insn::Label(one),
            Insn::Ldc(ConstantValue::Long(123_456_789_000)),
            Insn::Simple { opcode: LRETURN },
            Insn::Label(other),
            Insn::Ldc(ConstantValue::Double(2.5)),
            Insn::Simple { opcode: D2L },
            Insn::Simple { opcode: LRETURN },
        ]);
    }
    class.methods.push(method);

    let parsed = read_class(&write_class(&class).unwrap()).unwrap();
    let body = parsed.find_method("pick", "(I)J").unwrap().code.as_ref().unwrap();

    assert!(body
        .insns
        .iter()
        .any(|insn| matches!(insn, Insn::TableSwitch { low: 1, high: 1, .. })));
    assert!(body
        .insns
        .iter()
        .any(|insn| matches!(insn, Insn::Ldc(ConstantValue::Long(123_456_789_000)))));
    assert!(body
        .insns
        .iter()
        .any(|insn| matches!(insn, Insn::Ldc(ConstantValue::Double(d)) if *d == 2.5)));
    // wide operands keep two-slot accounting
    assert!(body.max_stack >= 2);
}

#[test]
fn annotations_round_trip() {
    let mut class = ClassNode::new("test/Annotated", 52);
    class.invisible_annotations.push(
        AnnotationNode::new("Ltest/Marker;")
            .with("value", AnnotationValue::String(String::from("hello")))
            .with(
                "numbers",
                AnnotationValue::Array(vec![AnnotationValue::Int(1), AnnotationValue::Int(2)]),
            )
            .with(
                "kind",
                AnnotationValue::Enum {
                    desc: String::from("Ltest/Kind;"),
                    value: String::from("GOOD"),
                },
            )
            .with("type", AnnotationValue::Class(String::from("Ltest/Other;")))
            .with(
                "nested",
                AnnotationValue::Annotation(
                    AnnotationNode::new("Ltest/Inner;").with("flag", AnnotationValue::Bool(true)),
                ),
            ),
    );
    let mut field = FieldNode::new(ACC_PRIVATE, "tagged", "I");
    field
        .invisible_annotations
        .push(AnnotationNode::new("Ltest/Marker;"));
    class.fields.push(field);

    let mut method = method_with_insns(
        ACC_PUBLIC | ACC_STATIC,
        "run",
        "(II)V",
        vec![Insn::Simple { opcode: RETURN }],
    );
    method.invisible_parameter_annotations = vec![
        vec![],
        vec![AnnotationNode::new("Ltest/Param;").with("index", AnnotationValue::Int(1))],
    ];
    class.methods.push(method);

    let parsed = read_class(&write_class(&class).unwrap()).unwrap();

    assert_eq!(parsed.invisible_annotations, class.invisible_annotations);
    assert_eq!(
        parsed.fields[0].invisible_annotations,
        class.fields[0].invisible_annotations
    );
    let round = parsed.find_method("run", "(II)V").unwrap();
    assert_eq!(round.invisible_parameter_annotations.len(), 2);
    assert_eq!(
        round.invisible_parameter_annotations[1],
        class.methods[0].invisible_parameter_annotations[1]
    );
}

#[test]
fn constant_values_and_fields_survive() {
    let mut class = ClassNode::new("test/Consts", 52);
    let mut field = FieldNode::new(ACC_PUBLIC | ACC_STATIC | ACC_FINAL, "GREETING", "Ljava/lang/String;");
    field.constant_value = Some(ConstantValue::String(String::from("hello")));
    class.fields.push(field);
    let mut wide = FieldNode::new(ACC_PUBLIC | ACC_STATIC | ACC_FINAL, "BIG", "J");
    wide.constant_value = Some(ConstantValue::Long(i64::MAX));
    class.fields.push(wide);

    let parsed = read_class(&write_class(&class).unwrap()).unwrap();
    assert_eq!(
        parsed.find_field("GREETING").unwrap().constant_value,
        Some(ConstantValue::String(String::from("hello")))
    );
    assert_eq!(
        parsed.find_field("BIG").unwrap().constant_value,
        Some(ConstantValue::Long(i64::MAX))
    );
}
