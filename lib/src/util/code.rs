//! Instruction-building helpers shared by the annotation handlers.

use crate::tree::insn::{ConstantValue, Insn};
use crate::tree::opcodes::*;
use crate::tree::{MethodBody, MethodNode};
use crate::util::descriptors::{BaseType, Descriptor, FieldType, MethodDescriptor, Width};

/// Load opcode for a value of the given type.
pub fn load_opcode(typ: &FieldType) -> u8 {
    match typ {
        FieldType::Base(BaseType::Long) => LLOAD,
        FieldType::Base(BaseType::Float) => FLOAD,
        FieldType::Base(BaseType::Double) => DLOAD,
        FieldType::Base(_) => ILOAD,
        FieldType::Object(_) | FieldType::Array(_) => ALOAD,
    }
}

/// Store opcode for a value of the given type.
pub fn store_opcode(typ: &FieldType) -> u8 {
    match typ {
        FieldType::Base(BaseType::Long) => LSTORE,
        FieldType::Base(BaseType::Float) => FSTORE,
        FieldType::Base(BaseType::Double) => DSTORE,
        FieldType::Base(_) => ISTORE,
        FieldType::Object(_) | FieldType::Array(_) => ASTORE,
    }
}

/// Return opcode for the given return type (`None` is `void`).
pub fn return_opcode(typ: Option<&FieldType>) -> u8 {
    match typ {
        None => RETURN,
        Some(FieldType::Base(BaseType::Long)) => LRETURN,
        Some(FieldType::Base(BaseType::Float)) => FRETURN,
        Some(FieldType::Base(BaseType::Double)) => DRETURN,
        Some(FieldType::Base(_)) => IRETURN,
        Some(FieldType::Object(_)) | Some(FieldType::Array(_)) => ARETURN,
    }
}

/// Load opcode corresponding to a store (or load) opcode on the same slot.
pub fn store_to_load(opcode: u8) -> Option<u8> {
    match opcode {
        ISTORE | ILOAD => Some(ILOAD),
        LSTORE | LLOAD => Some(LLOAD),
        FSTORE | FLOAD => Some(FLOAD),
        DSTORE | DLOAD => Some(DLOAD),
        ASTORE | ALOAD => Some(ALOAD),
        _ => None,
    }
}

/// Slot width referenced by a variable instruction opcode.
pub fn var_opcode_width(opcode: u8) -> u16 {
    match opcode {
        LLOAD | DLOAD | LSTORE | DSTORE => 2,
        _ => 1,
    }
}

/// Smallest instruction pushing the given int constant.
pub fn int_push(value: i32) -> Insn {
    match value {
        -1 => Insn::Simple { opcode: ICONST_M1 },
        0 => Insn::Simple { opcode: ICONST_0 },
        1 => Insn::Simple { opcode: ICONST_1 },
        2 => Insn::Simple { opcode: ICONST_2 },
        3 => Insn::Simple { opcode: ICONST_3 },
        4 => Insn::Simple { opcode: ICONST_4 },
        5 => Insn::Simple { opcode: ICONST_5 },
        v if (i8::MIN as i32..=i8::MAX as i32).contains(&v) => Insn::IntPush {
            opcode: BIPUSH,
            operand: v,
        },
        v if (i16::MIN as i32..=i16::MAX as i32).contains(&v) => Insn::IntPush {
            opcode: SIPUSH,
            operand: v,
        },
        v => Insn::Ldc(ConstantValue::Int(v)),
    }
}

/// Wrapper class internal name, unboxing method and its descriptor.
fn wrapper(base: BaseType) -> (&'static str, &'static str, &'static str) {
    match base {
        BaseType::Byte => ("java/lang/Byte", "byteValue", "()B"),
        BaseType::Char => ("java/lang/Character", "charValue", "()C"),
        BaseType::Double => ("java/lang/Double", "doubleValue", "()D"),
        BaseType::Float => ("java/lang/Float", "floatValue", "()F"),
        BaseType::Int => ("java/lang/Integer", "intValue", "()I"),
        BaseType::Long => ("java/lang/Long", "longValue", "()J"),
        BaseType::Short => ("java/lang/Short", "shortValue", "()S"),
        BaseType::Boolean => ("java/lang/Boolean", "booleanValue", "()Z"),
    }
}

/// Boxing call for a primitive on the stack; `None` for reference types.
pub fn box_value(typ: &FieldType) -> Option<Insn> {
    let FieldType::Base(base) = typ else {
        return None;
    };
    let (owner, _, _) = wrapper(*base);
    let mut desc = String::from("(");
    FieldType::Base(*base).render_to(&mut desc);
    desc.push_str(")L");
    desc.push_str(owner);
    desc.push(';');
    Some(Insn::Method {
        opcode: INVOKESTATIC,
        owner: owner.to_string(),
        name: String::from("valueOf"),
        desc,
        interface: false,
    })
}

/// Coerce the `Object` on top of the stack to the given type: checkcast for
/// reference types, checkcast-to-wrapper plus unbox call for primitives.
pub fn cast_to(typ: &FieldType) -> Vec<Insn> {
    match typ {
        FieldType::Base(base) => {
            let (owner, method, desc) = wrapper(*base);
            vec![
                Insn::Type {
                    opcode: CHECKCAST,
                    class: owner.to_string(),
                },
                Insn::Method {
                    opcode: INVOKEVIRTUAL,
                    owner: owner.to_string(),
                    name: method.to_string(),
                    desc: desc.to_string(),
                    interface: false,
                },
            ]
        }
        other => vec![Insn::Type {
            opcode: CHECKCAST,
            class: other.as_internal_name(),
        }],
    }
}

/// First local variable slot not used by the method: parameters plus every
/// slot referenced by a variable instruction, width aware.
pub fn free_var_index(method: &MethodNode) -> u16 {
    let mut max = match MethodDescriptor::parse(&method.desc) {
        Ok(desc) => desc.parameter_slots(method.is_static()) as u16,
        Err(_) => 0,
    };
    if let Some(body) = &method.code {
        for insn in &body.insns {
            match insn {
                Insn::Var { opcode, var } => {
                    max = max.max(var + var_opcode_width(*opcode));
                }
                Insn::Iinc { var, .. } => max = max.max(var + 1),
                _ => {}
            }
        }
    }
    max
}

/// Loads of every parameter of `desc`, starting at slot 0 (static) or 1.
pub fn load_parameters(desc: &MethodDescriptor, is_static: bool) -> Vec<Insn> {
    let mut insns = Vec::with_capacity(desc.parameters.len());
    let mut slot: u16 = if is_static { 0 } else { 1 };
    for parameter in &desc.parameters {
        insns.push(Insn::Var {
            opcode: load_opcode(parameter),
            var: slot,
        });
        slot += parameter.width() as u16;
    }
    insns
}

/// Rewrite every reference to class `from` in a method body so it points at
/// class `to` instead.
pub fn rewrite_owner(body: &mut MethodBody, from: &str, to: &str) {
    for insn in body.insns.iter_mut() {
        match insn {
            Insn::Field { owner, .. } | Insn::Method { owner, .. } if owner == from => {
                *owner = to.to_string();
            }
            Insn::Type { class, .. } if class == from => *class = to.to_string(),
            Insn::Ldc(ConstantValue::Class(class)) if class == from => {
                *class = to.to_string();
            }
            Insn::InvokeDynamic { bootstrap, .. } => {
                if bootstrap.handle.owner == from {
                    bootstrap.handle.owner = to.to_string();
                }
                for arg in &mut bootstrap.args {
                    if let crate::tree::insn::BootstrapArg::Handle(handle) = arg {
                        if handle.owner == from {
                            handle.owner = to.to_string();
                        }
                    }
                }
            }
            _ => {}
        }
    }
    for block in &mut body.try_catch_blocks {
        if block.catch_type.as_deref() == Some(from) {
            block.catch_type = Some(to.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::opcodes;

    #[test]
    fn int_push_picks_smallest_encoding() {
        assert_eq!(int_push(3), Insn::Simple { opcode: ICONST_3 });
        assert_eq!(
            int_push(100),
            Insn::IntPush {
                opcode: BIPUSH,
                operand: 100
            }
        );
        assert_eq!(
            int_push(1000),
            Insn::IntPush {
                opcode: SIPUSH,
                operand: 1000
            }
        );
        assert_eq!(int_push(100_000), Insn::Ldc(ConstantValue::Int(100_000)));
    }

    #[test]
    fn free_var_accounts_for_wide_slots() {
        let mut method = MethodNode::new(opcodes::ACC_STATIC, "f", "(I)V");
        let body = method.code.as_mut().unwrap();
        body.insns.push(Insn::Var {
            opcode: DSTORE,
            var: 3,
        });
        assert_eq!(free_var_index(&method), 5);
    }

    #[test]
    fn cast_to_primitive_unboxes() {
        let insns = cast_to(&FieldType::INT);
        assert_eq!(insns.len(), 2);
        assert_eq!(
            insns[0],
            Insn::Type {
                opcode: CHECKCAST,
                class: String::from("java/lang/Integer")
            }
        );
    }

    #[test]
    fn load_parameters_skips_receiver_slot() {
        let desc = MethodDescriptor::parse("(IJ)V").unwrap();
        let insns = load_parameters(&desc, false);
        assert_eq!(
            insns,
            vec![
                Insn::Var {
                    opcode: ILOAD,
                    var: 1
                },
                Insn::Var {
                    opcode: LLOAD,
                    var: 2
                },
            ]
        );
    }
}
