//! Class file parsing: bytes to a [`ClassNode`].

use crate::classfile::constant_pool::{decode_modified_utf8, ConstantPool, CpInfo};
use crate::classfile::ParseError;
use crate::tree::insn::{BootstrapArg, BootstrapMethod, ConstantValue, Insn, InsnList, LabelId};
use crate::tree::opcodes::*;
use crate::tree::{
    AnnotationNode, AnnotationValue, ClassNode, FieldNode, InnerClassNode, LocalVariableNode,
    MethodBody, MethodNode, TryCatchNode,
};
use byteorder::{BigEndian, ReadBytesExt};
use std::collections::{BTreeSet, HashMap};
use std::io::{Cursor, Read};

/// Parse a class file into its tree representation.
///
/// Attributes the tree does not model (`StackMapTable`, `Signature`,
/// vendor attributes) are dropped; the writer regenerates what it needs.
pub fn read_class(bytes: &[u8]) -> Result<ClassNode, ParseError> {
    let mut r = Cursor::new(bytes);
    let magic = r.read_u32::<BigEndian>()?;
    if magic != 0xCAFE_BABE {
        return Err(ParseError::InvalidMagic(magic));
    }
    let minor_version = r.read_u16::<BigEndian>()?;
    let major_version = r.read_u16::<BigEndian>()?;
    let pool = read_constant_pool(&mut r)?;

    let access = r.read_u16::<BigEndian>()?;
    let this_class = r.read_u16::<BigEndian>()?;
    let super_class = r.read_u16::<BigEndian>()?;
    let interface_count = r.read_u16::<BigEndian>()? as usize;
    let mut interfaces = Vec::with_capacity(interface_count);
    for _ in 0..interface_count {
        let index = r.read_u16::<BigEndian>()?;
        interfaces.push(pool.class_name(index)?.to_string());
    }

    let raw_fields = read_members(&mut r, &pool)?;
    let raw_methods = read_members(&mut r, &pool)?;
    let class_attributes = read_raw_attributes(&mut r, &pool)?;

    // Bootstrap methods must be resolved before lowering any code, since
    // invokedynamic operands point into this table.
    let bootstrap = match find_attr(&class_attributes, "BootstrapMethods") {
        Some(data) => read_bootstrap_methods(data, &pool)?,
        None => vec![],
    };

    let mut node = ClassNode {
        minor_version,
        major_version,
        access,
        name: pool.class_name(this_class)?.to_string(),
        super_name: if super_class == 0 {
            None
        } else {
            Some(pool.class_name(super_class)?.to_string())
        },
        interfaces,
        ..ClassNode::default()
    };

    for attr in &class_attributes {
        match attr.name.as_str() {
            "SourceFile" => {
                let index = Cursor::new(&attr.data[..]).read_u16::<BigEndian>()?;
                node.source_file = Some(pool.utf8(index)?.to_string());
            }
            "InnerClasses" => {
                let mut r = Cursor::new(&attr.data[..]);
                let count = r.read_u16::<BigEndian>()? as usize;
                for _ in 0..count {
                    let inner = r.read_u16::<BigEndian>()?;
                    let outer = r.read_u16::<BigEndian>()?;
                    let inner_name = r.read_u16::<BigEndian>()?;
                    let inner_access = r.read_u16::<BigEndian>()?;
                    node.inner_classes.push(InnerClassNode {
                        name: pool.class_name(inner)?.to_string(),
                        outer_name: if outer == 0 {
                            None
                        } else {
                            Some(pool.class_name(outer)?.to_string())
                        },
                        inner_name: if inner_name == 0 {
                            None
                        } else {
                            Some(pool.utf8(inner_name)?.to_string())
                        },
                        access: inner_access,
                    });
                }
            }
            "RuntimeVisibleAnnotations" => {
                node.visible_annotations = read_annotations(&attr.data, &pool)?;
            }
            "RuntimeInvisibleAnnotations" => {
                node.invisible_annotations = read_annotations(&attr.data, &pool)?;
            }
            _ => {}
        }
    }

    for raw in raw_fields {
        let mut field = FieldNode::new(raw.access, raw.name, raw.desc);
        for attr in &raw.attributes {
            match attr.name.as_str() {
                "ConstantValue" => {
                    let index = Cursor::new(&attr.data[..]).read_u16::<BigEndian>()?;
                    field.constant_value = Some(pool.loadable(index)?);
                }
                "RuntimeVisibleAnnotations" => {
                    field.visible_annotations = read_annotations(&attr.data, &pool)?;
                }
                "RuntimeInvisibleAnnotations" => {
                    field.invisible_annotations = read_annotations(&attr.data, &pool)?;
                }
                _ => {}
            }
        }
        node.fields.push(field);
    }

    for raw in raw_methods {
        let mut method = MethodNode {
            access: raw.access,
            name: raw.name,
            desc: raw.desc,
            exceptions: vec![],
            code: None,
            visible_annotations: vec![],
            invisible_annotations: vec![],
            invisible_parameter_annotations: vec![],
        };
        for attr in &raw.attributes {
            match attr.name.as_str() {
                "Code" => method.code = Some(lower_code(&attr.data, &pool, &bootstrap)?),
                "Exceptions" => {
                    let mut r = Cursor::new(&attr.data[..]);
                    let count = r.read_u16::<BigEndian>()? as usize;
                    for _ in 0..count {
                        let index = r.read_u16::<BigEndian>()?;
                        method.exceptions.push(pool.class_name(index)?.to_string());
                    }
                }
                "RuntimeVisibleAnnotations" => {
                    method.visible_annotations = read_annotations(&attr.data, &pool)?;
                }
                "RuntimeInvisibleAnnotations" => {
                    method.invisible_annotations = read_annotations(&attr.data, &pool)?;
                }
                "RuntimeInvisibleParameterAnnotations" => {
                    let mut r = Cursor::new(&attr.data[..]);
                    let count = r.read_u8()? as usize;
                    for _ in 0..count {
                        let annotations = read_annotations_from(&mut r, &pool)?;
                        method.invisible_parameter_annotations.push(annotations);
                    }
                }
                _ => {}
            }
        }
        node.methods.push(method);
    }

    Ok(node)
}

fn read_constant_pool(r: &mut Cursor<&[u8]>) -> Result<ConstantPool, ParseError> {
    let count = r.read_u16::<BigEndian>()? as usize;
    let mut entries = Vec::with_capacity(count);
    entries.push(CpInfo::Unusable);

    let mut index = 1;
    while index < count {
        let tag = r.read_u8()?;
        let entry = match tag {
            1 => {
                let len = r.read_u16::<BigEndian>()? as usize;
                let mut bytes = vec![0u8; len];
                r.read_exact(&mut bytes)?;
                CpInfo::Utf8(decode_modified_utf8(&bytes)?)
            }
            3 => CpInfo::Integer(r.read_i32::<BigEndian>()?),
            4 => CpInfo::Float(f32::from_bits(r.read_u32::<BigEndian>()?)),
            5 => CpInfo::Long(r.read_i64::<BigEndian>()?),
            6 => CpInfo::Double(f64::from_bits(r.read_u64::<BigEndian>()?)),
            7 => CpInfo::Class {
                name_index: r.read_u16::<BigEndian>()?,
            },
            8 => CpInfo::String {
                string_index: r.read_u16::<BigEndian>()?,
            },
            9 => CpInfo::FieldRef {
                class_index: r.read_u16::<BigEndian>()?,
                name_and_type_index: r.read_u16::<BigEndian>()?,
            },
            10 => CpInfo::MethodRef {
                class_index: r.read_u16::<BigEndian>()?,
                name_and_type_index: r.read_u16::<BigEndian>()?,
            },
            11 => CpInfo::InterfaceMethodRef {
                class_index: r.read_u16::<BigEndian>()?,
                name_and_type_index: r.read_u16::<BigEndian>()?,
            },
            12 => CpInfo::NameAndType {
                name_index: r.read_u16::<BigEndian>()?,
                descriptor_index: r.read_u16::<BigEndian>()?,
            },
            15 => CpInfo::MethodHandle {
                reference_kind: r.read_u8()?,
                reference_index: r.read_u16::<BigEndian>()?,
            },
            16 => CpInfo::MethodType {
                descriptor_index: r.read_u16::<BigEndian>()?,
            },
            17 => CpInfo::Dynamic {
                bootstrap_method_attr_index: r.read_u16::<BigEndian>()?,
                name_and_type_index: r.read_u16::<BigEndian>()?,
            },
            18 => CpInfo::InvokeDynamic {
                bootstrap_method_attr_index: r.read_u16::<BigEndian>()?,
                name_and_type_index: r.read_u16::<BigEndian>()?,
            },
            19 => CpInfo::Module {
                name_index: r.read_u16::<BigEndian>()?,
            },
            20 => CpInfo::Package {
                name_index: r.read_u16::<BigEndian>()?,
            },
            _ => return Err(ParseError::InvalidConstantTag(tag)),
        };
        entries.push(entry);
        if tag == 5 || tag == 6 {
            entries.push(CpInfo::Unusable);
            index += 2;
        } else {
            index += 1;
        }
    }

    Ok(ConstantPool { entries })
}

struct RawAttribute {
    name: String,
    data: Vec<u8>,
}

struct RawMember {
    access: u16,
    name: String,
    desc: String,
    attributes: Vec<RawAttribute>,
}

fn read_members(r: &mut Cursor<&[u8]>, pool: &ConstantPool) -> Result<Vec<RawMember>, ParseError> {
    let count = r.read_u16::<BigEndian>()? as usize;
    let mut members = Vec::with_capacity(count);
    for _ in 0..count {
        let access = r.read_u16::<BigEndian>()?;
        let name_index = r.read_u16::<BigEndian>()?;
        let descriptor_index = r.read_u16::<BigEndian>()?;
        let attributes = read_raw_attributes(r, pool)?;
        members.push(RawMember {
            access,
            name: pool.utf8(name_index)?.to_string(),
            desc: pool.utf8(descriptor_index)?.to_string(),
            attributes,
        });
    }
    Ok(members)
}

fn read_raw_attributes(
    r: &mut Cursor<&[u8]>,
    pool: &ConstantPool,
) -> Result<Vec<RawAttribute>, ParseError> {
    let count = r.read_u16::<BigEndian>()? as usize;
    let mut attributes = Vec::with_capacity(count);
    for _ in 0..count {
        let name_index = r.read_u16::<BigEndian>()?;
        let length = r.read_u32::<BigEndian>()? as usize;
        let mut data = vec![0u8; length];
        r.read_exact(&mut data)?;
        attributes.push(RawAttribute {
            name: pool.utf8(name_index)?.to_string(),
            data,
        });
    }
    Ok(attributes)
}

fn find_attr<'a>(attributes: &'a [RawAttribute], name: &str) -> Option<&'a [u8]> {
    attributes
        .iter()
        .find(|a| a.name == name)
        .map(|a| a.data.as_slice())
}

fn read_bootstrap_methods(
    data: &[u8],
    pool: &ConstantPool,
) -> Result<Vec<BootstrapMethod>, ParseError> {
    let mut r = Cursor::new(data);
    let count = r.read_u16::<BigEndian>()? as usize;
    let mut methods = Vec::with_capacity(count);
    for _ in 0..count {
        let handle_index = r.read_u16::<BigEndian>()?;
        let handle = pool.handle(handle_index)?;
        let arg_count = r.read_u16::<BigEndian>()? as usize;
        let mut args = Vec::with_capacity(arg_count);
        for _ in 0..arg_count {
            let arg_index = r.read_u16::<BigEndian>()?;
            let arg = match pool.loadable(arg_index)? {
                ConstantValue::MethodHandle(handle) => BootstrapArg::Handle(handle),
                constant => BootstrapArg::Const(constant),
            };
            args.push(arg);
        }
        methods.push(BootstrapMethod { handle, args });
    }
    Ok(methods)
}

// ---------------------------------------------------------------------------
// Code lowering

/// Decoded instruction with raw (absolute) branch offsets.
enum Decoded {
    Done(Insn),
    Jump { opcode: u8, target: u32 },
    TableSwitch {
        default: u32,
        low: i32,
        high: i32,
        targets: Vec<u32>,
    },
    LookupSwitch {
        default: u32,
        pairs: Vec<(i32, u32)>,
    },
}

fn lower_code(
    data: &[u8],
    pool: &ConstantPool,
    bootstrap: &[BootstrapMethod],
) -> Result<MethodBody, ParseError> {
    let mut r = Cursor::new(data);
    let max_stack = r.read_u16::<BigEndian>()?;
    let max_locals = r.read_u16::<BigEndian>()?;
    let code_length = r.read_u32::<BigEndian>()? as usize;
    let mut code = vec![0u8; code_length];
    r.read_exact(&mut code)?;

    let decoded = decode_instructions(&code, pool, bootstrap)?;

    let exception_count = r.read_u16::<BigEndian>()? as usize;
    let mut exceptions = Vec::with_capacity(exception_count);
    for _ in 0..exception_count {
        let start_pc = r.read_u16::<BigEndian>()?;
        let end_pc = r.read_u16::<BigEndian>()?;
        let handler_pc = r.read_u16::<BigEndian>()?;
        let catch_type = r.read_u16::<BigEndian>()?;
        exceptions.push((start_pc, end_pc, handler_pc, catch_type));
    }
    let code_attributes = read_raw_attributes(&mut r, pool)?;

    let mut line_numbers: Vec<(u16, u16)> = vec![];
    if let Some(data) = find_attr(&code_attributes, "LineNumberTable") {
        let mut r = Cursor::new(data);
        let count = r.read_u16::<BigEndian>()? as usize;
        for _ in 0..count {
            let start_pc = r.read_u16::<BigEndian>()?;
            let line = r.read_u16::<BigEndian>()?;
            line_numbers.push((start_pc, line));
        }
    }
    let mut raw_locals: Vec<(u16, u16, String, String, u16)> = vec![];
    if let Some(data) = find_attr(&code_attributes, "LocalVariableTable") {
        let mut r = Cursor::new(data);
        let count = r.read_u16::<BigEndian>()? as usize;
        for _ in 0..count {
            let start_pc = r.read_u16::<BigEndian>()?;
            let length = r.read_u16::<BigEndian>()?;
            let name = pool.utf8(r.read_u16::<BigEndian>()?)?.to_string();
            let desc = pool.utf8(r.read_u16::<BigEndian>()?)?.to_string();
            let index = r.read_u16::<BigEndian>()?;
            raw_locals.push((start_pc, length, name, desc, index));
        }
    }

    // Collect every offset that needs a label, in sorted order so that
    // label ids are deterministic for identical input.
    let mut label_offsets: BTreeSet<u32> = BTreeSet::new();
    for (_, insn) in &decoded {
        match insn {
            Decoded::Jump { target, .. } => {
                label_offsets.insert(*target);
            }
            Decoded::TableSwitch {
                default, targets, ..
            } => {
                label_offsets.insert(*default);
                label_offsets.extend(targets.iter().copied());
            }
            Decoded::LookupSwitch { default, pairs } => {
                label_offsets.insert(*default);
                label_offsets.extend(pairs.iter().map(|(_, t)| *t));
            }
            Decoded::Done(_) => {}
        }
    }
    for (start, end, handler, _) in &exceptions {
        label_offsets.insert(*start as u32);
        label_offsets.insert(*end as u32);
        label_offsets.insert(*handler as u32);
    }
    for (start_pc, length, _, _, _) in &raw_locals {
        label_offsets.insert(*start_pc as u32);
        label_offsets.insert(*start_pc as u32 + *length as u32);
    }

    let labels: HashMap<u32, LabelId> = label_offsets
        .iter()
        .enumerate()
        .map(|(id, offset)| (*offset, id as LabelId))
        .collect();
    let label_at = |offset: u32| -> Result<LabelId, ParseError> {
        labels
            .get(&offset)
            .copied()
            .ok_or(ParseError::InvalidAttribute(String::from("Code")))
    };

    let line_at: HashMap<u16, u16> = line_numbers.iter().copied().collect();

    let mut insns = InsnList::new();
    for (offset, insn) in decoded {
        if let Some(label) = labels.get(&offset) {
            insns.push(Insn::Label(*label));
        }
        if let Some(line) = line_at.get(&(offset as u16)) {
            insns.push(Insn::LineNumber { line: *line });
        }
        let lowered = match insn {
            Decoded::Done(insn) => insn,
            Decoded::Jump { opcode, target } => Insn::Jump {
                opcode,
                label: label_at(target)?,
            },
            Decoded::TableSwitch {
                default,
                low,
                high,
                targets,
            } => Insn::TableSwitch {
                default: label_at(default)?,
                low,
                high,
                labels: targets
                    .into_iter()
                    .map(label_at)
                    .collect::<Result<_, _>>()?,
            },
            Decoded::LookupSwitch { default, pairs } => Insn::LookupSwitch {
                default: label_at(default)?,
                pairs: pairs
                    .into_iter()
                    .map(|(k, t)| Ok((k, label_at(t)?)))
                    .collect::<Result<_, ParseError>>()?,
            },
        };
        insns.push(lowered);
    }
    // end-of-code labels (exception range ends, local variable scopes)
    if let Some(label) = labels.get(&(code.len() as u32)) {
        insns.push(Insn::Label(*label));
    }

    let try_catch_blocks = exceptions
        .into_iter()
        .map(|(start, end, handler, catch_type)| {
            Ok(TryCatchNode {
                start: label_at(start as u32)?,
                end: label_at(end as u32)?,
                handler: label_at(handler as u32)?,
                catch_type: if catch_type == 0 {
                    None
                } else {
                    Some(pool.class_name(catch_type)?.to_string())
                },
            })
        })
        .collect::<Result<Vec<_>, ParseError>>()?;

    let local_variables = raw_locals
        .into_iter()
        .map(|(start_pc, length, name, desc, index)| {
            Ok(LocalVariableNode {
                name,
                desc,
                start: label_at(start_pc as u32)?,
                end: label_at(start_pc as u32 + length as u32)?,
                index,
            })
        })
        .collect::<Result<Vec<_>, ParseError>>()?;

    let mut body = MethodBody::from_parts(
        insns,
        try_catch_blocks,
        local_variables,
        max_stack,
        max_locals,
    );
    body.reserve_labels(labels.len() as LabelId);
    Ok(body)
}

fn decode_instructions(
    code: &[u8],
    pool: &ConstantPool,
    bootstrap: &[BootstrapMethod],
) -> Result<Vec<(u32, Decoded)>, ParseError> {
    let mut r = Cursor::new(code);
    let mut decoded = vec![];
    while (r.position() as usize) < code.len() {
        let offset = r.position() as u32;
        let opcode = r.read_u8()?;
        let insn = match opcode {
            NOP..=DCONST_1 => Decoded::Done(Insn::Simple { opcode }),
            BIPUSH => Decoded::Done(Insn::IntPush {
                opcode,
                operand: r.read_i8()? as i32,
            }),
            SIPUSH => Decoded::Done(Insn::IntPush {
                opcode,
                operand: r.read_i16::<BigEndian>()? as i32,
            }),
            LDC => Decoded::Done(Insn::Ldc(pool.loadable(r.read_u8()? as u16)?)),
            LDC_W | LDC2_W => {
                Decoded::Done(Insn::Ldc(pool.loadable(r.read_u16::<BigEndian>()?)?))
            }
            ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Decoded::Done(Insn::Var {
                opcode,
                var: r.read_u8()? as u16,
            }),
            ILOAD_0..=SALOAD => Decoded::Done(shorthand_var(opcode)),
            ISTORE_0..=SASTORE => Decoded::Done(shorthand_var(opcode)),
            POP..=LXOR => Decoded::Done(Insn::Simple { opcode }),
            IINC => Decoded::Done(Insn::Iinc {
                var: r.read_u8()? as u16,
                incr: r.read_i8()? as i16,
            }),
            I2L..=DCMPG => Decoded::Done(Insn::Simple { opcode }),
            IFEQ..=JSR | IFNULL | IFNONNULL => {
                let rel = r.read_i16::<BigEndian>()? as i32;
                Decoded::Jump {
                    opcode,
                    target: (offset as i32 + rel) as u32,
                }
            }
            GOTO_W | JSR_W => {
                let rel = r.read_i32::<BigEndian>()?;
                Decoded::Jump {
                    // narrowed back on write when the distance allows
                    opcode: if opcode == GOTO_W { GOTO } else { JSR },
                    target: (offset as i32 + rel) as u32,
                }
            }
            TABLESWITCH => {
                skip_padding(&mut r, offset)?;
                let default = (offset as i32 + r.read_i32::<BigEndian>()?) as u32;
                let low = r.read_i32::<BigEndian>()?;
                let high = r.read_i32::<BigEndian>()?;
                let count = if high < low { 0 } else { (high - low + 1) as usize };
                let mut targets = Vec::with_capacity(count);
                for _ in 0..count {
                    targets.push((offset as i32 + r.read_i32::<BigEndian>()?) as u32);
                }
                Decoded::TableSwitch {
                    default,
                    low,
                    high,
                    targets,
                }
            }
            LOOKUPSWITCH => {
                skip_padding(&mut r, offset)?;
                let default = (offset as i32 + r.read_i32::<BigEndian>()?) as u32;
                let npairs = r.read_i32::<BigEndian>()? as usize;
                let mut pairs = Vec::with_capacity(npairs);
                for _ in 0..npairs {
                    let key = r.read_i32::<BigEndian>()?;
                    let target = (offset as i32 + r.read_i32::<BigEndian>()?) as u32;
                    pairs.push((key, target));
                }
                Decoded::LookupSwitch { default, pairs }
            }
            IRETURN..=RETURN => Decoded::Done(Insn::Simple { opcode }),
            GETSTATIC..=PUTFIELD => {
                let (owner, name, desc) = pool.field_ref(r.read_u16::<BigEndian>()?)?;
                Decoded::Done(Insn::Field {
                    opcode,
                    owner: owner.to_string(),
                    name: name.to_string(),
                    desc: desc.to_string(),
                })
            }
            INVOKEVIRTUAL..=INVOKESTATIC => {
                let (owner, name, desc, interface) =
                    pool.method_ref(r.read_u16::<BigEndian>()?)?;
                Decoded::Done(Insn::Method {
                    opcode,
                    owner: owner.to_string(),
                    name: name.to_string(),
                    desc: desc.to_string(),
                    interface,
                })
            }
            INVOKEINTERFACE => {
                let index = r.read_u16::<BigEndian>()?;
                let _count = r.read_u8()?;
                let _zero = r.read_u8()?;
                let (owner, name, desc, _) = pool.method_ref(index)?;
                Decoded::Done(Insn::Method {
                    opcode,
                    owner: owner.to_string(),
                    name: name.to_string(),
                    desc: desc.to_string(),
                    interface: true,
                })
            }
            INVOKEDYNAMIC => {
                let index = r.read_u16::<BigEndian>()?;
                let _zero = r.read_u16::<BigEndian>()?;
                let (bootstrap_index, name, desc) = pool.invoke_dynamic(index)?;
                let bootstrap = bootstrap
                    .get(bootstrap_index as usize)
                    .ok_or(ParseError::InvalidIndex(bootstrap_index))?
                    .clone();
                Decoded::Done(Insn::InvokeDynamic {
                    name: name.to_string(),
                    desc: desc.to_string(),
                    bootstrap,
                })
            }
            NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => {
                let class = pool.class_name(r.read_u16::<BigEndian>()?)?.to_string();
                Decoded::Done(Insn::Type { opcode, class })
            }
            NEWARRAY => Decoded::Done(Insn::IntPush {
                opcode,
                operand: r.read_u8()? as i32,
            }),
            ARRAYLENGTH | ATHROW | MONITORENTER | MONITOREXIT => {
                Decoded::Done(Insn::Simple { opcode })
            }
            WIDE => {
                let wide_opcode = r.read_u8()?;
                match wide_opcode {
                    ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Decoded::Done(Insn::Var {
                        opcode: wide_opcode,
                        var: r.read_u16::<BigEndian>()?,
                    }),
                    IINC => Decoded::Done(Insn::Iinc {
                        var: r.read_u16::<BigEndian>()?,
                        incr: r.read_i16::<BigEndian>()?,
                    }),
                    _ => {
                        return Err(ParseError::InvalidOpcode {
                            opcode: wide_opcode,
                            offset: offset as usize,
                        })
                    }
                }
            }
            MULTIANEWARRAY => {
                let desc = pool.class_name(r.read_u16::<BigEndian>()?)?.to_string();
                let dims = r.read_u8()?;
                Decoded::Done(Insn::MultiANewArray { desc, dims })
            }
            _ => {
                return Err(ParseError::InvalidOpcode {
                    opcode,
                    offset: offset as usize,
                })
            }
        };
        decoded.push((offset, insn));
    }
    Ok(decoded)
}

/// Expand the one-byte load/store shorthands to the canonical form so the
/// rest of the pipeline only sees `Var` instructions.
fn shorthand_var(opcode: u8) -> Insn {
    let (base, var) = match opcode {
        ILOAD_0..=ALOAD_3 => {
            let rel = opcode - ILOAD_0;
            (ILOAD + rel / 4, (rel % 4) as u16)
        }
        ISTORE_0..=ASTORE_3 => {
            let rel = opcode - ISTORE_0;
            (ISTORE + rel / 4, (rel % 4) as u16)
        }
        // array loads/stores fall in the matched ranges but are plain
        // zero-operand instructions
        _ => return Insn::Simple { opcode },
    };
    Insn::Var { opcode: base, var }
}

fn skip_padding(r: &mut Cursor<&[u8]>, opcode_offset: u32) -> Result<(), ParseError> {
    let padding = (4 - ((opcode_offset + 1) % 4)) % 4;
    for _ in 0..padding {
        r.read_u8()?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Annotations

fn read_annotations(data: &[u8], pool: &ConstantPool) -> Result<Vec<AnnotationNode>, ParseError> {
    let mut r = Cursor::new(data);
    read_annotations_from(&mut r, pool)
}

fn read_annotations_from(
    r: &mut Cursor<&[u8]>,
    pool: &ConstantPool,
) -> Result<Vec<AnnotationNode>, ParseError> {
    let count = r.read_u16::<BigEndian>()? as usize;
    let mut annotations = Vec::with_capacity(count);
    for _ in 0..count {
        annotations.push(read_annotation(r, pool)?);
    }
    Ok(annotations)
}

fn read_annotation(
    r: &mut Cursor<&[u8]>,
    pool: &ConstantPool,
) -> Result<AnnotationNode, ParseError> {
    let desc = pool.utf8(r.read_u16::<BigEndian>()?)?.to_string();
    let count = r.read_u16::<BigEndian>()? as usize;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let name = pool.utf8(r.read_u16::<BigEndian>()?)?.to_string();
        let value = read_element_value(r, pool)?;
        values.push((name, value));
    }
    Ok(AnnotationNode { desc, values })
}

fn read_element_value(
    r: &mut Cursor<&[u8]>,
    pool: &ConstantPool,
) -> Result<AnnotationValue, ParseError> {
    let tag = r.read_u8()?;
    let int_const = |pool: &ConstantPool, index: u16| -> Result<i32, ParseError> {
        match pool.loadable(index)? {
            ConstantValue::Int(value) => Ok(value),
            _ => Err(ParseError::InvalidIndex(index)),
        }
    };
    let value = match tag {
        b'B' => AnnotationValue::Byte(int_const(pool, r.read_u16::<BigEndian>()?)? as i8),
        b'C' => AnnotationValue::Char(int_const(pool, r.read_u16::<BigEndian>()?)? as u16),
        b'S' => AnnotationValue::Short(int_const(pool, r.read_u16::<BigEndian>()?)? as i16),
        b'Z' => AnnotationValue::Bool(int_const(pool, r.read_u16::<BigEndian>()?)? != 0),
        b'I' => AnnotationValue::Int(int_const(pool, r.read_u16::<BigEndian>()?)?),
        b'J' => match pool.loadable(r.read_u16::<BigEndian>()?)? {
            ConstantValue::Long(value) => AnnotationValue::Long(value),
            _ => return Err(ParseError::InvalidAttribute(String::from("element_value"))),
        },
        b'F' => match pool.loadable(r.read_u16::<BigEndian>()?)? {
            ConstantValue::Float(value) => AnnotationValue::Float(value),
            _ => return Err(ParseError::InvalidAttribute(String::from("element_value"))),
        },
        b'D' => match pool.loadable(r.read_u16::<BigEndian>()?)? {
            ConstantValue::Double(value) => AnnotationValue::Double(value),
            _ => return Err(ParseError::InvalidAttribute(String::from("element_value"))),
        },
        b's' => AnnotationValue::String(pool.utf8(r.read_u16::<BigEndian>()?)?.to_string()),
        b'e' => AnnotationValue::Enum {
            desc: pool.utf8(r.read_u16::<BigEndian>()?)?.to_string(),
            value: pool.utf8(r.read_u16::<BigEndian>()?)?.to_string(),
        },
        b'c' => AnnotationValue::Class(pool.utf8(r.read_u16::<BigEndian>()?)?.to_string()),
        b'@' => AnnotationValue::Annotation(read_annotation(r, pool)?),
        b'[' => {
            let count = r.read_u16::<BigEndian>()? as usize;
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(read_element_value(r, pool)?);
            }
            AnnotationValue::Array(values)
        }
        _ => return Err(ParseError::InvalidAttribute(String::from("element_value"))),
    };
    Ok(value)
}
