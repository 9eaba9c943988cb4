//! Class file emission: a [`ClassNode`] back to bytes.
//!
//! The constant pool is rebuilt from scratch, labels are lowered to byte
//! offsets, and `max_stack`/`max_locals` are recomputed from the
//! instruction list. `StackMapTable` frames are not emitted.

use crate::classfile::constant_pool::ConstantsPool;
use crate::classfile::WriteError;
use crate::tree::insn::{BootstrapArg, BootstrapMethod, ConstantValue, Insn, LabelId};
use crate::tree::opcodes::*;
use crate::tree::{AnnotationNode, AnnotationValue, ClassNode, FieldNode, MethodBody, MethodNode};
use crate::util::code::free_var_index;
use crate::util::descriptors::{Descriptor, FieldType, MethodDescriptor, Width};
use byteorder::{BigEndian, WriteBytesExt};
use std::collections::HashMap;

/// Serialize a class node into class file bytes.
pub fn write_class(node: &ClassNode) -> Result<Vec<u8>, WriteError> {
    let mut pool = ConstantsPool::new();
    let mut bootstrap = BootstrapTable::default();

    let this_index = pool.class(&node.name)?;
    let super_index = match &node.super_name {
        Some(name) => pool.class(name)?,
        None => 0,
    };
    let interface_indices = node
        .interfaces
        .iter()
        .map(|name| pool.class(name))
        .collect::<Result<Vec<_>, _>>()?;

    let field_buffers = node
        .fields
        .iter()
        .map(|field| serialize_field(field, &mut pool))
        .collect::<Result<Vec<_>, _>>()?;
    let method_buffers = node
        .methods
        .iter()
        .map(|method| serialize_method(method, &mut pool, &mut bootstrap))
        .collect::<Result<Vec<_>, _>>()?;

    let mut class_attributes: Vec<Vec<u8>> = vec![];
    if let Some(source_file) = &node.source_file {
        let index = pool.utf8(source_file)?;
        let mut data = vec![];
        data.write_u16::<BigEndian>(index)?;
        class_attributes.push(attribute(&mut pool, "SourceFile", data)?);
    }
    if !node.inner_classes.is_empty() {
        let mut data = vec![];
        data.write_u16::<BigEndian>(node.inner_classes.len() as u16)?;
        for inner in &node.inner_classes {
            data.write_u16::<BigEndian>(pool.class(&inner.name)?)?;
            data.write_u16::<BigEndian>(match &inner.outer_name {
                Some(name) => pool.class(name)?,
                None => 0,
            })?;
            data.write_u16::<BigEndian>(match &inner.inner_name {
                Some(name) => pool.utf8(name)?,
                None => 0,
            })?;
            data.write_u16::<BigEndian>(inner.access)?;
        }
        class_attributes.push(attribute(&mut pool, "InnerClasses", data)?);
    }
    if !node.visible_annotations.is_empty() {
        let data = serialize_annotations(&node.visible_annotations, &mut pool)?;
        class_attributes.push(attribute(&mut pool, "RuntimeVisibleAnnotations", data)?);
    }
    if !node.invisible_annotations.is_empty() {
        let data = serialize_annotations(&node.invisible_annotations, &mut pool)?;
        class_attributes.push(attribute(&mut pool, "RuntimeInvisibleAnnotations", data)?);
    }
    if !bootstrap.methods.is_empty() {
        let data = bootstrap.serialize(&mut pool)?;
        class_attributes.push(attribute(&mut pool, "BootstrapMethods", data)?);
    }

    let mut out = vec![];
    out.write_u32::<BigEndian>(0xCAFE_BABE)?;
    out.write_u16::<BigEndian>(node.minor_version)?;
    out.write_u16::<BigEndian>(node.major_version)?;
    pool.serialize(&mut out)?;
    out.write_u16::<BigEndian>(node.access)?;
    out.write_u16::<BigEndian>(this_index)?;
    out.write_u16::<BigEndian>(super_index)?;
    out.write_u16::<BigEndian>(interface_indices.len() as u16)?;
    for index in interface_indices {
        out.write_u16::<BigEndian>(index)?;
    }
    out.write_u16::<BigEndian>(field_buffers.len() as u16)?;
    for buffer in field_buffers {
        out.extend_from_slice(&buffer);
    }
    out.write_u16::<BigEndian>(method_buffers.len() as u16)?;
    for buffer in method_buffers {
        out.extend_from_slice(&buffer);
    }
    out.write_u16::<BigEndian>(class_attributes.len() as u16)?;
    for buffer in class_attributes {
        out.extend_from_slice(&buffer);
    }
    Ok(out)
}

/// Full attribute bytes: name index, length, payload.
fn attribute(pool: &mut ConstantsPool, name: &str, data: Vec<u8>) -> Result<Vec<u8>, WriteError> {
    let name_index = pool.utf8(name)?;
    let mut out = vec![];
    out.write_u16::<BigEndian>(name_index)?;
    out.write_u32::<BigEndian>(data.len() as u32)?;
    out.extend_from_slice(&data);
    Ok(out)
}

fn serialize_field(field: &FieldNode, pool: &mut ConstantsPool) -> Result<Vec<u8>, WriteError> {
    let name_index = pool.utf8(&field.name)?;
    let descriptor_index = pool.utf8(&field.desc)?;

    let mut attributes: Vec<Vec<u8>> = vec![];
    if let Some(constant) = &field.constant_value {
        let index = pool.constant(constant)?;
        let mut data = vec![];
        data.write_u16::<BigEndian>(index)?;
        attributes.push(attribute(pool, "ConstantValue", data)?);
    }
    if !field.visible_annotations.is_empty() {
        let data = serialize_annotations(&field.visible_annotations, pool)?;
        attributes.push(attribute(pool, "RuntimeVisibleAnnotations", data)?);
    }
    if !field.invisible_annotations.is_empty() {
        let data = serialize_annotations(&field.invisible_annotations, pool)?;
        attributes.push(attribute(pool, "RuntimeInvisibleAnnotations", data)?);
    }

    let mut out = vec![];
    out.write_u16::<BigEndian>(field.access)?;
    out.write_u16::<BigEndian>(name_index)?;
    out.write_u16::<BigEndian>(descriptor_index)?;
    out.write_u16::<BigEndian>(attributes.len() as u16)?;
    for buffer in attributes {
        out.extend_from_slice(&buffer);
    }
    Ok(out)
}

fn serialize_method(
    method: &MethodNode,
    pool: &mut ConstantsPool,
    bootstrap: &mut BootstrapTable,
) -> Result<Vec<u8>, WriteError> {
    let name_index = pool.utf8(&method.name)?;
    let descriptor_index = pool.utf8(&method.desc)?;

    let mut attributes: Vec<Vec<u8>> = vec![];
    if let Some(body) = &method.code {
        let data = serialize_code(body, method, pool, bootstrap)?;
        attributes.push(attribute(pool, "Code", data)?);
    }
    if !method.exceptions.is_empty() {
        let mut data = vec![];
        data.write_u16::<BigEndian>(method.exceptions.len() as u16)?;
        for exception in &method.exceptions {
            data.write_u16::<BigEndian>(pool.class(exception)?)?;
        }
        attributes.push(attribute(pool, "Exceptions", data)?);
    }
    if !method.visible_annotations.is_empty() {
        let data = serialize_annotations(&method.visible_annotations, pool)?;
        attributes.push(attribute(pool, "RuntimeVisibleAnnotations", data)?);
    }
    if !method.invisible_annotations.is_empty() {
        let data = serialize_annotations(&method.invisible_annotations, pool)?;
        attributes.push(attribute(pool, "RuntimeInvisibleAnnotations", data)?);
    }
    if !method.invisible_parameter_annotations.is_empty() {
        let mut data = vec![];
        data.write_u8(method.invisible_parameter_annotations.len() as u8)?;
        for annotations in &method.invisible_parameter_annotations {
            let serialized = serialize_annotations(annotations, pool)?;
            data.extend_from_slice(&serialized);
        }
        attributes.push(attribute(
            pool,
            "RuntimeInvisibleParameterAnnotations",
            data,
        )?);
    }

    let mut out = vec![];
    out.write_u16::<BigEndian>(method.access)?;
    out.write_u16::<BigEndian>(name_index)?;
    out.write_u16::<BigEndian>(descriptor_index)?;
    out.write_u16::<BigEndian>(attributes.len() as u16)?;
    for buffer in attributes {
        out.extend_from_slice(&buffer);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Code emission

#[derive(Debug, Default)]
struct BootstrapTable {
    methods: Vec<BootstrapMethod>,
}

impl BootstrapTable {
    fn index_of(&mut self, method: &BootstrapMethod) -> u16 {
        if let Some(index) = self.methods.iter().position(|m| m == method) {
            return index as u16;
        }
        self.methods.push(method.clone());
        (self.methods.len() - 1) as u16
    }

    fn serialize(&self, pool: &mut ConstantsPool) -> Result<Vec<u8>, WriteError> {
        let mut data = vec![];
        data.write_u16::<BigEndian>(self.methods.len() as u16)?;
        for method in &self.methods {
            data.write_u16::<BigEndian>(pool.method_handle(&method.handle)?)?;
            data.write_u16::<BigEndian>(method.args.len() as u16)?;
            for arg in &method.args {
                let index = match arg {
                    BootstrapArg::Const(constant) => pool.constant(constant)?,
                    BootstrapArg::Handle(handle) => pool.method_handle(handle)?,
                };
                data.write_u16::<BigEndian>(index)?;
            }
        }
        Ok(data)
    }
}

/// Pre-computed encoding decisions for one instruction.
struct Encoded {
    /// Interned operand index, where the instruction has one.
    operand_index: u16,
    size: u32,
    offset: u32,
}

fn serialize_code(
    body: &MethodBody,
    method: &MethodNode,
    pool: &mut ConstantsPool,
    bootstrap: &mut BootstrapTable,
) -> Result<Vec<u8>, WriteError> {
    // Pass A: intern operands and lay out offsets. Switch padding depends
    // only on offsets already computed, so one forward pass settles both.
    let mut encoded: Vec<Encoded> = Vec::with_capacity(body.insns.len());
    let mut label_offsets: HashMap<LabelId, u32> = HashMap::new();
    let mut offset: u32 = 0;
    for insn in &body.insns {
        let mut operand_index = 0u16;
        let size = match insn {
            Insn::Label(id) => {
                label_offsets.insert(*id, offset);
                0
            }
            Insn::LineNumber { .. } => 0,
            Insn::Simple { .. } => 1,
            Insn::IntPush { opcode, .. } => {
                if *opcode == SIPUSH {
                    3
                } else {
                    2
                }
            }
            Insn::Var { opcode, var } => {
                if *var <= 3 && *opcode != RET {
                    1
                } else if *var <= 255 {
                    2
                } else {
                    4
                }
            }
            Insn::Type { class, .. } => {
                operand_index = pool.class(class)?;
                3
            }
            Insn::Field {
                owner, name, desc, ..
            } => {
                operand_index = pool.field_ref(owner, name, desc)?;
                3
            }
            Insn::Method {
                opcode,
                owner,
                name,
                desc,
                interface,
            } => {
                let interface = *interface || *opcode == INVOKEINTERFACE;
                operand_index = pool.method_ref(owner, name, desc, interface)?;
                if *opcode == INVOKEINTERFACE {
                    5
                } else {
                    3
                }
            }
            Insn::InvokeDynamic {
                name,
                desc,
                bootstrap: bsm,
            } => {
                let bsm_index = bootstrap.index_of(bsm);
                operand_index = pool.invoke_dynamic(bsm_index, name, desc)?;
                5
            }
            Insn::Jump { .. } => 3,
            Insn::Ldc(constant) => {
                operand_index = pool.constant(constant)?;
                match constant {
                    ConstantValue::Long(_) | ConstantValue::Double(_) => 3,
                    _ if operand_index > 255 => 3,
                    _ => 2,
                }
            }
            Insn::Iinc { var, incr } => {
                if *var <= 255 && (i8::MIN as i16..=i8::MAX as i16).contains(incr) {
                    3
                } else {
                    6
                }
            }
            Insn::TableSwitch { labels, .. } => {
                let padding = (4 - ((offset + 1) % 4)) % 4;
                1 + padding + 12 + 4 * labels.len() as u32
            }
            Insn::LookupSwitch { pairs, .. } => {
                let padding = (4 - ((offset + 1) % 4)) % 4;
                1 + padding + 8 + 8 * pairs.len() as u32
            }
            Insn::MultiANewArray { desc, .. } => {
                operand_index = pool.class(desc)?;
                4
            }
        };
        encoded.push(Encoded {
            operand_index,
            size,
            offset,
        });
        offset += size;
    }
    let code_length = offset;
    if code_length > 0xFFFF {
        return Err(WriteError::CodeOverflow(code_length as usize));
    }

    let label_offset = |id: LabelId| -> Result<u32, WriteError> {
        label_offsets
            .get(&id)
            .copied()
            .ok_or(WriteError::UnplacedLabel(id))
    };

    // Pass B: emit bytes.
    let mut code: Vec<u8> = Vec::with_capacity(code_length as usize);
    let mut line_numbers: Vec<(u16, u16)> = vec![];
    for (insn, enc) in body.insns.iter().zip(&encoded) {
        match insn {
            Insn::Label(_) => {}
            Insn::LineNumber { line } => line_numbers.push((enc.offset as u16, *line)),
            Insn::Simple { opcode } => code.push(*opcode),
            Insn::IntPush { opcode, operand } => {
                code.push(*opcode);
                if *opcode == SIPUSH {
                    code.write_i16::<BigEndian>(*operand as i16)?;
                } else {
                    code.push(*operand as u8);
                }
            }
            Insn::Var { opcode, var } => {
                if enc.size == 1 {
                    let base = match *opcode {
                        ILOAD => ILOAD_0,
                        LLOAD => LLOAD_0,
                        FLOAD => FLOAD_0,
                        DLOAD => DLOAD_0,
                        ALOAD => ALOAD_0,
                        ISTORE => ISTORE_0,
                        LSTORE => LSTORE_0,
                        FSTORE => FSTORE_0,
                        DSTORE => DSTORE_0,
                        ASTORE => ASTORE_0,
                        other => other,
                    };
                    code.push(base + *var as u8);
                } else if enc.size == 2 {
                    code.push(*opcode);
                    code.push(*var as u8);
                } else {
                    code.push(WIDE);
                    code.push(*opcode);
                    code.write_u16::<BigEndian>(*var)?;
                }
            }
            Insn::Type { opcode, .. } => {
                code.push(*opcode);
                code.write_u16::<BigEndian>(enc.operand_index)?;
            }
            Insn::Field { opcode, .. } => {
                code.push(*opcode);
                code.write_u16::<BigEndian>(enc.operand_index)?;
            }
            Insn::Method { opcode, desc, .. } => {
                code.push(*opcode);
                code.write_u16::<BigEndian>(enc.operand_index)?;
                if *opcode == INVOKEINTERFACE {
                    let count = MethodDescriptor::parse(desc)
                        .map(|parsed| parsed.parameter_slots(false))
                        .unwrap_or(1);
                    code.push(count as u8);
                    code.push(0);
                }
            }
            Insn::InvokeDynamic { .. } => {
                code.push(INVOKEDYNAMIC);
                code.write_u16::<BigEndian>(enc.operand_index)?;
                code.write_u16::<BigEndian>(0)?;
            }
            Insn::Jump { opcode, label } => {
                let target = label_offset(*label)?;
                let rel = target as i64 - enc.offset as i64;
                if !(i16::MIN as i64..=i16::MAX as i64).contains(&rel) {
                    return Err(WriteError::JumpTooFar {
                        from: enc.offset as usize,
                        to: target as usize,
                    });
                }
                code.push(*opcode);
                code.write_i16::<BigEndian>(rel as i16)?;
            }
            Insn::Ldc(constant) => {
                match constant {
                    ConstantValue::Long(_) | ConstantValue::Double(_) => {
                        code.push(LDC2_W);
                        code.write_u16::<BigEndian>(enc.operand_index)?;
                    }
                    _ if enc.size == 3 => {
                        code.push(LDC_W);
                        code.write_u16::<BigEndian>(enc.operand_index)?;
                    }
                    _ => {
                        code.push(LDC);
                        code.push(enc.operand_index as u8);
                    }
                };
            }
            Insn::Iinc { var, incr } => {
                if enc.size == 3 {
                    code.push(IINC);
                    code.push(*var as u8);
                    code.push(*incr as u8);
                } else {
                    code.push(WIDE);
                    code.push(IINC);
                    code.write_u16::<BigEndian>(*var)?;
                    code.write_i16::<BigEndian>(*incr)?;
                }
            }
            Insn::TableSwitch {
                default,
                low,
                high,
                labels,
            } => {
                code.push(TABLESWITCH);
                let padding = (4 - ((enc.offset + 1) % 4)) % 4;
                for _ in 0..padding {
                    code.push(0);
                }
                code.write_i32::<BigEndian>(
                    label_offset(*default)? as i32 - enc.offset as i32,
                )?;
                code.write_i32::<BigEndian>(*low)?;
                code.write_i32::<BigEndian>(*high)?;
                for label in labels {
                    code.write_i32::<BigEndian>(
                        label_offset(*label)? as i32 - enc.offset as i32,
                    )?;
                }
            }
            Insn::LookupSwitch { default, pairs } => {
                code.push(LOOKUPSWITCH);
                let padding = (4 - ((enc.offset + 1) % 4)) % 4;
                for _ in 0..padding {
                    code.push(0);
                }
                code.write_i32::<BigEndian>(
                    label_offset(*default)? as i32 - enc.offset as i32,
                )?;
                code.write_i32::<BigEndian>(pairs.len() as i32)?;
                for (key, label) in pairs {
                    code.write_i32::<BigEndian>(*key)?;
                    code.write_i32::<BigEndian>(
                        label_offset(*label)? as i32 - enc.offset as i32,
                    )?;
                }
            }
            Insn::MultiANewArray { dims, .. } => {
                code.push(MULTIANEWARRAY);
                code.write_u16::<BigEndian>(enc.operand_index)?;
                code.push(*dims);
            }
        }
    }

    let max_stack = compute_max_stack(body)?;
    let max_locals = free_var_index(method).max(1);

    let mut data = vec![];
    data.write_u16::<BigEndian>(max_stack)?;
    data.write_u16::<BigEndian>(max_locals)?;
    data.write_u32::<BigEndian>(code_length)?;
    data.extend_from_slice(&code);

    data.write_u16::<BigEndian>(body.try_catch_blocks.len() as u16)?;
    for block in &body.try_catch_blocks {
        data.write_u16::<BigEndian>(label_offset(block.start)? as u16)?;
        data.write_u16::<BigEndian>(label_offset(block.end)? as u16)?;
        data.write_u16::<BigEndian>(label_offset(block.handler)? as u16)?;
        data.write_u16::<BigEndian>(match &block.catch_type {
            Some(name) => pool.class(name)?,
            None => 0,
        })?;
    }

    let mut code_attributes: Vec<Vec<u8>> = vec![];
    if !line_numbers.is_empty() {
        let mut table = vec![];
        table.write_u16::<BigEndian>(line_numbers.len() as u16)?;
        for (start_pc, line) in &line_numbers {
            table.write_u16::<BigEndian>(*start_pc)?;
            table.write_u16::<BigEndian>(*line)?;
        }
        code_attributes.push(attribute(pool, "LineNumberTable", table)?);
    }
    // Entries whose scope labels went away during surgery are dropped.
    let live_locals: Vec<_> = body
        .local_variables
        .iter()
        .filter(|local| {
            label_offsets.contains_key(&local.start) && label_offsets.contains_key(&local.end)
        })
        .collect();
    if !live_locals.is_empty() {
        let mut table = vec![];
        table.write_u16::<BigEndian>(live_locals.len() as u16)?;
        for local in live_locals {
            let start = label_offset(local.start)?;
            let end = label_offset(local.end)?;
            table.write_u16::<BigEndian>(start as u16)?;
            table.write_u16::<BigEndian>(end.saturating_sub(start) as u16)?;
            table.write_u16::<BigEndian>(pool.utf8(&local.name)?)?;
            table.write_u16::<BigEndian>(pool.utf8(&local.desc)?)?;
            table.write_u16::<BigEndian>(local.index)?;
        }
        code_attributes.push(attribute(pool, "LocalVariableTable", table)?);
    }

    data.write_u16::<BigEndian>(code_attributes.len() as u16)?;
    for buffer in code_attributes {
        data.extend_from_slice(&buffer);
    }
    Ok(data)
}

// ---------------------------------------------------------------------------
// Operand stack depth

/// Stack effect of an instruction in slots: `(pops, pushes)`.
fn stack_effect(insn: &Insn) -> (u16, u16) {
    match insn {
        Insn::Label(_) | Insn::LineNumber { .. } | Insn::Iinc { .. } => (0, 0),
        Insn::IntPush { opcode, .. } => {
            if *opcode == NEWARRAY {
                (1, 1)
            } else {
                (0, 1)
            }
        }
        Insn::Var { opcode, .. } => match *opcode {
            ILOAD | FLOAD | ALOAD => (0, 1),
            LLOAD | DLOAD => (0, 2),
            ISTORE | FSTORE | ASTORE => (1, 0),
            LSTORE | DSTORE => (2, 0),
            _ => (0, 0), // RET
        },
        Insn::Type { opcode, .. } => match *opcode {
            NEW => (0, 1),
            _ => (1, 1), // ANEWARRAY, CHECKCAST, INSTANCEOF
        },
        Insn::Field { opcode, desc, .. } => {
            let width = FieldType::parse(desc).map(|t| t.width()).unwrap_or(1) as u16;
            match *opcode {
                GETSTATIC => (0, width),
                PUTSTATIC => (width, 0),
                GETFIELD => (1, width),
                _ => (1 + width, 0), // PUTFIELD
            }
        }
        Insn::Method { opcode, desc, .. } => method_effect(desc, *opcode != INVOKESTATIC),
        Insn::InvokeDynamic { desc, .. } => method_effect(desc, false),
        Insn::Jump { opcode, .. } => match *opcode {
            GOTO | GOTO_W => (0, 0),
            JSR | JSR_W => (0, 1),
            IF_ICMPEQ..=IF_ACMPNE => (2, 0),
            _ => (1, 0), // IF*, IFNULL, IFNONNULL
        },
        Insn::Ldc(constant) => match constant {
            ConstantValue::Long(_) | ConstantValue::Double(_) => (0, 2),
            _ => (0, 1),
        },
        Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => (1, 0),
        Insn::MultiANewArray { dims, .. } => (*dims as u16, 1),
        Insn::Simple { opcode } => simple_effect(*opcode),
    }
}

fn method_effect(desc: &str, has_receiver: bool) -> (u16, u16) {
    let parsed = match MethodDescriptor::parse(desc) {
        Ok(parsed) => parsed,
        Err(_) => return (0, 0),
    };
    let mut pops = parsed.parameters.iter().map(Width::width).sum::<usize>() as u16;
    if has_receiver {
        pops += 1;
    }
    let pushes = parsed.return_type.as_ref().map(Width::width).unwrap_or(0) as u16;
    (pops, pushes)
}

fn simple_effect(opcode: u8) -> (u16, u16) {
    match opcode {
        NOP => (0, 0),
        ACONST_NULL | ICONST_M1..=ICONST_5 | FCONST_0..=FCONST_2 => (0, 1),
        LCONST_0 | LCONST_1 | DCONST_0 | DCONST_1 => (0, 2),
        IALOAD | FALOAD | AALOAD | BALOAD | CALOAD | SALOAD => (2, 1),
        LALOAD | DALOAD => (2, 2),
        IASTORE | FASTORE | AASTORE | BASTORE | CASTORE | SASTORE => (3, 0),
        LASTORE | DASTORE => (4, 0),
        POP => (1, 0),
        POP2 => (2, 0),
        DUP => (1, 2),
        DUP_X1 => (2, 3),
        DUP_X2 => (3, 4),
        DUP2 => (2, 4),
        DUP2_X1 => (3, 5),
        DUP2_X2 => (4, 6),
        SWAP => (2, 2),
        IADD | ISUB | IMUL | IDIV | IREM | IAND | IOR | IXOR | ISHL | ISHR | IUSHR => (2, 1),
        FADD | FSUB | FMUL | FDIV | FREM => (2, 1),
        LADD | LSUB | LMUL | LDIV | LREM | LAND | LOR | LXOR => (4, 2),
        DADD | DSUB | DMUL | DDIV | DREM => (4, 2),
        LSHL | LSHR | LUSHR => (3, 2),
        INEG | FNEG => (1, 1),
        LNEG | DNEG => (2, 2),
        I2F | F2I | I2B | I2C | I2S => (1, 1),
        I2L | I2D | F2L | F2D => (1, 2),
        L2I | L2F | D2I | D2F => (2, 1),
        L2D | D2L => (2, 2),
        LCMP | DCMPL | DCMPG => (4, 1),
        FCMPL | FCMPG => (2, 1),
        IRETURN | FRETURN | ARETURN => (1, 0),
        LRETURN | DRETURN => (2, 0),
        RETURN => (0, 0),
        ARRAYLENGTH => (1, 1),
        ATHROW | MONITORENTER | MONITOREXIT => (1, 0),
        _ => (0, 0),
    }
}

/// Worklist simulation of operand stack depth over the instruction list.
///
/// Depths are taken as the maximum over join points; unreachable code
/// contributes nothing.
fn compute_max_stack(body: &MethodBody) -> Result<u16, WriteError> {
    let insns = body.insns.as_slice();
    let mut label_index: HashMap<LabelId, usize> = HashMap::new();
    for (i, insn) in insns.iter().enumerate() {
        if let Insn::Label(id) = insn {
            label_index.insert(*id, i);
        }
    }
    let index_of = |id: LabelId| -> Result<usize, WriteError> {
        label_index.get(&id).copied().ok_or(WriteError::UnplacedLabel(id))
    };

    let mut max: u16 = 0;
    let mut visited: HashMap<usize, u16> = HashMap::new();
    let mut work: Vec<(usize, u16)> = vec![(0, 0)];
    for block in &body.try_catch_blocks {
        work.push((index_of(block.handler)?, 1));
    }

    while let Some((start, mut depth)) = work.pop() {
        match visited.get(&start) {
            Some(seen) if *seen >= depth => continue,
            _ => {
                visited.insert(start, depth);
            }
        }
        max = max.max(depth);
        let mut i = start;
        while i < insns.len() {
            let insn = &insns[i];
            if let Insn::Label(_) = insn {
                if i != start {
                    match visited.get(&i) {
                        Some(seen) if *seen >= depth => break,
                        _ => {
                            visited.insert(i, depth);
                        }
                    }
                }
            }
            let (pops, pushes) = stack_effect(insn);
            depth = depth.saturating_sub(pops) + pushes;
            max = max.max(depth);
            match insn {
                Insn::Jump { opcode, label } => {
                    work.push((index_of(*label)?, depth));
                    if *opcode == GOTO || *opcode == GOTO_W {
                        break;
                    }
                }
                Insn::TableSwitch {
                    default, labels, ..
                } => {
                    work.push((index_of(*default)?, depth));
                    for label in labels {
                        work.push((index_of(*label)?, depth));
                    }
                    break;
                }
                Insn::LookupSwitch { default, pairs } => {
                    work.push((index_of(*default)?, depth));
                    for (_, label) in pairs {
                        work.push((index_of(*label)?, depth));
                    }
                    break;
                }
                Insn::Simple { opcode }
                    if crate::tree::opcodes::is_return(*opcode) || *opcode == ATHROW =>
                {
                    break;
                }
                Insn::Var { opcode, .. } if *opcode == RET => break,
                _ => {}
            }
            i += 1;
        }
    }
    Ok(max)
}

// ---------------------------------------------------------------------------
// Annotations

fn serialize_annotations(
    annotations: &[AnnotationNode],
    pool: &mut ConstantsPool,
) -> Result<Vec<u8>, WriteError> {
    let mut data = vec![];
    data.write_u16::<BigEndian>(annotations.len() as u16)?;
    for annotation in annotations {
        serialize_annotation(annotation, pool, &mut data)?;
    }
    Ok(data)
}

fn serialize_annotation(
    annotation: &AnnotationNode,
    pool: &mut ConstantsPool,
    out: &mut Vec<u8>,
) -> Result<(), WriteError> {
    out.write_u16::<BigEndian>(pool.utf8(&annotation.desc)?)?;
    out.write_u16::<BigEndian>(annotation.values.len() as u16)?;
    for (name, value) in &annotation.values {
        out.write_u16::<BigEndian>(pool.utf8(name)?)?;
        serialize_element_value(value, pool, out)?;
    }
    Ok(())
}

fn serialize_element_value(
    value: &AnnotationValue,
    pool: &mut ConstantsPool,
    out: &mut Vec<u8>,
) -> Result<(), WriteError> {
    match value {
        AnnotationValue::Byte(v) => {
            out.push(b'B');
            out.write_u16::<BigEndian>(pool.integer(*v as i32)?)?;
        }
        AnnotationValue::Char(v) => {
            out.push(b'C');
            out.write_u16::<BigEndian>(pool.integer(*v as i32)?)?;
        }
        AnnotationValue::Short(v) => {
            out.push(b'S');
            out.write_u16::<BigEndian>(pool.integer(*v as i32)?)?;
        }
        AnnotationValue::Bool(v) => {
            out.push(b'Z');
            out.write_u16::<BigEndian>(pool.integer(*v as i32)?)?;
        }
        AnnotationValue::Int(v) => {
            out.push(b'I');
            out.write_u16::<BigEndian>(pool.integer(*v)?)?;
        }
        AnnotationValue::Long(v) => {
            out.push(b'J');
            out.write_u16::<BigEndian>(pool.long(*v)?)?;
        }
        AnnotationValue::Float(v) => {
            out.push(b'F');
            out.write_u16::<BigEndian>(pool.float(*v)?)?;
        }
        AnnotationValue::Double(v) => {
            out.push(b'D');
            out.write_u16::<BigEndian>(pool.double(*v)?)?;
        }
        AnnotationValue::String(v) => {
            out.push(b's');
            out.write_u16::<BigEndian>(pool.utf8(v)?)?;
        }
        AnnotationValue::Enum { desc, value } => {
            out.push(b'e');
            out.write_u16::<BigEndian>(pool.utf8(desc)?)?;
            out.write_u16::<BigEndian>(pool.utf8(value)?)?;
        }
        AnnotationValue::Class(desc) => {
            out.push(b'c');
            out.write_u16::<BigEndian>(pool.utf8(desc)?)?;
        }
        AnnotationValue::Annotation(annotation) => {
            out.push(b'@');
            serialize_annotation(annotation, pool, out)?;
        }
        AnnotationValue::Array(values) => {
            out.push(b'[');
            out.write_u16::<BigEndian>(values.len() as u16)?;
            for value in values {
                serialize_element_value(value, pool, out)?;
            }
        }
    }
    Ok(())
}
