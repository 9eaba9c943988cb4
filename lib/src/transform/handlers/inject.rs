//! `@Inject`: calls into a transformer method at resolved anchors.

use crate::runtime;
use crate::transform::annotations::{
    self, find_annotation, parse_inject, parse_local_variable, InjectDecl, LocalVariableDecl,
    Shift,
};
use crate::transform::errors::TransformError;
use crate::transform::handlers::{
    check_static_parity, rename_and_copy, resolve_target_methods, AnnotationHandler,
    HandlerContext, HandlerOutcome,
};
use crate::transform::targets::Resolution;
use crate::tree::insn::{Insn, LabelId};
use crate::tree::opcodes::*;
use crate::tree::MethodNode;
use crate::util::code::{
    box_value, cast_to, free_var_index, int_push, load_opcode, load_parameters, store_opcode,
    store_to_load,
};
use crate::util::descriptors::{Descriptor, FieldType, MethodDescriptor, Width};

/// Target kinds whose anchor has the pre-return value on the operand stack;
/// it is captured into a fresh local around the hook call.
const CAPTURE_KINDS: [&str; 3] = ["RETURN", "TAIL", "THROW"];

pub struct InjectHandler;

impl AnnotationHandler for InjectHandler {
    fn name(&self) -> &'static str {
        "inject"
    }

    fn transform(&self, ctx: &mut HandlerContext<'_>) -> Result<HandlerOutcome, TransformError> {
        let mut applied = false;
        loop {
            let Some(index) = ctx.transformer.methods.iter().position(|m| {
                find_annotation(&m.invisible_annotations, annotations::INJECT).is_some()
            }) else {
                break;
            };
            let annotation = find_annotation(
                &ctx.transformer.methods[index].invisible_annotations,
                annotations::INJECT,
            )
            .expect("position checked the annotation");
            let decl = parse_inject(annotation);
            apply_injection(ctx, index, &decl)?;
            applied = true;
        }
        Ok(if applied {
            HandlerOutcome::Applied
        } else {
            HandlerOutcome::Skipped
        })
    }
}

fn apply_injection(
    ctx: &mut HandlerContext<'_>,
    method_index: usize,
    decl: &InjectDecl,
) -> Result<(), TransformError> {
    let transformer_name = ctx.transformer.name.clone();
    let hook_template = ctx.transformer.methods[method_index].clone();

    let target_indices = resolve_target_methods(ctx.target, &decl.methods);
    if target_indices.is_empty() {
        return Err(TransformError::shape(
            &hook_template.name,
            &transformer_name,
            format!(
                "could not find target method '{}' in '{}'",
                decl.methods.join(", "),
                ctx.target.name
            ),
        )
        .with_help("use the plain method name or name(descriptor)"));
    }

    let locals = trailing_locals(&hook_template);

    for &target_index in &target_indices {
        let target_method = &ctx.target.methods[target_index];
        check_static_parity(target_method, &hook_template, &transformer_name)?;
        let shape = check_shape(target_method, &hook_template, &locals, &transformer_name)?;

        // each target method gets its own copy of the hook
        let mut hook = hook_template.clone();
        copy_back_local_vars(&mut hook, &locals);
        let slot = ctx.transformer.methods.len();
        ctx.transformer.methods.push(hook);
        let (hook_name, hook_desc) =
            rename_and_copy(ctx.target, ctx.transformer, slot, annotations::INJECT);

        for target_decl in &decl.targets {
            let resolution = {
                let method = &ctx.target.methods[target_index];
                ctx.targets.resolve(method, target_decl, decl.slice.as_ref())
            };
            let (anchors, shift) = match resolution {
                Resolution::UnknownKind => {
                    return Err(TransformError::InvalidTarget {
                        method: hook_template.name.clone(),
                        transformer: transformer_name.clone(),
                        target: target_decl.kind.clone(),
                        help: format!(
                            "known targets: {}",
                            ctx.targets.known_kinds().join(", ")
                        ),
                    });
                }
                Resolution::Invalid => {
                    return Err(TransformError::InvalidTarget {
                        method: hook_template.name.clone(),
                        transformer: transformer_name.clone(),
                        target: target_decl.target.clone(),
                        help: String::from(
                            "e.g. Ljava/lang/String;toString()V, Ljava/lang/Integer;MAX_VALUE:I",
                        ),
                    });
                }
                Resolution::Anchors(anchors, shift) => (anchors, shift),
            };
            if anchors.is_empty() {
                if target_decl.optional {
                    continue;
                }
                return Err(TransformError::TargetNotFound {
                    method: hook_template.name.clone(),
                    transformer: transformer_name.clone(),
                    target: target_decl.kind.clone(),
                    help: String::from(
                        "e.g. Ljava/lang/String;toString()V, Ljava/lang/Integer;MAX_VALUE:I",
                    ),
                });
            }

            let capture = CAPTURE_KINDS
                .iter()
                .any(|kind| target_decl.kind.eq_ignore_ascii_case(kind));
            let throwable_capture = target_decl.kind.eq_ignore_ascii_case("THROW");

            // descending anchor order keeps earlier indices valid
            for &anchor in anchors.iter().rev() {
                let target_is_interface = ctx.target.is_interface();
                let target_name = ctx.target.name.clone();
                let method = &mut ctx.target.methods[target_index];
                let sequence = build_injection(
                    &target_name,
                    target_is_interface,
                    method,
                    &hook_name,
                    &hook_desc,
                    &shape,
                    &locals,
                    decl.cancellable,
                    capture,
                    throwable_capture,
                    &transformer_name,
                )?;
                let body = method.code.as_mut().expect("anchors imply code");
                match shift {
                    Shift::Before => body.insns.insert_before(anchor, sequence),
                    Shift::After => body.insns.insert_after(anchor, sequence),
                }
            }
        }
    }

    ctx.transformer.methods.remove(method_index);
    Ok(())
}

/// The trailing run of `@LocalVariable` parameters.
fn trailing_locals(method: &MethodNode) -> Vec<LocalVariableDecl> {
    let mut locals = vec![];
    for annotations_of_param in method.invisible_parameter_annotations.iter().rev() {
        let Some(annotation) =
            find_annotation(annotations_of_param, annotations::LOCAL_VARIABLE)
        else {
            break;
        };
        locals.push(parse_local_variable(annotation));
    }
    locals.reverse();
    locals
}

/// Accepted head shapes of the hook's parameter list.
struct InjectionShape {
    has_args: bool,
    has_callback: bool,
    hook_static: bool,
}

fn check_shape(
    target_method: &MethodNode,
    hook: &MethodNode,
    locals: &[LocalVariableDecl],
    transformer_name: &str,
) -> Result<InjectionShape, TransformError> {
    let hook_desc = MethodDescriptor::parse(&hook.desc).map_err(|_| {
        TransformError::shape(&hook.name, transformer_name, "has invalid descriptor")
    })?;
    let target_desc = MethodDescriptor::parse(&target_method.desc).map_err(|_| {
        TransformError::shape(&target_method.name, transformer_name, "has invalid descriptor")
    })?;
    if hook_desc.return_type.is_some() {
        return Err(TransformError::shape(
            &hook.name,
            transformer_name,
            "must have void return type",
        )
        .with_help("change the return type to void"));
    }

    if hook_desc.parameters.len() < locals.len() {
        return Err(TransformError::shape(
            &hook.name,
            transformer_name,
            "has more @LocalVariable annotations than parameters",
        ));
    }
    let head_len = hook_desc.parameters.len() - locals.len();
    let head = &hook_desc.parameters[..head_len];
    let callback = FieldType::object(runtime::CALLBACK);
    let target_args = target_desc.parameters.as_slice();

    let (has_args, has_callback) = if head.is_empty() {
        (false, false)
    } else if head.len() == 1 && head[0] == callback {
        (false, true)
    } else if head == target_args {
        (true, false)
    } else if head.len() == target_args.len() + 1
        && &head[..target_args.len()] == target_args
        && head[target_args.len()] == callback
    {
        (true, true)
    } else {
        return Err(TransformError::shape(
            &hook.name,
            transformer_name,
            "must have the same arguments as the target method or no arguments, \
             optionally followed by the injection callback",
        )
        .with_help("e.g. void hook(InjectionCallback callback)"));
    };

    Ok(InjectionShape {
        has_args,
        has_callback,
        hook_static: hook.is_static(),
    })
}

/// Rewrite the hook for modifiable locals: append the `Object[]` parameter,
/// shift its own locals up and pack the current values of the modifiable
/// parameters into the array before every exit (the update-on-exit
/// guarantee).
fn copy_back_local_vars(hook: &mut MethodNode, locals: &[LocalVariableDecl]) {
    let modifiable_count = locals.iter().filter(|l| l.modifiable).count();
    if modifiable_count == 0 {
        return;
    }
    let Ok(mut desc) = MethodDescriptor::parse(&hook.desc) else {
        return;
    };
    desc.parameters
        .push(FieldType::array(FieldType::object("java/lang/Object")));
    hook.desc = desc.render();

    // parameter slots, the appended array last
    let mut slots = vec![];
    let mut slot: u16 = if hook.is_static() { 0 } else { 1 };
    for parameter in &desc.parameters {
        slots.push(slot);
        slot += parameter.width() as u16;
    }
    let array_slot = *slots.last().expect("array parameter was appended");

    let Some(body) = hook.code.as_mut() else { return };
    for insn in body.insns.iter_mut() {
        match insn {
            Insn::Var { var, .. } if *var >= array_slot => *var += 1,
            Insn::Iinc { var, .. } if *var >= array_slot => *var += 1,
            _ => {}
        }
    }

    let param_count = desc.parameters.len();
    let mut pack = vec![];
    let mut array_index = 0;
    for (offset, local) in locals.iter().enumerate() {
        if !local.modifiable {
            continue;
        }
        let param_pos = param_count - 1 - locals.len() + offset;
        let param_type = &desc.parameters[param_pos];
        pack.push(Insn::Var {
            opcode: ALOAD,
            var: array_slot,
        });
        pack.push(int_push(array_index));
        array_index += 1;
        pack.push(Insn::Var {
            opcode: load_opcode(param_type),
            var: slots[param_pos],
        });
        if let Some(boxing) = box_value(param_type) {
            pack.push(boxing);
        }
        pack.push(Insn::Simple { opcode: AASTORE });
    }

    let exits: Vec<usize> = body
        .insns
        .iter()
        .enumerate()
        .filter(|(_, insn)| match insn.opcode() {
            Some(opcode) => is_return(opcode) || opcode == ATHROW,
            None => false,
        })
        .map(|(i, _)| i)
        .collect();
    for exit in exits.into_iter().rev() {
        body.insns.insert_before(exit, pack.clone());
    }
}

/// One resolved `@LocalVariable` of the current target method.
struct ResolvedLocal {
    load: Vec<Insn>,
    slot: u16,
    param_type: FieldType,
    modifiable: bool,
}

fn resolve_local(
    target_method: &MethodNode,
    local: &LocalVariableDecl,
    param_type: &FieldType,
    transformer_name: &str,
) -> Result<ResolvedLocal, TransformError> {
    let method_name = &target_method.name;
    if local.name.is_some() == local.index.is_some() {
        return Err(TransformError::shape(
            method_name,
            transformer_name,
            "local variable needs a name or an index, not both",
        ));
    }
    let body = target_method.code.as_ref().ok_or_else(|| {
        TransformError::shape(method_name, transformer_name, "target method has no code")
    })?;

    let slot = match &local.name {
        Some(name) => {
            if body.local_variables.is_empty() {
                return Err(TransformError::shape(
                    method_name,
                    transformer_name,
                    "target method has no local variable table, the variable \
                     cannot be identified by name",
                )
                .with_help("use the slot index instead"));
            }
            body.local_variables
                .iter()
                .find(|v| &v.name == name)
                .map(|v| v.index)
                .ok_or_else(|| {
                    TransformError::shape(
                        method_name,
                        transformer_name,
                        format!("local variable '{}' could not be found", name),
                    )
                })?
        }
        None => local.index.expect("checked above"),
    };

    let load = match local.load_opcode {
        Some(explicit) => Some(explicit),
        None => {
            // infer from the stores/loads touching the slot; conflicting
            // widths need an explicit opcode
            let mut inferred = None;
            for insn in &body.insns {
                let Insn::Var { opcode, var } = insn else { continue };
                if *var != slot {
                    continue;
                }
                let Some(as_load) = store_to_load(*opcode) else { continue };
                match inferred {
                    None => inferred = Some(as_load),
                    Some(existing) if existing != as_load => {
                        return Err(TransformError::shape(
                            method_name,
                            transformer_name,
                            format!(
                                "local variable slot {} holds conflicting types, \
                                 define a load opcode",
                                slot
                            ),
                        ));
                    }
                    Some(_) => {}
                }
            }
            inferred
        }
    };
    let Some(load) = load else {
        return Err(TransformError::shape(
            method_name,
            transformer_name,
            format!(
                "type of local variable slot {} could not be inferred, define \
                 a load opcode",
                slot
            ),
        ));
    };

    let mut insns = vec![Insn::Var { opcode: load, var: slot }];
    if load == ILOAD {
        match param_type {
            FieldType::Base(crate::util::descriptors::BaseType::Byte) => {
                insns.push(Insn::Simple { opcode: I2B })
            }
            FieldType::Base(crate::util::descriptors::BaseType::Short) => {
                insns.push(Insn::Simple { opcode: I2S })
            }
            FieldType::Base(crate::util::descriptors::BaseType::Char) => {
                insns.push(Insn::Simple { opcode: I2C })
            }
            _ => {}
        }
    } else if load == ALOAD {
        insns.extend(cast_to(param_type));
    }

    Ok(ResolvedLocal {
        load: insns,
        slot,
        param_type: param_type.clone(),
        modifiable: local.modifiable,
    })
}

/// Assemble the instruction sequence inserted at one anchor.
#[allow(clippy::too_many_arguments)]
fn build_injection(
    target_name: &str,
    target_is_interface: bool,
    target_method: &mut MethodNode,
    hook_name: &str,
    hook_desc: &str,
    shape: &InjectionShape,
    locals: &[LocalVariableDecl],
    cancellable: bool,
    capture: bool,
    throwable_capture: bool,
    transformer_name: &str,
) -> Result<Vec<Insn>, TransformError> {
    let target_desc = MethodDescriptor::parse(&target_method.desc).map_err(|_| {
        TransformError::shape(&target_method.name, transformer_name, "has invalid descriptor")
    })?;
    // what sits on the stack at the anchor: the throwable for THROW, the
    // return value otherwise
    let capture_type = if throwable_capture {
        Some(FieldType::object("java/lang/Throwable"))
    } else {
        target_desc.return_type.clone()
    };
    let capture_value = capture && capture_type.is_some() && shape.has_callback;

    let free = free_var_index(target_method);
    let mut next_var = free;
    let callback_var = next_var;
    if shape.has_callback {
        next_var += 1;
    }
    let return_var = next_var;
    if capture_value {
        next_var += capture_type.as_ref().map(|t| t.width() as u16).unwrap_or(0);
    }
    let array_var = next_var;

    // resolve locals against the current method state
    let hook_params = MethodDescriptor::parse(hook_desc).map_err(|_| {
        TransformError::shape(hook_name, transformer_name, "has invalid descriptor")
    })?;
    let modifiable_count = locals.iter().filter(|l| l.modifiable).count();
    let array_param = if modifiable_count > 0 { 1 } else { 0 };
    let local_param_base = hook_params.parameters.len() - array_param - locals.len();
    let mut resolved = vec![];
    for (offset, local) in locals.iter().enumerate() {
        let param_type = &hook_params.parameters[local_param_base + offset];
        resolved.push(resolve_local(target_method, local, param_type, transformer_name)?);
    }

    let cancel_label = if cancellable && shape.has_callback {
        Some(target_method.code.as_mut().expect("has code").new_label())
    } else {
        None
    };

    let mut seq: Vec<Insn> = vec![];
    if capture_value {
        seq.push(Insn::Var {
            opcode: store_opcode(capture_type.as_ref().expect("checked")),
            var: return_var,
        });
    }
    if !shape.hook_static {
        seq.push(Insn::Var {
            opcode: ALOAD,
            var: 0,
        });
    }
    if shape.has_args {
        seq.extend(load_parameters(&target_desc, target_method.is_static()));
    }
    if shape.has_callback {
        seq.extend(create_callback(
            cancellable,
            capture_value,
            &capture_type,
            return_var,
            callback_var,
        ));
    }

    // locals, then the shared array as the trailing argument
    let mut post_execute: Vec<Insn> = vec![];
    for local in &resolved {
        seq.extend(local.load.iter().cloned());
    }
    if modifiable_count > 0 {
        seq.push(int_push(modifiable_count as i32));
        seq.push(Insn::Type {
            opcode: ANEWARRAY,
            class: String::from("java/lang/Object"),
        });
        seq.push(Insn::Simple { opcode: DUP });
        seq.push(Insn::Var {
            opcode: ASTORE,
            var: array_var,
        });

        let mut array_index = 0;
        for local in &resolved {
            if !local.modifiable {
                continue;
            }
            post_execute.push(Insn::Var {
                opcode: ALOAD,
                var: array_var,
            });
            post_execute.push(int_push(array_index));
            array_index += 1;
            post_execute.push(Insn::Simple { opcode: AALOAD });
            post_execute.extend(cast_to(&local.param_type));
            post_execute.push(Insn::Var {
                opcode: store_opcode(&local.param_type),
                var: local.slot,
            });
        }
    }

    let invoke_opcode = if shape.hook_static {
        INVOKESTATIC
    } else if target_is_interface {
        INVOKEINTERFACE
    } else {
        INVOKEVIRTUAL
    };
    seq.push(Insn::Method {
        opcode: invoke_opcode,
        owner: target_name.to_string(),
        name: hook_name.to_string(),
        desc: hook_desc.to_string(),
        interface: target_is_interface,
    });
    seq.extend(post_execute);

    if let Some(label) = cancel_label {
        // a cancelled call returns the callback's value as the method's
        // own return type
        seq.extend(cancel_check(&target_desc.return_type, callback_var, label));
    }
    if capture_value {
        seq.push(Insn::Var {
            opcode: load_opcode(capture_type.as_ref().expect("checked")),
            var: return_var,
        });
    }
    Ok(seq)
}

/// `new InjectionCallback(cancellable[, returnValue])`, stored and reloaded
/// as the hook's callback argument.
fn create_callback(
    cancellable: bool,
    capture_value: bool,
    return_type: &Option<FieldType>,
    return_var: u16,
    callback_var: u16,
) -> Vec<Insn> {
    let mut seq = vec![
        Insn::Type {
            opcode: NEW,
            class: runtime::CALLBACK.to_string(),
        },
        Insn::Simple { opcode: DUP },
        Insn::Simple {
            opcode: if cancellable { ICONST_1 } else { ICONST_0 },
        },
    ];
    if capture_value {
        let typ = return_type.as_ref().expect("capture implies a value");
        seq.push(Insn::Var {
            opcode: load_opcode(typ),
            var: return_var,
        });
        if let Some(boxing) = box_value(typ) {
            seq.push(boxing);
        }
        seq.push(Insn::Method {
            opcode: INVOKESPECIAL,
            owner: runtime::CALLBACK.to_string(),
            name: String::from("<init>"),
            desc: runtime::CALLBACK_INIT_BOOL_OBJECT.to_string(),
            interface: false,
        });
    } else {
        seq.push(Insn::Method {
            opcode: INVOKESPECIAL,
            owner: runtime::CALLBACK.to_string(),
            name: String::from("<init>"),
            desc: runtime::CALLBACK_INIT_BOOL.to_string(),
            interface: false,
        });
    }
    seq.push(Insn::Var {
        opcode: ASTORE,
        var: callback_var,
    });
    seq.push(Insn::Var {
        opcode: ALOAD,
        var: callback_var,
    });
    seq
}

/// `if (callback.isCancelled()) return callback.getReturnValue();`
fn cancel_check(return_type: &Option<FieldType>, callback_var: u16, jump: LabelId) -> Vec<Insn> {
    let mut seq = vec![
        Insn::Var {
            opcode: ALOAD,
            var: callback_var,
        },
        Insn::Method {
            opcode: INVOKEVIRTUAL,
            owner: runtime::CALLBACK.to_string(),
            name: runtime::CALLBACK_IS_CANCELLED.to_string(),
            desc: runtime::CALLBACK_IS_CANCELLED_DESC.to_string(),
            interface: false,
        },
        Insn::Jump {
            opcode: IFEQ,
            label: jump,
        },
    ];
    match return_type {
        Some(typ) => {
            seq.push(Insn::Var {
                opcode: ALOAD,
                var: callback_var,
            });
            seq.push(Insn::Method {
                opcode: INVOKEVIRTUAL,
                owner: runtime::CALLBACK.to_string(),
                name: runtime::CALLBACK_GET_RETURN_VALUE.to_string(),
                desc: runtime::CALLBACK_GET_RETURN_VALUE_DESC.to_string(),
                interface: false,
            });
            seq.extend(cast_to(typ));
            seq.push(Insn::Simple {
                opcode: crate::util::code::return_opcode(Some(typ)),
            });
        }
        _ => {
            seq.push(Insn::Simple { opcode: RETURN });
        }
    }
    seq.push(Insn::Label(jump));
    seq
}
