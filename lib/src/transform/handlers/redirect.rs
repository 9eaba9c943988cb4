//! `@Redirect`: replaces field accesses, invocations and allocations with
//! calls to a transformer method.

use crate::transform::annotations::{self, find_annotation, parse_redirect};
use crate::transform::errors::TransformError;
use crate::transform::handlers::{
    rename_and_copy, resolve_target_methods, AnnotationHandler, HandlerContext, HandlerOutcome,
};
use crate::transform::targets::Resolution;
use crate::tree::insn::Insn;
use crate::tree::opcodes::*;
use crate::tree::MethodNode;
use crate::util::code::{free_var_index, load_opcode, store_opcode};
use crate::util::descriptors::{Descriptor, FieldType, MethodDescriptor, Width};

pub struct RedirectHandler;

impl AnnotationHandler for RedirectHandler {
    fn name(&self) -> &'static str {
        "redirect"
    }

    fn transform(&self, ctx: &mut HandlerContext<'_>) -> Result<HandlerOutcome, TransformError> {
        let transformer_name = ctx.transformer.name.clone();
        let mut applied = false;

        loop {
            let Some(index) = ctx.transformer.methods.iter().position(|m| {
                find_annotation(&m.invisible_annotations, annotations::REDIRECT).is_some()
            }) else {
                break;
            };
            let annotation = find_annotation(
                &ctx.transformer.methods[index].invisible_annotations,
                annotations::REDIRECT,
            )
            .expect("position checked the annotation");
            let decl = parse_redirect(annotation);
            let hook_raw_name = ctx.transformer.methods[index].name.clone();
            let hook_static = ctx.transformer.methods[index].is_static();

            let Some(target_decl) = decl.target.clone() else {
                return Err(TransformError::shape(
                    &hook_raw_name,
                    &transformer_name,
                    "is missing the redirect target",
                )
                .with_help("e.g. @Target(value = \"INVOKE\", target = \"La/B;f()V\")"));
            };
            let method_indices = resolve_target_methods(ctx.target, &decl.methods);
            if method_indices.is_empty() {
                return Err(TransformError::shape(
                    &hook_raw_name,
                    &transformer_name,
                    format!("could not find target method in '{}'", ctx.target.name),
                ));
            }

            let (hook_name, hook_desc) =
                rename_and_copy(ctx.target, ctx.transformer, index, annotations::REDIRECT);
            let hook_sig = MethodDescriptor::parse(&hook_desc).map_err(|_| {
                TransformError::shape(&hook_raw_name, &transformer_name, "has invalid descriptor")
            })?;

            for &method_index in &method_indices {
                let resolution = {
                    let method = &ctx.target.methods[method_index];
                    ctx.targets.resolve(method, &target_decl, decl.slice.as_ref())
                };
                let (anchors, _) = match resolution {
                    Resolution::UnknownKind | Resolution::Invalid => {
                        return Err(TransformError::InvalidTarget {
                            method: hook_raw_name.clone(),
                            transformer: transformer_name.clone(),
                            target: target_decl.target.clone(),
                            help: String::from(
                                "e.g. Ljava/lang/String;toString()V, \
                                 Ljava/lang/Integer;MAX_VALUE:I",
                            ),
                        });
                    }
                    Resolution::Anchors(anchors, shift) => (anchors, shift),
                };
                if anchors.is_empty() && !target_decl.optional {
                    return Err(TransformError::TargetNotFound {
                        method: hook_raw_name.clone(),
                        transformer: transformer_name.clone(),
                        target: target_decl.target.clone(),
                        help: String::from(
                            "e.g. Ljava/lang/String;toString()V, Ljava/lang/Integer;MAX_VALUE:I",
                        ),
                    });
                }

                let call = HookCall {
                    owner: ctx.target.name.clone(),
                    interface: ctx.target.is_interface(),
                    name: hook_name.clone(),
                    desc: hook_desc.clone(),
                    sig: hook_sig.clone(),
                    is_static: hook_static,
                    raw_name: hook_raw_name.clone(),
                    transformer: transformer_name.clone(),
                };
                let method = &mut ctx.target.methods[method_index];
                if !call.is_static && method.is_static() {
                    return Err(TransformError::shape(
                        &call.raw_name,
                        &call.transformer,
                        "must be static to redirect inside a static method",
                    ));
                }
                for &anchor in anchors.iter().rev() {
                    redirect_anchor(method, anchor, &call)?;
                }
            }
            applied = true;
        }

        Ok(if applied {
            HandlerOutcome::Applied
        } else {
            HandlerOutcome::Skipped
        })
    }
}

/// Everything needed to emit a call to the copied hook method.
struct HookCall {
    owner: String,
    interface: bool,
    name: String,
    desc: String,
    sig: MethodDescriptor,
    is_static: bool,
    raw_name: String,
    transformer: String,
}

impl HookCall {
    fn invoke(&self) -> Insn {
        let opcode = if self.is_static {
            INVOKESTATIC
        } else if self.interface {
            INVOKEINTERFACE
        } else {
            INVOKEVIRTUAL
        };
        Insn::Method {
            opcode,
            owner: self.owner.clone(),
            name: self.name.clone(),
            desc: self.desc.clone(),
            interface: self.interface,
        }
    }

    fn shape_error(&self, message: impl Into<String>) -> TransformError {
        TransformError::shape(&self.raw_name, &self.transformer, message)
    }
}

fn redirect_anchor(
    method: &mut MethodNode,
    anchor: usize,
    call: &HookCall,
) -> Result<(), TransformError> {
    let insn = method
        .code
        .as_ref()
        .and_then(|body| body.insns.get(anchor))
        .cloned();
    match insn {
        Some(Insn::Field {
            opcode,
            owner,
            desc,
            ..
        }) if opcode == GETFIELD || opcode == GETSTATIC => {
            redirect_get_field(method, anchor, call, &owner, &desc, opcode == GETSTATIC)
        }
        Some(Insn::Field {
            opcode,
            owner,
            desc,
            ..
        }) if opcode == PUTFIELD || opcode == PUTSTATIC => {
            redirect_put_field(method, anchor, call, &owner, &desc, opcode == PUTSTATIC)
        }
        Some(Insn::Method { opcode, desc, .. }) => {
            redirect_invoke(method, anchor, call, &desc, opcode == INVOKESTATIC)
        }
        Some(Insn::Type { opcode, class }) if opcode == NEW => {
            redirect_new(method, anchor, call, &class)
        }
        Some(Insn::InvokeDynamic { .. }) => {
            Err(call.shape_error("cannot redirect an invokedynamic call site"))
        }
        _ => Err(call.shape_error("resolved to an instruction that cannot be redirected")),
    }
}

fn redirect_get_field(
    method: &mut MethodNode,
    anchor: usize,
    call: &HookCall,
    field_owner: &str,
    field_desc: &str,
    is_static_field: bool,
) -> Result<(), TransformError> {
    let field_type = FieldType::parse(field_desc)
        .map_err(|_| call.shape_error("redirects a field with an invalid descriptor"))?;
    if call.sig.return_type.as_ref() != Some(&field_type) {
        return Err(call
            .shape_error("must have the same return type as the redirected field")
            .with_help(format!("change the return type to {}", field_desc)));
    }
    let expected: Vec<FieldType> = if is_static_field {
        vec![]
    } else {
        vec![FieldType::object(field_owner)]
    };
    if call.sig.parameters != expected {
        return Err(call
            .shape_error(if is_static_field {
                "must take no arguments to redirect a static field read"
            } else {
                "must take the field owner as its only argument"
            })
            .with_help("match the field access being redirected"));
    }

    let body = method.code.as_mut().expect("anchor implies code");
    if !call.is_static {
        let mut prefix = vec![Insn::Var {
            opcode: ALOAD,
            var: 0,
        }];
        if !is_static_field {
            // bring the receiver above `this` for the virtual call
            prefix.push(Insn::Simple { opcode: SWAP });
        }
        body.insns.insert_before(anchor, prefix);
        body.insns.replace(anchor + if is_static_field { 1 } else { 2 }, call.invoke());
    } else {
        body.insns.replace(anchor, call.invoke());
    }
    Ok(())
}

fn redirect_put_field(
    method: &mut MethodNode,
    anchor: usize,
    call: &HookCall,
    field_owner: &str,
    field_desc: &str,
    is_static_field: bool,
) -> Result<(), TransformError> {
    let field_type = FieldType::parse(field_desc)
        .map_err(|_| call.shape_error("redirects a field with an invalid descriptor"))?;
    if call.sig.return_type.is_some() {
        return Err(call
            .shape_error("must be a void method to redirect a field write")
            .with_help("change the return type to void"));
    }
    let owner_type = FieldType::object(field_owner);
    let expected: Vec<FieldType> = if is_static_field {
        vec![field_type.clone()]
    } else {
        vec![owner_type.clone(), field_type.clone()]
    };
    if call.sig.parameters != expected {
        return Err(call
            .shape_error(if is_static_field {
                "must take the written value as its only argument"
            } else {
                "must take the field owner and the written value as arguments"
            })
            .with_help("match the field access being redirected"));
    }

    let owner_store = free_var_index(method);
    let value_store = owner_store + 1;
    let body = method.code.as_mut().expect("anchor implies code");

    let mut prefix = vec![Insn::Var {
        opcode: store_opcode(&field_type),
        var: value_store,
    }];
    if !is_static_field {
        prefix.push(Insn::Var {
            opcode: store_opcode(&owner_type),
            var: owner_store,
        });
    }
    if !call.is_static {
        prefix.push(Insn::Var {
            opcode: ALOAD,
            var: 0,
        });
    }
    if !is_static_field {
        prefix.push(Insn::Var {
            opcode: load_opcode(&owner_type),
            var: owner_store,
        });
    }
    prefix.push(Insn::Var {
        opcode: load_opcode(&field_type),
        var: value_store,
    });

    let offset = prefix.len();
    body.insns.insert_before(anchor, prefix);
    body.insns.replace(anchor + offset, call.invoke());
    Ok(())
}

fn redirect_invoke(
    method: &mut MethodNode,
    anchor: usize,
    call: &HookCall,
    invoke_desc: &str,
    is_static_invoke: bool,
) -> Result<(), TransformError> {
    let (owner, invoked) = {
        let body = method.code.as_ref().expect("anchor implies code");
        match body.insns.get(anchor) {
            Some(Insn::Method { owner, .. }) => (
                owner.clone(),
                MethodDescriptor::parse(invoke_desc).map_err(|_| {
                    call.shape_error("redirects an invocation with an invalid descriptor")
                })?,
            ),
            _ => return Err(call.shape_error("anchor is not an invocation")),
        }
    };
    let mut expected = vec![];
    if !is_static_invoke {
        expected.push(FieldType::object(&owner));
    }
    expected.extend(invoked.parameters.iter().cloned());
    if call.sig.parameters != expected {
        return Err(call
            .shape_error(
                "must take the redirected invocation's receiver and arguments as parameters",
            )
            .with_help("prepend the receiver type for instance invocations"));
    }
    if call.sig.return_type != invoked.return_type {
        return Err(call
            .shape_error("must have the same return type as the redirected invocation"));
    }

    let free = free_var_index(method);
    let body = method.code.as_mut().expect("anchor implies code");
    if call.is_static {
        // the stack already matches the hook's signature
        body.insns.replace(anchor, call.invoke());
    } else {
        let sequence = store_reload(&expected, free);
        let offset = sequence.len();
        body.insns.insert_before(anchor, sequence);
        body.insns.replace(anchor + offset, call.invoke());
    }
    Ok(())
}

fn redirect_new(
    method: &mut MethodNode,
    anchor: usize,
    call: &HookCall,
    class: &str,
) -> Result<(), TransformError> {
    if call.sig.return_type != Some(FieldType::object(class)) {
        return Err(call
            .shape_error("must return the allocated type")
            .with_help(format!("change the return type to L{};", class)));
    }

    let body = method.code.as_ref().expect("anchor implies code");
    // the paired DUP and constructor call form an atomic region
    let dup = (anchor + 1..body.insns.len())
        .find(|i| !body.insns.get(*i).map(Insn::is_pseudo).unwrap_or(false));
    let Some(dup) = dup.filter(|i| {
        matches!(body.insns.get(*i), Some(Insn::Simple { opcode: DUP }))
    }) else {
        return Err(call.shape_error("redirected allocation has no paired DUP"));
    };

    let mut depth = 0usize;
    let mut init_at = None;
    for i in dup + 1..body.insns.len() {
        match body.insns.get(i) {
            Some(Insn::Type { opcode, class: c }) if *opcode == NEW && c == class => depth += 1,
            Some(Insn::Method {
                opcode,
                owner,
                name,
                ..
            }) if *opcode == INVOKESPECIAL && owner == class && name == "<init>" => {
                if depth == 0 {
                    init_at = Some(i);
                    break;
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    let Some(init_at) = init_at else {
        return Err(call.shape_error("redirected allocation has no matching constructor call"));
    };
    let ctor_desc = match body.insns.get(init_at) {
        Some(Insn::Method { desc, .. }) => desc.clone(),
        _ => unreachable!("found above"),
    };
    let ctor = MethodDescriptor::parse(&ctor_desc)
        .map_err(|_| call.shape_error("constructor has an invalid descriptor"))?;
    if call.sig.parameters != ctor.parameters {
        return Err(call
            .shape_error("must take the constructor's arguments as parameters")
            .with_help(format!("match the arguments of {}<init>{}", class, ctor_desc)));
    }

    if call.is_static {
        let body = method.code.as_mut().expect("anchor implies code");
        body.insns.replace(init_at, call.invoke());
        body.insns.remove(dup);
        body.insns.remove(anchor);
    } else {
        let free = free_var_index(method);
        let body = method.code.as_mut().expect("anchor implies code");
        let sequence = store_reload(&ctor.parameters, free);
        let offset = sequence.len();
        body.insns.insert_before(init_at, sequence);
        body.insns.replace(init_at + offset, call.invoke());
        body.insns.remove(dup);
        body.insns.remove(anchor);
    }
    Ok(())
}

/// Store the values currently on the stack into fresh locals (right to
/// left), load `this`, then reload them in order. Used when an instance
/// hook needs its receiver below values already pushed.
fn store_reload(stack_types: &[FieldType], free: u16) -> Vec<Insn> {
    // assign slots left to right, store right to left
    let mut slots = vec![];
    let mut slot = free;
    for typ in stack_types {
        slots.push(slot);
        slot += typ.width() as u16;
    }
    let mut sequence = vec![];
    for (typ, slot) in stack_types.iter().zip(&slots).rev() {
        sequence.push(Insn::Var {
            opcode: store_opcode(typ),
            var: *slot,
        });
    }
    sequence.push(Insn::Var {
        opcode: ALOAD,
        var: 0,
    });
    for (typ, slot) in stack_types.iter().zip(&slots) {
        sequence.push(Insn::Var {
            opcode: load_opcode(typ),
            var: *slot,
        });
    }
    sequence
}
