//! `@WrapCatch`: wraps a region of the target method in a try/catch whose
//! handler calls the transformer method with the caught throwable.

use crate::transform::annotations::{self, find_annotation, parse_wrap_catch};
use crate::transform::errors::TransformError;
use crate::transform::handlers::{
    rename_and_copy, resolve_target_methods, AnnotationHandler, HandlerContext, HandlerOutcome,
};
use crate::tree::insn::Insn;
use crate::tree::opcodes::*;
use crate::tree::{ClassNode, TryCatchNode};
use crate::util::code::return_opcode;
use crate::util::descriptors::{Descriptor, FieldType, MethodDescriptor};
use crate::util::MemberDeclaration;

pub struct WrapCatchHandler;

impl AnnotationHandler for WrapCatchHandler {
    fn name(&self) -> &'static str {
        "wrap-catch"
    }

    fn transform(&self, ctx: &mut HandlerContext<'_>) -> Result<HandlerOutcome, TransformError> {
        let transformer_name = ctx.transformer.name.clone();
        let mut applied = false;

        loop {
            let Some(index) = ctx.transformer.methods.iter().position(|m| {
                find_annotation(&m.invisible_annotations, annotations::WRAP_CATCH).is_some()
            }) else {
                break;
            };
            let annotation = find_annotation(
                &ctx.transformer.methods[index].invisible_annotations,
                annotations::WRAP_CATCH,
            )
            .expect("position checked the annotation");
            let decl = parse_wrap_catch(annotation);

            let hook = &ctx.transformer.methods[index];
            let hook_name_raw = hook.name.clone();
            let hook_static = hook.is_static();
            let hook_desc = MethodDescriptor::parse(&hook.desc)
                .map_err(|_| {
                    TransformError::shape(&hook_name_raw, &transformer_name, "has invalid descriptor")
                })?;
            let exception_type = match hook_desc.parameters.as_slice() {
                [FieldType::Object(name)] => name.clone(),
                _ => {
                    return Err(TransformError::shape(
                        &hook_name_raw,
                        &transformer_name,
                        "must take exactly one throwable argument",
                    )
                    .with_help("e.g. static String handler(Throwable t)"));
                }
            };

            let method_indices = resolve_target_methods(ctx.target, &decl.methods);
            if method_indices.is_empty() {
                return Err(TransformError::shape(
                    &hook_name_raw,
                    &transformer_name,
                    format!("could not find target method in '{}'", ctx.target.name),
                ));
            }

            let (hook_name, hook_call_desc) =
                rename_and_copy(ctx.target, ctx.transformer, index, annotations::WRAP_CATCH);

            for method_index in method_indices {
                match &decl.target {
                    None => wrap_whole_method(
                        ctx.target,
                        method_index,
                        &hook_name,
                        &hook_call_desc,
                        hook_static,
                        &hook_desc,
                        &exception_type,
                        &transformer_name,
                    )?,
                    Some(target) => wrap_invocation(
                        ctx.target,
                        method_index,
                        target,
                        &hook_name,
                        &hook_call_desc,
                        hook_static,
                        &hook_desc,
                        &exception_type,
                        &transformer_name,
                    )?,
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

#[allow(clippy::too_many_arguments)]
fn wrap_whole_method(
    target: &mut ClassNode,
    method_index: usize,
    hook_name: &str,
    hook_call_desc: &str,
    hook_static: bool,
    hook_desc: &MethodDescriptor,
    exception_type: &str,
    transformer_name: &str,
) -> Result<(), TransformError> {
    let target_is_interface = target.is_interface();
    let target_name = target.name.clone();
    let method = &mut target.methods[method_index];
    let method_desc = MethodDescriptor::parse(&method.desc).map_err(|_| {
        TransformError::shape(&method.name, transformer_name, "has invalid descriptor")
    })?;
    if hook_desc.return_type != method_desc.return_type {
        return Err(TransformError::shape(
            hook_name,
            transformer_name,
            "must have the same return type as the wrapped method",
        )
        .with_help("match the target method's return type"));
    }
    if !hook_static && method.is_static() {
        return Err(TransformError::shape(
            hook_name,
            transformer_name,
            "must be static to wrap a static method",
        ));
    }
    let Some(body) = method.code.as_mut() else {
        return Err(TransformError::shape(
            &method.name,
            transformer_name,
            "wraps a method without code",
        ));
    };

    let start = body.new_label();
    let end = body.new_label();
    let handler = body.new_label();

    body.insns.insert_before(0, vec![Insn::Label(start)]);
    let mut tail = vec![Insn::Label(end), Insn::Label(handler)];
    tail.extend(call_with_interface(
        &target_name,
        target_is_interface,
        hook_name,
        hook_call_desc,
        hook_static,
    ));
    tail.push(Insn::Simple {
        opcode: return_opcode(method_desc.return_type.as_ref()),
    });
    body.insns.extend(tail);

    body.try_catch_blocks.push(TryCatchNode {
        start,
        end,
        handler,
        catch_type: Some(exception_type.to_string()),
    });
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn wrap_invocation(
    target: &mut ClassNode,
    method_index: usize,
    invocation: &str,
    hook_name: &str,
    hook_call_desc: &str,
    hook_static: bool,
    hook_desc: &MethodDescriptor,
    exception_type: &str,
    transformer_name: &str,
) -> Result<(), TransformError> {
    let Some(declaration) = MemberDeclaration::parse(invocation) else {
        return Err(TransformError::InvalidTarget {
            method: hook_name.to_string(),
            transformer: transformer_name.to_string(),
            target: invocation.to_string(),
            help: String::from("e.g. Ljava/lang/String;toString()Ljava/lang/String;"),
        });
    };
    let wrapped_return = MethodDescriptor::parse(&declaration.desc)
        .ok()
        .and_then(|d| d.return_type);
    if hook_desc.return_type != wrapped_return {
        return Err(TransformError::shape(
            hook_name,
            transformer_name,
            "must have the same return type as the wrapped invocation",
        ));
    }

    let target_is_interface = target.is_interface();
    let target_name = target.name.clone();
    let method = &mut target.methods[method_index];
    let method_static = method.is_static();
    if !hook_static && method_static {
        return Err(TransformError::shape(
            hook_name,
            transformer_name,
            "must be static to wrap an invocation in a static method",
        ));
    }
    let Some(body) = method.code.as_mut() else {
        return Ok(());
    };

    let anchors: Vec<usize> = body
        .insns
        .iter()
        .enumerate()
        .filter(|(_, insn)| declaration.matches(insn))
        .map(|(i, _)| i)
        .collect();

    for anchor in anchors.into_iter().rev() {
        let start = body.new_label();
        let end = body.new_label();
        let handler = body.new_label();
        let after = body.new_label();

        let mut tail = vec![
            Insn::Label(end),
            Insn::Jump {
                opcode: GOTO,
                label: after,
            },
            Insn::Label(handler),
        ];
        tail.extend(call_with_interface(
            &target_name,
            target_is_interface,
            hook_name,
            hook_call_desc,
            hook_static,
        ));
        tail.push(Insn::Label(after));

        body.insns.insert_after(anchor, tail);
        body.insns.insert_before(anchor, vec![Insn::Label(start)]);

        body.try_catch_blocks.push(TryCatchNode {
            start,
            end,
            handler,
            catch_type: Some(exception_type.to_string()),
        });
    }
    Ok(())
}

fn call_with_interface(
    target_name: &str,
    target_is_interface: bool,
    hook_name: &str,
    hook_call_desc: &str,
    hook_static: bool,
) -> Vec<Insn> {
    let mut insns = vec![];
    if !hook_static {
        insns.push(Insn::Var {
            opcode: ALOAD,
            var: 0,
        });
        insns.push(Insn::Simple { opcode: SWAP });
    }
    let opcode = if hook_static {
        INVOKESTATIC
    } else if target_is_interface {
        INVOKEINTERFACE
    } else {
        INVOKEVIRTUAL
    };
    insns.push(Insn::Method {
        opcode,
        owner: target_name.to_string(),
        name: hook_name.to_string(),
        desc: hook_call_desc.to_string(),
        interface: target_is_interface,
    });
    insns
}
