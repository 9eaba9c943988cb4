//! `@Override`: replaces a target method, keeping the original reachable.

use crate::transform::annotations::{self, find_annotation, parse_override, take_annotation};
use crate::transform::errors::TransformError;
use crate::transform::handlers::{
    check_static_parity, unique_method_name, AnnotationHandler, HandlerContext, HandlerOutcome,
};
use crate::tree::insn::Insn;
use crate::tree::opcodes::{ACC_PRIVATE, ACC_SYNTHETIC, INVOKESPECIAL, INVOKESTATIC};
use crate::util::code::rewrite_owner;

/// The overridden target method is renamed to a private synthetic alias so
/// the replacement can still call it; self-calls to the original name in
/// the replacement body are redirected to the alias.
pub struct OverrideHandler;

impl AnnotationHandler for OverrideHandler {
    fn name(&self) -> &'static str {
        "override"
    }

    fn transform(&self, ctx: &mut HandlerContext<'_>) -> Result<HandlerOutcome, TransformError> {
        let transformer_name = ctx.transformer.name.clone();
        let mut applied = false;

        loop {
            let Some(index) = ctx.transformer.methods.iter().position(|m| {
                find_annotation(&m.invisible_annotations, annotations::OVERRIDE).is_some()
            }) else {
                break;
            };
            let annotation =
                find_annotation(
                    &ctx.transformer.methods[index].invisible_annotations,
                    annotations::OVERRIDE,
                )
                .expect("position checked the annotation");
            let decl = parse_override(annotation);

            let mut replacement = ctx.transformer.methods.remove(index);
            take_annotation(&mut replacement.invisible_annotations, annotations::OVERRIDE);
            let target_name = decl.method.unwrap_or_else(|| replacement.name.clone());

            let Some(original_index) = ctx
                .target
                .methods
                .iter()
                .position(|m| m.name == target_name && m.desc == replacement.desc)
            else {
                return Err(TransformError::shape(
                    &replacement.name,
                    &transformer_name,
                    format!(
                        "overrides '{}{}' which does not exist in target '{}'",
                        target_name, replacement.desc, ctx.target.name
                    ),
                )
                .with_help("match the name and descriptor of an existing target method"));
            };
            check_static_parity(
                &ctx.target.methods[original_index],
                &replacement,
                &transformer_name,
            )?;

            let alias = unique_method_name(ctx.target, &target_name, "original");
            {
                let original = &mut ctx.target.methods[original_index];
                original.name = alias.clone();
                original.access = (original.access & !crate::tree::opcodes::ACC_PROTECTED
                    & !crate::tree::opcodes::ACC_PUBLIC)
                    | ACC_PRIVATE
                    | ACC_SYNTHETIC;
            }

            replacement.name = target_name.clone();
            let replacement_desc = replacement.desc.clone();
            if let Some(body) = &mut replacement.code {
                rewrite_owner(body, &transformer_name, &ctx.target.name);
                // self-calls to the overridden method become calls to the
                // preserved original (the "super call" channel)
                for insn in body.insns.iter_mut() {
                    if let Insn::Method {
                        opcode,
                        owner,
                        name,
                        desc,
                        ..
                    } = insn
                    {
                        if owner == &ctx.target.name
                            && name == &target_name
                            && desc == &replacement_desc
                            && (*opcode == INVOKESPECIAL
                                || *opcode == INVOKESTATIC
                                || *opcode == crate::tree::opcodes::INVOKEVIRTUAL)
                        {
                            *name = alias.clone();
                        }
                    }
                }
            }
            ctx.target.methods.push(replacement);
            applied = true;
        }

        Ok(if applied {
            HandlerOutcome::Applied
        } else {
            HandlerOutcome::Skipped
        })
    }
}
