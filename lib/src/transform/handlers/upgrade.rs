//! `@Upgrade`: wholesale body replacement of a target method.

use crate::transform::annotations::{self, find_annotation, parse_upgrade, take_annotation};
use crate::transform::errors::TransformError;
use crate::transform::handlers::{
    check_static_parity, AnnotationHandler, HandlerContext, HandlerOutcome,
};
use crate::util::code::rewrite_owner;

/// Unlike `@Override`, the original body is discarded; nothing remains to
/// call back into.
pub struct UpgradeHandler;

impl AnnotationHandler for UpgradeHandler {
    fn name(&self) -> &'static str {
        "upgrade"
    }

    fn transform(&self, ctx: &mut HandlerContext<'_>) -> Result<HandlerOutcome, TransformError> {
        let transformer_name = ctx.transformer.name.clone();
        let mut applied = false;

        loop {
            let Some(index) = ctx.transformer.methods.iter().position(|m| {
                find_annotation(&m.invisible_annotations, annotations::UPGRADE).is_some()
            }) else {
                break;
            };
            let annotation = find_annotation(
                &ctx.transformer.methods[index].invisible_annotations,
                annotations::UPGRADE,
            )
            .expect("position checked the annotation");
            let decl = parse_upgrade(annotation);

            let mut source = ctx.transformer.methods.remove(index);
            take_annotation(&mut source.invisible_annotations, annotations::UPGRADE);
            let target_name = decl.method.unwrap_or_else(|| source.name.clone());

            let Some(target_method) = ctx.target.find_method_mut(&target_name, &source.desc)
            else {
                return Err(TransformError::shape(
                    &source.name,
                    &transformer_name,
                    format!(
                        "upgrades '{}{}' which does not exist in target '{}'",
                        target_name, source.desc, ctx.target.name
                    ),
                )
                .with_help("match the name and descriptor of an existing target method"));
            };
            check_static_parity(target_method, &source, &transformer_name)?;

            let mut body = source.code;
            if let Some(body) = &mut body {
                rewrite_owner(body, &transformer_name, &ctx.target.name);
            }
            ctx.target
                .find_method_mut(&target_name, &source.desc)
                .expect("looked up above")
                .code = body;
            applied = true;
        }

        Ok(if applied {
            HandlerOutcome::Applied
        } else {
            HandlerOutcome::Skipped
        })
    }
}
