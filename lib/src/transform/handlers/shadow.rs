//! `@Shadow`: references to existing target members without copying.

use crate::transform::annotations::{self, has_annotation};
use crate::transform::errors::TransformError;
use crate::transform::handlers::{AnnotationHandler, HandlerContext, HandlerOutcome};

/// A shadow member is a transformer-side prototype of a field or method
/// that already exists in the target. The prototype is verified against the
/// target and removed from the transformer; body references keep the
/// transformer as owner and resolve once the member copy pass rewrites
/// owners to the target class.
pub struct ShadowHandler;

impl AnnotationHandler for ShadowHandler {
    fn name(&self) -> &'static str {
        "shadow"
    }

    fn transform(&self, ctx: &mut HandlerContext<'_>) -> Result<HandlerOutcome, TransformError> {
        let transformer_name = ctx.transformer.name.clone();
        let mut applied = false;

        let mut index = 0;
        while index < ctx.transformer.fields.len() {
            let field = &ctx.transformer.fields[index];
            if !has_annotation(&field.invisible_annotations, annotations::SHADOW) {
                index += 1;
                continue;
            }
            let exists = ctx
                .target
                .fields
                .iter()
                .any(|f| f.name == field.name && f.desc == field.desc);
            if !exists {
                return Err(TransformError::shape(
                    &field.name,
                    &transformer_name,
                    format!(
                        "shadows field '{}:{}' which does not exist in target '{}'",
                        field.name, field.desc, ctx.target.name
                    ),
                )
                .with_help("match the name and descriptor of an existing target field"));
            }
            ctx.transformer.fields.remove(index);
            applied = true;
        }

        let mut index = 0;
        while index < ctx.transformer.methods.len() {
            let method = &ctx.transformer.methods[index];
            if !has_annotation(&method.invisible_annotations, annotations::SHADOW) {
                index += 1;
                continue;
            }
            if ctx.target.find_method(&method.name, &method.desc).is_none() {
                return Err(TransformError::shape(
                    &method.name,
                    &transformer_name,
                    format!(
                        "shadows method '{}{}' which does not exist in target '{}'",
                        method.name, method.desc, ctx.target.name
                    ),
                )
                .with_help("match the name and descriptor of an existing target method"));
            }
            ctx.transformer.methods.remove(index);
            applied = true;
        }

        Ok(if applied {
            HandlerOutcome::Applied
        } else {
            HandlerOutcome::Skipped
        })
    }
}
