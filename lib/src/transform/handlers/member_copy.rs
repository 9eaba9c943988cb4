//! Copies leftover transformer members into the target class.

use crate::transform::annotations::{self, take_annotation};
use crate::transform::errors::TransformError;
use crate::transform::handlers::{AnnotationHandler, HandlerContext, HandlerOutcome};
use crate::util::code::rewrite_owner;

/// Runs after every directive handler has consumed its members; whatever is
/// still on the transformer clone (helper methods, state fields) is copied
/// with its owner references rewritten to the target. Constructors and
/// static initializers are not merged.
pub struct MemberCopyHandler;

impl AnnotationHandler for MemberCopyHandler {
    fn name(&self) -> &'static str {
        "member-copy"
    }

    fn transform(&self, ctx: &mut HandlerContext<'_>) -> Result<HandlerOutcome, TransformError> {
        let transformer_name = ctx.transformer.name.clone();
        let mut applied = false;

        for field in ctx.transformer.fields.drain(..) {
            let mut field = field;
            take_annotation(&mut field.invisible_annotations, annotations::DUPLICATE);
            if let Some(existing) = ctx.target.find_field(&field.name) {
                if existing.desc == field.desc {
                    // same member declared by an earlier transformer; keep it
                    continue;
                }
                return Err(TransformError::shape(
                    &field.name,
                    &transformer_name,
                    format!(
                        "copies field '{}' which already exists in target '{}' with a \
                         different descriptor",
                        field.name, ctx.target.name
                    ),
                ));
            }
            ctx.target.fields.push(field);
            applied = true;
        }

        let methods: Vec<_> = ctx.transformer.methods.drain(..).collect();
        for mut method in methods {
            if method.name == "<init>" || method.name == "<clinit>" {
                continue;
            }
            take_annotation(&mut method.invisible_annotations, annotations::DUPLICATE);
            if ctx.target.find_method(&method.name, &method.desc).is_some() {
                return Err(TransformError::shape(
                    &method.name,
                    &transformer_name,
                    format!(
                        "copies method '{}{}' which already exists in target '{}'",
                        method.name, method.desc, ctx.target.name
                    ),
                )
                .with_help("use @Shadow to reference it or @Override to replace it"));
            }
            if let Some(body) = &mut method.code {
                rewrite_owner(body, &transformer_name, &ctx.target.name);
            }
            ctx.target.methods.push(method);
            applied = true;
        }

        Ok(if applied {
            HandlerOutcome::Applied
        } else {
            HandlerOutcome::Skipped
        })
    }
}
