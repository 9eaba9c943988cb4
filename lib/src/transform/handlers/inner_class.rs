//! Opens access on inner classes referenced by the transformer.

use crate::transform::errors::TransformError;
use crate::transform::handlers::{AnnotationHandler, HandlerContext, HandlerOutcome};
use crate::tree::opcodes::{ACC_PRIVATE, ACC_PROTECTED, ACC_PUBLIC};

/// Copied transformer bodies may reference the transformer's private inner
/// classes. Their records are widened to public and merged into the target
/// so the references link; the inner class files themselves get the same
/// treatment when they are loaded (the manager registers an access opener
/// against each of them at registration time).
pub struct InnerClassHandler;

/// Strip `private`/`protected`, set `public`.
pub fn open_access(access: u16) -> u16 {
    (access & !(ACC_PRIVATE | ACC_PROTECTED)) | ACC_PUBLIC
}

impl AnnotationHandler for InnerClassHandler {
    fn name(&self) -> &'static str {
        "inner-class"
    }

    fn transform(&self, ctx: &mut HandlerContext<'_>) -> Result<HandlerOutcome, TransformError> {
        if ctx.transformer.inner_classes.is_empty() {
            return Ok(HandlerOutcome::Skipped);
        }
        for inner in &mut ctx.transformer.inner_classes {
            inner.access = open_access(inner.access);
        }
        for inner in &ctx.transformer.inner_classes {
            if !ctx.target.inner_classes.iter().any(|i| i.name == inner.name) {
                ctx.target.inner_classes.push(inner.clone());
            }
        }
        Ok(HandlerOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::opcodes::ACC_STATIC;

    #[test]
    fn access_opening_preserves_other_flags() {
        let access = ACC_PRIVATE | ACC_STATIC;
        assert_eq!(open_access(access), ACC_PUBLIC | ACC_STATIC);
    }
}
