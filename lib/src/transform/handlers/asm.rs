//! Raw pre/post hooks around the directive handlers.

use crate::transform::annotations::{self, find_annotation};
use crate::transform::errors::TransformError;
use crate::transform::handlers::{AnnotationHandler, HandlerContext, HandlerOutcome};
use crate::tree::ClassNode;
use std::sync::Arc;

/// Which end of the handler chain a raw hook runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookShift {
    /// Before any member processing.
    Top,
    /// After the member copy.
    Bottom,
}

/// A host-registered callback receiving the mutable target class.
pub type AsmHook = Arc<dyn Fn(&mut ClassNode) + Send + Sync>;

/// Runs registered raw hooks, and strips `@Asm` methods from transformers
/// (their bodies are transform-time code, never meant to be copied).
pub struct AsmHandler {
    shift: HookShift,
}

impl AsmHandler {
    pub fn new(shift: HookShift) -> AsmHandler {
        AsmHandler { shift }
    }
}

impl AnnotationHandler for AsmHandler {
    fn name(&self) -> &'static str {
        match self.shift {
            HookShift::Top => "asm-top",
            HookShift::Bottom => "asm-bottom",
        }
    }

    fn transform(&self, ctx: &mut HandlerContext<'_>) -> Result<HandlerOutcome, TransformError> {
        // run once per transformation, not once per transformer
        let run_hooks = match self.shift {
            HookShift::Top => ctx.transformer_index == 0,
            HookShift::Bottom => ctx.transformer_index + 1 == ctx.transformer_count,
        };
        let mut applied = false;
        if run_hooks {
            for (shift, hook) in ctx.asm_hooks {
                if *shift == self.shift {
                    hook(ctx.target);
                    applied = true;
                }
            }
        }

        if self.shift == HookShift::Top {
            let transformer_name = ctx.transformer.name.clone();
            ctx.transformer.methods.retain(|method| {
                if find_annotation(&method.invisible_annotations, annotations::ASM).is_none() {
                    return true;
                }
                log::warn!(
                    "dropping @Asm method '{}' of transformer '{}': raw hooks must be \
                     registered on the manager instead",
                    method.name,
                    transformer_name
                );
                false
            });
        }
        Ok(if applied {
            HandlerOutcome::Applied
        } else {
            HandlerOutcome::Skipped
        })
    }
}
