//! The annotation handler chain.
//!
//! Each handler is a stateless unit run over one (target, transformer) pair;
//! the manager composes them in a fixed order with user handlers slotted in
//! through [`HandlerPosition`]. Handlers mutate the target class in place
//! and strip whatever they consumed from the transformer clone, so the
//! member copy pass at the end of the chain only sees leftovers.

mod asm;
mod inject;
mod inline;
mod inner_class;
mod member_copy;
mod modify_constant;
mod overrides;
mod redirect;
mod shadow;
mod synthetic;
mod upgrade;
mod wrap_catch;

pub use asm::{AsmHandler, AsmHook, HookShift};
pub use inject::InjectHandler;
pub use inline::InlineHandler;
pub use inner_class::{open_access, InnerClassHandler};
pub use member_copy::MemberCopyHandler;
pub use modify_constant::ModifyConstantHandler;
pub use overrides::OverrideHandler;
pub use redirect::RedirectHandler;
pub use shadow::ShadowHandler;
pub use synthetic::SyntheticRenameHandler;
pub use upgrade::UpgradeHandler;
pub use wrap_catch::WrapCatchHandler;

use crate::provider::ClassProvider;
use crate::transform::annotations::take_annotation;
use crate::transform::errors::TransformError;
use crate::transform::targets::TargetRegistry;
use crate::tree::opcodes::ACC_SYNTHETIC;
use crate::tree::ClassNode;
use crate::util::code::rewrite_owner;

/// Everything one handler invocation may see and touch.
pub struct HandlerContext<'a> {
    pub targets: &'a TargetRegistry,
    pub provider: &'a dyn ClassProvider,
    /// The class being transformed.
    pub target: &'a mut ClassNode,
    /// Per-application clone of the registered transformer node.
    pub transformer: &'a mut ClassNode,
    /// Raw hooks registered against the target class.
    pub asm_hooks: &'a [(HookShift, AsmHook)],
    /// Position of the current transformer in this transformation.
    pub transformer_index: usize,
    pub transformer_count: usize,
}

/// What a handler did with the pair it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    Applied,
    /// Nothing in the transformer concerned this handler.
    Skipped,
}

pub trait AnnotationHandler: Send + Sync {
    /// Stable identity, used for chain insertion and log messages.
    fn name(&self) -> &'static str;

    fn transform(&self, ctx: &mut HandlerContext<'_>) -> Result<HandlerOutcome, TransformError>;
}

/// Insertion anchor for custom handlers; the built-in order itself cannot
/// be rearranged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerPosition {
    /// Before everything, even the raw pre-pass.
    Top,
    /// Before the directive handlers (right before shadow resolution).
    Pre,
    /// After the directive handlers (right before the member copy).
    Post,
    /// After everything.
    Bottom,
}

impl HandlerPosition {
    pub fn insert(
        &self,
        chain: &mut Vec<Box<dyn AnnotationHandler>>,
        handler: Box<dyn AnnotationHandler>,
    ) {
        let index = match self {
            HandlerPosition::Top => 0,
            HandlerPosition::Pre => chain
                .iter()
                .position(|h| h.name() == "shadow")
                .unwrap_or(0),
            HandlerPosition::Post => chain
                .iter()
                .position(|h| h.name() == "member-copy")
                .unwrap_or(chain.len()),
            HandlerPosition::Bottom => chain.len(),
        };
        chain.insert(index, handler);
    }
}

/// The built-in chain in its fixed pass order.
pub fn default_handlers() -> Vec<Box<dyn AnnotationHandler>> {
    vec![
        Box::new(AsmHandler::new(HookShift::Top)),
        Box::new(InnerClassHandler),
        Box::new(SyntheticRenameHandler),
        Box::new(ShadowHandler),
        Box::new(OverrideHandler),
        Box::new(WrapCatchHandler),
        Box::new(InjectHandler),
        Box::new(RedirectHandler),
        Box::new(ModifyConstantHandler),
        Box::new(InlineHandler),
        Box::new(UpgradeHandler),
        Box::new(MemberCopyHandler),
        Box::new(AsmHandler::new(HookShift::Bottom)),
    ]
}

// ---------------------------------------------------------------------------
// Shared helpers

/// Simple name of an internal class name (`a/b/C$D` to `C$D`).
pub(crate) fn simple_name(internal: &str) -> &str {
    internal.rsplit('/').next().unwrap_or(internal)
}

/// A method name not yet taken in `class`, derived from `base`.
pub(crate) fn unique_method_name(class: &ClassNode, base: &str, discriminator: &str) -> String {
    let mut candidate = format!("{}${}", base, discriminator);
    let mut counter = 0;
    while class.methods.iter().any(|m| m.name == candidate) {
        counter += 1;
        candidate = format!("{}${}{}", base, discriminator, counter);
    }
    candidate
}

/// Move a transformer method into the target class under a fresh synthetic
/// name, rewriting its self references. Returns the new `(name, desc)`.
///
/// This is the common step for every directive that ends in a call to the
/// transformer method: the body has to live in the target class so private
/// state stays reachable.
pub(crate) fn rename_and_copy(
    target: &mut ClassNode,
    transformer: &mut ClassNode,
    method_index: usize,
    strip_annotation: &str,
) -> (String, String) {
    let mut method = transformer.methods.remove(method_index);
    take_annotation(&mut method.invisible_annotations, strip_annotation);
    let new_name = unique_method_name(target, &method.name, simple_name(&transformer.name));
    method.name = new_name.clone();
    method.access |= ACC_SYNTHETIC;
    if let Some(body) = &mut method.code {
        rewrite_owner(body, &transformer.name, &target.name);
    }
    let desc = method.desc.clone();
    target.methods.push(method);
    (new_name, desc)
}

/// Indices of target methods matching any of the `name`/`name(desc)ret`
/// patterns, in declaration order without duplicates.
pub(crate) fn resolve_target_methods(target: &ClassNode, patterns: &[String]) -> Vec<usize> {
    let mut indices: Vec<usize> = vec![];
    for pattern in patterns {
        for index in target.methods_matching(pattern) {
            if !indices.contains(&index) {
                indices.push(index);
            }
        }
    }
    indices.sort_unstable();
    indices
}

/// Directive methods must match the target's staticness.
pub(crate) fn check_static_parity(
    target_method: &crate::tree::MethodNode,
    transformer_method: &crate::tree::MethodNode,
    transformer_name: &str,
) -> Result<(), TransformError> {
    if target_method.is_static() == transformer_method.is_static() {
        return Ok(());
    }
    let wanted = if target_method.is_static() {
        "must be static"
    } else {
        "must not be static"
    };
    Err(
        TransformError::shape(&transformer_method.name, transformer_name, wanted).with_help(
            if target_method.is_static() {
                "add the 'static' modifier to the transformer method"
            } else {
                "remove the 'static' modifier from the transformer method"
            },
        ),
    )
}
