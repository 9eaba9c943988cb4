use crate::transform::annotations::{Shift, TargetDecl};
use crate::transform::targets::InjectionTarget;
use crate::tree::MethodNode;
use std::ops::Range;

/// `HEAD`: the first real instruction of the method (or slice region).
pub struct HeadTarget;

impl InjectionTarget for HeadTarget {
    fn targets(
        &self,
        method: &MethodNode,
        _decl: &TargetDecl,
        range: &Range<usize>,
    ) -> Option<Vec<usize>> {
        let body = method.code.as_ref()?;
        let anchor = range
            .clone()
            .find(|i| body.insns.get(*i).map(|insn| !insn.is_pseudo()).unwrap_or(false));
        Some(anchor.into_iter().collect())
    }

    fn shift(&self, _decl: &TargetDecl) -> Shift {
        // injected code always lands before the first instruction
        Shift::Before
    }
}
