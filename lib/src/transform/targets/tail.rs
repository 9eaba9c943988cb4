use crate::transform::annotations::{Shift, TargetDecl};
use crate::transform::targets::InjectionTarget;
use crate::tree::opcodes::is_return;
use crate::tree::MethodNode;
use std::ops::Range;

/// `TAIL`: the last return instruction in program order.
pub struct TailTarget;

impl InjectionTarget for TailTarget {
    fn targets(
        &self,
        method: &MethodNode,
        _decl: &TargetDecl,
        range: &Range<usize>,
    ) -> Option<Vec<usize>> {
        let body = method.code.as_ref()?;
        let last = range.clone().rev().find(|i| {
            body.insns
                .get(*i)
                .and_then(|insn| insn.opcode())
                .map(is_return)
                .unwrap_or(false)
        });
        Some(last.into_iter().collect())
    }

    fn shift(&self, _decl: &TargetDecl) -> Shift {
        Shift::Before
    }
}
