use crate::transform::annotations::{Shift, TargetDecl};
use crate::transform::targets::InjectionTarget;
use crate::tree::opcodes::is_return;
use crate::tree::MethodNode;
use std::ops::Range;

/// `RETURN`: every return instruction in the method (or slice region).
pub struct ReturnTarget;

impl InjectionTarget for ReturnTarget {
    fn targets(
        &self,
        method: &MethodNode,
        _decl: &TargetDecl,
        range: &Range<usize>,
    ) -> Option<Vec<usize>> {
        let body = method.code.as_ref()?;
        Some(
            range
                .clone()
                .filter(|i| {
                    body.insns
                        .get(*i)
                        .and_then(|insn| insn.opcode())
                        .map(is_return)
                        .unwrap_or(false)
                })
                .collect(),
        )
    }

    fn shift(&self, _decl: &TargetDecl) -> Shift {
        // code after a return would be unreachable
        Shift::Before
    }
}
