use crate::transform::annotations::{Shift, TargetDecl};
use crate::transform::targets::InjectionTarget;
use crate::tree::opcodes::ATHROW;
use crate::tree::MethodNode;
use std::ops::Range;

/// `THROW`: every `ATHROW` in the method (or slice region).
pub struct ThrowTarget;

impl InjectionTarget for ThrowTarget {
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
                    body.insns.get(*i).and_then(|insn| insn.opcode()) == Some(ATHROW)
                })
                .collect(),
        )
    }

    fn shift(&self, _decl: &TargetDecl) -> Shift {
        Shift::Before
    }
}
