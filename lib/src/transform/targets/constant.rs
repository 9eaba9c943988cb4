use crate::transform::annotations::TargetDecl;
use crate::transform::targets::{matches_constant, parse_constant_arg, InjectionTarget};
use crate::tree::MethodNode;
use std::ops::Range;

/// `CONSTANT`: every load of one constant value. The argument is parsed
/// as `null`, int, long (`L` suffix), float (`F`), double (`D` or a
/// decimal point) or a string literal.
pub struct ConstantTarget;

impl InjectionTarget for ConstantTarget {
    fn targets(
        &self,
        method: &MethodNode,
        decl: &TargetDecl,
        range: &Range<usize>,
    ) -> Option<Vec<usize>> {
        let constant = parse_constant_arg(&decl.target)?;
        let body = method.code.as_ref()?;
        Some(
            range
                .clone()
                .filter(|i| {
                    body.insns
                        .get(*i)
                        .map(|insn| matches_constant(insn, &constant))
                        .unwrap_or(false)
                })
                .collect(),
        )
    }
}
