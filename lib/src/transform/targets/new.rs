use crate::transform::annotations::TargetDecl;
use crate::transform::targets::InjectionTarget;
use crate::tree::insn::Insn;
use crate::tree::opcodes::NEW;
use crate::tree::MethodNode;
use std::ops::Range;

/// `NEW`: every allocation of one class. The argument is `Lowner;` or a
/// bare internal name.
pub struct NewTarget;

impl InjectionTarget for NewTarget {
    fn targets(
        &self,
        method: &MethodNode,
        decl: &TargetDecl,
        range: &Range<usize>,
    ) -> Option<Vec<usize>> {
        let name = decl
            .target
            .strip_prefix('L')
            .and_then(|s| s.strip_suffix(';'))
            .unwrap_or(&decl.target);
        if name.is_empty() {
            return None;
        }
        let body = method.code.as_ref()?;
        Some(
            range
                .clone()
                .filter(|i| match body.insns.get(*i) {
                    Some(Insn::Type { opcode, class }) => *opcode == NEW && class == name,
                    _ => false,
                })
                .collect(),
        )
    }
}
