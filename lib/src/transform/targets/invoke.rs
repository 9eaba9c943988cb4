use crate::transform::annotations::TargetDecl;
use crate::transform::targets::InjectionTarget;
use crate::tree::insn::Insn;
use crate::tree::opcodes::{INVOKEINTERFACE, INVOKEVIRTUAL};
use crate::tree::MethodNode;
use crate::util::MemberDeclaration;
use std::ops::Range;

/// `INVOKE`: every invocation of one exact `(owner, name, desc)` triple.
///
/// `invokedynamic` call sites never match; they have no owner.
pub struct InvokeTarget;

impl InjectionTarget for InvokeTarget {
    fn targets(
        &self,
        method: &MethodNode,
        decl: &TargetDecl,
        range: &Range<usize>,
    ) -> Option<Vec<usize>> {
        let declaration = MemberDeclaration::parse(&decl.target)?;
        if declaration.is_field() {
            return None;
        }
        let body = method.code.as_ref()?;
        Some(
            range
                .clone()
                .filter(|i| match body.insns.get(*i) {
                    Some(insn @ Insn::Method { opcode, .. }) => {
                        (INVOKEVIRTUAL..=INVOKEINTERFACE).contains(opcode)
                            && declaration.matches(insn)
                    }
                    _ => false,
                })
                .collect(),
        )
    }
}
