use crate::transform::annotations::TargetDecl;
use crate::transform::targets::InjectionTarget;
use crate::tree::insn::Insn;
use crate::tree::MethodNode;
use crate::util::MemberDeclaration;
use std::ops::Range;

/// `FIELD`/`GETFIELD`/`PUTFIELD`: field accesses of one exact declaration.
///
/// The unrestricted form matches all four access opcodes; the specialized
/// forms are limited to the pair given at construction.
pub struct FieldTarget {
    allowed: Option<(u8, u8)>,
}

impl FieldTarget {
    pub fn any() -> FieldTarget {
        FieldTarget { allowed: None }
    }

    pub fn restricted(first: u8, second: u8) -> FieldTarget {
        FieldTarget {
            allowed: Some((first, second)),
        }
    }
}

impl InjectionTarget for FieldTarget {
    fn targets(
        &self,
        method: &MethodNode,
        decl: &TargetDecl,
        range: &Range<usize>,
    ) -> Option<Vec<usize>> {
        let declaration = MemberDeclaration::parse(&decl.target)?;
        if !declaration.is_field() {
            return None;
        }
        let body = method.code.as_ref()?;
        Some(
            range
                .clone()
                .filter(|i| match body.insns.get(*i) {
                    Some(insn @ Insn::Field { opcode, .. }) => {
                        let opcode_ok = match self.allowed {
                            Some((first, second)) => *opcode == first || *opcode == second,
                            None => true,
                        };
                        opcode_ok && declaration.matches(insn)
                    }
                    _ => false,
                })
                .collect(),
        )
    }
}
