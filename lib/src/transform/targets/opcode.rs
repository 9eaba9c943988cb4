use crate::transform::annotations::TargetDecl;
use crate::transform::targets::InjectionTarget;
use crate::tree::opcodes;
use crate::tree::MethodNode;
use std::ops::Range;

/// `OPCODE`: every instruction with the given opcode, numeric or mnemonic.
pub struct OpcodeTarget;

impl InjectionTarget for OpcodeTarget {
    fn targets(
        &self,
        method: &MethodNode,
        decl: &TargetDecl,
        range: &Range<usize>,
    ) -> Option<Vec<usize>> {
        let arg = decl.target.trim();
        let opcode = match arg.parse::<u8>() {
            Ok(value) => value,
            Err(_) => opcodes::by_name(arg)?,
        };
        let body = method.code.as_ref()?;
        Some(
            range
                .clone()
                .filter(|i| body.insns.get(*i).and_then(|insn| insn.opcode()) == Some(opcode))
                .collect(),
        )
    }
}
