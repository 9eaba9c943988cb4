//! Injection target resolution: from a symbolic `@Target` to anchor
//! instructions inside a target method.

mod constant;
mod field;
mod head;
mod invoke;
mod new;
mod opcode;
mod returns;
mod tail;
mod throw;

pub use constant::ConstantTarget;
pub use field::FieldTarget;
pub use head::HeadTarget;
pub use invoke::InvokeTarget;
pub use new::NewTarget;
pub use opcode::OpcodeTarget;
pub use returns::ReturnTarget;
pub use tail::TailTarget;
pub use throw::ThrowTarget;

use crate::transform::annotations::{ConstantDecl, Shift, SliceDecl, TargetDecl};
use crate::tree::insn::{ConstantValue, Insn};
use crate::tree::opcodes::*;
use crate::tree::MethodNode;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

/// One target kind: finds anchor instructions for a `@Target` declaration.
pub trait InjectionTarget: Send + Sync {
    /// Anchor indices inside `range` (instruction list indices, ascending).
    /// `None` means the declaration's argument string is invalid.
    fn targets(
        &self,
        method: &MethodNode,
        decl: &TargetDecl,
        range: &Range<usize>,
    ) -> Option<Vec<usize>>;

    /// Which side of the anchor generated code lands on.
    fn shift(&self, decl: &TargetDecl) -> Shift {
        decl.shift.unwrap_or(Shift::Before)
    }
}

/// Outcome of resolving one `@Target` against a method.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The target kind is not registered.
    UnknownKind,
    /// The argument string does not parse.
    Invalid,
    /// Anchors in ascending instruction order, plus the shift to apply.
    Anchors(Vec<usize>, Shift),
}

/// Name-keyed registry of target kinds; user extensible.
pub struct TargetRegistry {
    targets: HashMap<String, Arc<dyn InjectionTarget>>,
}

impl Default for TargetRegistry {
    fn default() -> Self {
        TargetRegistry::with_defaults()
    }
}

impl TargetRegistry {
    pub fn empty() -> TargetRegistry {
        TargetRegistry {
            targets: HashMap::new(),
        }
    }

    /// The built-in target kinds.
    pub fn with_defaults() -> TargetRegistry {
        let mut registry = TargetRegistry::empty();
        registry.register("HEAD", Arc::new(HeadTarget));
        registry.register("RETURN", Arc::new(ReturnTarget));
        registry.register("TAIL", Arc::new(TailTarget));
        registry.register("THROW", Arc::new(ThrowTarget));
        registry.register("INVOKE", Arc::new(InvokeTarget));
        registry.register("FIELD", Arc::new(FieldTarget::any()));
        registry.register(
            "GETFIELD",
            Arc::new(FieldTarget::restricted(GETFIELD, GETSTATIC)),
        );
        registry.register(
            "PUTFIELD",
            Arc::new(FieldTarget::restricted(PUTFIELD, PUTSTATIC)),
        );
        registry.register("NEW", Arc::new(NewTarget));
        registry.register("OPCODE", Arc::new(OpcodeTarget));
        registry.register("CONSTANT", Arc::new(ConstantTarget));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, target: Arc<dyn InjectionTarget>) {
        self.targets.insert(name.into().to_uppercase(), target);
    }

    pub fn known_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.targets.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Resolve a declaration against a method, applying slice and ordinal.
    pub fn resolve(
        &self,
        method: &MethodNode,
        decl: &TargetDecl,
        slice: Option<&SliceDecl>,
    ) -> Resolution {
        let Some(target) = self.targets.get(&decl.kind.to_uppercase()) else {
            return Resolution::UnknownKind;
        };
        let insn_count = method
            .code
            .as_ref()
            .map(|body| body.insns.len())
            .unwrap_or(0);
        let shift = target.shift(decl);
        let range = match slice {
            Some(slice) if !slice.is_empty() => match self.slice_range(method, slice, insn_count) {
                Some(range) => range,
                // a failed slice bound yields an empty anchor set
                None => return Resolution::Anchors(vec![], shift),
            },
            _ => 0..insn_count,
        };
        match target.targets(method, decl, &range) {
            None => Resolution::Invalid,
            Some(mut anchors) => {
                if decl.ordinal >= 0 {
                    anchors = match anchors.get(decl.ordinal as usize) {
                        Some(anchor) => vec![*anchor],
                        None => vec![],
                    };
                }
                Resolution::Anchors(anchors, shift)
            }
        }
    }

    /// Inclusive instruction range between the first `from` match and the
    /// last `to` match; `None` when either bound fails to resolve.
    pub(crate) fn slice_range(
        &self,
        method: &MethodNode,
        slice: &SliceDecl,
        insn_count: usize,
    ) -> Option<Range<usize>> {
        let full = 0..insn_count;
        let start = match &slice.from {
            Some(from) => {
                let target = self.targets.get(&from.kind.to_uppercase())?;
                *target.targets(method, from, &full)?.first()?
            }
            None => 0,
        };
        let end = match &slice.to {
            Some(to) => {
                let target = self.targets.get(&to.kind.to_uppercase())?;
                *target.targets(method, to, &full)?.last()? + 1
            }
            None => insn_count,
        };
        if start >= end {
            return None;
        }
        Some(start..end)
    }
}

/// Whether an instruction pushes exactly the given constant.
pub(crate) fn matches_constant(insn: &Insn, constant: &ConstantDecl) -> bool {
    match constant {
        ConstantDecl::Null => matches!(insn, Insn::Simple { opcode: ACONST_NULL }),
        ConstantDecl::Int(expected) => match insn {
            Insn::Simple { opcode } if (ICONST_M1..=ICONST_5).contains(opcode) => {
                (*opcode as i32 - ICONST_0 as i32) == *expected
            }
            Insn::IntPush { opcode, operand } if *opcode == BIPUSH || *opcode == SIPUSH => {
                operand == expected
            }
            Insn::Ldc(ConstantValue::Int(value)) => value == expected,
            _ => false,
        },
        ConstantDecl::Long(expected) => match insn {
            Insn::Simple { opcode: LCONST_0 } => *expected == 0,
            Insn::Simple { opcode: LCONST_1 } => *expected == 1,
            Insn::Ldc(ConstantValue::Long(value)) => value == expected,
            _ => false,
        },
        ConstantDecl::Float(expected) => match insn {
            Insn::Simple { opcode: FCONST_0 } => expected.to_bits() == 0f32.to_bits(),
            Insn::Simple { opcode: FCONST_1 } => *expected == 1.0,
            Insn::Simple { opcode: FCONST_2 } => *expected == 2.0,
            Insn::Ldc(ConstantValue::Float(value)) => value.to_bits() == expected.to_bits(),
            _ => false,
        },
        ConstantDecl::Double(expected) => match insn {
            Insn::Simple { opcode: DCONST_0 } => expected.to_bits() == 0f64.to_bits(),
            Insn::Simple { opcode: DCONST_1 } => *expected == 1.0,
            Insn::Ldc(ConstantValue::Double(value)) => value.to_bits() == expected.to_bits(),
            _ => false,
        },
        ConstantDecl::Str(expected) => {
            matches!(insn, Insn::Ldc(ConstantValue::String(value)) if value == expected)
        }
    }
}

/// Parse the free-form `CONSTANT` argument into a typed constant.
pub(crate) fn parse_constant_arg(arg: &str) -> Option<ConstantDecl> {
    let arg = arg.trim();
    if arg.is_empty() {
        return None;
    }
    if arg == "null" {
        return Some(ConstantDecl::Null);
    }
    if let Some(stripped) = arg.strip_suffix(&['L', 'l'][..]) {
        if let Ok(value) = stripped.parse::<i64>() {
            return Some(ConstantDecl::Long(value));
        }
    }
    if let Some(stripped) = arg.strip_suffix(&['F', 'f'][..]) {
        if let Ok(value) = stripped.parse::<f32>() {
            return Some(ConstantDecl::Float(value));
        }
    }
    if let Some(stripped) = arg.strip_suffix(&['D', 'd'][..]) {
        if let Ok(value) = stripped.parse::<f64>() {
            return Some(ConstantDecl::Double(value));
        }
    }
    if let Ok(value) = arg.parse::<i32>() {
        return Some(ConstantDecl::Int(value));
    }
    if arg.contains('.') {
        if let Ok(value) = arg.parse::<f64>() {
            return Some(ConstantDecl::Double(value));
        }
    }
    let unquoted = arg
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(arg);
    Some(ConstantDecl::Str(unquoted.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::opcodes::ACC_STATIC;

    fn decl(kind: &str, target: &str) -> TargetDecl {
        TargetDecl {
            kind: kind.to_string(),
            target: target.to_string(),
            shift: None,
            ordinal: -1,
            optional: false,
        }
    }

    fn invoke(owner: &str, name: &str) -> Insn {
        Insn::Method {
            opcode: INVOKEVIRTUAL,
            owner: owner.to_string(),
            name: name.to_string(),
            desc: String::from("()V"),
            interface: false,
        }
    }

    fn sample_method() -> MethodNode {
        let mut method = MethodNode::new(ACC_STATIC, "f", "()V");
        let body = method.code.as_mut().unwrap();
        body.insns.push(invoke("a/B", "first"));
        body.insns.push(invoke("a/B", "second"));
        body.insns.push(invoke("a/B", "first"));
        body.insns.push(Insn::Simple { opcode: RETURN });
        method
    }

    #[test]
    fn ordinal_selects_single_anchor() {
        let registry = TargetRegistry::with_defaults();
        let method = sample_method();
        let mut target = decl("INVOKE", "La/B;first()V");
        target.ordinal = 1;
        match registry.resolve(&method, &target, None) {
            Resolution::Anchors(anchors, _) => assert_eq!(anchors, vec![2]),
            other => panic!("unexpected resolution {:?}", other),
        }
    }

    #[test]
    fn slice_restricts_anchor_set() {
        let registry = TargetRegistry::with_defaults();
        let method = sample_method();
        let slice = SliceDecl {
            from: Some(decl("INVOKE", "La/B;second()V")),
            to: None,
        };
        match registry.resolve(&method, &decl("INVOKE", "La/B;first()V"), Some(&slice)) {
            Resolution::Anchors(anchors, _) => assert_eq!(anchors, vec![2]),
            other => panic!("unexpected resolution {:?}", other),
        }
    }

    #[test]
    fn failed_slice_bound_yields_empty() {
        let registry = TargetRegistry::with_defaults();
        let method = sample_method();
        let slice = SliceDecl {
            from: Some(decl("INVOKE", "La/B;missing()V")),
            to: None,
        };
        match registry.resolve(&method, &decl("INVOKE", "La/B;first()V"), Some(&slice)) {
            Resolution::Anchors(anchors, _) => assert!(anchors.is_empty()),
            other => panic!("unexpected resolution {:?}", other),
        }
    }

    #[test]
    fn unknown_kind_is_reported() {
        let registry = TargetRegistry::with_defaults();
        let method = sample_method();
        assert_eq!(
            registry.resolve(&method, &decl("NOWHERE", ""), None),
            Resolution::UnknownKind
        );
    }

    #[test]
    fn constant_arguments_parse_by_suffix() {
        assert_eq!(parse_constant_arg("5"), Some(ConstantDecl::Int(5)));
        assert_eq!(parse_constant_arg("5L"), Some(ConstantDecl::Long(5)));
        assert_eq!(parse_constant_arg("1.5F"), Some(ConstantDecl::Float(1.5)));
        assert_eq!(parse_constant_arg("2.5"), Some(ConstantDecl::Double(2.5)));
        assert_eq!(parse_constant_arg("null"), Some(ConstantDecl::Null));
        assert_eq!(
            parse_constant_arg("\"hi\""),
            Some(ConstantDecl::Str(String::from("hi")))
        );
    }
}
