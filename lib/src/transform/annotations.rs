//! Directive annotations and their parsed forms.
//!
//! Transformer classes are ordinary compiled classes carrying annotations
//! from the `classweave.annotations` Java package (class retention, so they
//! surface as invisible annotations). This module turns the raw
//! [`AnnotationNode`]s into typed declarations.

use crate::tree::{AnnotationNode, AnnotationValue, ClassNode};

pub const TRANSFORMER: &str = "Lclassweave/annotations/Transformer;";
pub const INJECT: &str = "Lclassweave/annotations/Inject;";
pub const TARGET: &str = "Lclassweave/annotations/Target;";
pub const SLICE: &str = "Lclassweave/annotations/Slice;";
pub const LOCAL_VARIABLE: &str = "Lclassweave/annotations/LocalVariable;";
pub const REDIRECT: &str = "Lclassweave/annotations/Redirect;";
pub const MODIFY_CONSTANT: &str = "Lclassweave/annotations/ModifyConstant;";
pub const CONSTANT: &str = "Lclassweave/annotations/Constant;";
pub const WRAP_CATCH: &str = "Lclassweave/annotations/WrapCatch;";
pub const OVERRIDE: &str = "Lclassweave/annotations/Override;";
pub const SHADOW: &str = "Lclassweave/annotations/Shadow;";
pub const INLINE: &str = "Lclassweave/annotations/Inline;";
pub const UPGRADE: &str = "Lclassweave/annotations/Upgrade;";
pub const ASM: &str = "Lclassweave/annotations/Asm;";
pub const DUPLICATE: &str = "Lclassweave/annotations/Duplicate;";

/// Insertion side relative to an anchor instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shift {
    Before,
    After,
}

pub fn find_annotation<'a>(
    annotations: &'a [AnnotationNode],
    desc: &str,
) -> Option<&'a AnnotationNode> {
    annotations.iter().find(|a| a.desc == desc)
}

pub fn has_annotation(annotations: &[AnnotationNode], desc: &str) -> bool {
    find_annotation(annotations, desc).is_some()
}

/// Remove and return an annotation, so copied members do not carry their
/// directives into the target class.
pub fn take_annotation(
    annotations: &mut Vec<AnnotationNode>,
    desc: &str,
) -> Option<AnnotationNode> {
    let index = annotations.iter().position(|a| a.desc == desc)?;
    Some(annotations.remove(index))
}

/// `value` arrays of strings, accepting a bare string as a one-element list.
fn string_list(value: &AnnotationValue) -> Vec<String> {
    match value {
        AnnotationValue::String(s) => vec![s.clone()],
        AnnotationValue::Array(values) => values
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => vec![],
    }
}

/// Internal name carried by a class literal (`La/b/C;` to `a/b/C`).
fn class_value_name(value: &AnnotationValue) -> Option<String> {
    match value {
        AnnotationValue::Class(desc) => {
            let inner = desc.strip_prefix('L')?.strip_suffix(';')?;
            Some(inner.to_string())
        }
        _ => None,
    }
}

/// The class-level `@Transformer` declaration.
#[derive(Debug, Clone, Default)]
pub struct TransformerDecl {
    /// Internal names from the `value` class list; subject to remapping.
    pub types: Vec<String>,
    /// Raw string names from the `name` list, dot or slash form.
    pub names: Vec<String>,
}

impl TransformerDecl {
    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && self.names.is_empty()
    }
}

/// Parse the `@Transformer` annotation off a class, if present.
pub fn parse_transformer(class: &ClassNode) -> Option<TransformerDecl> {
    let annotation = find_annotation(&class.invisible_annotations, TRANSFORMER)?;
    let mut decl = TransformerDecl::default();
    if let Some(value) = annotation.get("value") {
        if let Some(values) = value.as_array() {
            decl.types.extend(values.iter().filter_map(class_value_name));
        }
    }
    if let Some(value) = annotation.get("name") {
        decl.names.extend(string_list(value));
    }
    Some(decl)
}

/// One `@Target` inside a directive.
#[derive(Debug, Clone)]
pub struct TargetDecl {
    /// Target kind (`HEAD`, `INVOKE`, ...), matched case insensitively.
    pub kind: String,
    /// Kind-specific argument string.
    pub target: String,
    pub shift: Option<Shift>,
    /// Selects the n-th anchor; negative keeps all.
    pub ordinal: i32,
    pub optional: bool,
}

pub fn parse_target(annotation: &AnnotationNode) -> TargetDecl {
    let shift = annotation.get("shift").and_then(|value| match value {
        AnnotationValue::Enum { value, .. } => match value.as_str() {
            "BEFORE" => Some(Shift::Before),
            "AFTER" => Some(Shift::After),
            _ => None,
        },
        _ => None,
    });
    TargetDecl {
        kind: annotation
            .get("value")
            .and_then(AnnotationValue::as_str)
            .unwrap_or("")
            .to_string(),
        target: annotation
            .get("target")
            .and_then(AnnotationValue::as_str)
            .unwrap_or("")
            .to_string(),
        shift,
        ordinal: annotation
            .get("ordinal")
            .and_then(AnnotationValue::as_int)
            .unwrap_or(-1),
        optional: annotation
            .get("optional")
            .and_then(AnnotationValue::as_bool)
            .unwrap_or(false),
    }
}

/// `@Slice` restricting a directive to an instruction range.
#[derive(Debug, Clone, Default)]
pub struct SliceDecl {
    pub from: Option<TargetDecl>,
    pub to: Option<TargetDecl>,
}

impl SliceDecl {
    pub fn is_empty(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }
}

pub fn parse_slice(annotation: &AnnotationNode) -> SliceDecl {
    let target_of = |name: &str| -> Option<TargetDecl> {
        match annotation.get(name) {
            Some(AnnotationValue::Annotation(nested)) => {
                let decl = parse_target(nested);
                if decl.kind.is_empty() {
                    None
                } else {
                    Some(decl)
                }
            }
            _ => None,
        }
    };
    SliceDecl {
        from: target_of("from"),
        to: target_of("to"),
    }
}

fn nested_slice(annotation: &AnnotationNode) -> Option<SliceDecl> {
    match annotation.get("slice") {
        Some(AnnotationValue::Annotation(nested)) => {
            let slice = parse_slice(nested);
            if slice.is_empty() {
                None
            } else {
                Some(slice)
            }
        }
        _ => None,
    }
}

fn nested_targets(annotation: &AnnotationNode, name: &str) -> Vec<TargetDecl> {
    match annotation.get(name) {
        Some(AnnotationValue::Annotation(nested)) => vec![parse_target(nested)],
        Some(AnnotationValue::Array(values)) => values
            .iter()
            .filter_map(|value| match value {
                AnnotationValue::Annotation(nested) => Some(parse_target(nested)),
                _ => None,
            })
            .collect(),
        _ => vec![],
    }
}

/// `@Inject` directive.
#[derive(Debug, Clone)]
pub struct InjectDecl {
    /// Target method patterns, `name` or `name(desc)ret`.
    pub methods: Vec<String>,
    pub targets: Vec<TargetDecl>,
    pub slice: Option<SliceDecl>,
    pub cancellable: bool,
}

pub fn parse_inject(annotation: &AnnotationNode) -> InjectDecl {
    InjectDecl {
        methods: annotation.get("method").map(string_list).unwrap_or_default(),
        targets: nested_targets(annotation, "target"),
        slice: nested_slice(annotation),
        cancellable: annotation
            .get("cancellable")
            .and_then(AnnotationValue::as_bool)
            .unwrap_or(false),
    }
}

/// `@LocalVariable` on an injected method parameter.
#[derive(Debug, Clone, Default)]
pub struct LocalVariableDecl {
    pub name: Option<String>,
    pub index: Option<u16>,
    pub load_opcode: Option<u8>,
    pub modifiable: bool,
}

pub fn parse_local_variable(annotation: &AnnotationNode) -> LocalVariableDecl {
    LocalVariableDecl {
        name: annotation
            .get("name")
            .and_then(AnnotationValue::as_str)
            .map(str::to_string),
        index: annotation
            .get("index")
            .and_then(AnnotationValue::as_int)
            .and_then(|i| u16::try_from(i).ok()),
        load_opcode: annotation
            .get("loadOpcode")
            .and_then(AnnotationValue::as_int)
            .and_then(|i| u8::try_from(i).ok()),
        modifiable: annotation
            .get("modifiable")
            .and_then(AnnotationValue::as_bool)
            .unwrap_or(false),
    }
}

/// `@Redirect` directive.
#[derive(Debug, Clone)]
pub struct RedirectDecl {
    pub methods: Vec<String>,
    pub target: Option<TargetDecl>,
    pub slice: Option<SliceDecl>,
}

pub fn parse_redirect(annotation: &AnnotationNode) -> RedirectDecl {
    RedirectDecl {
        methods: annotation.get("method").map(string_list).unwrap_or_default(),
        target: nested_targets(annotation, "target").into_iter().next(),
        slice: nested_slice(annotation),
    }
}

/// The typed constant of a `@ModifyConstant`/`CONSTANT` match.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantDecl {
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
}

pub fn parse_constant(annotation: &AnnotationNode) -> Option<ConstantDecl> {
    if let Some(AnnotationValue::Bool(true)) = annotation.get("nullValue") {
        return Some(ConstantDecl::Null);
    }
    if let Some(value) = annotation.get("intValue").and_then(AnnotationValue::as_int) {
        return Some(ConstantDecl::Int(value));
    }
    if let Some(AnnotationValue::Long(value)) = annotation.get("longValue") {
        return Some(ConstantDecl::Long(*value));
    }
    if let Some(AnnotationValue::Float(value)) = annotation.get("floatValue") {
        return Some(ConstantDecl::Float(*value));
    }
    if let Some(AnnotationValue::Double(value)) = annotation.get("doubleValue") {
        return Some(ConstantDecl::Double(*value));
    }
    if let Some(value) = annotation
        .get("stringValue")
        .and_then(AnnotationValue::as_str)
    {
        return Some(ConstantDecl::Str(value.to_string()));
    }
    None
}

/// `@ModifyConstant` directive.
#[derive(Debug, Clone)]
pub struct ModifyConstantDecl {
    pub methods: Vec<String>,
    pub constant: Option<ConstantDecl>,
    pub slice: Option<SliceDecl>,
}

pub fn parse_modify_constant(annotation: &AnnotationNode) -> ModifyConstantDecl {
    let constant = match annotation.get("constant") {
        Some(AnnotationValue::Annotation(nested)) => parse_constant(nested),
        _ => None,
    };
    ModifyConstantDecl {
        methods: annotation.get("method").map(string_list).unwrap_or_default(),
        constant,
        slice: nested_slice(annotation),
    }
}

/// `@WrapCatch` directive.
#[derive(Debug, Clone)]
pub struct WrapCatchDecl {
    pub methods: Vec<String>,
    /// When set, only this invocation (a member declaration string) is
    /// wrapped instead of the whole method body.
    pub target: Option<String>,
}

pub fn parse_wrap_catch(annotation: &AnnotationNode) -> WrapCatchDecl {
    WrapCatchDecl {
        methods: annotation.get("value").map(string_list).unwrap_or_default(),
        target: annotation
            .get("target")
            .and_then(AnnotationValue::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    }
}

/// `@Override` directive; `value` optionally names the target method when
/// it differs from the transformer method's own name.
#[derive(Debug, Clone, Default)]
pub struct OverrideDecl {
    pub method: Option<String>,
}

pub fn parse_override(annotation: &AnnotationNode) -> OverrideDecl {
    OverrideDecl {
        method: annotation
            .get("value")
            .and_then(AnnotationValue::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    }
}

/// `@Upgrade` directive; `value` optionally names the replaced method.
#[derive(Debug, Clone, Default)]
pub struct UpgradeDecl {
    pub method: Option<String>,
}

pub fn parse_upgrade(annotation: &AnnotationNode) -> UpgradeDecl {
    UpgradeDecl {
        method: annotation
            .get("value")
            .and_then(AnnotationValue::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target_annotation(kind: &str, target: &str) -> AnnotationNode {
        AnnotationNode::new(TARGET)
            .with("value", AnnotationValue::String(kind.to_string()))
            .with("target", AnnotationValue::String(target.to_string()))
    }

    #[test]
    fn parses_inject_with_targets_and_slice() {
        let annotation = AnnotationNode::new(INJECT)
            .with("method", AnnotationValue::String(String::from("add")))
            .with(
                "target",
                AnnotationValue::Array(vec![AnnotationValue::Annotation(target_annotation(
                    "HEAD", "",
                ))]),
            )
            .with(
                "slice",
                AnnotationValue::Annotation(
                    AnnotationNode::new(SLICE).with(
                        "from",
                        AnnotationValue::Annotation(target_annotation("INVOKE", "La/B;f()V")),
                    ),
                ),
            )
            .with("cancellable", AnnotationValue::Bool(true));

        let decl = parse_inject(&annotation);
        assert_eq!(decl.methods, vec!["add"]);
        assert_eq!(decl.targets.len(), 1);
        assert_eq!(decl.targets[0].kind, "HEAD");
        assert!(decl.cancellable);
        let slice = decl.slice.unwrap();
        assert_eq!(slice.from.unwrap().target, "La/B;f()V");
        assert!(slice.to.is_none());
    }

    #[test]
    fn parses_transformer_types_and_names() {
        let mut class = ClassNode::new("t/Hook", 52);
        class.invisible_annotations.push(
            AnnotationNode::new(TRANSFORMER)
                .with(
                    "value",
                    AnnotationValue::Array(vec![AnnotationValue::Class(String::from("La/B;"))]),
                )
                .with(
                    "name",
                    AnnotationValue::Array(vec![AnnotationValue::String(String::from("c.D"))]),
                ),
        );
        let decl = parse_transformer(&class).unwrap();
        assert_eq!(decl.types, vec!["a/B"]);
        assert_eq!(decl.names, vec!["c.D"]);
    }

    #[test]
    fn constant_prefers_first_set_member() {
        let annotation = AnnotationNode::new(CONSTANT).with("intValue", AnnotationValue::Int(5));
        assert_eq!(parse_constant(&annotation), Some(ConstantDecl::Int(5)));
        let empty = AnnotationNode::new(CONSTANT);
        assert_eq!(parse_constant(&empty), None);
    }
}
