//! Symbolic member declarations used by directive target strings.

use crate::tree::insn::Insn;

/// Owner, name and descriptor of a method or field, parsed from the string
/// forms accepted by directive targets:
///
/// - `Ljava/lang/String;toUpperCase()Ljava/lang/String;` (method)
/// - `Ljava/lang/Integer;MAX_VALUE:I` (field)
/// - `java/lang/String.toUpperCase ()Ljava/lang/String;` (dotted method)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDeclaration {
    pub owner: String,
    pub name: String,
    pub desc: String,
}

impl MemberDeclaration {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        desc: impl Into<String>,
    ) -> MemberDeclaration {
        MemberDeclaration {
            owner: owner.into(),
            name: name.into(),
            desc: desc.into(),
        }
    }

    /// Parse any of the accepted declaration forms.
    pub fn parse(declaration: &str) -> Option<MemberDeclaration> {
        if let Some(rest) = declaration.strip_prefix('L') {
            let (owner, member) = rest.split_once(';')?;
            if let Some((name, desc)) = member.split_once(':') {
                if name.is_empty() || desc.is_empty() {
                    return None;
                }
                return Some(MemberDeclaration::new(owner, name, desc));
            }
            let open = member.find('(')?;
            let (name, desc) = member.split_at(open);
            if name.is_empty() || !desc.contains(')') {
                return None;
            }
            return Some(MemberDeclaration::new(owner, name, desc));
        }

        // owner.name desc
        let (member, desc) = declaration.split_once(' ')?;
        let dot = member.rfind('.')?;
        let (owner, name) = member.split_at(dot);
        let name = &name[1..];
        if owner.is_empty() || name.is_empty() || desc.is_empty() {
            return None;
        }
        Some(MemberDeclaration::new(
            owner.replace('.', "/"),
            name,
            desc,
        ))
    }

    pub fn is_field(&self) -> bool {
        !self.desc.starts_with('(')
    }

    /// Whether a field or method instruction references this member.
    pub fn matches(&self, insn: &Insn) -> bool {
        match insn {
            Insn::Field {
                owner, name, desc, ..
            }
            | Insn::Method {
                owner, name, desc, ..
            } => owner == &self.owner && name == &self.name && desc == &self.desc,
            _ => false,
        }
    }

    /// Render back to the `L...;` form.
    pub fn render(&self) -> String {
        if self.is_field() {
            format!("L{};{}:{}", self.owner, self.name, self.desc)
        } else {
            format!("L{};{}{}", self.owner, self.name, self.desc)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_method_declaration() {
        let decl =
            MemberDeclaration::parse("Ljava/lang/String;toUpperCase()Ljava/lang/String;").unwrap();
        assert_eq!(decl.owner, "java/lang/String");
        assert_eq!(decl.name, "toUpperCase");
        assert_eq!(decl.desc, "()Ljava/lang/String;");
        assert!(!decl.is_field());
    }

    #[test]
    fn parses_field_declaration() {
        let decl = MemberDeclaration::parse("Ljava/lang/Integer;MAX_VALUE:I").unwrap();
        assert_eq!(decl.owner, "java/lang/Integer");
        assert_eq!(decl.name, "MAX_VALUE");
        assert_eq!(decl.desc, "I");
        assert!(decl.is_field());
    }

    #[test]
    fn parses_dotted_declaration() {
        let decl = MemberDeclaration::parse("java.lang.String.toUpperCase ()Ljava/lang/String;")
            .unwrap();
        assert_eq!(decl.owner, "java/lang/String");
        assert_eq!(decl.name, "toUpperCase");
    }

    #[test]
    fn rejects_malformed_declarations() {
        assert!(MemberDeclaration::parse("").is_none());
        assert!(MemberDeclaration::parse("Lfoo;bar").is_none());
        assert!(MemberDeclaration::parse("no-separator").is_none());
    }

    #[test]
    fn render_round_trips() {
        for s in [
            "Ljava/lang/String;toUpperCase()Ljava/lang/String;",
            "Ljava/lang/Integer;MAX_VALUE:I",
        ] {
            assert_eq!(MemberDeclaration::parse(s).unwrap().render(), s);
        }
    }
}
