//! Uniquifies synthetic members before they are copied.

use crate::transform::errors::TransformError;
use crate::transform::handlers::{simple_name, AnnotationHandler, HandlerContext, HandlerOutcome};
use crate::tree::insn::{BootstrapArg, Insn};
use crate::tree::opcodes::ACC_SYNTHETIC;
use crate::tree::ClassNode;

/// Compiler-generated members (lambda bodies, access bridges) keep names
/// like `lambda$hook$0` that collide when several transformers touch the
/// same target. They are renamed to carry the transformer's simple name
/// plus their declaration index, which is stable across repeated
/// transformation.
pub struct SyntheticRenameHandler;

impl AnnotationHandler for SyntheticRenameHandler {
    fn name(&self) -> &'static str {
        "synthetic-rename"
    }

    fn transform(&self, ctx: &mut HandlerContext<'_>) -> Result<HandlerOutcome, TransformError> {
        let transformer = &mut *ctx.transformer;
        let discriminator = simple_name(&transformer.name).to_string();
        let mut renames: Vec<(String, String, String)> = vec![]; // (old, desc, new)

        for (index, method) in transformer.methods.iter_mut().enumerate() {
            if method.access & ACC_SYNTHETIC == 0
                || method.name == "<init>"
                || method.name == "<clinit>"
            {
                continue;
            }
            let new_name = format!("{}${}${}", method.name, discriminator, index);
            renames.push((method.name.clone(), method.desc.clone(), new_name.clone()));
            method.name = new_name;
        }
        for (index, field) in transformer.fields.iter_mut().enumerate() {
            if field.access & ACC_SYNTHETIC == 0 {
                continue;
            }
            let new_name = format!("{}${}${}", field.name, discriminator, index);
            renames.push((field.name.clone(), field.desc.clone(), new_name.clone()));
            field.name = new_name;
        }

        if renames.is_empty() {
            return Ok(HandlerOutcome::Skipped);
        }
        apply_renames(transformer, &renames);
        Ok(HandlerOutcome::Applied)
    }
}

fn apply_renames(transformer: &mut ClassNode, renames: &[(String, String, String)]) {
    let owner = transformer.name.clone();
    let rename_of = |name: &str, desc: &str| -> Option<&str> {
        renames
            .iter()
            .find(|(old, old_desc, _)| old == name && old_desc == desc)
            .map(|(_, _, new)| new.as_str())
    };
    for method in &mut transformer.methods {
        let Some(body) = &mut method.code else { continue };
        for insn in body.insns.iter_mut() {
            match insn {
                Insn::Field {
                    owner: insn_owner,
                    name,
                    desc,
                    ..
                }
                | Insn::Method {
                    owner: insn_owner,
                    name,
                    desc,
                    ..
                } => {
                    if *insn_owner == owner {
                        if let Some(new) = rename_of(name, desc) {
                            *name = new.to_string();
                        }
                    }
                }
                Insn::InvokeDynamic { bootstrap, .. } => {
                    for arg in &mut bootstrap.args {
                        if let BootstrapArg::Handle(handle) = arg {
                            if handle.owner == owner {
                                if let Some(new) = rename_of(&handle.name, &handle.desc) {
                                    handle.name = new.to_string();
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }
}
