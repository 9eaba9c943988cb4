//! `@ModifyConstant`: pipes matching constant loads through a transformer
//! method of shape `(T) -> T`.

use crate::transform::annotations::{self, find_annotation, parse_modify_constant, ConstantDecl};
use crate::transform::errors::TransformError;
use crate::transform::handlers::{
    rename_and_copy, resolve_target_methods, AnnotationHandler, HandlerContext, HandlerOutcome,
};
use crate::transform::targets::matches_constant;
use crate::tree::insn::Insn;
use crate::tree::opcodes::*;
use crate::tree::MethodNode;
use crate::util::code::{free_var_index, load_opcode, store_opcode};
use crate::util::descriptors::{Descriptor, FieldType, MethodDescriptor, Width};

pub struct ModifyConstantHandler;

impl AnnotationHandler for ModifyConstantHandler {
    fn name(&self) -> &'static str {
        "modify-constant"
    }

    fn transform(&self, ctx: &mut HandlerContext<'_>) -> Result<HandlerOutcome, TransformError> {
        let transformer_name = ctx.transformer.name.clone();
        let mut applied = false;

        loop {
            let Some(index) = ctx.transformer.methods.iter().position(|m| {
                find_annotation(&m.invisible_annotations, annotations::MODIFY_CONSTANT).is_some()
            }) else {
                break;
            };
            let annotation = find_annotation(
                &ctx.transformer.methods[index].invisible_annotations,
                annotations::MODIFY_CONSTANT,
            )
            .expect("position checked the annotation");
            let decl = parse_modify_constant(annotation);
            let hook_raw_name = ctx.transformer.methods[index].name.clone();
            let hook_static = ctx.transformer.methods[index].is_static();

            let Some(constant) = decl.constant.clone() else {
                return Err(TransformError::shape(
                    &hook_raw_name,
                    &transformer_name,
                    "is missing the constant to modify",
                )
                .with_help("e.g. @ModifyConstant(method = \"f\", constant = @Constant(intValue = 5))"));
            };

            let method_indices = resolve_target_methods(ctx.target, &decl.methods);
            if method_indices.is_empty() {
                return Err(TransformError::shape(
                    &hook_raw_name,
                    &transformer_name,
                    format!("could not find target method in '{}'", ctx.target.name),
                ));
            }

            let (hook_name, hook_desc) = rename_and_copy(
                ctx.target,
                ctx.transformer,
                index,
                annotations::MODIFY_CONSTANT,
            );
            let hook_sig = MethodDescriptor::parse(&hook_desc).map_err(|_| {
                TransformError::shape(&hook_raw_name, &transformer_name, "has invalid descriptor")
            })?;
            check_hook_shape(&hook_sig, &constant, &hook_raw_name, &transformer_name)?;
            let value_type = hook_sig.parameters[0].clone();

            for &method_index in &method_indices {
                let range = {
                    let method = &ctx.target.methods[method_index];
                    let count = method.code.as_ref().map(|b| b.insns.len()).unwrap_or(0);
                    match &decl.slice {
                        Some(slice) if !slice.is_empty() => {
                            ctx.targets.slice_range(method, slice, count)
                        }
                        _ => Some(0..count),
                    }
                };
                let anchors: Vec<usize> = match (range, ctx.target.methods[method_index].code.as_ref())
                {
                    (Some(range), Some(body)) => range
                        .filter(|i| {
                            body.insns
                                .get(*i)
                                .map(|insn| matches_constant(insn, &constant))
                                .unwrap_or(false)
                        })
                        .collect(),
                    _ => vec![],
                };
                if anchors.is_empty() {
                    return Err(TransformError::TargetNotFound {
                        method: hook_raw_name.clone(),
                        transformer: transformer_name.clone(),
                        target: format!("{:?}", constant),
                        help: String::from("the constant does not occur in the target method"),
                    });
                }

                let target_name = ctx.target.name.clone();
                let target_is_interface = ctx.target.is_interface();
                let method = &mut ctx.target.methods[method_index];
                if !hook_static && method.is_static() {
                    return Err(TransformError::shape(
                        &hook_raw_name,
                        &transformer_name,
                        "must be static to modify constants in a static method",
                    ));
                }
                for &anchor in anchors.iter().rev() {
                    insert_modifier(
                        method,
                        anchor,
                        &target_name,
                        target_is_interface,
                        &hook_name,
                        &hook_desc,
                        hook_static,
                        &value_type,
                    );
                }
            }
            applied = true;
        }

        Ok(if applied {
            HandlerOutcome::Applied
        } else {
            HandlerOutcome::Skipped
        })
    }
}

fn check_hook_shape(
    sig: &MethodDescriptor,
    constant: &ConstantDecl,
    hook_name: &str,
    transformer_name: &str,
) -> Result<(), TransformError> {
    let expected = match constant {
        ConstantDecl::Int(_) => Some(FieldType::INT),
        ConstantDecl::Long(_) => Some(FieldType::LONG),
        ConstantDecl::Float(_) => Some(FieldType::FLOAT),
        ConstantDecl::Double(_) => Some(FieldType::DOUBLE),
        ConstantDecl::Str(_) => Some(FieldType::object("java/lang/String")),
        ConstantDecl::Null => None,
    };
    let ok = match (&expected, sig.parameters.as_slice(), &sig.return_type) {
        (Some(typ), [param], Some(ret)) => param == typ && ret == typ,
        // null constants accept any single reference type
        (None, [param], Some(ret)) => !param.is_primitive() && param == ret,
        _ => false,
    };
    if ok {
        return Ok(());
    }
    Err(TransformError::shape(
        hook_name,
        transformer_name,
        "must take the constant's type and return the same type",
    )
    .with_help("e.g. int modify(int original)"))
}

#[allow(clippy::too_many_arguments)]
fn insert_modifier(
    method: &mut MethodNode,
    anchor: usize,
    target_name: &str,
    target_is_interface: bool,
    hook_name: &str,
    hook_desc: &str,
    hook_static: bool,
    value_type: &FieldType,
) {
    let invoke = Insn::Method {
        opcode: if hook_static {
            INVOKESTATIC
        } else if target_is_interface {
            INVOKEINTERFACE
        } else {
            INVOKEVIRTUAL
        },
        owner: target_name.to_string(),
        name: hook_name.to_string(),
        desc: hook_desc.to_string(),
        interface: target_is_interface,
    };
    let free = free_var_index(method);
    let body = method.code.as_mut().expect("anchor implies code");
    let sequence = if hook_static {
        vec![invoke]
    } else if value_type.width() == 1 {
        vec![
            Insn::Var {
                opcode: ALOAD,
                var: 0,
            },
            Insn::Simple { opcode: SWAP },
            invoke,
        ]
    } else {
        // wide values cannot be swapped below the receiver
        vec![
            Insn::Var {
                opcode: store_opcode(value_type),
                var: free,
            },
            Insn::Var {
                opcode: ALOAD,
                var: 0,
            },
            Insn::Var {
                opcode: load_opcode(value_type),
                var: free,
            },
            invoke,
        ]
    };
    body.insns.insert_after(anchor, sequence);
}
