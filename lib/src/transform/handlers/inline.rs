//! `@Inline`: splices a transformer method's body over every call site.
//!
//! Methods injected into already-loaded classes cannot add new members on
//! retransformation; marking them `@Inline` dissolves them into their
//! callers instead of letting the member copy add them to the target.

use crate::transform::annotations::{self, find_annotation, take_annotation};
use crate::transform::errors::TransformError;
use crate::transform::handlers::{AnnotationHandler, HandlerContext, HandlerOutcome};
use crate::tree::insn::Insn;
use crate::tree::opcodes::*;
use crate::tree::{MethodNode, TryCatchNode};
use crate::util::code::{free_var_index, rewrite_owner, store_opcode};
use crate::util::descriptors::{Descriptor, MethodDescriptor, Width};

pub struct InlineHandler;

impl AnnotationHandler for InlineHandler {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn transform(&self, ctx: &mut HandlerContext<'_>) -> Result<HandlerOutcome, TransformError> {
        let transformer_name = ctx.transformer.name.clone();
        let target_name = ctx.target.name.clone();
        let mut applied = false;
        loop {
            let Some(index) = ctx.transformer.methods.iter().position(|m| {
                find_annotation(&m.invisible_annotations, annotations::INLINE).is_some()
            }) else {
                break;
            };
            let mut callee = ctx.transformer.methods.remove(index);
            take_annotation(&mut callee.invisible_annotations, annotations::INLINE);
            // the body is spliced into target methods, so its self
            // references have to point at the target already
            if let Some(body) = &mut callee.code {
                rewrite_owner(body, &transformer_name, &target_name);
            }

            // call sites in the target: members earlier handlers copied in
            // reference the target as owner after their owner rewrite
            for caller in &mut ctx.target.methods {
                inline_call_sites(caller, &target_name, &callee)?;
            }
            // call sites still on the transformer clone: leftovers that the
            // member copy moves over later
            for caller in &mut ctx.transformer.methods {
                inline_call_sites(caller, &transformer_name, &callee)?;
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

fn inline_call_sites(
    caller: &mut MethodNode,
    owner: &str,
    callee: &MethodNode,
) -> Result<(), TransformError> {
    if caller.code.is_none() || callee.code.is_none() {
        return Ok(());
    }
    let sites: Vec<usize> = {
        let body = caller.code.as_ref().expect("checked above");
        body.insns
            .iter()
            .enumerate()
            .filter(|(_, insn)| match insn {
                Insn::Method {
                    owner: o,
                    name,
                    desc,
                    ..
                } => o == owner && name == &callee.name && desc == &callee.desc,
                _ => false,
            })
            .map(|(i, _)| i)
            .collect()
    };
    // descending, so earlier site indices stay valid; call sites introduced
    // by the spliced body itself are left alone (recursion guard)
    for site in sites.into_iter().rev() {
        splice(caller, site, callee)?;
    }
    Ok(())
}

/// Replace one call site with the callee's instructions: arguments are
/// stored into fresh caller locals standing in for the callee's parameter
/// slots, the body's own slots are shifted past them, and returns become
/// jumps to a label after the splice (leaving the value on the stack).
fn splice(caller: &mut MethodNode, site: usize, callee: &MethodNode) -> Result<(), TransformError> {
    let callee_desc = MethodDescriptor::parse(&callee.desc).map_err(|_| {
        TransformError::Mapping(format!("invalid descriptor on inlined method {}", callee.name))
    })?;
    let base = free_var_index(caller);
    let callee_body = callee.code.as_ref().expect("checked by caller");
    let caller_body = caller.code.as_mut().expect("checked by caller");

    let (mut cloned, label_map) = callee_body
        .insns
        .clone_with_fresh_labels(|| caller_body.new_label());
    let end = caller_body.new_label();

    for insn in cloned.iter_mut() {
        match insn {
            Insn::Var { var, .. } => *var += base,
            Insn::Iinc { var, .. } => *var += base,
            _ => {}
        }
    }
    let mut spliced: Vec<Insn> = vec![];
    // parameter slots, receiver first; stored in reverse of stack order
    let mut slots: Vec<(u16, u8)> = vec![];
    let mut slot: u16 = 0;
    if !callee.is_static() {
        slots.push((slot, ASTORE));
        slot += 1;
    }
    for parameter in &callee_desc.parameters {
        slots.push((slot, store_opcode(parameter)));
        slot += parameter.width() as u16;
    }
    for (param_slot, store) in slots.iter().rev() {
        spliced.push(Insn::Var {
            opcode: *store,
            var: base + param_slot,
        });
    }
    for insn in cloned.iter() {
        match insn {
            Insn::Simple { opcode } if is_return(*opcode) => {
                spliced.push(Insn::Jump {
                    opcode: GOTO,
                    label: end,
                });
            }
            other => spliced.push(other.clone()),
        }
    }
    spliced.push(Insn::Label(end));

    caller_body.insns.replace_with(site, spliced);

    for block in &callee_body.try_catch_blocks {
        let (Some(start), Some(end), Some(handler)) = (
            label_map.get(&block.start),
            label_map.get(&block.end),
            label_map.get(&block.handler),
        ) else {
            continue;
        };
        caller_body.try_catch_blocks.push(TryCatchNode {
            start: *start,
            end: *end,
            handler: *handler,
            catch_type: block.catch_type.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::opcodes::{ACC_STATIC, GOTO, ICONST_5, ILOAD, IRETURN, POP, RETURN};
    use crate::tree::MethodNode;

    fn method(name: &str, desc: &str, insns: Vec<Insn>) -> MethodNode {
        let mut method = MethodNode::new(ACC_STATIC, name, desc);
        method.code.as_mut().unwrap().insns.extend(insns);
        method
    }

    #[test]
    fn splice_replaces_the_call_and_redirects_returns() {
        let callee = method(
            "helper",
            "()I",
            vec![
                Insn::Simple { opcode: ICONST_5 },
                Insn::Simple { opcode: IRETURN },
            ],
        );
        let mut caller = method(
            "run",
            "()V",
            vec![
                Insn::Method {
                    opcode: INVOKESTATIC,
                    owner: String::from("a/B"),
                    name: String::from("helper"),
                    desc: String::from("()I"),
                    interface: false,
                },
                Insn::Simple { opcode: POP },
                Insn::Simple { opcode: RETURN },
            ],
        );

        inline_call_sites(&mut caller, "a/B", &callee).unwrap();

        let ops: Vec<u8> = caller
            .code
            .as_ref()
            .unwrap()
            .insns
            .iter()
            .filter_map(Insn::opcode)
            .collect();
        assert_eq!(ops, vec![ICONST_5, GOTO, POP, RETURN]);
        assert!(!caller
            .code
            .as_ref()
            .unwrap()
            .insns
            .iter()
            .any(|insn| matches!(insn, Insn::Method { .. })));
    }

    #[test]
    fn splice_maps_parameters_onto_fresh_slots() {
        let callee = method(
            "twice",
            "(I)I",
            vec![
                Insn::Var {
                    opcode: ILOAD,
                    var: 0,
                },
                Insn::Var {
                    opcode: ILOAD,
                    var: 0,
                },
                Insn::Simple {
                    opcode: crate::tree::opcodes::IADD,
                },
                Insn::Simple { opcode: IRETURN },
            ],
        );
        let mut caller = method(
            "run",
            "(I)I",
            vec![
                Insn::Var {
                    opcode: ILOAD,
                    var: 0,
                },
                Insn::Method {
                    opcode: INVOKESTATIC,
                    owner: String::from("a/B"),
                    name: String::from("twice"),
                    desc: String::from("(I)I"),
                    interface: false,
                },
                Insn::Simple { opcode: IRETURN },
            ],
        );

        inline_call_sites(&mut caller, "a/B", &callee).unwrap();

        let insns: Vec<&Insn> = caller
            .code
            .as_ref()
            .unwrap()
            .insns
            .iter()
            .filter(|insn| !insn.is_pseudo())
            .collect();
        // caller uses slot 0; the callee's parameter lands on slot 1
        assert_eq!(
            insns[1],
            &Insn::Var {
                opcode: crate::tree::opcodes::ISTORE,
                var: 1
            }
        );
        assert_eq!(
            insns[2],
            &Insn::Var {
                opcode: ILOAD,
                var: 1
            }
        );
    }
}
