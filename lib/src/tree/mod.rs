//! Class tree: typed nodes over the class file format plus the
//! instruction-level view handlers operate on.

pub mod class;
pub mod insn;
pub mod opcodes;

pub use class::{
    AnnotationNode, AnnotationValue, ClassNode, FieldNode, InnerClassNode, LocalVariableNode,
    MethodBody, MethodNode, TryCatchNode,
};
pub use insn::{BootstrapArg, BootstrapMethod, ConstantValue, Handle, Insn, InsnList, LabelId};
