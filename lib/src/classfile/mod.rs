//! Reading and writing of the class file binary format.
//!
//! The reader lowers a class file into a [`crate::tree::ClassNode`] with
//! symbolic references; the writer rebuilds a fresh constant pool and lowers
//! labels back to bytecode offsets. Stack map frames are not synthesized:
//! verifying the produced bytecode is the VM's concern.

mod constant_pool;
mod reader;
mod writer;

pub use constant_pool::{ConstantPool, ConstantsPool, CpInfo};
pub use reader::read_class;
pub use writer::write_class;

use std::fmt;

/// Failure while parsing a class file.
#[derive(Debug)]
pub enum ParseError {
    UnexpectedEof,
    InvalidMagic(u32),
    InvalidConstantTag(u8),
    InvalidIndex(u16),
    InvalidOpcode { opcode: u8, offset: usize },
    InvalidAttribute(String),
    MalformedUtf8,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnexpectedEof => write!(f, "unexpected end of class file"),
            ParseError::InvalidMagic(magic) => write!(f, "invalid magic 0x{:08X}", magic),
            ParseError::InvalidConstantTag(tag) => write!(f, "invalid constant pool tag {}", tag),
            ParseError::InvalidIndex(index) => write!(f, "invalid constant pool index {}", index),
            ParseError::InvalidOpcode { opcode, offset } => {
                write!(f, "invalid opcode 0x{:02X} at offset {}", opcode, offset)
            }
            ParseError::InvalidAttribute(name) => write!(f, "malformed attribute '{}'", name),
            ParseError::MalformedUtf8 => write!(f, "malformed modified UTF-8"),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<std::io::Error> for ParseError {
    fn from(_: std::io::Error) -> ParseError {
        // the only IO failure over an in-memory buffer is running out of it
        ParseError::UnexpectedEof
    }
}

/// Failure while emitting a class file.
#[derive(Debug)]
pub enum WriteError {
    PoolOverflow,
    /// A jump offset does not fit the 16 bit encoding.
    JumpTooFar { from: usize, to: usize },
    UnplacedLabel(crate::tree::LabelId),
    CodeOverflow(usize),
    Io(std::io::Error),
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::PoolOverflow => write!(f, "constant pool overflow"),
            WriteError::JumpTooFar { from, to } => {
                write!(f, "jump from offset {} to {} exceeds 16 bit range", from, to)
            }
            WriteError::UnplacedLabel(label) => write!(f, "label {} was never placed", label),
            WriteError::CodeOverflow(len) => {
                write!(f, "method body of {} bytes exceeds the code length limit", len)
            }
            WriteError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for WriteError {}

impl From<std::io::Error> for WriteError {
    fn from(err: std::io::Error) -> WriteError {
        WriteError::Io(err)
    }
}
