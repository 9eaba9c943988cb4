//! Transformation failure taxonomy.

use crate::classfile::{ParseError, WriteError};
use std::fmt;

/// Anything that can go wrong while applying one transformer to one target.
#[derive(Debug)]
pub enum TransformError {
    /// Class file malformed; fatal for the class.
    Parse(ParseError),
    /// Emitting the rewritten class failed.
    Write(WriteError),
    /// A directive's target string does not parse or names an unknown kind.
    InvalidTarget {
        method: String,
        transformer: String,
        target: String,
        help: String,
    },
    /// A directive resolved to no anchors and is not optional.
    TargetNotFound {
        method: String,
        transformer: String,
        target: String,
        help: String,
    },
    /// Signature/staticness/return-type mismatch in a transformer method.
    Shape {
        method: String,
        transformer: String,
        message: String,
        help: Option<String>,
    },
    /// Remapping hit an unresolved reference; reported as a warning.
    Mapping(String),
    /// Unexpected failure inside a handler.
    Handler {
        handler: &'static str,
        transformer: String,
        target: String,
        message: String,
    },
}

impl TransformError {
    pub fn shape(
        method: &str,
        transformer: &str,
        message: impl Into<String>,
    ) -> TransformError {
        TransformError::Shape {
            method: method.to_string(),
            transformer: transformer.to_string(),
            message: message.into(),
            help: None,
        }
    }

    pub fn with_help(self, help: impl Into<String>) -> TransformError {
        match self {
            TransformError::Shape {
                method,
                transformer,
                message,
                ..
            } => TransformError::Shape {
                method,
                transformer,
                message,
                help: Some(help.into()),
            },
            other => other,
        }
    }
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformError::Parse(err) => write!(f, "failed to parse class file: {}", err),
            TransformError::Write(err) => write!(f, "failed to emit class file: {}", err),
            TransformError::InvalidTarget {
                method,
                transformer,
                target,
                help,
            } => write!(
                f,
                "method '{}' in transformer '{}' has invalid target '{}' ({})",
                method, transformer, target, help
            ),
            TransformError::TargetNotFound {
                method,
                transformer,
                target,
                help,
            } => write!(
                f,
                "method '{}' in transformer '{}' could not resolve target '{}' ({})",
                method, transformer, target, help
            ),
            TransformError::Shape {
                method,
                transformer,
                message,
                help,
            } => {
                write!(
                    f,
                    "method '{}' in transformer '{}' {}",
                    method, transformer, message
                )?;
                if let Some(help) = help {
                    write!(f, " (e.g. {})", help)?;
                }
                Ok(())
            }
            TransformError::Mapping(message) => write!(f, "mapping failure: {}", message),
            TransformError::Handler {
                handler,
                transformer,
                target,
                message,
            } => write!(
                f,
                "handler '{}' failed applying transformer '{}' to class '{}': {}",
                handler, transformer, target, message
            ),
        }
    }
}

impl std::error::Error for TransformError {}

impl From<ParseError> for TransformError {
    fn from(err: ParseError) -> TransformError {
        TransformError::Parse(err)
    }
}

impl From<WriteError> for TransformError {
    fn from(err: WriteError) -> TransformError {
        TransformError::Write(err)
    }
}

/// What to do when a transformer or handler fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailStrategy {
    /// Log and keep going with the remaining handlers and transformers.
    Continue,
    /// Abandon the transformation of the current class.
    Cancel,
    /// Terminate the process.
    Exit,
}
