//! The transformation pipeline: directive annotations, injection targets,
//! the annotation handler chain and the manager driving them.

pub mod annotations;
pub mod errors;
pub mod handlers;
pub mod host;
pub mod manager;
pub mod targets;

pub use annotations::Shift;
pub use errors::{FailStrategy, TransformError};
pub use handlers::{AnnotationHandler, HandlerContext, HandlerOutcome, HandlerPosition};
pub use host::InstrumentationHost;
pub use manager::{BytecodeTransformer, PostTransformer, RawTransformer, TransformerManager};
pub use targets::{InjectionTarget, Resolution, TargetRegistry};
