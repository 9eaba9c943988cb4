//! Interface to the instrumentation host driving class (re)definition.

/// Capabilities of the agent/instrumentation layer hosting the manager.
///
/// Names are in the dot form (`java.lang.String`).
pub trait InstrumentationHost: Send + Sync {
    /// Names of all currently loaded classes.
    fn loaded_classes(&self) -> Vec<String>;

    fn retransform_supported(&self) -> bool {
        true
    }

    /// Trigger retransformation of already-loaded classes; each will come
    /// back through the manager's transform entry point.
    fn retransform(&self, names: &[String]) -> Result<(), String>;

    /// Replace loaded classes with the given class file bytes.
    fn redefine(&self, definitions: &[(String, Vec<u8>)]) -> Result<(), String>;
}
