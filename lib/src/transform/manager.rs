//! The transformer manager: registries plus the transformation pipeline.

use crate::classfile::{read_class, write_class};
use crate::mappings::{remap_class, MapRemapper};
use crate::provider::ClassProvider;
use crate::transform::annotations::parse_transformer;
use crate::transform::errors::{FailStrategy, TransformError};
use crate::transform::handlers::{
    default_handlers, AnnotationHandler, AsmHook, HandlerContext, HandlerPosition, HookShift,
};
use crate::transform::host::InstrumentationHost;
use crate::transform::targets::{InjectionTarget, TargetRegistry};
use crate::tree::ClassNode;
use crate::util::{dot, slash};
use std::collections::{HashMap, HashSet};
use std::process;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A transformer over raw class file bytes; `None` means unchanged.
pub type BytecodeTransformer = Arc<dyn Fn(&str, &[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// A transformer over the parsed class node of one specific class.
pub type RawTransformer = Arc<dyn Fn(&mut ClassNode) + Send + Sync>;

/// A consumer of the final bytes after all transformers ran.
pub type PostTransformer = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

struct ManagerState {
    provider: Arc<dyn ClassProvider>,
    remapper: MapRemapper,
    handlers: Vec<Box<dyn AnnotationHandler>>,
    targets: TargetRegistry,

    bytecode_transformers: Vec<BytecodeTransformer>,
    raw_transformers: HashMap<String, Vec<RawTransformer>>,
    post_transformers: Vec<PostTransformer>,
    /// Target class name (dot form) to registered transformer nodes, in
    /// registration order.
    transformers: HashMap<String, Vec<ClassNode>>,
    asm_hooks: HashMap<String, Vec<(HookShift, AsmHook)>>,

    registered_transformer_names: HashSet<String>,
    transformed_target_names: HashSet<String>,
    /// Inner classes whose access is widened on load so copied transformer
    /// bodies can reach them.
    open_classes: HashSet<String>,

    fail_strategy: FailStrategy,
    hotswap: bool,
    host: Option<Arc<dyn InstrumentationHost>>,
}

/// Orchestrates transformer registration and per-class transformation.
///
/// Registry reads take a shared lock and happen on every class load;
/// mutations take the exclusive lock and happen at startup or on hotswap.
pub struct TransformerManager {
    state: RwLock<ManagerState>,
    /// Classes currently being transformed on some thread, to cut
    /// re-entrant transformation short.
    in_flight: Mutex<HashSet<String>>,
}

impl TransformerManager {
    pub fn new(provider: Arc<dyn ClassProvider>) -> TransformerManager {
        TransformerManager::with_remapper(provider, MapRemapper::new())
    }

    /// A manager whose transformer registrations are remapped against the
    /// given (obfuscation) mappings.
    pub fn with_remapper(
        provider: Arc<dyn ClassProvider>,
        remapper: MapRemapper,
    ) -> TransformerManager {
        TransformerManager {
            state: RwLock::new(ManagerState {
                provider,
                remapper,
                handlers: default_handlers(),
                targets: TargetRegistry::with_defaults(),
                bytecode_transformers: vec![],
                raw_transformers: HashMap::new(),
                post_transformers: vec![],
                transformers: HashMap::new(),
                asm_hooks: HashMap::new(),
                registered_transformer_names: HashSet::new(),
                transformed_target_names: HashSet::new(),
                open_classes: HashSet::new(),
                fail_strategy: FailStrategy::Continue,
                hotswap: false,
                host: None,
            }),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ManagerState> {
        self.state.read().unwrap_or_else(|poison| poison.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ManagerState> {
        self.state.write().unwrap_or_else(|poison| poison.into_inner())
    }

    pub fn set_fail_strategy(&self, strategy: FailStrategy) {
        self.write().fail_strategy = strategy;
    }

    /// Add a transformer over raw bytes, run before any parsing.
    pub fn add_bytecode_transformer(&self, transformer: BytecodeTransformer) {
        self.write().bytecode_transformers.push(transformer);
    }

    /// Add a node-level transformer for one class (dot form name).
    pub fn add_raw_transformer(&self, class_name: &str, transformer: RawTransformer) {
        {
            let mut state = self.write();
            state
                .raw_transformers
                .entry(class_name.to_string())
                .or_default()
                .push(transformer);
            state.transformed_target_names.insert(class_name.to_string());
        }
        self.retransform_classes(Some(&HashSet::from([class_name.to_string()])));
    }

    /// Add a consumer of the final bytes, e.g. a class dumper.
    pub fn add_post_transformer(&self, transformer: PostTransformer) {
        self.write().post_transformers.push(transformer);
    }

    /// Register a raw hook running at the given end of the handler chain
    /// for one target class (dot form name).
    pub fn add_asm_hook(&self, class_name: &str, shift: HookShift, hook: AsmHook) {
        let mut state = self.write();
        state
            .asm_hooks
            .entry(class_name.to_string())
            .or_default()
            .push((shift, hook));
    }

    /// Slot a custom handler into the chain.
    pub fn add_custom_handler(
        &self,
        handler: Box<dyn AnnotationHandler>,
        position: HandlerPosition,
    ) {
        let mut state = self.write();
        position.insert(&mut state.handlers, handler);
    }

    /// Register an additional injection target kind for `@Target` use.
    pub fn add_injection_target(&self, name: &str, target: Arc<dyn InjectionTarget>) {
        self.write().targets.register(name, target);
    }

    /// Register transformer classes by name. A bare name registers one
    /// class and requires the `@Transformer` annotation; `pkg.*` registers
    /// every annotated class directly in the package and `pkg.**` every
    /// annotated class in the package and its subpackages.
    pub fn add_transformer(&self, name: &str) -> Result<(), TransformError> {
        let mut class_bytes: Vec<Vec<u8>> = vec![];
        let wildcard = name.ends_with(".*") || name.ends_with(".**");
        {
            let state = self.read();
            if let Some(package) = name.strip_suffix(".**") {
                let prefix = format!("{}.", package);
                for candidate in state.provider.class_names() {
                    if candidate.starts_with(&prefix) {
                        class_bytes.push(
                            state
                                .provider
                                .get_class(&candidate)
                                .map_err(|e| TransformError::Mapping(e.to_string()))?,
                        );
                    }
                }
            } else if let Some(package) = name.strip_suffix(".*") {
                let prefix = format!("{}.", package);
                for candidate in state.provider.class_names() {
                    if let Some(rest) = candidate.strip_prefix(&prefix) {
                        if !rest.contains('.') {
                            class_bytes.push(
                                state
                                    .provider
                                    .get_class(&candidate)
                                    .map_err(|e| TransformError::Mapping(e.to_string()))?,
                            );
                        }
                    }
                }
            } else {
                class_bytes.push(
                    state
                        .provider
                        .get_class(name)
                        .map_err(|e| TransformError::Mapping(e.to_string()))?,
                );
            }
        }

        for bytes in class_bytes {
            let node = read_class(&bytes)?;
            let node_name = node.name.clone();
            let targets = self.add_transformer_node_internal(node, !wildcard)?;
            if !targets.is_empty() {
                self.retransform_classes(Some(&targets));
            } else if !wildcard {
                log::warn!("transformer '{}' does not transform any classes", node_name);
            }
        }
        Ok(())
    }

    /// Register an already parsed transformer node; returns the affected
    /// target class names.
    pub fn add_transformer_node(
        &self,
        node: ClassNode,
    ) -> Result<HashSet<String>, TransformError> {
        let targets = self.add_transformer_node_internal(node, true)?;
        if !targets.is_empty() {
            self.retransform_classes(Some(&targets));
        }
        Ok(targets)
    }

    fn add_transformer_node_internal(
        &self,
        node: ClassNode,
        require_annotation: bool,
    ) -> Result<HashSet<String>, TransformError> {
        let Some(decl) = parse_transformer(&node) else {
            if require_annotation {
                return Err(TransformError::shape(
                    "<class>",
                    &node.name,
                    "is missing the @Transformer annotation",
                ));
            }
            return Ok(HashSet::new());
        };
        if decl.is_empty() {
            return Ok(HashSet::new());
        }

        let mut state = self.write();
        let mut targets: HashSet<String> = HashSet::new();
        for internal in &decl.types {
            targets.insert(dot(&state.remapper.map_class_name(internal)));
        }
        for raw_name in &decl.names {
            targets.insert(dot(&state.remapper.map_class_name(&slash(raw_name))));
        }

        for target in &targets {
            let list = state.transformers.entry(target.clone()).or_default();
            // re-registration replaces the previous entry in place
            list.retain(|existing| existing.name != node.name);
            list.push(node.clone());
        }
        state
            .transformed_target_names
            .extend(targets.iter().cloned());
        state.registered_transformer_names.insert(dot(&node.name));
        for inner in &node.inner_classes {
            if inner.name.starts_with(&format!("{}$", node.name)) {
                state.open_classes.insert(dot(&inner.name));
            }
        }
        Ok(targets)
    }

    /// Transform the bytecode of a class; the name is in the dot form.
    /// Returns `None` when the class is unchanged.
    pub fn transform(&self, name: &str, bytes: &[u8]) -> Option<Vec<u8>> {
        let state = self.read();
        let mut current: Vec<u8> = bytes.to_vec();
        let mut bytes_changed = false;

        for transformer in &state.bytecode_transformers {
            if let Some(new_bytes) = transformer(name, &current) {
                current = new_bytes;
                bytes_changed = true;
            }
        }

        let mut node: Option<ClassNode> = None;
        let parse = |bytes: &[u8]| -> Option<ClassNode> {
            match read_class(bytes) {
                Ok(node) => Some(node),
                Err(err) => {
                    log::error!("failed to parse class '{}': {}", name, err);
                    None
                }
            }
        };

        if state.open_classes.contains(name) {
            let mut parsed = parse(&current)?;
            parsed.access = crate::transform::handlers::open_access(parsed.access);
            for inner in &mut parsed.inner_classes {
                inner.access = crate::transform::handlers::open_access(inner.access);
            }
            node = Some(parsed);
        }

        if let Some(raw_transformers) = state.raw_transformers.get(name) {
            let parsed = match node.take() {
                Some(parsed) => Some(parsed),
                None => parse(&current),
            };
            let mut parsed = parsed?;
            for transformer in raw_transformers {
                transformer(&mut parsed);
            }
            node = Some(parsed);
        }

        if let Some(transformer_nodes) = state.transformers.get(name) {
            let parsed = match node.take() {
                Some(parsed) => Some(parsed),
                None => parse(&current),
            };
            let mut parsed = parsed?;

            // clone and remap each registered node; the registry entries
            // themselves stay untouched
            let mut prepared: Vec<ClassNode> = Vec::with_capacity(transformer_nodes.len());
            for registered in transformer_nodes {
                let mut clone = registered.clone();
                remap_class(&mut clone, &state.remapper);
                prepared.push(clone);
            }

            let hooks = state
                .asm_hooks
                .get(name)
                .map(|hooks| hooks.as_slice())
                .unwrap_or(&[]);
            let transformer_count = prepared.len();
            for handler in &state.handlers {
                for (index, transformer) in prepared.iter_mut().enumerate() {
                    let mut ctx = HandlerContext {
                        targets: &state.targets,
                        provider: &*state.provider,
                        target: &mut parsed,
                        transformer,
                        asm_hooks: hooks,
                        transformer_index: index,
                        transformer_count,
                    };
                    if let Err(err) = handler.transform(&mut ctx) {
                        if let TransformError::Mapping(message) = &err {
                            log::warn!("{}", message);
                            continue;
                        }
                        log::error!(
                            "handler '{}' failed to transform class '{}': {}",
                            handler.name(),
                            name,
                            err
                        );
                        match state.fail_strategy {
                            FailStrategy::Continue => {}
                            FailStrategy::Cancel => return None,
                            FailStrategy::Exit => process::exit(1),
                        }
                    }
                }
            }
            node = Some(parsed);
        }

        let Some(node) = node else {
            return bytes_changed.then_some(current);
        };

        let emitted = match write_class(&node) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::error!("failed to emit transformed class '{}': {}", name, err);
                match state.fail_strategy {
                    FailStrategy::Exit => process::exit(1),
                    _ => return None,
                }
            }
        };
        for post in &state.post_transformers {
            post(name, &emitted);
        }
        Some(emitted)
    }

    /// Host-facing entry point: takes the slash form name, guards against
    /// re-entrant loads and serves hotswapped transformers.
    pub fn transform_loaded(&self, slash_name: &str, bytes: &[u8]) -> Option<Vec<u8>> {
        let name = dot(slash_name);
        let _guard = ReentrancyGuard::enter(self, &name)?;

        let is_hotswap = {
            let state = self.read();
            state.hotswap && state.registered_transformer_names.contains(&name)
        };
        if is_hotswap {
            return self.hotswap_transformer(&name, bytes);
        }
        self.transform(&name, bytes)
    }

    /// Hook the instrumentation host; already-loaded target classes are
    /// retransformed immediately.
    pub fn hook_host(&self, host: Arc<dyn InstrumentationHost>, hotswap: bool) {
        {
            let mut state = self.write();
            state.host = Some(host);
            state.hotswap = hotswap;
        }
        self.retransform_classes(None);
    }

    fn retransform_classes(&self, targets: Option<&HashSet<String>>) {
        let (host, fail_strategy, affected) = {
            let state = self.read();
            let Some(host) = state.host.clone() else { return };
            if !host.retransform_supported() {
                return;
            }
            let affected: Vec<String> = host
                .loaded_classes()
                .into_iter()
                .filter(|loaded| match targets {
                    Some(targets) => targets.contains(loaded),
                    None => state.transformed_target_names.contains(loaded),
                })
                .collect();
            (host, state.fail_strategy, affected)
        };
        if affected.is_empty() {
            return;
        }
        if let Err(message) = host.retransform(&affected) {
            log::error!("failed to retransform classes '{}': {}", affected.join(", "), message);
            if fail_strategy == FailStrategy::Exit {
                process::exit(1);
            }
        }
    }

    /// Re-register a redefined transformer and push fresh bytecode for all
    /// of its targets; the class file handed back to the host is a stub
    /// (the real node only lives in the registry).
    fn hotswap_transformer(&self, name: &str, bytes: &[u8]) -> Option<Vec<u8>> {
        let result: Result<Vec<u8>, TransformError> = (|| {
            let node = read_class(bytes)?;
            let stub_source = node.clone();
            let targets = self.add_transformer_node_internal(node, true)?;
            self.redefine_classes(&targets)?;

            let mut stub = ClassNode::new(stub_source.name.clone(), stub_source.major_version);
            stub.super_name = stub_source.super_name.clone();
            Ok(write_class(&stub)?)
        })();
        match result {
            Ok(stub) => Some(stub),
            Err(err) => {
                log::error!("failed to hotswap transformer '{}': {}", name, err);
                None
            }
        }
    }

    fn redefine_classes(&self, targets: &HashSet<String>) -> Result<(), TransformError> {
        let (host, provider) = {
            let state = self.read();
            (state.host.clone(), state.provider.clone())
        };
        let Some(host) = host else { return Ok(()) };

        let mut definitions = vec![];
        for loaded in host.loaded_classes() {
            if !targets.contains(&loaded) {
                continue;
            }
            let original = provider
                .get_class(&loaded)
                .map_err(|e| TransformError::Mapping(e.to_string()))?;
            if let Some(transformed) = self.transform(&loaded, &original) {
                definitions.push((loaded, transformed));
            }
        }
        if definitions.is_empty() {
            return Ok(());
        }
        host.redefine(&definitions)
            .map_err(TransformError::Mapping)
    }
}

/// Removes the class from the in-flight set when the transformation ends.
struct ReentrancyGuard<'a> {
    manager: &'a TransformerManager,
    name: String,
}

impl<'a> ReentrancyGuard<'a> {
    fn enter(manager: &'a TransformerManager, name: &str) -> Option<ReentrancyGuard<'a>> {
        let mut in_flight = manager
            .in_flight
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        if !in_flight.insert(name.to_string()) {
            return None;
        }
        Some(ReentrancyGuard {
            manager,
            name: name.to_string(),
        })
    }
}

impl Drop for ReentrancyGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self
            .manager
            .in_flight
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        in_flight.remove(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MapClassProvider;
    use crate::transform::annotations;
    use crate::tree::{AnnotationNode, AnnotationValue};

    fn empty_manager() -> TransformerManager {
        TransformerManager::new(Arc::new(MapClassProvider::new()))
    }

    fn annotated_transformer(name: &str, target_desc: &str) -> ClassNode {
        let mut node = ClassNode::new(name, 52);
        node.invisible_annotations.push(
            AnnotationNode::new(annotations::TRANSFORMER).with(
                "value",
                AnnotationValue::Array(vec![AnnotationValue::Class(target_desc.to_string())]),
            ),
        );
        node
    }

    struct NoopHost;

    impl InstrumentationHost for NoopHost {
        fn loaded_classes(&self) -> Vec<String> {
            vec![]
        }

        fn retransform(&self, _names: &[String]) -> Result<(), String> {
            Ok(())
        }

        fn redefine(&self, _definitions: &[(String, Vec<u8>)]) -> Result<(), String> {
            Ok(())
        }
    }

    #[test]
    fn reentrancy_guard_blocks_nested_entry() {
        let manager = empty_manager();
        let outer = ReentrancyGuard::enter(&manager, "a.B");
        assert!(outer.is_some());
        assert!(ReentrancyGuard::enter(&manager, "a.B").is_none());
        drop(outer);
        assert!(ReentrancyGuard::enter(&manager, "a.B").is_some());
    }

    #[test]
    fn registering_without_annotation_fails() {
        let manager = empty_manager();
        let node = ClassNode::new("t/Plain", 52);
        assert!(manager.add_transformer_node(node).is_err());
    }

    #[test]
    fn registration_tracks_target_names() {
        let manager = empty_manager();
        let targets = manager
            .add_transformer_node(annotated_transformer("t/Hooks", "La/B;"))
            .unwrap();
        assert_eq!(targets, HashSet::from([String::from("a.B")]));
        let state = manager.read();
        assert!(state.registered_transformer_names.contains("t.Hooks"));
        assert!(state.transformed_target_names.contains("a.B"));
    }

    #[test]
    fn registered_targets_are_remapped() {
        let mut remapper = MapRemapper::new();
        remapper.add_class_mapping("a/B", "x/Y");
        let manager =
            TransformerManager::with_remapper(Arc::new(MapClassProvider::new()), remapper);
        let targets = manager
            .add_transformer_node(annotated_transformer("t/Hooks", "La/B;"))
            .unwrap();
        assert_eq!(targets, HashSet::from([String::from("x.Y")]));
    }

    #[test]
    fn hotswapped_transformer_returns_a_stub() {
        let manager = empty_manager();
        manager
            .add_transformer_node(annotated_transformer("t/Hooks", "La/B;"))
            .unwrap();
        manager.hook_host(Arc::new(NoopHost), true);

        let bytes = write_class(&annotated_transformer("t/Hooks", "La/B;")).unwrap();
        let stub = manager
            .transform_loaded("t/Hooks", &bytes)
            .expect("hotswap returns a stub class");
        let parsed = read_class(&stub).unwrap();
        assert_eq!(parsed.name, "t/Hooks");
        assert!(parsed.methods.is_empty());
        assert!(parsed.fields.is_empty());
    }
}
