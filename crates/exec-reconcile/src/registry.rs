use std::collections::HashMap;
use std::sync::Arc;

use crate::probe::MutationProbe;

/// Maps `(tool_namespace, tool_method)` to the probe that knows how to
/// check it, mirroring the reference durable-execution engine's
/// `WorkflowRegistry`: a plain map of boxed trait objects behind an
/// `Arc`, filled in once at startup and read-only afterward.
#[derive(Default, Clone)]
pub struct ProbeRegistry {
    probes: HashMap<(String, String), Arc<dyn MutationProbe>>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool_namespace: impl Into<String>, tool_method: impl Into<String>, probe: Arc<dyn MutationProbe>) {
        self.probes.insert((tool_namespace.into(), tool_method.into()), probe);
    }

    pub fn get(&self, tool_namespace: &str, tool_method: &str) -> Option<Arc<dyn MutationProbe>> {
        self.probes
            .get(&(tool_namespace.to_string(), tool_method.to_string()))
            .cloned()
    }
}
