use std::sync::Arc;

use strand_core::registry::{MemoryRegistry, ModelRegistry, ToolRegistry};
use strand_core::traits::{Model, Registry, Tool};

use crate::flow::Flow;

/// Registry of flows, used to resolve flow-to-flow dependencies.
pub type FlowRegistry = MemoryRegistry<Arc<Flow>>;

/// The three lookup tables a flow resolves dependencies against.
#[derive(Clone)]
pub struct Registries {
    pub flows: Arc<dyn Registry<Arc<Flow>>>,
    pub models: Arc<dyn Registry<Arc<dyn Model>>>,
    pub tools: Arc<dyn Registry<Arc<dyn Tool>>>,
}

impl Registries {
    pub fn new(
        flows: Arc<dyn Registry<Arc<Flow>>>,
        models: Arc<dyn Registry<Arc<dyn Model>>>,
        tools: Arc<dyn Registry<Arc<dyn Tool>>>,
    ) -> Self {
        Self {
            flows,
            models,
            tools,
        }
    }

    /// Empty in-memory registries.
    pub fn empty() -> Self {
        Self {
            flows: Arc::new(FlowRegistry::new("flow")),
            models: Arc::new(ModelRegistry::default()),
            tools: Arc::new(ToolRegistry::default()),
        }
    }

    pub fn with_flows(mut self, flows: Arc<dyn Registry<Arc<Flow>>>) -> Self {
        self.flows = flows;
        self
    }

    pub fn with_models(mut self, models: Arc<dyn Registry<Arc<dyn Model>>>) -> Self {
        self.models = models;
        self
    }

    pub fn with_tools(mut self, tools: Arc<dyn Registry<Arc<dyn Tool>>>) -> Self {
        self.tools = tools;
        self
    }
}

impl Default for Registries {
    fn default() -> Self {
        Self::empty()
    }
}
