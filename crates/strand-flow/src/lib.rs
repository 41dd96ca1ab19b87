pub mod builder;
pub mod context;
mod executor;
pub mod flow;
pub mod registries;
pub mod step;
pub mod validator;

pub use builder::FlowBuilder;
pub use context::{Context, ContextId, ContextValue};
pub use flow::{ExecutionPattern, Flow, FlowMetadata, FlowState, ResourceRequirements};
pub use registries::{FlowRegistry, Registries};
pub use step::{
    CapabilityRef, ConditionalStep, CustomStep, ModelStep, ParallelStep, Predicate, Step,
    StepConfig, StepFn, StepKind, ToolStep,
};
pub use validator::{DependencySource, DependencyValidator, ResolvedDependency};
