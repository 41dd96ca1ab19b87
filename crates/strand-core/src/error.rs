use std::fmt;

use thiserror::Error;

use crate::types::ValueKind;

#[derive(Debug, Error)]
pub enum StrandError {
    // Input errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Lifecycle errors
    #[error("Flow not initialized: {0}")]
    NotInitialized(String),

    #[error("Flow already initialized: {0}")]
    AlreadyInitialized(String),

    #[error("Flow has been shut down: {0}")]
    ShutDown(String),

    // Dependency errors
    #[error("Flow {flow}: missing dependency '{dependency}'")]
    DependencyMissing { flow: String, dependency: String },

    #[error("Flow {flow}: dependency '{dependency}' is ambiguous (found in {})", .registries.join(", "))]
    DependencyAmbiguous {
        flow: String,
        dependency: String,
        registries: Vec<&'static str>,
    },

    #[error("Dependency cycle: {}", .path.join(" -> "))]
    DependencyCycle { path: Vec<String> },

    // Step errors
    #[error("Step '{step}' failed: {source}")]
    StepExecution {
        step: String,
        #[source]
        source: Box<StrandError>,
    },

    #[error("Parallel step '{step}' failed: {failures}")]
    ParallelAggregate { step: String, failures: StepFailures },

    #[error("Step failed: {0}")]
    Step(String),

    // Context errors
    #[error("Context key '{key}' holds {actual}, expected {expected}")]
    ContextType {
        key: String,
        expected: ValueKind,
        actual: ValueKind,
    },

    #[error("Context key not found: {0}")]
    ContextKeyNotFound(String),

    // Cancellation
    #[error("Execution cancelled")]
    Cancelled,

    #[error("Deadline of {timeout_ms}ms exceeded: {scope}")]
    DeadlineExceeded { scope: String, timeout_ms: u64 },

    // Capability errors
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} already registered: {name}")]
    AlreadyRegistered { kind: &'static str, name: String },

    #[error("Model request failed: {0}")]
    ModelRequest(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StrandError {
    /// Wrap an error with the identity of the step that produced it.
    pub fn in_step(step: impl Into<String>, source: StrandError) -> Self {
        Self::StepExecution {
            step: step.into(),
            source: Box::new(source),
        }
    }

    /// True for `Cancelled` and `DeadlineExceeded`, looking through step wrappers.
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled | Self::DeadlineExceeded { .. } => true,
            Self::StepExecution { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }

    /// Name of the outermost step this error is attributed to.
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            Self::StepExecution { step, .. } | Self::ParallelAggregate { step, .. } => Some(step),
            _ => None,
        }
    }

    /// Innermost error once all `StepExecution` wrappers are peeled off.
    pub fn root_cause(&self) -> &StrandError {
        match self {
            Self::StepExecution { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// A single failed sub-step inside a parallel fan-out.
#[derive(Debug)]
pub struct StepFailure {
    pub step: String,
    pub error: StrandError,
}

/// Failures collected from a parallel step, in declared sub-step order.
#[derive(Debug, Default)]
pub struct StepFailures(pub Vec<StepFailure>);

impl StepFailures {
    pub fn steps(&self) -> Vec<&str> {
        self.0.iter().map(|f| f.step.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for StepFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "[{}] {}", failure.step, failure.error)?;
        }
        Ok(())
    }
}

pub type Result<T> = std::result::Result<T, StrandError>;
