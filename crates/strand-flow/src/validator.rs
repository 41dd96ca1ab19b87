//! Dependency resolution for flows.
//!
//! Each declared dependency name is looked up in the flow, model, and tool
//! registries, in that order. A name found nowhere is an error; a name found
//! in several registries resolves to the first match (or is rejected in
//! strict mode). Flow dependencies are followed transitively so cycles are
//! caught before anything runs.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use strand_core::error::{Result, StrandError};
use tracing::{debug, warn};

use crate::flow::Flow;
use crate::registries::Registries;

/// Which registry a dependency resolved in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencySource {
    Flow,
    Model,
    Tool,
}

impl DependencySource {
    /// Lookup order.
    const ORDER: [DependencySource; 3] = [Self::Flow, Self::Model, Self::Tool];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flow => "flow",
            Self::Model => "model",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for DependencySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedDependency {
    pub name: String,
    pub source: DependencySource,
}

pub struct DependencyValidator<'a> {
    registries: &'a Registries,
    strict: bool,
}

impl<'a> DependencyValidator<'a> {
    pub fn new(registries: &'a Registries) -> Self {
        Self {
            registries,
            strict: false,
        }
    }

    /// Reject names present in more than one registry instead of taking the first.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Resolve every dependency, check resource requirements, and detect cycles.
    pub fn validate(&self, flow: &Flow) -> Result<Vec<ResolvedDependency>> {
        let resolved = flow
            .dependencies()
            .iter()
            .map(|dep| self.resolve(flow.name(), dep))
            .collect::<Result<Vec<_>>>()?;
        self.check_requirements(flow)?;
        self.check_cycles(flow)?;
        debug!(flow = %flow.name(), dependencies = resolved.len(), "Dependencies resolved");
        Ok(resolved)
    }

    pub fn resolve(&self, flow: &str, dependency: &str) -> Result<ResolvedDependency> {
        let found: Vec<DependencySource> = DependencySource::ORDER
            .into_iter()
            .filter(|source| self.contains(*source, dependency))
            .collect();

        match found.as_slice() {
            [] => Err(StrandError::DependencyMissing {
                flow: flow.to_string(),
                dependency: dependency.to_string(),
            }),
            [only] => Ok(ResolvedDependency {
                name: dependency.to_string(),
                source: *only,
            }),
            [first, ..] => {
                let registries: Vec<&'static str> = found.iter().map(|s| s.as_str()).collect();
                if self.strict {
                    return Err(StrandError::DependencyAmbiguous {
                        flow: flow.to_string(),
                        dependency: dependency.to_string(),
                        registries,
                    });
                }
                warn!(
                    flow,
                    dependency,
                    registries = ?registries,
                    chosen = %first,
                    "Dependency name resolves in several registries"
                );
                Ok(ResolvedDependency {
                    name: dependency.to_string(),
                    source: *first,
                })
            }
        }
    }

    fn contains(&self, source: DependencySource, name: &str) -> bool {
        match source {
            DependencySource::Flow => self.registries.flows.contains(name),
            DependencySource::Model => self.registries.models.contains(name),
            DependencySource::Tool => self.registries.tools.contains(name),
        }
    }

    fn check_requirements(&self, flow: &Flow) -> Result<()> {
        let requirements = flow.requirements();
        for tool in &requirements.tools {
            if !self.registries.tools.contains(tool) {
                return Err(StrandError::DependencyMissing {
                    flow: flow.name().to_string(),
                    dependency: tool.clone(),
                });
            }
        }
        for name in &requirements.models {
            let model = self.registries.models.get(name).map_err(|_| {
                StrandError::DependencyMissing {
                    flow: flow.name().to_string(),
                    dependency: name.clone(),
                }
            })?;
            if requirements.vision && !model.capabilities().vision {
                return Err(StrandError::Validation(format!(
                    "flow '{}' needs vision but model '{}' does not support it",
                    flow.name(),
                    name
                )));
            }
        }
        Ok(())
    }

    fn check_cycles(&self, flow: &Flow) -> Result<()> {
        let mut path = vec![flow.name().to_string()];
        let mut done = HashSet::new();
        self.visit(flow.dependencies(), &mut path, &mut done)
    }

    /// Depth-first walk over flow dependencies. `path` is the current chain.
    fn visit(
        &self,
        dependencies: &[String],
        path: &mut Vec<String>,
        done: &mut HashSet<String>,
    ) -> Result<()> {
        for dep in dependencies {
            // Only flow dependencies form edges; models and tools are leaves.
            if done.contains(dep) || !self.registries.flows.contains(dep) {
                continue;
            }
            if let Some(pos) = path.iter().position(|p| p == dep) {
                let mut cycle = path[pos..].to_vec();
                cycle.push(dep.clone());
                return Err(StrandError::DependencyCycle { path: cycle });
            }
            let next = self.registries.flows.get(dep)?;
            path.push(dep.clone());
            self.visit(next.dependencies(), path, done)?;
            path.pop();
            done.insert(dep.clone());
        }
        Ok(())
    }
}
