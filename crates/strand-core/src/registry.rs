use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, StrandError};
use crate::traits::{Model, Registry, Tool};

/// In-memory registry guarded by a read/write lock. Names are unique.
pub struct MemoryRegistry<T> {
    kind: &'static str,
    entries: RwLock<HashMap<String, T>>,
}

pub type ModelRegistry = MemoryRegistry<Arc<dyn Model>>;
pub type ToolRegistry = MemoryRegistry<Arc<dyn Tool>>;

impl<T: Clone> MemoryRegistry<T> {
    /// `kind` labels lookup errors (e.g. "model", "tool", "flow").
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Register an entry. Fails if the name is already taken.
    pub fn register(&self, name: impl Into<String>, entry: T) -> Result<()> {
        let name = name.into();
        let mut entries = self.entries.write();
        if entries.contains_key(&name) {
            return Err(StrandError::AlreadyRegistered {
                kind: self.kind,
                name,
            });
        }
        entries.insert(name, entry);
        Ok(())
    }

    /// Unregister an entry by name.
    pub fn unregister(&self, name: &str) -> bool {
        self.entries.write().remove(name).is_some()
    }

    /// List registered names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<T: Clone + Send + Sync> Registry<T> for MemoryRegistry<T> {
    fn get(&self, name: &str) -> Result<T> {
        self.entries
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StrandError::NotFound {
                kind: self.kind,
                name: name.to_string(),
            })
    }

    fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }
}

impl MemoryRegistry<Arc<dyn Tool>> {
    /// Register a tool under its own name.
    pub fn register_tool(&self, tool: impl Tool) -> Result<()> {
        let name = tool.name().to_string();
        self.register(name, Arc::new(tool))
    }
}

impl MemoryRegistry<Arc<dyn Model>> {
    /// Register a model under its own name.
    pub fn register_model(&self, model: impl Model) -> Result<()> {
        let name = model.name().to_string();
        self.register(name, Arc::new(model))
    }
}

impl Default for MemoryRegistry<Arc<dyn Tool>> {
    fn default() -> Self {
        Self::new("tool")
    }
}

impl Default for MemoryRegistry<Arc<dyn Model>> {
    fn default() -> Self {
        Self::new("model")
    }
}
