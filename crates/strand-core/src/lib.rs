pub mod config;
pub mod error;
pub mod event;
pub mod registry;
pub mod traits;
pub mod types;

pub use config::StrandConfig;
pub use error::{Result, StrandError};
pub use event::EventBus;
pub use registry::{MemoryRegistry, ModelRegistry, ToolRegistry};
pub use types::*;
