//! Workflow graph model: definitions, validation, building, and compilation.

pub mod builder;
pub mod definition;
pub mod registry;
pub mod validation;

pub use builder::WorkflowBuilder;
pub use definition::{Edge, GraphDefinition, NodeKind, NodeSpec, END};
pub use registry::{CompiledWorkflow, RegistryError, WorkflowRegistry};
pub use validation::{validate, ValidationError};
