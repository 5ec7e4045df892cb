//! Operation life cycle: context, hooks and the orchestrating pipeline

pub mod context;
pub mod hooks;
pub mod pipeline;

pub use context::{OperationContext, PipelineState};
pub use hooks::{FnHook, Hook, HookList, hook};
pub use pipeline::{Resource, ResourceRequest, ResourceResponse};
