//! Pre/post hook declarations
//!
//! A hook receives the mutable [`OperationContext`] and may return a value.
//! Configuration accepts a single hook or an ordered list; both normalize to a
//! [`HookList`] when the layer is built, so the orchestrator only ever walks a
//! sequence.

use crate::operation::context::OperationContext;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// A step executed before or after the store operation
///
/// Implement this directly for hooks that need to await (e.g. a hook that
/// queries another entity through the context's store). Synchronous closures
/// can be wrapped with [`hook`].
#[async_trait]
pub trait Hook: Send + Sync {
    async fn call(&self, ctx: &mut OperationContext) -> Result<Option<Value>>;
}

/// Adapter turning a synchronous closure into a [`Hook`]
pub struct FnHook<F>(F);

#[async_trait]
impl<F> Hook for FnHook<F>
where
    F: Fn(&mut OperationContext) -> Result<Option<Value>> + Send + Sync,
{
    async fn call(&self, ctx: &mut OperationContext) -> Result<Option<Value>> {
        (self.0)(ctx)
    }
}

/// Wrap a closure as a shareable hook
///
/// ```rust,ignore
/// let stamp = hook(|ctx| {
///     ctx.set_value("owner_id", json!(42));
///     Ok(None)
/// });
/// ```
pub fn hook<F>(f: F) -> Arc<dyn Hook>
where
    F: Fn(&mut OperationContext) -> Result<Option<Value>> + Send + Sync + 'static,
{
    Arc::new(FnHook(f))
}

/// Ordered hooks of one phase
#[derive(Clone, Default)]
pub struct HookList(Vec<Arc<dyn Hook>>);

impl HookList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Hook>> {
        self.0.iter()
    }
}

impl fmt::Debug for HookList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HookList({} hooks)", self.0.len())
    }
}

impl From<Arc<dyn Hook>> for HookList {
    fn from(hook: Arc<dyn Hook>) -> Self {
        Self(vec![hook])
    }
}

impl From<Vec<Arc<dyn Hook>>> for HookList {
    fn from(hooks: Vec<Arc<dyn Hook>>) -> Self {
        Self(hooks)
    }
}

impl FromIterator<Arc<dyn Hook>> for HookList {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Hook>>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
