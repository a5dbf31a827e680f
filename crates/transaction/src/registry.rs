//! Action name → reversal handler mapping.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use ledger::CompensationEntry;

/// Error type returned by reversal handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by reversal handlers.
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Semantically undoes one recorded local write.
///
/// Handlers may be invoked more than once for the same entry when an earlier
/// run failed part-way, so they should be idempotent.
#[async_trait]
pub trait CompensationHandler: Send + Sync {
    async fn compensate(&self, entry: &CompensationEntry) -> HandlerResult;
}

/// Adapter turning an async closure into a [`CompensationHandler`].
pub struct HandlerFn<F>(F);

/// Wraps a closure taking an owned entry as a handler.
///
/// ```ignore
/// registry.register("create", handler_fn(move |entry| {
///     let store = store.clone();
///     async move { store.delete(&entry.target_id).await.map_err(Into::into) }
/// }));
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(CompensationEntry) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> CompensationHandler for HandlerFn<F>
where
    F: Fn(CompensationEntry) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn compensate(&self, entry: &CompensationEntry) -> HandlerResult {
        (self.0)(entry.clone()).await
    }
}

/// Explicit table of reversal handlers for one participant.
///
/// Built at startup and handed to the runner; handlers must be registered
/// before any outcome is consumed.
#[derive(Clone, Default)]
pub struct CompensationRegistry {
    handlers: HashMap<String, Arc<dyn CompensationHandler>>,
}

impl CompensationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a reversal handler to an action name.
    ///
    /// Registering the same action twice replaces the earlier handler.
    pub fn register<H>(&mut self, action: impl Into<String>, handler: H) -> &mut Self
    where
        H: CompensationHandler + 'static,
    {
        let action = action.into();
        if self
            .handlers
            .insert(action.clone(), Arc::new(handler))
            .is_some()
        {
            tracing::warn!(%action, "compensation handler replaced");
        }
        self
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with_handler<H>(mut self, action: impl Into<String>, handler: H) -> Self
    where
        H: CompensationHandler + 'static,
    {
        self.register(action, handler);
        self
    }

    pub fn get(&self, action: &str) -> Option<Arc<dyn CompensationHandler>> {
        self.handlers.get(action).cloned()
    }

    pub fn contains(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    /// Registered action names, sorted.
    pub fn actions(&self) -> Vec<&str> {
        let mut actions: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        actions.sort_unstable();
        actions
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for CompensationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompensationRegistry")
            .field("actions", &self.actions())
            .finish()
    }
}
