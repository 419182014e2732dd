//! Packer / unpacker hook pipeline.
//!
//! A hook is a payload transform registered for one event name or for every
//! event. Packers run on outgoing events, unpackers on incoming ones. For a
//! given event the matching hooks run in descending priority order, ties in
//! registration order, each one seeing the output of the previous one.

use crate::event::EventKey;
use spacebro_protocol::Payload;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

/// Hook errors.
#[derive(Debug, Error)]
pub enum HookError {
    /// The hook refused the payload.
    #[error("Hook rejected payload: {0}")]
    Rejected(String),

    /// The hook failed with an underlying error.
    #[error("Hook failed: {0}")]
    Failed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl HookError {
    /// Create a rejection with a message.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        HookError::Rejected(message.into())
    }
}

/// What a hook returns: a replacement payload, or `None` to keep the current one.
pub type HookResult = Result<Option<Payload>, HookError>;

/// Input handed to a hook.
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    /// Name of the event being packed or unpacked.
    pub event_name: &'a str,
    /// Payload as left by the previous hook.
    pub data: &'a Payload,
}

type HookFn = dyn Fn(&HookContext<'_>) -> HookResult + Send + Sync;

/// A registered payload transform.
#[derive(Clone)]
pub struct Hook {
    /// Events this hook applies to.
    pub event: EventKey,
    /// Ordering priority; higher runs first.
    pub priority: i32,
    handler: Arc<HookFn>,
}

impl Hook {
    /// Create a hook with priority 0.
    pub fn new<F>(event: impl Into<EventKey>, handler: F) -> Self
    where
        F: Fn(&HookContext<'_>) -> HookResult + Send + Sync + 'static,
    {
        Self {
            event: event.into(),
            priority: 0,
            handler: Arc::new(handler),
        }
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Run the hook.
    ///
    /// # Errors
    ///
    /// Returns whatever error the handler returns.
    pub fn apply(&self, ctx: &HookContext<'_>) -> HookResult {
        (self.handler)(ctx)
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("event", &self.event)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// An ordered list of hooks.
#[derive(Debug, Clone, Default)]
pub struct HookPipeline {
    hooks: Vec<Hook>,
}

impl HookPipeline {
    /// Create an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook.
    pub fn add(&mut self, hook: Hook) {
        trace!(event = %hook.event, priority = hook.priority, "Hook registered");
        self.hooks.push(hook);
    }

    /// Register a handler; a missing priority counts as 0.
    pub fn register<F>(&mut self, handler: F, priority: Option<i32>, event: impl Into<EventKey>)
    where
        F: Fn(&HookContext<'_>) -> HookResult + Send + Sync + 'static,
    {
        self.add(Hook::new(event, handler).with_priority(priority.unwrap_or(0)));
    }

    /// Number of registered hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Check if no hooks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Remove every hook.
    pub fn clear(&mut self) {
        self.hooks.clear();
    }

    /// Hooks applying to `event_name`, highest priority first.
    ///
    /// The sort is stable, so equal priorities keep registration order.
    #[must_use]
    pub fn select(&self, event_name: &str) -> Vec<Hook> {
        let mut selected: Vec<Hook> = self
            .hooks
            .iter()
            .filter(|hook| hook.event.matches(event_name))
            .cloned()
            .collect();
        selected.sort_by(|a, b| b.priority.cmp(&a.priority));
        selected
    }

    /// Select and fold in one step.
    ///
    /// # Errors
    ///
    /// Returns the first hook error; later hooks do not run.
    pub fn run(&self, event_name: &str, payload: Payload) -> Result<Payload, HookError> {
        fold(&self.select(event_name), event_name, payload)
    }
}

/// Thread `payload` through `hooks` in order.
///
/// # Errors
///
/// Returns the first hook error; later hooks do not run.
pub fn fold(hooks: &[Hook], event_name: &str, payload: Payload) -> Result<Payload, HookError> {
    let mut current = payload;
    for hook in hooks {
        let ctx = HookContext {
            event_name,
            data: &current,
        };
        if let Some(replacement) = hook.apply(&ctx)? {
            trace!(event = %event_name, priority = hook.priority, "Hook replaced payload");
            current = replacement;
        }
    }
    Ok(current)
}
