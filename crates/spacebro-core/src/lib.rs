//! # spacebro-core
//!
//! Event dispatch building blocks for spacebro clients.
//!
//! - **Hooks** - packer / unpacker pipelines folded over payloads by priority
//! - **Listeners** - per-event listener sets with once and wildcard support
//! - **Event** - event names, the wildcard key and delivered events
//!
//! ## Architecture
//!
//! ```text
//!  outgoing ──▶ packers ──▶ transport
//!
//!  transport ──▶ unpackers ──▶ ListenerRegistry ──▶ listeners
//!                                   │
//!                                   └─ no named set? ──▶ wildcard set
//! ```

pub mod event;
pub mod hooks;
pub mod listeners;

pub use event::{Event, EventKey, WILDCARD};
pub use hooks::{fold, Hook, HookContext, HookError, HookPipeline, HookResult};
pub use listeners::{ListenerRegistry, SubscriptionSet};
