//! Provider adapters and resolution for the drover runtime.
//!
//! One adapter per wire dialect, a static registry describing each canonical
//! backend, a resolver that maps agents (and task categories) to an adapter
//! plus model with fallback handling, and a concurrent rate-limit snapshot
//! cache fed by every successful call.

pub mod adapters;
pub mod provider;
pub mod ratelimit;
pub mod registry;
pub mod resolver;

pub use provider::{
    ChatMessage, ChatProvider, ChatRequest, ChatResponse, GenParams, ProviderError, Role,
    TerminalKind, ToolCall, ToolDefinition, Usage,
};
pub use ratelimit::{RateLimitSnapshot, SnapshotCache};
pub use resolver::{ChatError, Resolution, Resolver};
