//! Toolbridge: sandboxed tool invocation for locally hosted language models.
//!
//! A model's free-text reply may contain a single tool call between sentinel
//! markers. Toolbridge parses that call, checks it against an allowlist and
//! the provider's advertised catalog, forwards it to a tool-provider
//! subprocess over stdio, and feeds the result back to the model.
//!
//! The filesystem provider side lives in [`workspace`]: every operation
//! resolves caller paths through a [`sandbox::PathSandbox`] so that nothing
//! outside the configured workspace root is ever read or written.

pub mod catalog;
pub mod config;
pub mod conversation;
pub mod gate;
pub mod model;
pub mod parser;
pub mod prompt;
pub mod sandbox;
pub mod session;
pub mod workspace;

pub use catalog::{Catalog, ToolDescriptor};
pub use config::{Config, ConfigError};
pub use conversation::{Conversation, TurnError, TurnOutcome};
pub use gate::{Allowlist, DenyReason, GateDecision, authorize};
pub use model::{ChatMessage, ChatModel, ChatRole, HttpChatModel, ModelError};
pub use parser::{ParseError, ToolCall, parse_reply};
pub use prompt::ClockZone;
pub use sandbox::{Follow, PathSandbox, SandboxError};
pub use session::{
    LaunchError, ProviderLaunch, SessionError, SessionState, ToolInvoker, ToolOutput, ToolSession,
};
pub use workspace::{DirEntry, EntryKind, FsError, Workspace};
