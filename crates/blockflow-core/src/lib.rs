//! # blockflow-core
//!
//! A workflow execution engine. A workflow is a directed graph of *blocks*
//! (tool calls, agent interactions, routers, evaluators, conditions, bounded
//! loops). The engine orders blocks by dependency, runs independent blocks
//! concurrently in layers, interprets control-flow decisions to gate
//! downstream branches, resolves `<block.path>` and `{{VAR}}` references in
//! block parameters, and drives the tool-calling exchange with language-model
//! providers.
//!
//! The engine performs no I/O of its own: tools, the block catalog, and
//! provider drivers/transports are supplied by the host through the traits in
//! [`registry`] and [`provider`].

pub mod block;
pub mod context;
pub mod control;
pub mod error;
pub mod expr;
pub mod observability;
pub mod provider;
pub mod registry;
pub mod resolver;
pub mod runtime;
pub mod value;
pub mod workflow;

pub use context::{
    BlockLog, CancelHandle, CancelSignal, ExecutionContext, ExecutionResult, RunMetadata,
    cancel_pair,
};
pub use error::EngineError;
pub use provider::{
    ChatMessage, ChatRole, FunctionCallPayload, FunctionCallRequest, FunctionSpec, ProviderDriver,
    ProviderError, ProviderId, ProviderRegistry, ProviderRegistryBuilder, ProviderRequest,
    ProviderResponse, ProviderTransport, TokenUsage,
};
pub use registry::{BlockCatalog, CatalogEntry, ToolDescriptor, ToolOutcome, ToolParamSpec, ToolRegistry};
pub use runtime::Engine;
pub use workflow::{Block, BlockConfig, BlockMetadata, Connection, Loop, SerializedWorkflow};
