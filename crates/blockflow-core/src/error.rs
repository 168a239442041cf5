//! Engine error kinds. Every fatal condition fails its block, appends a
//! failure log record, and aborts the run; the message surfaces as
//! `ExecutionResult::error`.

use thiserror::Error;

use crate::provider::ProviderError;

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// A scheduled id is absent from the workflow's block list.
    #[error("block not found: {0}")]
    BlockNotFound(String),
    /// A disabled block reached the runner; the scheduler must filter these.
    #[error("disabled block was scheduled: {0}")]
    DisabledBlock(String),
    #[error("tool not found: {0}")]
    ToolNotFound(String),
    #[error("tool {tool} failed: {message}")]
    ToolFailed { tool: String, message: String },
    /// A `<ref.path>` names no block by id or normalized title.
    #[error("reference to unknown block: {0}")]
    UnknownReference(String),
    #[error("reference to disabled block: {0}")]
    DisabledReference(String),
    #[error("environment variable not set: {0}")]
    MissingEnvironment(String),
    #[error("invalid path \"{path}\" into output of block {block}: {reason}")]
    InvalidPath {
        block: String,
        path: String,
        reason: String,
    },
    /// A router/evaluator response matched no outgoing target id.
    #[error("block {decider} returned an invalid decision: {decision:?}")]
    BadDecision { decider: String, decision: String },
    #[error("no condition matched and no else branch is present")]
    NoConditionMatch,
    /// Condition blocks require exactly one non-condition predecessor.
    #[error("condition block {0} requires exactly one non-condition predecessor")]
    ConditionSource(String),
    #[error("invalid condition configuration: {0}")]
    ConditionConfig(String),
    #[error("condition expression error: {0}")]
    Expression(String),
    /// The agent's final content did not satisfy the requested response format.
    #[error("response did not match the requested format: {0}")]
    ResponseFormat(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("run cancelled")]
    Cancelled,
}
