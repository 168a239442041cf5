//! Tracing surface of the engine. The crate only emits; installing a
//! subscriber is the host's job, since blockflow-core performs no I/O of
//! its own.
//!
//! Every run executes inside a `workflow_run` span carrying `workflow_id`
//! and `run_id`, so host subscribers can correlate block events across
//! concurrent runs. Each appended [`BlockLog`] record is mirrored as a
//! structured event with the same fields.

use tracing::{Span, info_span};
use uuid::Uuid;

use crate::context::BlockLog;

/// Span wrapping one engine run; parents every event emitted during it.
pub fn run_span(workflow_id: &str, run_id: Uuid) -> Span {
    info_span!("workflow_run", workflow_id, run_id = %run_id)
}

/// Mirror a block invocation record as a structured event. Failures are
/// warnings; completions stay at debug so block-level noise is opt-in.
pub fn record_block_log(log: &BlockLog) {
    if log.success {
        tracing::debug!(
            block_id = %log.block_id,
            block_type = %log.block_type,
            duration_ms = log.duration_ms,
            "block completed"
        );
    } else {
        tracing::warn!(
            block_id = %log.block_id,
            block_type = %log.block_type,
            duration_ms = log.duration_ms,
            error = log.error.as_deref().unwrap_or("unknown"),
            "block failed"
        );
    }
}
