//! Per-run mutable state: block outputs, the log trace, run metadata, and
//! the run-scoped cancellation pair.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use uuid::Uuid;

/// One record per block invocation, appended in completion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockLog {
    pub block_id: String,
    pub block_title: String,
    pub block_type: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Wall-clock bounds of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// What `Engine::execute` returns. Failures carry the error string and the
/// logs accumulated up to the failing block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    /// Output of the most recently completed block, in scheduler order.
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub logs: Vec<BlockLog>,
    pub metadata: RunMetadata,
}

/// Shared per-run state. Block states are written concurrently by layer
/// siblings, so the map is a `DashMap`; the log vector is mutex-guarded and
/// append-only. The environment map is read-only for the whole run.
pub struct ExecutionContext {
    workflow_id: String,
    run_id: Uuid,
    block_states: DashMap<String, Value>,
    block_logs: Mutex<Vec<BlockLog>>,
    environment: HashMap<String, String>,
    started_at: DateTime<Utc>,
}

impl ExecutionContext {
    pub fn new(
        workflow_id: impl Into<String>,
        initial_block_states: HashMap<String, Value>,
        environment: HashMap<String, String>,
    ) -> Self {
        let block_states = DashMap::new();
        for (id, state) in initial_block_states {
            block_states.insert(id, state);
        }
        Self {
            workflow_id: workflow_id.into(),
            run_id: Uuid::new_v4(),
            block_states,
            block_logs: Mutex::new(Vec::new()),
            environment,
            started_at: Utc::now(),
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Most recent output of a block, if it has one (loops overwrite).
    pub fn state(&self, block_id: &str) -> Option<Value> {
        self.block_states.get(block_id).map(|v| v.clone())
    }

    pub fn set_state(&self, block_id: &str, output: Value) {
        self.block_states.insert(block_id.to_string(), output);
    }

    pub fn environment(&self, name: &str) -> Option<&str> {
        self.environment.get(name).map(String::as_str)
    }

    /// Append one invocation record to the trace, mirroring it as a
    /// structured tracing event.
    pub fn push_log(&self, log: BlockLog) {
        crate::observability::record_block_log(&log);
        self.block_logs
            .lock()
            .expect("block log mutex poisoned")
            .push(log);
    }

    /// Snapshot of the log trace so far.
    pub fn logs(&self) -> Vec<BlockLog> {
        self.block_logs
            .lock()
            .expect("block log mutex poisoned")
            .clone()
    }
}

/// Signals cancellation of a run. Cloneable; the first `cancel` wins.
#[derive(Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiving side handed to `Engine::execute_with_signal`.
#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. If every handle is dropped
    /// without cancelling, this never resolves.
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Create a connected cancellation pair for one run.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}
