//! Background execution of agent runs.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::agent::Agent;
use super::types::{RunId, RunResult};
use crate::error::AgentError;

/// Spawns agent runs onto the tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct AgentRunner;

impl AgentRunner {
    /// Start `task` on its own task. The run proceeds (and cleans up) even if
    /// the returned handle is dropped.
    pub fn start(mut agent: Agent, task: impl Into<String>) -> RunHandle {
        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let task = task.into();
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            let result = agent.run_as(run_id, &token, &task).await;
            (result, agent)
        });
        RunHandle { run_id, cancel, join }
    }
}

/// Handle for an in-flight run.
#[derive(Debug)]
pub struct RunHandle {
    run_id: RunId,
    cancel: CancellationToken,
    join: JoinHandle<(RunResult, Agent)>,
}

impl RunHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Request cancellation. The run stops at its next suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this run; clones can be moved to other tasks.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn wait(self) -> RunResult {
        let run_id = self.run_id;
        match self.finish().await {
            Ok((result, _agent)) => result,
            Err(e) => RunResult::failed(run_id, e.to_string()),
        }
    }

    /// Wait for the run and take back the agent for inspection or reuse.
    pub async fn finish(self) -> Result<(RunResult, Agent), AgentError> {
        self.join
            .await
            .map_err(|e| AgentError::InvalidState(format!("run task ended abnormally: {e}")))
    }
}
