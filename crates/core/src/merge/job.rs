//! Background merge job.
//!
//! The merge runs on its own tokio task. The caller gets stage updates on an
//! unbounded channel and exactly one [`MergeCompletion`] when the run ends.

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use super::{MergeOrchestrator, MergeOutcome, MergeSettings, MergeStage};
use crate::errors::{MergeCause, MergeError};
use crate::registry::ConfigRegistry;

/// Final report of a background merge.
#[derive(Debug)]
pub struct MergeCompletion {
    pub success: bool,
    pub message: String,
    /// Present when the run succeeded.
    pub outcome: Option<MergeOutcome>,
}

impl MergeCompletion {
    fn from_result(result: Result<MergeOutcome, MergeError>) -> Self {
        match result {
            Ok(outcome) => Self {
                success: true,
                message: "Update process completed successfully!".to_string(),
                outcome: Some(outcome),
            },
            Err(e) => Self {
                success: false,
                message: format!("Update failed: {}", e),
                outcome: None,
            },
        }
    }
}

/// Handle to a merge running in the background.
pub struct MergeJob {
    stages: mpsc::UnboundedReceiver<MergeStage>,
    completion: oneshot::Receiver<MergeCompletion>,
}

impl MergeJob {
    /// Next stage transition; `None` once the worker has finished.
    pub async fn next_stage(&mut self) -> Option<MergeStage> {
        self.stages.recv().await
    }

    /// Wait for the single completion message.
    pub async fn wait(self) -> MergeCompletion {
        match self.completion.await {
            Ok(completion) => completion,
            Err(_) => MergeCompletion::from_result(Err(MergeError::new(
                MergeStage::Failed,
                MergeCause::Worker("merge task ended without reporting".to_string()),
            ))),
        }
    }
}

/// Start a merge of `source` into `target` on a new tokio task.
pub fn spawn_merge<S, T>(source: S, target: T, settings: MergeSettings) -> MergeJob
where
    S: ConfigRegistry + 'static,
    T: ConfigRegistry + 'static,
{
    let (stage_tx, stage_rx) = mpsc::unbounded_channel();
    let (done_tx, done_rx) = oneshot::channel();

    tokio::spawn(async move {
        let result = MergeOrchestrator::new(&source, &target, settings)
            .with_progress(stage_tx)
            .run()
            .await;
        if done_tx.send(MergeCompletion::from_result(result)).is_err() {
            warn!("merge finished but nobody is waiting for the result");
        }
    });

    MergeJob {
        stages: stage_rx,
        completion: done_rx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_messages() {
        let failed = MergeCompletion::from_result(Err(MergeError::new(
            MergeStage::Upload,
            crate::errors::RegistryError::NotFound("x".into()),
        )));
        assert!(!failed.success);
        assert_eq!(
            failed.message,
            "Update failed: merge failed during upload: saved configuration 'x' not found"
        );
        assert!(failed.outcome.is_none());
    }
}
