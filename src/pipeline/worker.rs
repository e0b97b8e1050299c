//! Worker pool running the orchestrator loop

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::orchestrator::Orchestrator;
use super::types::Outcome;

/// Pause after a store or queue failure
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// A fixed set of tasks, each repeatedly calling `process_next`
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(orchestrator: Arc<Orchestrator>, workers: usize, idle_poll: Duration) -> Self {
        let (shutdown, rx) = watch::channel(false);

        let handles = (0..workers.max(1))
            .map(|worker| {
                let orchestrator = orchestrator.clone();
                let rx = rx.clone();
                tokio::spawn(run_worker(worker, orchestrator, idle_poll, rx))
            })
            .collect::<Vec<_>>();

        tracing::info!(workers = handles.len(), "Pipeline workers started");

        Self { shutdown, handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop taking new work and wait for in-flight steps to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        futures::future::join_all(self.handles).await;
        tracing::info!("Pipeline workers stopped");
    }
}

async fn run_worker(
    worker: usize,
    orchestrator: Arc<Orchestrator>,
    idle_poll: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!(worker, "Worker started");

    while !*shutdown.borrow() {
        let pause = match orchestrator.process_next().await {
            Ok(Outcome::Idle) => idle_poll,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!(worker, error = %e, "Pipeline step failed");
                ERROR_BACKOFF
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = shutdown.changed() => {}
        }
    }

    tracing::debug!(worker, "Worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_memory_pool, DocumentStore, SqliteDocumentStore};
    use crate::document::{Document, PipelineState};
    use crate::pipeline::{OrchestratorSettings, StageHandler, StageResult};
    use crate::queue::InMemoryQueue;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl StageHandler for Echo {
        async fn run(&self, document: &Document) -> StageResult {
            StageResult::Success(document.source_ref.clone())
        }
    }

    #[tokio::test]
    async fn test_pool_processes_and_shuts_down() {
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::new(create_memory_pool().await));
        let orchestrator = Arc::new(Orchestrator::new(
            store,
            Arc::new(InMemoryQueue::new()),
            Arc::new(Echo),
            Arc::new(Echo),
            OrchestratorSettings::default(),
        ));

        let pool = WorkerPool::spawn(orchestrator.clone(), 2, Duration::from_millis(5));
        assert_eq!(pool.len(), 2);

        let id = orchestrator
            .enqueue("https://arxiv.org/pdf/1706.03762")
            .await
            .unwrap();

        let mut state = PipelineState::Queued;
        for _ in 0..200 {
            state = orchestrator.get_status(id).await.unwrap().state;
            if state.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(state, PipelineState::Complete);

        tokio::time::timeout(Duration::from_secs(5), pool.shutdown())
            .await
            .unwrap();
    }
}
