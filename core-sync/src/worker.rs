//! Queue Worker
//!
//! Single-consumer loop that drains the processing queue: claim, classify,
//! record the outcome. Classification itself lives behind a trait so the
//! loop is testable without a model in reach.

use crate::error::Result;
use crate::queue::{ProcessingQueue, QueueItem};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of a successful classification.
#[derive(Debug, Clone)]
pub struct Classification {
    pub tokens_used: Option<i64>,
    pub model: String,
}

/// Downstream document analysis. Errors are returned as plain strings; the
/// queue stores them verbatim as `last_error`.
#[async_trait]
pub trait DocumentClassifier: Send + Sync {
    async fn classify(&self, item: &QueueItem) -> std::result::Result<Classification, String>;
}

pub struct QueueWorker {
    queue: Arc<ProcessingQueue>,
    classifier: Arc<dyn DocumentClassifier>,
    poll_interval: Duration,
}

impl QueueWorker {
    pub fn new(queue: Arc<ProcessingQueue>, classifier: Arc<dyn DocumentClassifier>) -> Self {
        Self {
            queue,
            classifier,
            poll_interval: Duration::from_secs(5),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Drain the queue until cancelled. Claim failures are logged and
    /// retried on the next poll rather than killing the loop.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("Queue worker started");
        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.step().await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Queue worker step failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }
        info!("Queue worker stopped");
    }

    /// Process at most one item. Returns false when the queue was empty.
    async fn step(&self) -> Result<bool> {
        let Some(item) = self.queue.claim_next().await? else {
            return Ok(false);
        };

        debug!(item_id = %item.id, document_id = %item.document_id, "Classifying document");
        match self.classifier.classify(&item).await {
            Ok(outcome) => {
                self.queue
                    .complete(&item, outcome.tokens_used, Some(&outcome.model))
                    .await?;
            }
            Err(message) => {
                self.queue.fail(&item, &message).await?;
            }
        }
        Ok(true)
    }
}
