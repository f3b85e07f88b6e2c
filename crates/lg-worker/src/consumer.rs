//! Queue consumer: long-poll loop, batch processing and acknowledgement.
//!
//! Shutdown: [`QueueConsumer::shutdown`] signals the loop and waits for it to exit. A
//! batch that is being processed is finished first; a pending long poll is abandoned and
//! its messages return to the queue after their visibility timeout.

use anyhow::Result;
use async_trait::async_trait;
use lg_core::models::QueueRecord;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::intake::{BatchProcessor, BatchSummary};

/// Delay before polling again after a failed receive.
pub const RECEIVE_ERROR_BACKOFF_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: Option<String>,
    pub receipt_handle: String,
    pub body: Option<String>,
}

/// A queue the consumer can read from and acknowledge to.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Wait for the next batch. An empty batch means the poll timed out.
    async fn receive(&self) -> Result<Vec<ReceivedMessage>>;

    /// Remove handled messages from the queue.
    async fn acknowledge(&self, receipt_handles: &[String]) -> Result<()>;
}

/// Receive one batch, process it and acknowledge every settled message.
pub async fn poll_once(source: &dyn MessageSource, processor: &BatchProcessor) -> Result<BatchSummary> {
    let received = source.receive().await?;
    process_received(source, processor, received).await
}

/// Process a received batch and acknowledge every settled message.
pub async fn process_received(
    source: &dyn MessageSource,
    processor: &BatchProcessor,
    received: Vec<ReceivedMessage>,
) -> Result<BatchSummary> {
    if received.is_empty() {
        return Ok(BatchSummary::default());
    }

    let records: Vec<QueueRecord> = received
        .iter()
        .map(|message| QueueRecord {
            message_id: message.message_id.clone(),
            body: message.body.clone(),
        })
        .collect();
    let summary = processor.process_batch(&records).await;

    let settled: Vec<String> = received
        .iter()
        .zip(&summary.messages)
        .filter(|(_, processed)| processed.outcome.is_settled())
        .map(|(message, _)| message.receipt_handle.clone())
        .collect();
    if !settled.is_empty() {
        source.acknowledge(&settled).await?;
    }
    tracing::debug!(
        received = received.len(),
        acknowledged = settled.len(),
        "Batch acknowledged"
    );

    Ok(summary)
}

pub struct QueueConsumer {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl QueueConsumer {
    /// Spawn the consumer loop.
    pub fn start(source: Arc<dyn MessageSource>, processor: Arc<BatchProcessor>) -> Self {
        Self::start_with_backoff(
            source,
            processor,
            Duration::from_secs(RECEIVE_ERROR_BACKOFF_SECS),
        )
    }

    pub fn start_with_backoff(
        source: Arc<dyn MessageSource>,
        processor: Arc<BatchProcessor>,
        error_backoff: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move {
            Self::run(source, processor, error_backoff, shutdown_rx).await;
        });
        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Stop the loop and wait for it to finish its current batch.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Queue consumer task failed");
        }
    }

    async fn run(
        source: Arc<dyn MessageSource>,
        processor: Arc<BatchProcessor>,
        error_backoff: Duration,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!("Queue consumer started");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Queue consumer shutting down");
                    break;
                }
                received = source.receive() => {
                    match received {
                        Ok(messages) if messages.is_empty() => {
                            tracing::trace!("No messages available in queue");
                        }
                        Ok(messages) => {
                            let processed = process_received(source.as_ref(), &processor, messages).await;
                            if let Err(e) = processed {
                                tracing::error!(error = %e, "Failed to acknowledge messages");
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to receive messages, backing off");
                            tokio::time::sleep(error_backoff).await;
                        }
                    }
                }
            }
        }

        tracing::info!("Queue consumer stopped");
    }
}
