//! Amazon SQS message source.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sqs::Client;
use lg_core::Config;

use crate::consumer::{MessageSource, ReceivedMessage};

#[derive(Clone)]
pub struct SqsSource {
    client: Client,
    queue_url: String,
    batch_size: i32,
    wait_time_secs: i32,
}

impl SqsSource {
    pub fn new(client: Client, queue_url: String, batch_size: i32, wait_time_secs: i32) -> Self {
        Self {
            client,
            queue_url,
            // SQS accepts 1..=10 messages and at most 20 seconds of long polling.
            batch_size: batch_size.clamp(1, 10),
            wait_time_secs: wait_time_secs.clamp(0, 20),
        }
    }

    pub async fn from_config(config: &Config) -> Result<Self> {
        let queue_url = config
            .sqs_queue_url()
            .ok_or_else(|| anyhow!("SQS_QUEUE_URL must be set to consume from SQS"))?
            .to_string();

        let region_provider =
            RegionProviderChain::first_try(config.s3_region().map(|r| Region::new(r.to_string())))
                .or_default_provider();
        let shared_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;

        tracing::info!(queue_url = %queue_url, "SQS source configured");
        Ok(Self::new(
            Client::new(&shared_config),
            queue_url,
            config.sqs_batch_size(),
            config.sqs_wait_time_secs(),
        ))
    }
}

#[async_trait]
impl MessageSource for SqsSource {
    async fn receive(&self) -> Result<Vec<ReceivedMessage>> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(self.batch_size)
            .wait_time_seconds(self.wait_time_secs)
            .send()
            .await
            .context("Failed to receive messages from SQS")?;

        let messages = output
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|message| {
                let Some(receipt_handle) = message.receipt_handle else {
                    tracing::warn!(message_id = ?message.message_id, "SQS message without receipt handle");
                    return None;
                };
                Some(ReceivedMessage {
                    message_id: message.message_id,
                    receipt_handle,
                    body: message.body,
                })
            })
            .collect();
        Ok(messages)
    }

    async fn acknowledge(&self, receipt_handles: &[String]) -> Result<()> {
        let mut failed = 0usize;
        for receipt_handle in receipt_handles {
            if let Err(e) = self
                .client
                .delete_message()
                .queue_url(&self.queue_url)
                .receipt_handle(receipt_handle)
                .send()
                .await
            {
                failed += 1;
                tracing::warn!(error = %e, "Failed to delete SQS message");
            }
        }

        if failed > 0 {
            return Err(anyhow!(
                "{} of {} SQS messages could not be deleted",
                failed,
                receipt_handles.len()
            ));
        }
        Ok(())
    }
}
