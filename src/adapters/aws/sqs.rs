use crate::application::dispatcher::BatchReport;
use crate::config::QueueConfig;
use crate::error::{SourceError, WorkerError};
use crate::ports::source::{Batch, Delivery, NotificationSource};
use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::QueueAttributeName;
use aws_sdk_sqs::Client;
use tracing::{debug, info, warn};

/// SqsSource implements NotificationSource by long-polling an SQS queue.
#[derive(Clone)]
pub struct SqsSource {
    client: Client,
    queue_url: String,
    wait_seconds: i32,
    max_messages: i32,
}

impl SqsSource {
    pub fn new(client: Client, queue_url: String, config: &QueueConfig) -> Self {
        Self {
            client,
            queue_url,
            wait_seconds: config.wait_seconds as i32,
            max_messages: config.max_messages as i32,
        }
    }

    /// Resolves the queue by name and switches it to long polling.
    pub async fn connect(client: Client, config: &QueueConfig) -> Result<Self, WorkerError> {
        let resp = client
            .get_queue_url()
            .queue_name(&config.queue_name)
            .send()
            .await
            .map_err(|e| WorkerError::QueueResolution {
                name: config.queue_name.clone(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;
        let queue_url = resp
            .queue_url()
            .ok_or_else(|| WorkerError::QueueResolution {
                name: config.queue_name.clone(),
                reason: "no queue URL returned".to_string(),
            })?
            .to_string();

        client
            .set_queue_attributes()
            .queue_url(&queue_url)
            .attributes(
                QueueAttributeName::ReceiveMessageWaitTimeSeconds,
                config.wait_seconds.to_string(),
            )
            .send()
            .await
            .map_err(|e| WorkerError::QueueAttributes {
                name: config.queue_name.clone(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;

        info!(queue = %config.queue_name, url = %queue_url, wait_seconds = config.wait_seconds, "Polling queue");
        Ok(Self::new(client, queue_url, config))
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

#[async_trait]
impl NotificationSource for SqsSource {
    async fn next_batch(&self) -> Result<Batch, SourceError> {
        let resp = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(self.max_messages)
            .wait_time_seconds(self.wait_seconds)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(DisplayErrorContext(&e).to_string()))?;

        let mut deliveries = Vec::new();
        for message in resp.messages.unwrap_or_default() {
            let id = message.message_id.unwrap_or_default();
            let Some(body) = message.body else {
                warn!(message = %id, "Message has no body");
                continue;
            };
            deliveries.push(Delivery {
                id,
                body,
                receipt: message.receipt_handle,
            });
        }
        debug!(messages = deliveries.len(), "Received messages");

        Ok(Batch {
            token: None,
            deliveries,
        })
    }

    async fn acknowledge(&self, receipt: &str) -> Result<(), SourceError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|e| SourceError::Acknowledge {
                receipt: receipt.to_string(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;
        Ok(())
    }

    /// Messages are deleted one by one as their units complete.
    async fn finish_batch(&self, _batch: &Batch, _report: &BatchReport) -> Result<(), SourceError> {
        Ok(())
    }
}
