use crate::application::dispatcher::BatchReport;
use crate::error::SourceError;
use async_trait::async_trait;

/// One raw payload as handed over by the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Source-assigned identifier, for logs only.
    pub id: String,
    pub body: String,
    /// Receipt to delete the message with; `None` when acknowledgment is
    /// implicit in finishing the batch.
    pub receipt: Option<String>,
}

/// A group of deliveries handled together.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Batch {
    /// Token the source needs to finish the batch (e.g. an invocation id).
    pub token: Option<String>,
    pub deliveries: Vec<Delivery>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }
}

/// Where upload notifications come from and where acknowledgments go.
///
/// The polling variant hands out receipts and expects one `acknowledge`
/// per finished message; the push variant hands out none and treats
/// `finish_batch` as the acknowledgment.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSource: Send + Sync {
    /// Wait for the next batch. An empty batch means nothing arrived in time.
    async fn next_batch(&self) -> Result<Batch, SourceError>;

    /// Delete one message by receipt.
    async fn acknowledge(&self, receipt: &str) -> Result<(), SourceError>;

    /// Called once every unit of the batch reached success or terminal failure.
    async fn finish_batch(&self, batch: &Batch, report: &BatchReport) -> Result<(), SourceError>;
}
