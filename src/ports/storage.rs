use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;

/// Object storage addressed by (container, key).
///
/// Implementations are shared by every concurrent unit of work.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the whole object.
    async fn get(&self, container: &str, key: &str) -> Result<Bytes, StorageError>;

    /// Store `data` under `key`, returning the object's location.
    async fn put(
        &self,
        container: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<String, StorageError>;
}
