use std::sync::Arc;

use recruit_common::types::Message;
use recruit_fhir::{ResourceStore, StoreError};

use crate::context::EngineContext;
use crate::retry::RetryExecutor;

/// Persists scheduled messages so the distributor can pick them up later.
pub struct QueueStore {
    store: Arc<dyn ResourceStore>,
    retry: RetryExecutor,
}

impl QueueStore {
    pub fn new(ctx: &EngineContext) -> Self {
        Self {
            store: ctx.store.clone(),
            retry: ctx.retry.clone(),
        }
    }

    /// Write the batch as one transaction and return the new message ids.
    ///
    /// A batch that still fails after all retries is dropped, not re-queued.
    pub async fn transmit(&self, batch: &[Message]) -> Result<Vec<String>, StoreError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        match self
            .retry
            .execute("queue messages", || self.store.create_messages(batch))
            .await
        {
            Ok(ids) => {
                tracing::info!(count = ids.len(), "Messages queued");
                Ok(ids)
            }
            Err(e) => {
                tracing::error!(
                    count = batch.len(),
                    error = %e,
                    "Failed to queue messages, batch dropped"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageFactory;
    use crate::testing::{make_context, make_identity};
    use recruit_fhir::memory::InMemoryStore;

    #[tokio::test]
    async fn test_transmit_persists_whole_batch() {
        let store = InMemoryStore::new();
        let queue = QueueStore::new(&make_context(store.clone()));
        let batch = MessageFactory::create_messages(
            "TEST",
            "1",
            &[make_identity("p1", "a@example.com"), make_identity("p2", "b@example.com")],
        );

        let ids = queue.transmit(&batch).await.unwrap();

        assert_eq!(ids.len(), 2);
        assert_eq!(store.messages().len(), 2);
        assert_eq!(store.calls("create_messages"), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_drop_batch() {
        let store = InMemoryStore::new();
        store.fail_next(
            "create_messages",
            (0..3)
                .map(|_| StoreError::Http {
                    status: 503,
                    body: String::new(),
                })
                .collect(),
        );
        let queue = QueueStore::new(&make_context(store.clone()));
        let batch =
            MessageFactory::create_messages("TEST", "1", &[make_identity("p1", "a@example.com")]);

        assert!(queue.transmit(&batch).await.is_err());
        assert!(store.messages().is_empty());
        assert_eq!(store.calls("create_messages"), 3);
    }

    #[tokio::test]
    async fn test_empty_batch_is_not_sent() {
        let store = InMemoryStore::new();
        let queue = QueueStore::new(&make_context(store.clone()));
        assert!(queue.transmit(&[]).await.unwrap().is_empty());
        assert_eq!(store.calls("create_messages"), 0);
    }
}
