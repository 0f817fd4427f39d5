//! Deduplication of scheduled messages against the queue.
//!
//! At most one active message may exist per (topic, recipient). The queued
//! state lives only in the resource store, so every run reads the current
//! active messages before deciding what to persist.

use std::collections::HashSet;
use std::sync::Arc;

use recruit_common::types::{Message, StoredMessage};
use recruit_fhir::{ResourceStore, StoreError};

use crate::context::EngineContext;
use crate::retry::RetryExecutor;

pub struct DeduplicationFilter {
    store: Arc<dyn ResourceStore>,
    retry: RetryExecutor,
    page_size: usize,
}

impl DeduplicationFilter {
    pub fn new(ctx: &EngineContext) -> Self {
        Self {
            store: ctx.store.clone(),
            retry: ctx.retry.clone(),
            page_size: ctx.active_message_page_size,
        }
    }

    /// Drop messages that duplicate an active queued message or an earlier
    /// message of the same batch.
    pub async fn filter(&self, messages: Vec<Message>) -> Result<Vec<Message>, StoreError> {
        if messages.is_empty() {
            return Ok(messages);
        }

        let active = self
            .retry
            .execute("load active messages", || {
                self.store.active_messages(self.page_size)
            })
            .await?;

        tracing::debug!(active = active.len(), "Loaded active messages");

        let candidates = messages.len();
        let kept = exclude_queued(messages, &active);
        if kept.len() < candidates {
            tracing::info!(
                dropped = candidates - kept.len(),
                kept = kept.len(),
                "Skipped messages already queued"
            );
        }
        Ok(kept)
    }
}

fn key(message: &Message) -> (&str, &str) {
    (message.topic.as_str(), message.recipient.id.as_str())
}

pub fn exclude_queued(messages: Vec<Message>, active: &[StoredMessage]) -> Vec<Message> {
    let mut taken: HashSet<(String, String)> = active
        .iter()
        .map(|stored| {
            let (topic, recipient) = key(&stored.message);
            (topic.to_string(), recipient.to_string())
        })
        .collect();

    messages
        .into_iter()
        .filter(|message| {
            let (topic, recipient) = key(message);
            taken.insert((topic.to_string(), recipient.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageFactory;
    use crate::testing::{make_context, make_identity};
    use recruit_common::types::MessageStatus;
    use recruit_fhir::memory::InMemoryStore;

    #[test]
    fn test_exclude_queued_uses_topic_and_recipient() {
        let recipients = vec![
            make_identity("p1", "a@example.com"),
            make_identity("p2", "b@example.com"),
        ];
        let queued = MessageFactory::create_messages("TEST", "old-list", &recipients[..1]);
        let active = vec![StoredMessage {
            id: "m1".to_string(),
            message: queued[0].clone(),
        }];

        let fresh = MessageFactory::create_messages("TEST", "1", &recipients);
        let kept = exclude_queued(fresh, &active);

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].recipient.id, "p2");
    }

    #[test]
    fn test_other_topic_is_not_a_duplicate() {
        let recipients = vec![make_identity("p1", "a@example.com")];
        let queued = MessageFactory::create_messages("OTHER", "1", &recipients);
        let active = vec![StoredMessage {
            id: "m1".to_string(),
            message: queued[0].clone(),
        }];

        let kept = exclude_queued(MessageFactory::create_messages("TEST", "1", &recipients), &active);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_duplicates_within_batch_are_dropped() {
        let recipients = vec![
            make_identity("p1", "a@example.com"),
            make_identity("p1", "a@example.com"),
        ];
        let kept = exclude_queued(MessageFactory::create_messages("TEST", "1", &recipients), &[]);
        assert_eq!(kept.len(), 1);
    }

    #[tokio::test]
    async fn test_filter_ignores_settled_messages() {
        let store = InMemoryStore::new();
        let recipients = vec![make_identity("p1", "a@example.com")];
        let mut done = MessageFactory::create_messages("TEST", "1", &recipients).remove(0);
        done.status = MessageStatus::Completed;
        store.insert_message(done);
        let filter = DeduplicationFilter::new(&make_context(store.clone()));

        let kept = filter
            .filter(MessageFactory::create_messages("TEST", "1", &recipients))
            .await
            .unwrap();
        assert_eq!(kept.len(), 1);
    }

    #[tokio::test]
    async fn test_filter_sees_messages_beyond_first_page() {
        let store = InMemoryStore::new();
        let ctx = make_context(store.clone());
        for i in 0..ctx.active_message_page_size {
            let other = make_identity(&format!("p-other-{}", i), "o@example.com");
            store.insert_message(MessageFactory::create_messages("OTHER", "1", &[other]).remove(0));
        }
        let recipients = vec![make_identity("p1", "a@example.com")];
        store.insert_message(MessageFactory::create_messages("TEST", "1", &recipients).remove(0));
        let filter = DeduplicationFilter::new(&ctx);

        let kept = filter
            .filter(MessageFactory::create_messages("TEST", "2", &recipients))
            .await
            .unwrap();

        assert!(kept.is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_skips_store() {
        let store = InMemoryStore::new();
        let filter = DeduplicationFilter::new(&make_context(store.clone()));
        assert!(filter.filter(Vec::new()).await.unwrap().is_empty());
        assert_eq!(store.calls("active_messages"), 0);
    }
}
