use chrono::Utc;
use recruit_common::types::{Message, MessageStatus, RecipientIdentity, RecipientRef};
use uuid::Uuid;

/// Builds one active message per recipient.
pub struct MessageFactory;

impl MessageFactory {
    /// Every message gets a fresh idempotency token. The token identifies the
    /// record only; deduplication keys on topic and recipient.
    pub fn create_messages(
        acronym: &str,
        list_id: &str,
        recipients: &[RecipientIdentity],
    ) -> Vec<Message> {
        let now = Utc::now();
        recipients
            .iter()
            .map(|recipient| Message {
                topic: acronym.to_string(),
                about: list_id.to_string(),
                recipient: RecipientRef::from(recipient),
                status: MessageStatus::Active,
                created_at: now,
                idempotency_token: Uuid::new_v4(),
            })
            .collect()
    }
}
