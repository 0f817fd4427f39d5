use async_trait::async_trait;
use recruit_common::error::{AppError, Classify, ExternalErrorKind};
use recruit_common::types::{
    Message, MessageStatus, RecipientIdentity, ResearchSubject, ScreeningList, StoredMessage,
    Study,
};
use thiserror::Error;

/// Failure of a call to the resource store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection to resource store failed: {0}")]
    Connection(String),

    #[error("resource store request timed out: {0}")]
    Timeout(String),

    #[error("resource store returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("cannot decode resource: {0}")]
    Decode(String),
}

impl Classify for StoreError {
    fn kind(&self) -> ExternalErrorKind {
        match self {
            StoreError::Connection(_) => ExternalErrorKind::Connection,
            StoreError::Timeout(_) => ExternalErrorKind::Timeout,
            StoreError::Http { status, .. } if *status >= 500 => ExternalErrorKind::Server,
            StoreError::Http { .. } => ExternalErrorKind::Client,
            StoreError::Decode(_) => ExternalErrorKind::Decode,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Store {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// The external resource store holding lists, studies, practitioners and
/// queued messages.
///
/// Reads that target a single resource return `Ok(None)` when it does not
/// exist. Every method is one logical call; retries are applied by the caller.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Read a specific version of a screening list.
    async fn read_list_version(
        &self,
        list_id: &str,
        version: u64,
    ) -> Result<Option<ScreeningList>, StoreError>;

    /// All research subjects referenced by the list, across every result page.
    async fn list_subjects(&self, list: &ScreeningList)
    -> Result<Vec<ResearchSubject>, StoreError>;

    async fn read_study(&self, study_id: &str) -> Result<Option<Study>, StoreError>;

    /// Directory lookup of the practitioner provisioned for `email`.
    async fn find_recipient_by_email(
        &self,
        email: &str,
    ) -> Result<Option<RecipientIdentity>, StoreError>;

    async fn read_recipient(&self, recipient_id: &str)
    -> Result<Option<RecipientIdentity>, StoreError>;

    /// Create a practitioner for every email that does not have one yet.
    async fn ensure_recipients(&self, emails: &[String]) -> Result<(), StoreError>;

    /// All active messages created by this service, fetched `page_size` per
    /// request until the result set is exhausted.
    async fn active_messages(&self, page_size: usize)
    -> Result<Vec<StoredMessage>, StoreError>;

    /// Active messages addressed to any of `recipient_ids`.
    async fn active_messages_for(
        &self,
        recipient_ids: &[String],
    ) -> Result<Vec<StoredMessage>, StoreError>;

    /// Persist all messages in one atomic transaction and return their ids.
    async fn create_messages(&self, messages: &[Message]) -> Result<Vec<String>, StoreError>;

    /// Move the given active messages to `status` in one batch.
    ///
    /// Messages that are no longer active are left untouched.
    async fn update_message_statuses(
        &self,
        message_ids: &[String],
        status: MessageStatus,
    ) -> Result<(), StoreError>;

    /// Create or update the rest-hook subscription for `criteria`.
    async fn register_subscription(&self, criteria: &str, endpoint: &str)
    -> Result<(), StoreError>;
}
