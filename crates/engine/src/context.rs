use std::sync::Arc;

use recruit_common::config::MailSettings;
use recruit_common::rules::NotificationRules;
use recruit_fhir::ResourceStore;
use recruit_notifier::Mailer;

use crate::retry::RetryExecutor;

/// Shared collaborators of the pipeline components.
///
/// Built once at startup and cloned into every component; nothing in it is
/// mutated afterwards.
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn ResourceStore>,
    pub mailer: Mailer,
    pub rules: Arc<NotificationRules>,
    pub mail: MailSettings,
    pub retry: RetryExecutor,
    /// Page size of the active-message query used for deduplication.
    pub active_message_page_size: usize,
}
