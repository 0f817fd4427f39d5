pub mod change;
pub mod context;
pub mod dedup;
pub mod distributor;
pub mod error;
pub mod gate;
pub mod message;
pub mod orchestrator;
pub mod queue;
pub mod recipients;
pub mod retry;
pub mod scheduler;
pub mod study;

pub use context::EngineContext;
pub use distributor::{DistributionReport, Distributor};
pub use error::PipelineError;
pub use orchestrator::{DispatchSummary, ListChangeOutcome, Orchestrator};
pub use retry::RetryExecutor;
pub use scheduler::{JobHandler, Scheduler};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::time::Duration;

    use recruit_common::config::{MailSettings, RetrySettings, SmtpSettings};
    use recruit_common::rules::NotificationRules;
    use recruit_common::types::{RecipientIdentity, ResearchSubject, ScreeningList, SubjectStatus};
    use recruit_fhir::memory::InMemoryStore;
    use recruit_notifier::fake::FakeMailTransport;
    use recruit_notifier::{Mailer, TemplateRenderer};

    use crate::context::EngineContext;
    use crate::retry::RetryExecutor;

    pub fn make_mail_settings() -> MailSettings {
        MailSettings {
            smtp: SmtpSettings::default(),
            from: "noreply@recruit.test".to_string(),
            subject: "New candidates for [study_acronym]".to_string(),
            link_template: "https://screening.test/lists/[list_id]".to_string(),
            template_dir: None,
        }
    }

    fn build_context(
        store: InMemoryStore,
        rules: NotificationRules,
        transport: FakeMailTransport,
    ) -> EngineContext {
        EngineContext {
            store: Arc::new(store),
            mailer: Mailer::new(Arc::new(transport), TemplateRenderer::default()),
            rules: Arc::new(rules),
            mail: make_mail_settings(),
            retry: RetryExecutor::new(RetrySettings {
                max_attempts: 3,
                backoff: Duration::from_millis(1),
                ..Default::default()
            }),
            active_message_page_size: 100,
        }
    }

    pub fn make_context(store: InMemoryStore) -> EngineContext {
        build_context(store, NotificationRules::default(), FakeMailTransport::new())
    }

    pub fn make_context_with_rules(store: InMemoryStore, rules_json: &str) -> EngineContext {
        let rules = NotificationRules::from_json(rules_json).unwrap();
        build_context(store, rules, FakeMailTransport::new())
    }

    pub fn make_list(id: &str, version: Option<u64>, refs: &[&str]) -> ScreeningList {
        ScreeningList {
            id: id.to_string(),
            version,
            subject_refs: refs.iter().map(|r| r.to_string()).collect(),
            study: None,
        }
    }

    pub fn make_subject(id: &str, status: SubjectStatus) -> ResearchSubject {
        ResearchSubject {
            id: id.to_string(),
            status,
        }
    }

    pub fn make_identity(id: &str, email: &str) -> RecipientIdentity {
        RecipientIdentity {
            id: id.to_string(),
            email: Some(email.to_string()),
        }
    }

    /// Context wired to an in-memory store and a recording mail transport.
    pub struct TestHarness {
        pub ctx: EngineContext,
        pub store: InMemoryStore,
        pub transport: FakeMailTransport,
    }

    impl TestHarness {
        pub fn new(rules_json: &str) -> Self {
            let store = InMemoryStore::new();
            let transport = FakeMailTransport::new();
            let rules = NotificationRules::from_json(rules_json).unwrap();
            let ctx = build_context(store.clone(), rules, transport.clone());
            Self {
                ctx,
                store,
                transport,
            }
        }
    }
}
