//! Process wiring: builds the engine context from configuration and prepares
//! the resource store before the server starts accepting webhooks.

use std::sync::Arc;

use recruit_common::config::AppConfig;
use recruit_common::rules::NotificationRules;
use recruit_engine::{EngineContext, RetryExecutor};
use recruit_fhir::FhirClient;
use recruit_notifier::{Mailer, SmtpMailTransport, TemplateRenderer};

/// Build the shared engine context backed by the FHIR server and SMTP relay.
pub fn build_context(config: &AppConfig, rules: NotificationRules) -> anyhow::Result<EngineContext> {
    let store = FhirClient::new(&config.fhir_url, config.systems.clone())?;
    let transport = SmtpMailTransport::new(&config.mail.smtp)?;

    let renderer = match &config.mail.template_dir {
        Some(dir) => TemplateRenderer::from_dir(dir)?,
        None => TemplateRenderer::default(),
    };
    renderer.check()?;

    Ok(EngineContext {
        store: Arc::new(store),
        mailer: Mailer::new(Arc::new(transport), renderer),
        rules: Arc::new(rules),
        mail: config.mail.clone(),
        retry: RetryExecutor::new(config.retry.clone()),
        active_message_page_size: config.active_message_page_size,
    })
}

/// Provision one practitioner per configured subscriber and, when a public
/// endpoint is known, register the screening list subscription.
pub async fn prepare_store(
    ctx: &EngineContext,
    criteria: &str,
    webhook_endpoint: Option<&str>,
) -> anyhow::Result<()> {
    let emails = ctx.rules.subscriber_emails();
    if !emails.is_empty() {
        ctx.retry
            .execute("provision recipients", || ctx.store.ensure_recipients(&emails))
            .await?;
        tracing::info!(count = emails.len(), "Subscriber practitioners provisioned");
    }

    match webhook_endpoint {
        Some(endpoint) => {
            ctx.retry
                .execute("register subscription", || {
                    ctx.store.register_subscription(criteria, endpoint)
                })
                .await?;
            tracing::info!(endpoint, criteria, "Screening list subscription registered");
        }
        None => {
            tracing::info!("WEBHOOK_ENDPOINT not set, skipping subscription registration");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use recruit_common::config::{MailSettings, RetrySettings, SmtpSettings};
    use recruit_fhir::memory::InMemoryStore;
    use recruit_fhir::StoreError;
    use recruit_notifier::fake::FakeMailTransport;
    use std::time::Duration;

    fn make_context(store: InMemoryStore, rules_json: &str) -> EngineContext {
        EngineContext {
            store: Arc::new(store),
            mailer: Mailer::new(Arc::new(FakeMailTransport::new()), TemplateRenderer::default()),
            rules: Arc::new(NotificationRules::from_json(rules_json).unwrap()),
            mail: MailSettings {
                smtp: SmtpSettings::default(),
                from: "noreply@recruit.test".to_string(),
                subject: "[study_acronym]".to_string(),
                link_template: "[list_id]".to_string(),
                template_dir: None,
            },
            retry: RetryExecutor::new(RetrySettings {
                max_attempts: 2,
                backoff: Duration::from_millis(1),
                ..Default::default()
            }),
            active_message_page_size: 100,
        }
    }

    const RULES: &str = r#"{
        "trials": [{ "acronym": "*", "subscriptions": [
            { "email": "a@example.com" },
            { "email": "A@example.com" },
            { "email": "b@example.com" }
        ] }]
    }"#;

    #[tokio::test]
    async fn test_prepare_provisions_subscribers_and_registers() {
        let store = InMemoryStore::new();
        let ctx = make_context(store.clone(), RULES);

        prepare_store(&ctx, "List?code=x", Some("http://notify/on-list-change"))
            .await
            .unwrap();

        assert_eq!(store.recipients().len(), 2);
        assert_eq!(
            store.subscriptions(),
            vec![(
                "List?code=x".to_string(),
                "http://notify/on-list-change".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_prepare_without_endpoint_skips_registration() {
        let store = InMemoryStore::new();
        let ctx = make_context(store.clone(), RULES);

        prepare_store(&ctx, "List?code=x", None).await.unwrap();

        assert!(store.subscriptions().is_empty());
        assert_eq!(store.calls("register_subscription"), 0);
    }

    #[tokio::test]
    async fn test_prepare_fails_after_retries() {
        let store = InMemoryStore::new();
        store.fail_next(
            "ensure_recipients",
            vec![
                StoreError::Connection("refused".to_string()),
                StoreError::Connection("refused".to_string()),
            ],
        );
        let ctx = make_context(store.clone(), RULES);

        assert!(prepare_store(&ctx, "List?code=x", None).await.is_err());
        assert_eq!(store.calls("ensure_recipients"), 2);
    }
}
