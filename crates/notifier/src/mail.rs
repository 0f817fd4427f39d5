use std::sync::Arc;

use recruit_common::error::{Classify, ExternalErrorKind};
use thiserror::Error;

use crate::template::TemplateRenderer;
use crate::transport::{MailTransport, OutgoingMail};

/// Why a single mail could not be sent.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid mail address '{0}'")]
    AddressInvalid(String),

    #[error("cannot render mail template: {0}")]
    RenderFailed(String),

    #[error("mail transport failed ({kind}): {message}")]
    TransportFailed {
        kind: ExternalErrorKind,
        message: String,
    },
}

impl Classify for MailError {
    fn kind(&self) -> ExternalErrorKind {
        match self {
            MailError::AddressInvalid(_) | MailError::RenderFailed(_) => ExternalErrorKind::Client,
            MailError::TransportFailed { kind, .. } => *kind,
        }
    }
}

/// Template variables of a notification mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyInfo {
    pub study_acronym: String,
    pub screening_list_link: String,
}

/// Addressing of a notification mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
}

/// Replace the `[study_acronym]` placeholder of a subject template.
pub fn subject_for(template: &str, acronym: &str) -> String {
    template.replace("[study_acronym]", acronym)
}

/// Replace the `[list_id]` placeholder of a link template.
pub fn screening_list_link(template: &str, list_id: &str) -> String {
    template.replace("[list_id]", list_id)
}

/// Minimal syntactic address check: one `@`, non-empty local part, dotted domain.
pub fn validate_address(address: &str) -> Result<(), MailError> {
    let invalid = || MailError::AddressInvalid(address.to_string());

    if address.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = address.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
    {
        return Err(invalid());
    }
    Ok(())
}

/// Composes notification mails and hands them to a transport.
#[derive(Clone)]
pub struct Mailer {
    transport: Arc<dyn MailTransport>,
    renderer: TemplateRenderer,
}

impl Mailer {
    pub fn new(transport: Arc<dyn MailTransport>, renderer: TemplateRenderer) -> Self {
        Self {
            transport,
            renderer,
        }
    }

    /// Validate, render and deliver one multi-part mail.
    pub async fn send(&self, envelope: &Envelope, info: &NotifyInfo) -> Result<(), MailError> {
        if envelope.to.is_empty() {
            return Err(MailError::AddressInvalid(String::new()));
        }
        validate_address(&envelope.from)?;
        for to in &envelope.to {
            validate_address(to)?;
        }

        let body = self.renderer.render(info)?;
        let mail = OutgoingMail {
            from: envelope.from.clone(),
            to: envelope.to.clone(),
            subject: envelope.subject.clone(),
            text: body.text,
            html: body.html,
        };

        self.transport.deliver(&mail).await?;

        tracing::info!(
            to = ?envelope.to,
            trial = %info.study_acronym,
            "Notification mail sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeMailTransport;

    fn make_envelope(to: &str) -> Envelope {
        Envelope {
            from: "noreply@example.com".to_string(),
            to: vec![to.to_string()],
            subject: subject_for("Neue Vorschläge für [study_acronym]", "TEST"),
        }
    }

    fn make_info() -> NotifyInfo {
        NotifyInfo {
            study_acronym: "TEST".to_string(),
            screening_list_link: screening_list_link("http://ui/lists/[list_id]", "1"),
        }
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(make_envelope("a@x.com").subject, "Neue Vorschläge für TEST");
        assert_eq!(make_info().screening_list_link, "http://ui/lists/1");
    }

    #[test]
    fn test_validate_address() {
        assert!(validate_address("a@x.com").is_ok());
        assert!(validate_address("a.b+c@sub.example.org").is_ok());
        assert!(validate_address("no-at-sign").is_err());
        assert!(validate_address("@x.com").is_err());
        assert!(validate_address("a@localhost").is_err());
        assert!(validate_address("a b@x.com").is_err());
        assert!(validate_address("a@@x.com").is_err());
    }

    #[tokio::test]
    async fn test_send_delivers_rendered_mail() {
        let transport = FakeMailTransport::new();
        let mailer = Mailer::new(Arc::new(transport.clone()), TemplateRenderer::default());

        mailer.send(&make_envelope("a@x.com"), &make_info()).await.unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["a@x.com".to_string()]);
        assert!(sent[0].subject.contains("TEST"));
        assert!(sent[0].text.contains("http://ui/lists/1"));
    }

    #[tokio::test]
    async fn test_invalid_address_is_not_delivered() {
        let transport = FakeMailTransport::new();
        let mailer = Mailer::new(Arc::new(transport.clone()), TemplateRenderer::default());

        let err = mailer
            .send(&make_envelope("broken"), &make_info())
            .await
            .unwrap_err();

        assert!(matches!(err, MailError::AddressInvalid(_)));
        assert_eq!(err.kind(), ExternalErrorKind::Client);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_is_reported() {
        let transport = FakeMailTransport::new();
        transport.fail_next(1, ExternalErrorKind::Server);
        let mailer = Mailer::new(Arc::new(transport.clone()), TemplateRenderer::default());

        let err = mailer.send(&make_envelope("a@x.com"), &make_info()).await.unwrap_err();
        assert_eq!(err.kind(), ExternalErrorKind::Server);
        assert_eq!(transport.attempts(), 1);
    }
}
