use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use recruit_common::config::{SmtpSecurity, SmtpSettings};
use recruit_common::error::ExternalErrorKind;

use crate::mail::MailError;

/// A fully rendered multi-part mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Delivery channel for rendered mails.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, mail: &OutgoingMail) -> Result<(), MailError>;
}

/// Mail delivery through an SMTP relay.
pub struct SmtpMailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailTransport {
    pub fn new(settings: &SmtpSettings) -> Result<Self, MailError> {
        let builder = match settings.security {
            SmtpSecurity::None => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(settings.host.as_str())
            }
            SmtpSecurity::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
                    .map_err(smtp_failure)?
            }
            SmtpSecurity::Tls => {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host).map_err(smtp_failure)?
            }
        };

        let mut builder = builder
            .port(settings.port)
            .timeout(Some(Duration::from_secs(30)));
        if let Some(username) = &settings.username {
            let password = settings.password.clone().unwrap_or_default();
            builder = builder.credentials(Credentials::new(username.clone(), password));
        }

        Ok(Self {
            mailer: builder.build(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn deliver(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let message = build_message(mail)?;
        let response = self.mailer.send(message).await.map_err(smtp_failure)?;
        tracing::debug!(code = %response.code(), "SMTP relay accepted message");
        Ok(())
    }
}

/// Assemble a `multipart/alternative` message with a text and an HTML part.
fn build_message(mail: &OutgoingMail) -> Result<lettre::Message, MailError> {
    let mut builder = lettre::Message::builder()
        .from(mailbox(&mail.from)?)
        .subject(mail.subject.as_str());
    for to in &mail.to {
        builder = builder.to(mailbox(to)?);
    }

    builder
        .multipart(MultiPart::alternative_plain_html(
            mail.text.clone(),
            mail.html.clone(),
        ))
        .map_err(|e| MailError::RenderFailed(e.to_string()))
}

fn mailbox(address: &str) -> Result<Mailbox, MailError> {
    address
        .parse()
        .map_err(|_| MailError::AddressInvalid(address.to_string()))
}

fn smtp_failure(err: smtp::Error) -> MailError {
    MailError::TransportFailed {
        kind: smtp_error_kind(err.is_timeout(), err.is_transient(), err.is_permanent()),
        message: err.to_string(),
    }
}

/// 4xx replies are the relay's to retry, 5xx replies reject the message itself.
/// Anything without a reply never reached a working relay.
fn smtp_error_kind(timeout: bool, transient: bool, permanent: bool) -> ExternalErrorKind {
    if timeout {
        ExternalErrorKind::Timeout
    } else if permanent {
        ExternalErrorKind::Client
    } else if transient {
        ExternalErrorKind::Server
    } else {
        ExternalErrorKind::Connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recruit_common::error::Classify;

    fn make_mail(to: &str) -> OutgoingMail {
        OutgoingMail {
            from: "a@x.com".to_string(),
            to: vec![to.to_string()],
            subject: "Neue Kandidaten".to_string(),
            text: "plain body".to_string(),
            html: "<p>html body</p>".to_string(),
        }
    }

    #[test]
    fn test_message_is_multipart_alternative() {
        let message = build_message(&make_mail("b@x.com")).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("text/plain"));
        assert!(raw.contains("text/html"));
        assert!(raw.contains("To: b@x.com"));
    }

    #[test]
    fn test_invalid_recipient_is_address_error() {
        let err = build_message(&make_mail("not an address")).unwrap_err();
        assert!(matches!(err, MailError::AddressInvalid(ref a) if a == "not an address"));
        assert_eq!(err.kind(), ExternalErrorKind::Client);
    }

    #[test]
    fn test_smtp_error_kinds() {
        assert_eq!(smtp_error_kind(true, false, false), ExternalErrorKind::Timeout);
        assert_eq!(smtp_error_kind(false, true, false), ExternalErrorKind::Server);
        assert_eq!(smtp_error_kind(false, false, true), ExternalErrorKind::Client);
        assert_eq!(smtp_error_kind(false, false, false), ExternalErrorKind::Connection);
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_connection_failure() {
        let settings = SmtpSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..Default::default()
        };
        let transport = SmtpMailTransport::new(&settings).unwrap();
        let err = transport.deliver(&make_mail("b@x.com")).await.unwrap_err();
        assert_eq!(err.kind(), ExternalErrorKind::Connection);
    }
}
