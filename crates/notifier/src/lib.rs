//! Notification mail delivery.
//!
//! A [`Mailer`] validates addresses, renders the plain-text and HTML bodies
//! and hands the result to a [`MailTransport`]. Failures come back as a
//! [`MailError`] the caller inspects; nothing here retries.

pub mod mail;
pub mod template;
pub mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use mail::{Envelope, MailError, Mailer, NotifyInfo};
pub use template::TemplateRenderer;
pub use transport::{MailTransport, OutgoingMail, SmtpMailTransport};
