//! Recording mail transport for tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use recruit_common::error::ExternalErrorKind;

use crate::mail::MailError;
use crate::transport::{MailTransport, OutgoingMail};

#[derive(Default)]
struct State {
    sent: Vec<OutgoingMail>,
    attempts: usize,
    pending_failures: usize,
    failure_kind: Option<ExternalErrorKind>,
    failing_recipients: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeMailTransport {
    state: Arc<Mutex<State>>,
}

impl FakeMailTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Successfully delivered mails.
    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.lock().sent.clone()
    }

    /// Delivery attempts, failed ones included.
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    /// Fail the next `count` deliveries with `kind`.
    pub fn fail_next(&self, count: usize, kind: ExternalErrorKind) {
        let mut state = self.lock();
        state.pending_failures = count;
        state.failure_kind = Some(kind);
    }

    /// Always fail deliveries addressed to `address`.
    pub fn fail_for(&self, address: &str) {
        self.lock().failing_recipients.push(address.to_string());
    }
}

#[async_trait]
impl MailTransport for FakeMailTransport {
    async fn deliver(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let mut state = self.lock();
        state.attempts += 1;

        if state.pending_failures > 0 {
            state.pending_failures -= 1;
            return Err(MailError::TransportFailed {
                kind: state.failure_kind.unwrap_or(ExternalErrorKind::Server),
                message: "injected failure".to_string(),
            });
        }

        if mail
            .to
            .iter()
            .any(|to| state.failing_recipients.iter().any(|f| f.eq_ignore_ascii_case(to)))
        {
            return Err(MailError::TransportFailed {
                kind: ExternalErrorKind::Client,
                message: "recipient rejected".to_string(),
            });
        }

        state.sent.push(mail.clone());
        Ok(())
    }
}
