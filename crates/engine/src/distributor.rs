//! Scheduled delivery of queued messages.
//!
//! When a schedule job fires, the distributor:
//! 1. Resolves the job's audience to practitioner ids
//! 2. Loads the active messages addressed to them
//! 3. Sends each message to the recipient's current address
//! 4. Marks sent messages completed and everything else on-hold, as two batches
//!
//! A failure on one message never stops the run; it only decides that
//! message's final status.

use std::sync::Arc;

use async_trait::async_trait;
use recruit_common::config::MailSettings;
use recruit_common::rules::NotificationRules;
use recruit_common::types::{MessageStatus, StoredMessage};
use recruit_fhir::{ResourceStore, StoreError};
use recruit_notifier::mail::{screening_list_link, subject_for};
use recruit_notifier::{Envelope, Mailer, NotifyInfo};

use crate::context::EngineContext;
use crate::retry::RetryExecutor;
use crate::scheduler::JobHandler;

/// Message ids grouped by the status they were moved to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionReport {
    pub completed: Vec<String>,
    pub on_hold: Vec<String>,
}

pub struct Distributor {
    store: Arc<dyn ResourceStore>,
    retry: RetryExecutor,
    mailer: Mailer,
    rules: Arc<NotificationRules>,
    mail: MailSettings,
}

impl Distributor {
    pub fn new(ctx: &EngineContext) -> Self {
        Self {
            store: ctx.store.clone(),
            retry: ctx.retry.clone(),
            mailer: ctx.mailer.clone(),
            rules: ctx.rules.clone(),
            mail: ctx.mail.clone(),
        }
    }

    /// Deliver every active message queued for the audience of `job_key`.
    ///
    /// Fails only if the queued messages cannot be loaded; nothing has been
    /// sent or updated at that point.
    pub async fn distribute(&self, job_key: &str) -> Result<DistributionReport, StoreError> {
        let audience = self.rules.audience(job_key);
        tracing::info!(job = %job_key, audience = audience.len(), "Distribution started");

        if audience.is_empty() {
            return Ok(DistributionReport::default());
        }

        let mut recipient_ids = Vec::with_capacity(audience.len());
        for email in &audience {
            let lookup = self
                .retry
                .execute("find recipient by email", || {
                    self.store.find_recipient_by_email(email)
                })
                .await;
            match lookup {
                Ok(Some(identity)) => recipient_ids.push(identity.id),
                Ok(None) => {
                    tracing::warn!(job = %job_key, email = %email, "Audience member has no practitioner entry");
                }
                Err(e) => {
                    tracing::warn!(job = %job_key, email = %email, error = %e, "Audience lookup failed");
                }
            }
        }

        let messages = self
            .retry
            .execute("load queued messages", || {
                self.store.active_messages_for(&recipient_ids)
            })
            .await?;

        let mut report = DistributionReport::default();
        for stored in &messages {
            if self.deliver(job_key, stored).await {
                report.completed.push(stored.id.clone());
            } else {
                report.on_hold.push(stored.id.clone());
            }
        }

        self.apply(job_key, &report.completed, MessageStatus::Completed).await;
        self.apply(job_key, &report.on_hold, MessageStatus::OnHold).await;

        tracing::info!(
            job = %job_key,
            completed = report.completed.len(),
            on_hold = report.on_hold.len(),
            "Distribution finished"
        );
        Ok(report)
    }

    /// Send one queued message. Returns whether it was delivered.
    async fn deliver(&self, job_key: &str, stored: &StoredMessage) -> bool {
        let message = &stored.message;

        if message.about.is_empty() {
            tracing::error!(
                message_id = %stored.id,
                "No screening list linked to message, link will be truncated"
            );
        }

        let Some(address) = self.address_of(stored).await else {
            tracing::warn!(
                job = %job_key,
                message_id = %stored.id,
                "Message has no deliverable recipient address"
            );
            return false;
        };

        let envelope = Envelope {
            from: self.mail.from.clone(),
            to: vec![address],
            subject: subject_for(&self.mail.subject, &message.topic),
        };
        let info = NotifyInfo {
            study_acronym: message.topic.clone(),
            screening_list_link: screening_list_link(&self.mail.link_template, &message.about),
        };

        match self
            .retry
            .execute("send mail", || self.mailer.send(&envelope, &info))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    job = %job_key,
                    message_id = %stored.id,
                    trial = %message.topic,
                    error = %e,
                    "Mail could not be sent"
                );
                false
            }
        }
    }

    /// Current email of the message's recipient, read from the directory.
    async fn address_of(&self, stored: &StoredMessage) -> Option<String> {
        let recipient_id = stored.message.recipient.id.as_str();
        if recipient_id.is_empty() {
            return None;
        }

        match self
            .retry
            .execute("read recipient", || self.store.read_recipient(recipient_id))
            .await
        {
            Ok(identity) => identity.and_then(|i| i.email),
            Err(e) => {
                tracing::warn!(message_id = %stored.id, error = %e, "Recipient lookup failed");
                None
            }
        }
    }

    async fn apply(&self, job_key: &str, ids: &[String], status: MessageStatus) {
        if ids.is_empty() {
            return;
        }

        if let Err(e) = self
            .retry
            .execute("update message status", || {
                self.store.update_message_statuses(ids, status)
            })
            .await
        {
            tracing::error!(
                job = %job_key,
                status = %status,
                count = ids.len(),
                error = %e,
                "Failed to update message statuses"
            );
        }
    }
}

#[async_trait]
impl JobHandler for Distributor {
    async fn run(&self, job_key: &str) {
        if let Err(e) = self.distribute(job_key).await {
            tracing::error!(job = %job_key, error = %e, "Distribution aborted");
        }
    }
}
