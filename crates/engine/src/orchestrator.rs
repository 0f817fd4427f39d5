//! Webhook-triggered notification pipeline.
//!
//! For every changed screening list:
//! 1. Skip lists whose subject set did not change (`ChangeDetector`)
//! 2. Skip lists without a candidate subject (`CandidateGate`)
//! 3. Resolve the study acronym (`StudyResolver`)
//! 4. Send one mail per matching direct mail rule
//! 5. Resolve and route subscribers (`RecipientResolver`)
//! 6. Mail ad-hoc recipients immediately
//! 7. Deduplicate and queue messages for scheduled recipients
//!
//! Store failures that survive all retries abort the run. Mail failures are
//! logged per message and never stop the remaining sends.

use std::sync::Arc;

use recruit_common::config::MailSettings;
use recruit_common::rules::NotificationRules;
use recruit_common::types::{Message, RecipientIdentity, ScreeningList};
use recruit_notifier::mail::{screening_list_link, subject_for};
use recruit_notifier::{Envelope, Mailer, NotifyInfo};

use crate::change::ChangeDetector;
use crate::context::EngineContext;
use crate::dedup::DeduplicationFilter;
use crate::error::PipelineError;
use crate::gate::CandidateGate;
use crate::message::MessageFactory;
use crate::queue::QueueStore;
use crate::recipients::RecipientResolver;
use crate::retry::RetryExecutor;
use crate::study::StudyResolver;

/// Counts of what one pipeline run sent or queued.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub acronym: String,
    /// Mails sent for direct mail rules.
    pub rule_mails: usize,
    /// Mails sent to ad-hoc subscribers.
    pub ad_hoc_mails: usize,
    /// Messages persisted for scheduled delivery.
    pub queued: usize,
}

impl DispatchSummary {
    pub fn sent(&self) -> usize {
        self.rule_mails + self.ad_hoc_mails
    }
}

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListChangeOutcome {
    Unchanged,
    NoCandidates,
    UnresolvedAcronym,
    NoMatchingRule { acronym: String },
    Dispatched(DispatchSummary),
}

pub struct Orchestrator {
    change: ChangeDetector,
    gate: CandidateGate,
    study: StudyResolver,
    recipients: RecipientResolver,
    dedup: DeduplicationFilter,
    queue: QueueStore,
    mailer: Mailer,
    rules: Arc<NotificationRules>,
    mail: MailSettings,
    retry: RetryExecutor,
}

impl Orchestrator {
    pub fn new(ctx: &EngineContext) -> Self {
        Self {
            change: ChangeDetector::new(ctx),
            gate: CandidateGate::new(ctx),
            study: StudyResolver::new(ctx),
            recipients: RecipientResolver::new(ctx),
            dedup: DeduplicationFilter::new(ctx),
            queue: QueueStore::new(ctx),
            mailer: ctx.mailer.clone(),
            rules: ctx.rules.clone(),
            mail: ctx.mail.clone(),
            retry: ctx.retry.clone(),
        }
    }

    /// Process one received screening list snapshot to completion.
    pub async fn on_list_change(
        &self,
        list: &ScreeningList,
    ) -> Result<ListChangeOutcome, PipelineError> {
        tracing::info!(list_id = %list.id, version = ?list.version, "Screening list change received");

        if !self.change.has_changed(list).await? {
            tracing::info!(list_id = %list.id, "Subject set unchanged, nothing to notify");
            return Ok(ListChangeOutcome::Unchanged);
        }

        if !self.gate.admit(list).await? {
            return Ok(ListChangeOutcome::NoCandidates);
        }

        let Some(acronym) = self.study.resolve_acronym(list.study.as_ref()).await? else {
            tracing::error!(list_id = %list.id, study = ?list.study, "Study acronym could not be resolved");
            return Ok(ListChangeOutcome::UnresolvedAcronym);
        };

        let mail_rules = self.rules.matching_mail_rules(&acronym);
        let has_subscribers = !self.rules.subscribers_for(&acronym).is_empty();
        if mail_rules.is_empty() && !has_subscribers {
            tracing::warn!(trial = %acronym, "No matching notification rule found");
            return Ok(ListChangeOutcome::NoMatchingRule { acronym });
        }

        let info = NotifyInfo {
            study_acronym: acronym.clone(),
            screening_list_link: screening_list_link(&self.mail.link_template, &list.id),
        };
        let subject = subject_for(&self.mail.subject, &acronym);
        let mut summary = DispatchSummary {
            acronym: acronym.clone(),
            ..Default::default()
        };

        for rule in mail_rules {
            tracing::info!(trial = %acronym, rule = %rule.acronym, to = ?rule.to, "Notification rule matched");
            let envelope = Envelope {
                from: rule.from.clone().unwrap_or_else(|| self.mail.from.clone()),
                to: rule.to.clone(),
                subject: subject.clone(),
            };
            if self.send(&envelope, &info).await {
                summary.rule_mails += 1;
            }
        }

        let routed = self.recipients.resolve(&acronym).await;

        let ad_hoc = MessageFactory::create_messages(&acronym, &list.id, &routed.ad_hoc);
        summary.ad_hoc_mails = self
            .send_ad_hoc(&ad_hoc, &routed.ad_hoc, &subject, &info)
            .await;

        let scheduled = MessageFactory::create_messages(&acronym, &list.id, &routed.scheduled);
        let fresh = self.dedup.filter(scheduled).await?;
        summary.queued = self.queue.transmit(&fresh).await?.len();

        tracing::info!(
            list_id = %list.id,
            trial = %acronym,
            rule_mails = summary.rule_mails,
            ad_hoc_mails = summary.ad_hoc_mails,
            queued = summary.queued,
            "Screening list change processed"
        );
        Ok(ListChangeOutcome::Dispatched(summary))
    }

    /// Mail ad-hoc messages directly; they are never persisted.
    async fn send_ad_hoc(
        &self,
        messages: &[Message],
        recipients: &[RecipientIdentity],
        subject: &str,
        info: &NotifyInfo,
    ) -> usize {
        let mut sent = 0;
        for message in messages {
            let address = recipients
                .iter()
                .find(|r| r.id == message.recipient.id)
                .and_then(|r| r.email.clone());

            let Some(address) = address else {
                tracing::error!(
                    recipient_id = %message.recipient.id,
                    trial = %message.topic,
                    "Receiver has no address, mail not sent"
                );
                continue;
            };

            let envelope = Envelope {
                from: self.mail.from.clone(),
                to: vec![address],
                subject: subject.to_string(),
            };
            if self.send(&envelope, info).await {
                sent += 1;
            }
        }
        sent
    }

    async fn send(&self, envelope: &Envelope, info: &NotifyInfo) -> bool {
        match self
            .retry
            .execute("send mail", || self.mailer.send(envelope, info))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    to = ?envelope.to,
                    trial = %info.study_acronym,
                    error = %e,
                    "Mail could not be sent"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestHarness, make_identity, make_list, make_subject};
    use recruit_common::types::{StudyRef, SubjectStatus};

    fn make_changed_list() -> ScreeningList {
        let mut list = make_list("1", Some(2), &["ResearchSubject/a"]);
        list.study = Some(StudyRef {
            id: Some("7".to_string()),
            display: Some("TEST".to_string()),
        });
        list
    }

    #[tokio::test]
    async fn test_ad_hoc_and_scheduled_split() {
        let harness = TestHarness::new(
            r#"{
                "trials": [{ "acronym": "TEST", "subscriptions": [
                    { "email": "now@example.com" },
                    { "email": "later@example.com", "notify": "daily" }
                ] }],
                "schedules": { "daily": "0 0 8 * * *" }
            }"#,
        );
        harness.store.insert_subject(make_subject("a", SubjectStatus::Candidate));
        harness.store.insert_recipient(make_identity("p1", "now@example.com"));
        harness.store.insert_recipient(make_identity("p2", "later@example.com"));

        let outcome = Orchestrator::new(&harness.ctx)
            .on_list_change(&make_changed_list())
            .await
            .unwrap();

        let ListChangeOutcome::Dispatched(summary) = outcome else {
            panic!("expected dispatch, got {:?}", outcome);
        };
        assert_eq!(summary.ad_hoc_mails, 1);
        assert_eq!(summary.queued, 1);
        assert_eq!(harness.transport.sent()[0].to, vec!["now@example.com".to_string()]);

        let queued = harness.store.messages();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].message.recipient.id, "p2");
        assert_eq!(queued[0].message.about, "1");
    }

    #[tokio::test]
    async fn test_rule_without_from_uses_default_sender() {
        let harness = TestHarness::new(r#"{ "mail": [{ "acronym": "TEST", "to": ["a@x.com"] }] }"#);
        harness.store.insert_subject(make_subject("a", SubjectStatus::Candidate));

        Orchestrator::new(&harness.ctx)
            .on_list_change(&make_changed_list())
            .await
            .unwrap();

        assert_eq!(harness.transport.sent()[0].from, harness.ctx.mail.from);
    }

    #[tokio::test]
    async fn test_mail_failure_does_not_abort_run() {
        let harness = TestHarness::new(
            r#"{ "mail": [
                { "acronym": "TEST", "to": ["broken@x.com"] },
                { "acronym": "*", "to": ["ok@x.com"] }
            ] }"#,
        );
        harness.store.insert_subject(make_subject("a", SubjectStatus::Candidate));
        harness.transport.fail_for("broken@x.com");

        let outcome = Orchestrator::new(&harness.ctx)
            .on_list_change(&make_changed_list())
            .await
            .unwrap();

        let ListChangeOutcome::Dispatched(summary) = outcome else {
            panic!("expected dispatch, got {:?}", outcome);
        };
        assert_eq!(summary.rule_mails, 1);
        assert_eq!(harness.transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_unresolved_acronym_stops_pipeline() {
        let harness = TestHarness::new(r#"{ "mail": [{ "acronym": "*", "to": ["a@x.com"] }] }"#);
        harness.store.insert_subject(make_subject("a", SubjectStatus::Candidate));
        let mut list = make_changed_list();
        list.study = None;

        let outcome = Orchestrator::new(&harness.ctx).on_list_change(&list).await.unwrap();

        assert_eq!(outcome, ListChangeOutcome::UnresolvedAcronym);
        assert!(harness.transport.sent().is_empty());
    }
}
