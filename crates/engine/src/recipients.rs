//! Recipient resolution and routing.
//!
//! 1. Select the subscribers following the acronym (exact or `*`)
//! 2. Look up each distinct email in the practitioner directory
//! 3. Drop subscribers without a directory entry
//! 4. Split the resolved identities into ad-hoc and scheduled recipients

use std::collections::HashSet;
use std::sync::Arc;

use recruit_common::rules::NotificationRules;
use recruit_common::types::{RecipientIdentity, RoutingClass, Subscriber};
use recruit_fhir::ResourceStore;

use crate::context::EngineContext;
use crate::retry::RetryExecutor;

/// Resolved recipients split by routing class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutedRecipients {
    pub ad_hoc: Vec<RecipientIdentity>,
    pub scheduled: Vec<RecipientIdentity>,
}

impl RoutedRecipients {
    pub fn is_empty(&self) -> bool {
        self.ad_hoc.is_empty() && self.scheduled.is_empty()
    }
}

pub struct RecipientResolver {
    store: Arc<dyn ResourceStore>,
    retry: RetryExecutor,
    rules: Arc<NotificationRules>,
}

impl RecipientResolver {
    pub fn new(ctx: &EngineContext) -> Self {
        Self {
            store: ctx.store.clone(),
            retry: ctx.retry.clone(),
            rules: ctx.rules.clone(),
        }
    }

    pub async fn resolve(&self, acronym: &str) -> RoutedRecipients {
        let subscribers = self.rules.subscribers_for(acronym);
        if subscribers.is_empty() {
            return RoutedRecipients::default();
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut identities = Vec::new();

        for subscriber in &subscribers {
            if !seen.insert(subscriber.email.to_ascii_lowercase()) {
                continue;
            }

            let lookup = self
                .retry
                .execute("find recipient by email", || {
                    self.store.find_recipient_by_email(&subscriber.email)
                })
                .await;

            match lookup {
                Ok(Some(identity)) => identities.push(identity),
                Ok(None) => {
                    tracing::warn!(
                        email = %subscriber.email,
                        trial = %acronym,
                        "Subscriber has no practitioner entry, skipping"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        email = %subscriber.email,
                        trial = %acronym,
                        error = %e,
                        "Subscriber lookup failed, skipping"
                    );
                }
            }
        }

        let routed = PractitionerFilter::divide(&subscribers, &identities);
        tracing::debug!(
            trial = %acronym,
            ad_hoc = routed.ad_hoc.len(),
            scheduled = routed.scheduled.len(),
            "Recipients resolved"
        );
        routed
    }
}

/// Matches resolved identities back to the subscription they came from.
pub struct PractitionerFilter;

impl PractitionerFilter {
    /// An identity is routed by the class of the subscriber whose email it
    /// carries. Identities without a matching subscriber are dropped.
    pub fn divide(subscribers: &[Subscriber], identities: &[RecipientIdentity]) -> RoutedRecipients {
        let mut routed = RoutedRecipients::default();
        let mut placed: HashSet<&str> = HashSet::new();

        for identity in identities {
            let Some(email) = identity.email.as_deref() else {
                continue;
            };
            let Some(subscriber) = subscribers
                .iter()
                .find(|s| s.email.eq_ignore_ascii_case(email))
            else {
                continue;
            };
            if !placed.insert(identity.id.as_str()) {
                continue;
            }

            match subscriber.routing() {
                RoutingClass::AdHoc => routed.ad_hoc.push(identity.clone()),
                RoutingClass::Scheduled(_) => routed.scheduled.push(identity.clone()),
            }
        }

        routed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{make_context_with_rules, make_identity};
    use recruit_common::types::AcronymPattern;
    use recruit_fhir::StoreError;
    use recruit_fhir::memory::InMemoryStore;

    const RULES: &str = r#"{
        "trials": [
            { "acronym": "TEST", "subscriptions": [
                { "email": "adhoc@example.com" },
                { "email": "digest@example.com", "notify": "daily" },
                { "email": "unknown@example.com" }
            ] },
            { "acronym": "*", "subscriptions": [
                { "email": "ADHOC@example.com" }
            ] }
        ],
        "schedules": { "daily": "0 0 8 * * *" }
    }"#;

    fn make_subscriber(email: &str, job: Option<&str>) -> Subscriber {
        Subscriber {
            email: email.to_string(),
            scheduled_job_key: job.map(str::to_string),
            acronym: AcronymPattern::Any,
        }
    }

    #[test]
    fn test_divide_by_routing_class() {
        let subscribers = vec![
            make_subscriber("a@example.com", None),
            make_subscriber("b@example.com", Some("daily")),
        ];
        let identities = vec![
            make_identity("p1", "a@example.com"),
            make_identity("p2", "B@example.com"),
            make_identity("p3", "stranger@example.com"),
        ];

        let routed = PractitionerFilter::divide(&subscribers, &identities);
        assert_eq!(routed.ad_hoc, vec![make_identity("p1", "a@example.com")]);
        assert_eq!(routed.scheduled, vec![make_identity("p2", "B@example.com")]);
    }

    #[test]
    fn test_divide_places_identity_once() {
        let subscribers = vec![
            make_subscriber("a@example.com", None),
            make_subscriber("a@example.com", None),
        ];
        let identities = vec![
            make_identity("p1", "a@example.com"),
            make_identity("p1", "a@example.com"),
        ];
        let routed = PractitionerFilter::divide(&subscribers, &identities);
        assert_eq!(routed.ad_hoc.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_drops_unknown_subscribers() {
        let store = InMemoryStore::new();
        store.insert_recipient(make_identity("p1", "adhoc@example.com"));
        store.insert_recipient(make_identity("p2", "digest@example.com"));
        let resolver = RecipientResolver::new(&make_context_with_rules(store.clone(), RULES));

        let routed = resolver.resolve("test").await;

        assert_eq!(routed.ad_hoc, vec![make_identity("p1", "adhoc@example.com")]);
        assert_eq!(routed.scheduled, vec![make_identity("p2", "digest@example.com")]);
        // adhoc@ appears twice but is looked up once.
        assert_eq!(store.calls("find_recipient_by_email"), 3);
    }

    #[tokio::test]
    async fn test_failed_lookup_skips_only_that_subscriber() {
        let store = InMemoryStore::new();
        store.insert_recipient(make_identity("p1", "adhoc@example.com"));
        store.insert_recipient(make_identity("p2", "digest@example.com"));
        store.fail_next(
            "find_recipient_by_email",
            vec![StoreError::Http {
                status: 400,
                body: String::new(),
            }],
        );
        let resolver = RecipientResolver::new(&make_context_with_rules(store.clone(), RULES));

        let routed = resolver.resolve("TEST").await;

        assert!(routed.ad_hoc.is_empty());
        assert_eq!(routed.scheduled.len(), 1);
    }

    #[tokio::test]
    async fn test_no_subscribers_for_acronym() {
        let store = InMemoryStore::new();
        let rules = r#"{ "trials": [{ "acronym": "OTHER", "subscriptions": [{ "email": "a@example.com" }] }] }"#;
        let resolver = RecipientResolver::new(&make_context_with_rules(store.clone(), rules));

        assert!(resolver.resolve("TEST").await.is_empty());
        assert_eq!(store.calls("find_recipient_by_email"), 0);
    }
}
