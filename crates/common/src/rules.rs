//! Notification rules: who is notified about which study, and when.
//!
//! Loaded once at startup from a JSON file:
//!
//! ```json
//! {
//!   "mail": [{ "acronym": "TEST", "from": "noreply@example.com", "to": ["a@example.com"] }],
//!   "trials": [
//!     { "acronym": "*", "subscriptions": [
//!         { "email": "everything@example.com" },
//!         { "email": "digest@example.com", "notify": "daily" }
//!     ] }
//!   ],
//!   "schedules": { "daily": "0 0 8 * * ?" }
//! }
//! ```
//!
//! `mail` rules send one immediate mail per matching rule. `trials` subscribers
//! are resolved to practitioners and routed ad-hoc (no `notify`) or to the
//! named schedule job.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::types::{AcronymPattern, RoutingClass, ScheduleJob, Subscriber};

/// A direct mail rule: one mail to all `to` addresses when the acronym matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailRule {
    pub acronym: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Vec<String>,
}

impl MailRule {
    pub fn pattern(&self) -> AcronymPattern {
        AcronymPattern::parse(&self.acronym)
    }
}

/// One subscriber entry under a trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionEntry {
    pub email: String,
    /// Schedule job key; absent or blank means ad-hoc.
    #[serde(default, alias = "notify", alias = "scheduledJobKey")]
    pub scheduled_job_key: Option<String>,
}

/// Subscribers grouped by the trial acronym (or `*`) they follow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialSubscriptions {
    pub acronym: String,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionEntry>,
}

/// The complete notification rule set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRules {
    #[serde(default)]
    pub mail: Vec<MailRule>,
    #[serde(default)]
    pub trials: Vec<TrialSubscriptions>,
    /// Job key → cron expression.
    #[serde(default)]
    pub schedules: BTreeMap<String, String>,
}

impl NotificationRules {
    /// Read, parse and validate the rules file.
    pub fn load(path: &str) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("cannot read rules file {}: {}", path, e)))?;
        let rules = Self::from_json(&raw)?;

        tracing::info!(
            path,
            mail_rules = rules.mail.len(),
            trials = rules.trials.len(),
            schedules = rules.schedules.len(),
            "Notification rules loaded"
        );

        Ok(rules)
    }

    /// Parse and validate rules from a JSON string.
    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        let rules: NotificationRules = serde_json::from_str(raw)
            .map_err(|e| AppError::Config(format!("invalid rules file: {}", e)))?;
        rules.validate()?;
        Ok(rules)
    }

    /// Check that every subscriber has exactly one routing class and every
    /// cron expression parses.
    pub fn validate(&self) -> Result<(), AppError> {
        let mut classes: HashMap<String, RoutingClass> = HashMap::new();
        for subscriber in self.subscribers() {
            let key = subscriber.email.to_ascii_lowercase();
            let class = subscriber.routing();
            if let Some(existing) = classes.get(&key)
                && *existing != class
            {
                return Err(AppError::Config(format!(
                    "subscriber {} is bound to both {} and {}",
                    subscriber.email, existing, class
                )));
            }

            if let RoutingClass::Scheduled(job) = &class
                && !self.schedules.contains_key(job)
            {
                tracing::warn!(
                    email = %subscriber.email,
                    job = %job,
                    "Subscriber references a schedule job that is not configured"
                );
            }

            classes.insert(key, class);
        }

        for (job, expression) in &self.schedules {
            cron::Schedule::from_str(&normalize_cron(expression)).map_err(|e| {
                AppError::Config(format!(
                    "invalid cron expression '{}' for job {}: {}",
                    expression, job, e
                ))
            })?;
        }

        Ok(())
    }

    /// Mail rules whose acronym equals `acronym` or is the wildcard.
    pub fn matching_mail_rules(&self, acronym: &str) -> Vec<&MailRule> {
        self.mail
            .iter()
            .filter(|rule| rule.pattern().matches(acronym))
            .collect()
    }

    /// All configured subscribers, flattened across trials.
    pub fn subscribers(&self) -> Vec<Subscriber> {
        self.trials
            .iter()
            .flat_map(|trial| {
                let pattern = AcronymPattern::parse(&trial.acronym);
                trial.subscriptions.iter().map(move |entry| Subscriber {
                    email: entry.email.trim().to_string(),
                    scheduled_job_key: entry
                        .scheduled_job_key
                        .as_deref()
                        .map(str::trim)
                        .filter(|job| !job.is_empty())
                        .map(str::to_string),
                    acronym: pattern.clone(),
                })
            })
            .collect()
    }

    /// Subscribers following `acronym` directly or through the wildcard.
    pub fn subscribers_for(&self, acronym: &str) -> Vec<Subscriber> {
        self.subscribers()
            .into_iter()
            .filter(|subscriber| subscriber.acronym.matches(acronym))
            .collect()
    }

    /// Distinct email addresses bound to the given schedule job.
    pub fn audience(&self, job_key: &str) -> Vec<String> {
        let mut emails: Vec<String> = Vec::new();
        for subscriber in self.subscribers() {
            if subscriber.scheduled_job_key.as_deref() == Some(job_key)
                && !emails
                    .iter()
                    .any(|e| e.eq_ignore_ascii_case(&subscriber.email))
            {
                emails.push(subscriber.email);
            }
        }
        emails
    }

    /// Every distinct subscriber email, in configuration order.
    pub fn subscriber_emails(&self) -> Vec<String> {
        let mut emails: Vec<String> = Vec::new();
        for subscriber in self.subscribers() {
            if !emails
                .iter()
                .any(|e| e.eq_ignore_ascii_case(&subscriber.email))
            {
                emails.push(subscriber.email);
            }
        }
        emails
    }

    pub fn schedule_jobs(&self) -> Vec<ScheduleJob> {
        self.schedules
            .iter()
            .map(|(job_key, cron_expression)| ScheduleJob {
                job_key: job_key.clone(),
                cron_expression: cron_expression.clone(),
            })
            .collect()
    }
}

/// Accept Quartz-style `?` placeholders, which the `cron` parser spells `*`.
pub fn normalize_cron(expression: &str) -> String {
    expression.trim().replace('?', "*")
}
