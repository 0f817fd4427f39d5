use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Recruitment status of a research subject on a screening list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubjectStatus {
    Candidate,
    Eligible,
    FollowUp,
    Ineligible,
    NotRegistered,
    OffStudy,
    OnStudy,
    OnStudyIntervention,
    OnStudyObservation,
    PendingOnStudy,
    PotentialCandidate,
    Screening,
    Withdrawn,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for SubjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubjectStatus::Candidate => "candidate",
            SubjectStatus::Eligible => "eligible",
            SubjectStatus::FollowUp => "follow-up",
            SubjectStatus::Ineligible => "ineligible",
            SubjectStatus::NotRegistered => "not-registered",
            SubjectStatus::OffStudy => "off-study",
            SubjectStatus::OnStudy => "on-study",
            SubjectStatus::OnStudyIntervention => "on-study-intervention",
            SubjectStatus::OnStudyObservation => "on-study-observation",
            SubjectStatus::PendingOnStudy => "pending-on-study",
            SubjectStatus::PotentialCandidate => "potential-candidate",
            SubjectStatus::Screening => "screening",
            SubjectStatus::Withdrawn => "withdrawn",
            SubjectStatus::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// A research subject referenced by a screening list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchSubject {
    pub id: String,
    pub status: SubjectStatus,
}

/// Reference from a screening list to the study that owns it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyRef {
    /// Logical id of the `ResearchStudy`, if the reference carries one.
    pub id: Option<String>,
    /// Reference display text; usually already the study acronym.
    pub display: Option<String>,
}

/// Immutable snapshot of a screening list as received with one webhook call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreeningList {
    pub id: String,
    /// Monotonic version number assigned by the resource store.
    pub version: Option<u64>,
    /// Subject references in list order (e.g. `ResearchSubject/12`).
    pub subject_refs: Vec<String>,
    pub study: Option<StudyRef>,
}

/// A research study as read from the resource store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Study {
    pub id: String,
    /// Acronym carried by the study-acronym extension.
    pub acronym: Option<String>,
    pub title: Option<String>,
}

/// Which acronyms a subscriber or mail rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcronymPattern {
    /// The wildcard `*`.
    Any,
    Exact(String),
}

impl AcronymPattern {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed == "*" {
            AcronymPattern::Any
        } else {
            AcronymPattern::Exact(trimmed.to_string())
        }
    }

    /// Acronym comparison is case-insensitive.
    pub fn matches(&self, acronym: &str) -> bool {
        match self {
            AcronymPattern::Any => true,
            AcronymPattern::Exact(expected) => expected.eq_ignore_ascii_case(acronym),
        }
    }
}

impl std::fmt::Display for AcronymPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcronymPattern::Any => write!(f, "*"),
            AcronymPattern::Exact(acronym) => write!(f, "{}", acronym),
        }
    }
}

/// How a subscriber is notified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutingClass {
    /// Notified immediately on a qualifying change.
    AdHoc,
    /// Notified when the named schedule job fires.
    Scheduled(String),
}

impl std::fmt::Display for RoutingClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutingClass::AdHoc => write!(f, "ad-hoc"),
            RoutingClass::Scheduled(job) => write!(f, "scheduled:{}", job),
        }
    }
}

/// A configured interested party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub email: String,
    /// Absent means ad-hoc routing.
    pub scheduled_job_key: Option<String>,
    pub acronym: AcronymPattern,
}

impl Subscriber {
    pub fn routing(&self) -> RoutingClass {
        match &self.scheduled_job_key {
            Some(job) => RoutingClass::Scheduled(job.clone()),
            None => RoutingClass::AdHoc,
        }
    }
}

/// External identity (a FHIR `Practitioner`) resolved for a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecipientIdentity {
    pub id: String,
    pub email: Option<String>,
}

/// Reference to a recipient as stored on a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientRef {
    pub id: String,
    /// Email address at creation time, informational only.
    pub display: Option<String>,
}

impl From<&RecipientIdentity> for RecipientRef {
    fn from(identity: &RecipientIdentity) -> Self {
        Self {
            id: identity.id.clone(),
            display: identity.email.clone(),
        }
    }
}

/// Delivery status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageStatus {
    Active,
    Completed,
    OnHold,
}

impl MessageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageStatus::Completed | MessageStatus::OnHold)
    }

    /// Only `Active -> Completed` and `Active -> OnHold` are allowed.
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        self == MessageStatus::Active && next.is_terminal()
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageStatus::Active => write!(f, "active"),
            MessageStatus::Completed => write!(f, "completed"),
            MessageStatus::OnHold => write!(f, "on-hold"),
        }
    }
}

/// A notification intended for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Study acronym the message is about.
    pub topic: String,
    /// Screening list id; empty if the stored record had no list reference.
    pub about: String,
    pub recipient: RecipientRef,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub idempotency_token: Uuid,
}

/// A message that has been persisted and carries its store id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub message: Message,
}

/// A named batch delivery job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleJob {
    pub job_key: String,
    pub cron_expression: String,
}
