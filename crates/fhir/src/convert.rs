//! Mapping between FHIR resources and domain types.

use chrono::{DateTime, Utc};
use recruit_common::config::FhirSystems;
use recruit_common::types::{
    Message, MessageStatus, RecipientIdentity, RecipientRef, ResearchSubject, ScreeningList,
    StoredMessage, Study, StudyRef, SubjectStatus,
};
use uuid::Uuid;

use crate::resources::{
    CodeableConcept, Coding, CommunicationRequestResource, ContactPoint, Identifier,
    ListResource, PayloadContent, PractitionerResource, Reference, ResearchStudyResource,
    ResearchSubjectResource, SubscriptionChannel, SubscriptionResource,
};
use crate::store::StoreError;

const CATEGORY_CODE: &str = "notification";
const SUBSCRIPTION_REASON: &str = "Create notifications based on screening list changes.";

pub fn screening_list(
    resource: &ListResource,
    systems: &FhirSystems,
) -> Result<ScreeningList, StoreError> {
    let id = resource
        .id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| StoreError::Decode("List resource has no id".to_string()))?;

    let version = match resource.meta.as_ref().and_then(|m| m.version_id.as_deref()) {
        Some(raw) => match raw.parse::<u64>() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(list_id = %id, version_id = %raw, "List version id is not numeric");
                None
            }
        },
        None => None,
    };

    let subject_refs = resource
        .entry
        .iter()
        .filter_map(|e| e.item.reference.clone())
        .collect();

    let study = resource
        .extension
        .iter()
        .find(|ext| ext.url == systems.screening_list_reference)
        .and_then(|ext| ext.value_reference.as_ref())
        .map(|reference| StudyRef {
            id: reference.id_part().map(str::to_string),
            display: reference
                .display
                .clone()
                .filter(|d| !d.trim().is_empty()),
        });

    Ok(ScreeningList {
        id,
        version,
        subject_refs,
        study,
    })
}

pub fn research_subject(resource: &ResearchSubjectResource) -> Option<ResearchSubject> {
    let id = resource.id.clone()?;
    let status = resource
        .status
        .as_deref()
        .and_then(|s| serde_json::from_value(serde_json::Value::String(s.to_string())).ok())
        .unwrap_or(SubjectStatus::Unknown);
    Some(ResearchSubject { id, status })
}

/// The acronym extension wins over an identifier in the acronym system.
pub fn study(resource: &ResearchStudyResource, systems: &FhirSystems) -> Option<Study> {
    let id = resource.id.clone()?;
    let from_extension = resource
        .extension
        .iter()
        .find(|ext| ext.url == systems.study_acronym)
        .and_then(|ext| ext.value_string.clone());
    let from_identifier = resource
        .identifier
        .iter()
        .find(|i| i.system.as_deref() == Some(systems.study_acronym.as_str()))
        .and_then(|i| i.value.clone());

    Some(Study {
        id,
        acronym: from_extension
            .or(from_identifier)
            .filter(|a| !a.trim().is_empty()),
        title: resource.title.clone().filter(|t| !t.trim().is_empty()),
    })
}

pub fn recipient(resource: &PractitionerResource, systems: &FhirSystems) -> Option<RecipientIdentity> {
    let id = resource.id.clone()?;
    let email = resource
        .first_email()
        .map(str::to_string)
        .or_else(|| {
            resource
                .identifier
                .iter()
                .find(|i| i.system.as_deref() == Some(systems.subscriber.as_str()))
                .and_then(|i| i.value.clone())
        })
        .filter(|e| !e.trim().is_empty());
    Some(RecipientIdentity { id, email })
}

/// New practitioner carrying `email` as work contact and subscriber identifier.
pub fn practitioner_for_email(email: &str, systems: &FhirSystems) -> PractitionerResource {
    PractitionerResource {
        id: None,
        identifier: vec![Identifier {
            system: Some(systems.subscriber.clone()),
            value: Some(email.to_string()),
        }],
        telecom: vec![ContactPoint {
            system: Some("email".to_string()),
            value: Some(email.to_string()),
            use_: Some("work".to_string()),
        }],
    }
}

pub fn payload_text(topic: &str) -> String {
    format!("Notification about potential new study candidates for {}", topic)
}

pub fn communication_request(message: &Message, systems: &FhirSystems) -> CommunicationRequestResource {
    let about = if message.about.is_empty() {
        Vec::new()
    } else {
        vec![Reference::to("List", &message.about)]
    };

    CommunicationRequestResource {
        id: None,
        meta: None,
        identifier: vec![Identifier {
            system: Some(systems.communication.clone()),
            value: Some(message.idempotency_token.to_string()),
        }],
        status: message.status.to_string(),
        priority: None,
        category: vec![CodeableConcept {
            coding: vec![Coding {
                system: Some(systems.communication_category.clone()),
                code: Some(CATEGORY_CODE.to_string()),
            }],
            text: None,
        }],
        payload: vec![PayloadContent {
            content_string: Some(payload_text(&message.topic)),
        }],
        authored_on: Some(message.created_at.to_rfc3339()),
        recipient: vec![Reference {
            reference: Some(format!("Practitioner/{}", message.recipient.id)),
            display: message.recipient.display.clone(),
        }],
        about,
        reason_code: vec![CodeableConcept {
            coding: Vec::new(),
            text: Some(message.topic.clone()),
        }],
    }
}

pub fn message_status(raw: &str) -> Result<MessageStatus, StoreError> {
    match raw {
        "active" => Ok(MessageStatus::Active),
        "completed" => Ok(MessageStatus::Completed),
        "on-hold" => Ok(MessageStatus::OnHold),
        other => Err(StoreError::Decode(format!(
            "unsupported CommunicationRequest status '{}'",
            other
        ))),
    }
}

/// Decode a stored message.
///
/// A missing `List` or `Practitioner` reference yields an empty id, so the
/// caller can still settle the message instead of skipping it.
pub fn stored_message(
    resource: &CommunicationRequestResource,
    systems: &FhirSystems,
) -> Result<StoredMessage, StoreError> {
    let id = resource
        .id
        .clone()
        .ok_or_else(|| StoreError::Decode("CommunicationRequest has no id".to_string()))?;

    let topic = resource
        .reason_code
        .first()
        .and_then(|c| c.text.clone())
        .unwrap_or_default();

    let about = resource
        .about
        .iter()
        .find(|r| r.resource_type() == Some("List"))
        .and_then(|r| r.id_part())
        .unwrap_or_default()
        .to_string();

    let recipient = resource
        .recipient
        .iter()
        .find(|r| r.resource_type() == Some("Practitioner"))
        .map(|r| RecipientRef {
            id: r.id_part().unwrap_or_default().to_string(),
            display: r.display.clone(),
        })
        .unwrap_or(RecipientRef {
            id: String::new(),
            display: None,
        });

    let created_at = resource
        .authored_on
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default();

    let idempotency_token = resource
        .identifier
        .iter()
        .find(|i| i.system.as_deref() == Some(systems.communication.as_str()))
        .and_then(|i| i.value.as_deref())
        .and_then(|v| Uuid::parse_str(v).ok())
        .unwrap_or(Uuid::nil());

    Ok(StoredMessage {
        id,
        message: Message {
            topic,
            about,
            recipient,
            status: message_status(&resource.status)?,
            created_at,
            idempotency_token,
        },
    })
}

pub fn subscription(criteria: &str, endpoint: &str) -> SubscriptionResource {
    SubscriptionResource {
        id: None,
        status: "requested".to_string(),
        reason: SUBSCRIPTION_REASON.to_string(),
        criteria: criteria.to_string(),
        channel: SubscriptionChannel {
            channel_type: "rest-hook".to_string(),
            endpoint: endpoint.to_string(),
            payload: "application/fhir+json".to_string(),
        },
    }
}
