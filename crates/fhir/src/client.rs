//! reqwest-backed [`ResourceStore`] talking FHIR R4 REST.

use std::time::Duration;

use async_trait::async_trait;
use recruit_common::config::FhirSystems;
use recruit_common::types::{
    Message, MessageStatus, RecipientIdentity, ResearchSubject, ScreeningList, StoredMessage,
    Study,
};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use crate::convert;
use crate::resources::{
    Bundle, BundleEntry, BundleRequest, CommunicationRequestResource, ListResource,
    PractitionerResource, Reference, ResearchStudyResource, ResearchSubjectResource,
    to_resource_json,
};
use crate::store::{ResourceStore, StoreError};

const FHIR_JSON: &str = "application/fhir+json";

/// HTTP client for the FHIR resource store.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct FhirClient {
    http: Client,
    base_url: String,
    systems: FhirSystems,
}

impl FhirClient {
    pub fn new(base_url: &str, systems: FhirSystems) -> Result<Self, StoreError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StoreError::Connection(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            systems,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send a request, mapping transport failures and non-2xx statuses.
    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, StoreError> {
        let resp = request
            .header(ACCEPT, FHIR_JSON)
            .send()
            .await
            .map_err(transport_error)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Http { status, body });
        }
        Ok(resp)
    }

    async fn read<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, StoreError> {
        match self.send(self.http.get(self.url(path))).await {
            Ok(resp) => resp.json().await.map(Some).map_err(transport_error),
            Err(StoreError::Http { status, .. })
                if status == StatusCode::NOT_FOUND.as_u16()
                    || status == StatusCode::GONE.as_u16() =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Run a search and follow `next` links until the result set is exhausted.
    async fn search_all<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        resource_type: &str,
    ) -> Result<Vec<T>, StoreError> {
        let mut bundle: Bundle = self
            .send(self.http.get(self.url(path)).query(query))
            .await?
            .json()
            .await
            .map_err(transport_error)?;
        let mut results = decode_entries(&bundle, resource_type)?;

        while let Some(next) = bundle.next_link().map(str::to_string) {
            tracing::debug!(url = %next, "Loading next search page");
            bundle = self
                .send(self.http.get(next))
                .await?
                .json()
                .await
                .map_err(transport_error)?;
            results.extend(decode_entries(&bundle, resource_type)?);
        }

        Ok(results)
    }

    async fn transaction(&self, bundle: &Bundle) -> Result<Bundle, StoreError> {
        self.send(
            self.http
                .post(self.base_url.clone())
                .header(CONTENT_TYPE, FHIR_JSON)
                .json(bundle),
        )
        .await?
        .json()
        .await
        .map_err(transport_error)
    }

    fn active_message_filter(&self) -> Vec<(&'static str, String)> {
        vec![
            ("status", MessageStatus::Active.to_string()),
            ("identifier", format!("{}|", self.systems.communication)),
        ]
    }

    fn stored_messages(
        &self,
        resources: Vec<CommunicationRequestResource>,
    ) -> Vec<StoredMessage> {
        resources
            .iter()
            .filter_map(|r| match convert::stored_message(r, &self.systems) {
                Ok(message) => Some(message),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping undecodable CommunicationRequest");
                    None
                }
            })
            .collect()
    }
}

fn transport_error(err: reqwest::Error) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout(err.to_string())
    } else if err.is_decode() {
        StoreError::Decode(err.to_string())
    } else {
        StoreError::Connection(err.to_string())
    }
}

fn decode_entries<T: DeserializeOwned>(
    bundle: &Bundle,
    resource_type: &str,
) -> Result<Vec<T>, StoreError> {
    bundle
        .resources_of(resource_type)
        .map_err(|e| StoreError::Decode(format!("{} entry: {}", resource_type, e)))
}

fn encode<T: serde::Serialize>(resource_type: &str, resource: &T) -> Result<serde_json::Value, StoreError> {
    to_resource_json(resource_type, resource)
        .map_err(|e| StoreError::Decode(format!("cannot encode {}: {}", resource_type, e)))
}

/// PUT entry moving one stored message to `status`.
///
/// Returns `None` when the stored status is unknown or the transition is not
/// allowed; such messages are left as they are.
fn status_update(
    id: &str,
    mut resource: CommunicationRequestResource,
    status: MessageStatus,
) -> Result<Option<BundleEntry>, StoreError> {
    let current = match convert::message_status(&resource.status) {
        Ok(current) => current,
        Err(e) => {
            tracing::warn!(
                message_id = %id,
                stored = %resource.status,
                error = %e,
                "Skipping status update of message with unknown status"
            );
            return Ok(None);
        }
    };

    if !current.can_transition_to(status) {
        tracing::warn!(
            message_id = %id,
            from = %current,
            to = %status,
            "Skipping disallowed message status transition"
        );
        return Ok(None);
    }

    resource.status = status.to_string();
    Ok(Some(BundleEntry {
        full_url: None,
        resource: Some(encode("CommunicationRequest", &resource)?),
        request: Some(BundleRequest {
            method: "PUT".to_string(),
            url: format!("CommunicationRequest/{}", id),
            if_none_exist: None,
        }),
        response: None,
    }))
}

#[async_trait]
impl ResourceStore for FhirClient {
    async fn read_list_version(
        &self,
        list_id: &str,
        version: u64,
    ) -> Result<Option<ScreeningList>, StoreError> {
        let resource: Option<ListResource> = self
            .read(&format!("List/{}/_history/{}", list_id, version))
            .await?;
        resource
            .map(|r| convert::screening_list(&r, &self.systems))
            .transpose()
    }

    async fn list_subjects(
        &self,
        list: &ScreeningList,
    ) -> Result<Vec<ResearchSubject>, StoreError> {
        let resources: Vec<ResearchSubjectResource> = self
            .search_all(
                "List",
                &[("_id", list.id.clone()), ("_include", "List:item".to_string())],
                "ResearchSubject",
            )
            .await?;
        Ok(resources.iter().filter_map(convert::research_subject).collect())
    }

    async fn read_study(&self, study_id: &str) -> Result<Option<Study>, StoreError> {
        let resource: Option<ResearchStudyResource> =
            self.read(&format!("ResearchStudy/{}", study_id)).await?;
        Ok(resource.and_then(|r| convert::study(&r, &self.systems)))
    }

    async fn find_recipient_by_email(
        &self,
        email: &str,
    ) -> Result<Option<RecipientIdentity>, StoreError> {
        let practitioners: Vec<PractitionerResource> = self
            .search_all(
                "Practitioner",
                &[("identifier", format!("{}|{}", self.systems.subscriber, email))],
                "Practitioner",
            )
            .await?;

        if practitioners.len() > 1 {
            tracing::warn!(email, count = practitioners.len(), "Several practitioners share one subscriber email");
        }

        Ok(practitioners
            .iter()
            .find_map(|p| convert::recipient(p, &self.systems)))
    }

    async fn read_recipient(
        &self,
        recipient_id: &str,
    ) -> Result<Option<RecipientIdentity>, StoreError> {
        let resource: Option<PractitionerResource> =
            self.read(&format!("Practitioner/{}", recipient_id)).await?;
        Ok(resource.and_then(|r| convert::recipient(&r, &self.systems)))
    }

    async fn ensure_recipients(&self, emails: &[String]) -> Result<(), StoreError> {
        if emails.is_empty() {
            return Ok(());
        }

        let entry = emails
            .iter()
            .map(|email| {
                let practitioner = convert::practitioner_for_email(email, &self.systems);
                Ok(BundleEntry {
                    full_url: None,
                    resource: Some(encode("Practitioner", &practitioner)?),
                    request: Some(BundleRequest {
                        method: "POST".to_string(),
                        url: "Practitioner".to_string(),
                        if_none_exist: Some(format!(
                            "identifier={}|{}",
                            self.systems.subscriber, email
                        )),
                    }),
                    response: None,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        self.transaction(&Bundle::transaction(entry)).await?;
        tracing::info!(count = emails.len(), "Subscriber practitioners provisioned");
        Ok(())
    }

    async fn active_messages(&self, page_size: usize) -> Result<Vec<StoredMessage>, StoreError> {
        let mut query = self.active_message_filter();
        query.push(("_count", page_size.max(1).to_string()));

        let resources: Vec<CommunicationRequestResource> = self
            .search_all("CommunicationRequest", &query, "CommunicationRequest")
            .await?;
        Ok(self.stored_messages(resources))
    }

    async fn active_messages_for(
        &self,
        recipient_ids: &[String],
    ) -> Result<Vec<StoredMessage>, StoreError> {
        if recipient_ids.is_empty() {
            return Ok(Vec::new());
        }

        let recipients = recipient_ids
            .iter()
            .map(|id| format!("Practitioner/{}", id))
            .collect::<Vec<_>>()
            .join(",");
        let mut query = self.active_message_filter();
        query.push(("recipient", recipients));

        let resources: Vec<CommunicationRequestResource> = self
            .search_all("CommunicationRequest", &query, "CommunicationRequest")
            .await?;
        Ok(self.stored_messages(resources))
    }

    async fn create_messages(&self, messages: &[Message]) -> Result<Vec<String>, StoreError> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let entry = messages
            .iter()
            .map(|message| {
                let resource = convert::communication_request(message, &self.systems);
                Ok(BundleEntry {
                    full_url: Some(format!("urn:uuid:{}", message.idempotency_token)),
                    resource: Some(encode("CommunicationRequest", &resource)?),
                    request: Some(BundleRequest {
                        method: "POST".to_string(),
                        url: "CommunicationRequest".to_string(),
                        if_none_exist: None,
                    }),
                    response: None,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let response = self.transaction(&Bundle::transaction(entry)).await?;

        Ok(response
            .entry
            .iter()
            .filter_map(|e| e.response.as_ref()?.location.clone())
            .filter_map(|location| {
                Reference {
                    reference: Some(location),
                    display: None,
                }
                .id_part()
                .map(str::to_string)
            })
            .collect())
    }

    async fn update_message_statuses(
        &self,
        message_ids: &[String],
        status: MessageStatus,
    ) -> Result<(), StoreError> {
        let mut entry = Vec::with_capacity(message_ids.len());

        for id in message_ids {
            let path = format!("CommunicationRequest/{}", id);
            let Some(resource) = self.read::<CommunicationRequestResource>(&path).await? else {
                tracing::warn!(message_id = %id, "Message vanished before its status update");
                continue;
            };

            if let Some(update) = status_update(id, resource, status)? {
                entry.push(update);
            }
        }

        if entry.is_empty() {
            return Ok(());
        }

        let count = entry.len();
        self.transaction(&Bundle::transaction(entry)).await?;
        tracing::info!(count, status = %status, "Message statuses updated");
        Ok(())
    }

    async fn register_subscription(
        &self,
        criteria: &str,
        endpoint: &str,
    ) -> Result<(), StoreError> {
        let subscription = convert::subscription(criteria, endpoint);
        let body = encode("Subscription", &subscription)?;

        let resp = self
            .send(
                self.http
                    .put(self.url("Subscription"))
                    .query(&[("criteria", criteria)])
                    .header(CONTENT_TYPE, FHIR_JSON)
                    .json(&body),
            )
            .await?;

        tracing::info!(
            criteria,
            endpoint,
            status = resp.status().as_u16(),
            "Subscription registered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_base_and_path() {
        let client = FhirClient::new("http://fhir:8080/fhir/", FhirSystems::default()).unwrap();
        assert_eq!(client.url("List/1/_history/2"), "http://fhir:8080/fhir/List/1/_history/2");
        assert_eq!(client.url("/Practitioner"), "http://fhir:8080/fhir/Practitioner");
    }

    fn make_request(status: &str) -> CommunicationRequestResource {
        CommunicationRequestResource {
            id: Some("m1".to_string()),
            status: status.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_status_update_from_active() {
        let update = status_update("m1", make_request("active"), MessageStatus::Completed)
            .unwrap()
            .unwrap();

        let request = update.request.unwrap();
        assert_eq!(request.method, "PUT");
        assert_eq!(request.url, "CommunicationRequest/m1");
        assert_eq!(update.resource.unwrap()["status"], "completed");
    }

    #[test]
    fn test_status_update_skips_unknown_status() {
        for stored in ["revoked", "entered-in-error", ""] {
            let update = status_update("m1", make_request(stored), MessageStatus::Completed);
            assert!(matches!(update, Ok(None)), "stored status {:?}", stored);
        }
    }

    #[test]
    fn test_status_update_skips_settled_message() {
        let update = status_update("m1", make_request("on-hold"), MessageStatus::Completed);
        assert!(matches!(update, Ok(None)));
    }

    #[tokio::test]
    async fn test_unreachable_store_is_connection_error() {
        use recruit_common::error::{Classify, ExternalErrorKind};

        let client = FhirClient::new("http://127.0.0.1:1/fhir", FhirSystems::default()).unwrap();
        let err = client.read_study("7").await.unwrap_err();
        assert_eq!(err.kind(), ExternalErrorKind::Connection);
    }
}
