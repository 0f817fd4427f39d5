//! In-memory resource store for tests.
//!
//! Behaves like the FHIR store for the calls this service makes and records
//! how often each call was made. Failures can be queued per operation.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use recruit_common::types::{
    Message, MessageStatus, RecipientIdentity, ResearchSubject, ScreeningList, StoredMessage,
    Study,
};

use crate::store::{ResourceStore, StoreError};

#[derive(Default)]
struct State {
    lists: HashMap<(String, u64), ScreeningList>,
    subjects: HashMap<String, ResearchSubject>,
    studies: HashMap<String, Study>,
    recipients: Vec<RecipientIdentity>,
    messages: Vec<StoredMessage>,
    subscriptions: Vec<(String, String)>,
    next_id: u64,
    failures: HashMap<&'static str, VecDeque<StoreError>>,
    calls: HashMap<&'static str, usize>,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count the call and return the next queued failure for `op`, if any.
    fn enter(&self, op: &'static str) -> Result<std::sync::MutexGuard<'_, State>, StoreError> {
        let mut state = self.lock();
        *state.calls.entry(op).or_default() += 1;
        if let Some(err) = state.failures.get_mut(op).and_then(|q| q.pop_front()) {
            return Err(err);
        }
        Ok(state)
    }

    /// Queue failures returned by the next calls of `op`, in order.
    pub fn fail_next(&self, op: &'static str, errors: Vec<StoreError>) {
        self.lock().failures.entry(op).or_default().extend(errors);
    }

    /// Number of times `op` was called, failed calls included.
    pub fn calls(&self, op: &str) -> usize {
        self.lock().calls.get(op).copied().unwrap_or(0)
    }

    pub fn insert_list(&self, list: ScreeningList) {
        let version = list.version.unwrap_or(0);
        self.lock().lists.insert((list.id.clone(), version), list);
    }

    pub fn insert_subject(&self, subject: ResearchSubject) {
        self.lock().subjects.insert(subject.id.clone(), subject);
    }

    pub fn insert_study(&self, study: Study) {
        self.lock().studies.insert(study.id.clone(), study);
    }

    pub fn insert_recipient(&self, recipient: RecipientIdentity) {
        self.lock().recipients.push(recipient);
    }

    /// Store a message as if created earlier and return its id.
    pub fn insert_message(&self, message: Message) -> String {
        let mut state = self.lock();
        let id = state.next_id("message");
        state.messages.push(StoredMessage {
            id: id.clone(),
            message,
        });
        id
    }

    pub fn messages(&self) -> Vec<StoredMessage> {
        self.lock().messages.clone()
    }

    pub fn recipients(&self) -> Vec<RecipientIdentity> {
        self.lock().recipients.clone()
    }

    /// Registered `(criteria, endpoint)` pairs.
    pub fn subscriptions(&self) -> Vec<(String, String)> {
        self.lock().subscriptions.clone()
    }
}

fn id_part(reference: &str) -> &str {
    reference.rsplit('/').next().unwrap_or(reference)
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn read_list_version(
        &self,
        list_id: &str,
        version: u64,
    ) -> Result<Option<ScreeningList>, StoreError> {
        let state = self.enter("read_list_version")?;
        Ok(state.lists.get(&(list_id.to_string(), version)).cloned())
    }

    async fn list_subjects(
        &self,
        list: &ScreeningList,
    ) -> Result<Vec<ResearchSubject>, StoreError> {
        let state = self.enter("list_subjects")?;
        Ok(list
            .subject_refs
            .iter()
            .filter_map(|r| state.subjects.get(id_part(r)).cloned())
            .collect())
    }

    async fn read_study(&self, study_id: &str) -> Result<Option<Study>, StoreError> {
        let state = self.enter("read_study")?;
        Ok(state.studies.get(study_id).cloned())
    }

    async fn find_recipient_by_email(
        &self,
        email: &str,
    ) -> Result<Option<RecipientIdentity>, StoreError> {
        let state = self.enter("find_recipient_by_email")?;
        Ok(state
            .recipients
            .iter()
            .find(|r| {
                r.email
                    .as_deref()
                    .is_some_and(|e| e.eq_ignore_ascii_case(email))
            })
            .cloned())
    }

    async fn read_recipient(
        &self,
        recipient_id: &str,
    ) -> Result<Option<RecipientIdentity>, StoreError> {
        let state = self.enter("read_recipient")?;
        Ok(state.recipients.iter().find(|r| r.id == recipient_id).cloned())
    }

    async fn ensure_recipients(&self, emails: &[String]) -> Result<(), StoreError> {
        let mut state = self.enter("ensure_recipients")?;
        for email in emails {
            let exists = state.recipients.iter().any(|r| {
                r.email
                    .as_deref()
                    .is_some_and(|e| e.eq_ignore_ascii_case(email))
            });
            if !exists {
                let id = state.next_id("practitioner");
                state.recipients.push(RecipientIdentity {
                    id,
                    email: Some(email.clone()),
                });
            }
        }
        Ok(())
    }

    async fn active_messages(&self, _page_size: usize) -> Result<Vec<StoredMessage>, StoreError> {
        let state = self.enter("active_messages")?;
        Ok(state
            .messages
            .iter()
            .filter(|m| m.message.status == MessageStatus::Active)
            .cloned()
            .collect())
    }

    async fn active_messages_for(
        &self,
        recipient_ids: &[String],
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let state = self.enter("active_messages_for")?;
        Ok(state
            .messages
            .iter()
            .filter(|m| m.message.status == MessageStatus::Active)
            .filter(|m| recipient_ids.contains(&m.message.recipient.id))
            .cloned()
            .collect())
    }

    async fn create_messages(&self, messages: &[Message]) -> Result<Vec<String>, StoreError> {
        let mut state = self.enter("create_messages")?;
        let mut ids = Vec::with_capacity(messages.len());
        for message in messages {
            let id = state.next_id("message");
            state.messages.push(StoredMessage {
                id: id.clone(),
                message: message.clone(),
            });
            ids.push(id);
        }
        Ok(ids)
    }

    async fn update_message_statuses(
        &self,
        message_ids: &[String],
        status: MessageStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.enter("update_message_statuses")?;
        for stored in state.messages.iter_mut() {
            if message_ids.contains(&stored.id) && stored.message.status.can_transition_to(status)
            {
                stored.message.status = status;
            }
        }
        Ok(())
    }

    async fn register_subscription(
        &self,
        criteria: &str,
        endpoint: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.enter("register_subscription")?;
        state.subscriptions.retain(|(c, _)| c != criteria);
        state
            .subscriptions
            .push((criteria.to_string(), endpoint.to_string()));
        Ok(())
    }
}
