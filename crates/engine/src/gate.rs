use std::sync::Arc;

use recruit_common::types::{ResearchSubject, ScreeningList, SubjectStatus};
use recruit_fhir::{ResourceStore, StoreError};

use crate::context::EngineContext;
use crate::retry::RetryExecutor;

/// Lets a list through only if at least one of its subjects is a candidate.
pub struct CandidateGate {
    store: Arc<dyn ResourceStore>,
    retry: RetryExecutor,
}

impl CandidateGate {
    pub fn new(ctx: &EngineContext) -> Self {
        Self {
            store: ctx.store.clone(),
            retry: ctx.retry.clone(),
        }
    }

    /// Load the list's subjects and check them for candidates.
    pub async fn admit(&self, list: &ScreeningList) -> Result<bool, StoreError> {
        let subjects = self
            .retry
            .execute("load list subjects", || self.store.list_subjects(list))
            .await?;

        let admitted = has_candidate(&subjects);
        if !admitted {
            tracing::info!(
                list_id = %list.id,
                subjects = subjects.len(),
                "No candidate subjects on list, skipping notification"
            );
        }
        Ok(admitted)
    }
}

pub fn has_candidate(subjects: &[ResearchSubject]) -> bool {
    subjects.iter().any(|s| s.status == SubjectStatus::Candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{make_context, make_list, make_subject};
    use recruit_fhir::memory::InMemoryStore;

    #[test]
    fn test_has_candidate() {
        assert!(!has_candidate(&[]));
        assert!(!has_candidate(&[
            make_subject("a", SubjectStatus::OnStudy),
            make_subject("b", SubjectStatus::Withdrawn),
        ]));
        assert!(has_candidate(&[
            make_subject("a", SubjectStatus::OnStudy),
            make_subject("b", SubjectStatus::Candidate),
        ]));
    }

    #[tokio::test]
    async fn test_admit_loads_subjects_from_store() {
        let store = InMemoryStore::new();
        store.insert_subject(make_subject("a", SubjectStatus::Ineligible));
        store.insert_subject(make_subject("b", SubjectStatus::Candidate));
        let gate = CandidateGate::new(&make_context(store.clone()));

        let with_candidate = make_list("1", Some(2), &["ResearchSubject/a", "ResearchSubject/b"]);
        assert!(gate.admit(&with_candidate).await.unwrap());

        let without_candidate = make_list("1", Some(2), &["ResearchSubject/a"]);
        assert!(!gate.admit(&without_candidate).await.unwrap());
    }
}
