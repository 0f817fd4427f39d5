//! Change detection between consecutive screening list versions.
//!
//! The store delivers a notification for every update of a list, including
//! updates that only touch metadata. A list counts as changed when its set of
//! subject references differs from the immediately preceding version.

use std::collections::HashSet;
use std::sync::Arc;

use recruit_common::types::ScreeningList;
use recruit_fhir::{ResourceStore, StoreError};

use crate::context::EngineContext;
use crate::retry::RetryExecutor;

pub struct ChangeDetector {
    store: Arc<dyn ResourceStore>,
    retry: RetryExecutor,
}

impl ChangeDetector {
    pub fn new(ctx: &EngineContext) -> Self {
        Self {
            store: ctx.store.clone(),
            retry: ctx.retry.clone(),
        }
    }

    /// Whether `list` differs from the version before it.
    ///
    /// A list without version metadata, or whose previous version does not
    /// exist, is a first observation and counts as changed.
    pub async fn has_changed(&self, list: &ScreeningList) -> Result<bool, StoreError> {
        let Some(version) = list.version else {
            tracing::warn!(list_id = %list.id, "List has no version id, treating as changed");
            return Ok(true);
        };

        let previous_version = match version.checked_sub(1) {
            Some(v) if v > 0 => v,
            _ => {
                tracing::debug!(list_id = %list.id, version, "First list version");
                return Ok(true);
            }
        };

        let previous = self
            .retry
            .execute("read previous list version", || {
                self.store.read_list_version(&list.id, previous_version)
            })
            .await?;

        let Some(previous) = previous else {
            tracing::info!(
                list_id = %list.id,
                previous_version,
                "Previous list version not found, treating as changed"
            );
            return Ok(true);
        };

        let changed = !same_subjects(list, &previous);
        tracing::info!(list_id = %list.id, version, changed, "Compared screening list versions");
        Ok(changed)
    }
}

/// Order-insensitive comparison of the subject reference sets.
pub fn same_subjects(a: &ScreeningList, b: &ScreeningList) -> bool {
    subject_set(a) == subject_set(b)
}

fn subject_set(list: &ScreeningList) -> HashSet<&str> {
    list.subject_refs.iter().map(|r| strip_history(r)).collect()
}

fn strip_history(reference: &str) -> &str {
    match reference.find("/_history/") {
        Some(pos) => &reference[..pos],
        None => reference,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{make_context, make_list};
    use recruit_fhir::memory::InMemoryStore;

    #[test]
    fn test_same_subjects_ignores_order() {
        let a = make_list("1", Some(2), &["ResearchSubject/a", "ResearchSubject/b"]);
        let b = make_list("1", Some(1), &["ResearchSubject/b", "ResearchSubject/a"]);
        assert!(same_subjects(&a, &b));
    }

    #[test]
    fn test_same_subjects_ignores_history_suffix() {
        let a = make_list("1", Some(2), &["ResearchSubject/a/_history/3"]);
        let b = make_list("1", Some(1), &["ResearchSubject/a"]);
        assert!(same_subjects(&a, &b));
    }

    #[test]
    fn test_added_subject_is_a_change() {
        let a = make_list("1", Some(2), &["ResearchSubject/a", "ResearchSubject/b"]);
        let b = make_list("1", Some(1), &["ResearchSubject/a"]);
        assert!(!same_subjects(&a, &b));
    }

    #[tokio::test]
    async fn test_missing_version_is_changed_without_store_call() {
        let store = InMemoryStore::new();
        let detector = ChangeDetector::new(&make_context(store.clone()));

        let list = make_list("1", None, &["ResearchSubject/a"]);
        assert!(detector.has_changed(&list).await.unwrap());
        assert_eq!(store.calls("read_list_version"), 0);
    }

    #[tokio::test]
    async fn test_first_version_is_changed() {
        let store = InMemoryStore::new();
        let detector = ChangeDetector::new(&make_context(store.clone()));

        let list = make_list("1", Some(1), &["ResearchSubject/a"]);
        assert!(detector.has_changed(&list).await.unwrap());
        assert_eq!(store.calls("read_list_version"), 0);
    }

    #[tokio::test]
    async fn test_unchanged_against_stored_previous_version() {
        let store = InMemoryStore::new();
        store.insert_list(make_list("1", Some(1), &["ResearchSubject/a", "ResearchSubject/b"]));
        let detector = ChangeDetector::new(&make_context(store.clone()));

        let list = make_list("1", Some(2), &["ResearchSubject/b", "ResearchSubject/a"]);
        assert!(!detector.has_changed(&list).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_previous_version_is_changed() {
        let store = InMemoryStore::new();
        let detector = ChangeDetector::new(&make_context(store.clone()));

        let list = make_list("1", Some(5), &["ResearchSubject/a"]);
        assert!(detector.has_changed(&list).await.unwrap());
        assert_eq!(store.calls("read_list_version"), 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_retried() {
        let store = InMemoryStore::new();
        store.insert_list(make_list("1", Some(1), &["ResearchSubject/a"]));
        store.fail_next(
            "read_list_version",
            vec![StoreError::Connection("refused".to_string())],
        );
        let detector = ChangeDetector::new(&make_context(store.clone()));

        let list = make_list("1", Some(2), &["ResearchSubject/a"]);
        assert!(!detector.has_changed(&list).await.unwrap());
        assert_eq!(store.calls("read_list_version"), 2);
    }
}
