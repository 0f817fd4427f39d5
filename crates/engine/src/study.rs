use std::sync::Arc;

use recruit_common::types::StudyRef;
use recruit_fhir::{ResourceStore, StoreError};

use crate::context::EngineContext;
use crate::retry::RetryExecutor;

/// Resolves the human-readable acronym of the study owning a list.
pub struct StudyResolver {
    store: Arc<dyn ResourceStore>,
    retry: RetryExecutor,
}

impl StudyResolver {
    pub fn new(ctx: &EngineContext) -> Self {
        Self {
            store: ctx.store.clone(),
            retry: ctx.retry.clone(),
        }
    }

    /// Acronym by priority: reference display, study acronym, study title.
    ///
    /// Returns `Ok(None)` when none of them is available.
    pub async fn resolve_acronym(
        &self,
        study: Option<&StudyRef>,
    ) -> Result<Option<String>, StoreError> {
        let Some(study) = study else {
            return Ok(None);
        };

        if let Some(display) = study.display.as_deref().map(str::trim)
            && !display.is_empty()
        {
            return Ok(Some(display.to_string()));
        }

        let Some(study_id) = study.id.as_deref() else {
            return Ok(None);
        };

        let resource = self
            .retry
            .execute("read study", || self.store.read_study(study_id))
            .await?;

        let Some(resource) = resource else {
            tracing::warn!(study_id, "Referenced study not found");
            return Ok(None);
        };

        if let Some(acronym) = resource.acronym {
            return Ok(Some(acronym));
        }

        if let Some(title) = resource.title {
            tracing::info!(study_id, "Study has no acronym, falling back to title");
            return Ok(Some(title));
        }

        Ok(None)
    }
}
