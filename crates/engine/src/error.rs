use recruit_common::error::AppError;
use recruit_fhir::StoreError;
use thiserror::Error;

/// Failure that aborts one webhook-triggered pipeline run.
///
/// Only resource store calls abort a run; mail failures are settled per
/// message and never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Store(e) => e.into(),
        }
    }
}
