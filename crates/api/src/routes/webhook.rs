//! Rest-hook endpoint called by the resource store on screening list updates.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::put;
use axum::Router;

use recruit_common::error::AppError;
use recruit_fhir::convert;
use recruit_fhir::resources::ListResource;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/on-list-change/List/{id}", put(on_list_change))
}

/// PUT /on-list-change/List/:id: process one screening list update.
///
/// The body is the updated `List` as `application/fhir+json`. Responds with an
/// empty 200 once the pipeline has run to completion.
async fn on_list_change(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let mut resource: ListResource = serde_json::from_slice(&body)
        .map_err(|e| AppError::Decode(format!("invalid List body: {}", e)))?;

    match resource.id.as_deref() {
        None | Some("") => resource.id = Some(id),
        Some(body_id) if body_id != id => {
            tracing::warn!(path_id = %id, body_id, "List id in path and body differ, using body");
        }
        Some(_) => {}
    }

    let list = convert::screening_list(&resource, &state.systems)
        .map_err(|e| AppError::Decode(e.to_string()))?;

    state.orchestrator.on_list_change(&list).await?;
    Ok(StatusCode::OK)
}
