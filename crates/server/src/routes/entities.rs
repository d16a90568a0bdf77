use axum::{
    Router,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use db::schema::EntitySchema;
use serde_json::Value;
use utils::response::ApiResponse;

use crate::error::ApiError;
use crate::middleware::AuthState;
use crate::routes::envelope;
use crate::routes::records::ListQuery;
use crate::state::AppState;

/// Admin-only schema management: the `_tables` rows are the entities
/// themselves, so listing/reading goes through the metadata entity while
/// writes run the schema mutator.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/_tables", get(list_entities).post(create_entity))
        .route(
            "/v1/_tables/{id}",
            get(read_entity).patch(update_entity).delete(delete_entity),
        )
}

fn tables(state: &AppState) -> db::Entity {
    state.db.entity(EntitySchema::tables())
}

pub async fn list_entities(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
    Extension(auth): Extension<AuthState>,
) -> Result<Response, ApiError> {
    auth.require_admin()?;
    let listing = tables(&state).list(&query.to_options()).await?;
    let body = ApiResponse::success(200, Value::Array(listing.records))
        .with_pagination(listing.pagination);
    Ok((StatusCode::OK, axum::Json(body)).into_response())
}

pub async fn read_entity(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(auth): Extension<AuthState>,
) -> Result<Response, ApiError> {
    auth.require_admin()?;
    let row = state
        .mutator
        .find_row(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("entity `{id}` was not found")))?;
    Ok(envelope(StatusCode::OK, row))
}

pub async fn create_entity(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthState>,
    axum::Json(draft): axum::Json<Value>,
) -> Result<Response, ApiError> {
    auth.require_admin()?;
    let schema = state.mutator.create_entity(&draft).await?;
    Ok(envelope(StatusCode::CREATED, schema.to_json()))
}

pub async fn update_entity(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(auth): Extension<AuthState>,
    axum::Json(patch): axum::Json<Value>,
) -> Result<Response, ApiError> {
    auth.require_admin()?;
    let schema = state.mutator.update_entity(&id, &patch).await?;
    Ok(envelope(StatusCode::OK, schema.to_json()))
}

pub async fn delete_entity(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(auth): Extension<AuthState>,
) -> Result<Response, ApiError> {
    auth.require_admin()?;
    state.mutator.remove_entity(&id).await?;
    Ok(envelope(StatusCode::OK, serde_json::json!({})))
}
