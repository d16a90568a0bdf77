use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    Router,
    extract::{
        ConnectInfo, DefaultBodyLimit, Extension, FromRequest, FromRequestParts, Multipart, Path,
        Query, Request, State,
    },
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use db::entity::{Entity, ListOptions};
use db::records::{coerce_text, redact_password};
use db::schema::{EntitySchema, FieldType, RuleOp};
use db::validators::{ValidationMode, validate};
use serde::Deserialize;
use serde_json::{Value, json};
use services::files::StagedFile;
use services::rules;

use crate::error::ApiError;
use crate::middleware::AuthState;
use crate::routes::envelope;
use crate::state::AppState;

const UPLOAD_BODY_LIMIT: usize = 20 * 1024 * 1024;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/{entity}", get(list_records).post(create_record))
        .route(
            "/v1/{entity}/{id}",
            get(read_record).patch(update_record).delete(delete_record),
        )
        .route("/v1/{entity}/auth-with-password", post(auth_with_password))
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
}

/// Looks the entity up in the live registry. A name the registry does not
/// carry (or that has its API switched off) is indistinguishable from a
/// route that never existed.
async fn resolve_entity(state: &AppState, name: &str) -> Result<Entity, ApiError> {
    match state.registry.get(name).await {
        Some(entity) if entity.schema().has_api => Ok(entity),
        _ => Err(ApiError::NotFound(format!("no resource at /api/v1/{name}"))),
    }
}

/// Peer address when the listener was set up with connect info; absent in
/// in-process tests.
pub struct ClientAddr(Option<SocketAddr>);

impl<S: Send + Sync> FromRequestParts<S> for ClientAddr {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientAddr(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0),
        ))
    }
}

/// The `req` object rules can reference.
fn request_vars(state: &AppState, peer: Option<SocketAddr>, body: Option<&Value>) -> Value {
    let mut vars = json!({
        "remoteAddr": peer.map(|p| p.ip().to_string()).unwrap_or_default(),
        "remotePort": peer.map(|p| i64::from(p.port())).unwrap_or_default(),
        "localAddr": state.config.host,
        "localPort": state.config.port,
    });
    if let Some(body) = body {
        vars["body"] = body.clone();
    }
    vars
}

/// Per-route rule middleware. Empty rule means admin-only; anything else
/// is evaluated against `{auth, req}` and must come out truthy.
fn authorize(
    auth: &AuthState,
    schema: &EntitySchema,
    op: RuleOp,
    req_vars: Value,
) -> Result<(), ApiError> {
    auth.guard_token()?;

    let rule = schema.rule_for(op).trim();
    if rule.is_empty() {
        return auth.require_admin();
    }

    let vars = json!({"auth": auth.auth, "req": req_vars});
    match rules::evaluate(rule, &vars) {
        Ok(true) => Ok(()),
        Ok(false) => Err(ApiError::Forbidden("Access denied!".to_string())),
        Err(err) => Err(ApiError::Forbidden(format!("Access denied: {err}"))),
    }
}

struct IngestedBody {
    body: Value,
    staged: Vec<StagedFile>,
}

/// Reads the request payload. JSON bodies pass through; multipart bodies
/// have text fields coerced to their schema types and file parts staged in
/// memory, with the sanitized names folded into the JSON body.
async fn ingest_body(
    state: &AppState,
    schema: &EntitySchema,
    request: Request,
) -> Result<IngestedBody, ApiError> {
    let is_multipart = request
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("multipart/form-data"))
        .unwrap_or(false);

    if !is_multipart {
        let bytes = axum::body::to_bytes(request.into_body(), UPLOAD_BODY_LIMIT)
            .await
            .map_err(|err| ApiError::BadRequest(format!("could not read body: {err}")))?;
        let body = if bytes.is_empty() {
            json!({})
        } else {
            serde_json::from_slice(&bytes)
                .map_err(|err| ApiError::BadRequest(format!("invalid JSON body: {err}")))?
        };
        return Ok(IngestedBody { body, staged: Vec::new() });
    }

    let mut multipart = Multipart::from_request(request, state)
        .await
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;

    let mut body = json!({});
    let mut staged = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(String::from) else { continue };

        if let Some(filename) = field.file_name().map(String::from) {
            let Some(schema_field) = schema.field(&name) else { continue };
            if !schema_field.field_type.is_file() {
                continue;
            }
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let data = field.bytes().await?;
            let part = StagedFile::new(&name, &filename, &content_type, data.to_vec());
            tracing::trace!(field = %name, file = %part.filename, fingerprint = %part.fingerprint, "staged upload");

            match schema_field.field_type {
                FieldType::File => {
                    body[&name] = Value::String(part.filename.clone());
                }
                FieldType::Files => {
                    if !body[&name].is_array() {
                        body[&name] = Value::Array(Vec::new());
                    }
                    if let Some(items) = body[&name].as_array_mut() {
                        items.push(Value::String(part.filename.clone()));
                    }
                }
                _ => unreachable!("checked is_file above"),
            }
            staged.push(part);
        } else {
            let text = field.text().await?;
            let value = match schema.field(&name) {
                Some(schema_field) => coerce_text(schema_field.field_type, &text),
                None => Value::String(text),
            };
            // A text field can name already-stored files for a `files`
            // column; merge it with whatever parts this request uploaded
            // instead of overwriting them.
            if value.is_array() && body[&name].is_array() {
                if let (Value::Array(incoming), Some(existing)) =
                    (value, body[&name].as_array_mut())
                {
                    existing.extend(incoming);
                }
            } else {
                body[&name] = value;
            }
        }
    }

    Ok(IngestedBody { body, staged })
}

/// Persists staged parts before the DB write. Returns the names actually
/// written so a failed create/update can take them back off disk.
async fn persist_staged(
    state: &AppState,
    entity_name: &str,
    staged: &[StagedFile],
) -> Result<Vec<String>, ApiError> {
    let mut written = Vec::new();
    for part in staged {
        match state.files.save(entity_name, &part.filename, &part.content).await {
            Ok(_) => written.push(part.filename.clone()),
            Err(err) => {
                state.files.remove_all_logged(entity_name, &written).await;
                return Err(err.into());
            }
        }
    }
    Ok(written)
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "pageIndex")]
    page_index: Option<i64>,
    #[serde(rename = "perPage")]
    per_page: Option<i64>,
    #[serde(rename = "countPages")]
    count_pages: Option<bool>,
}

impl ListQuery {
    pub(crate) fn to_options(&self) -> ListOptions {
        ListOptions {
            page_index: self.page_index.unwrap_or(1),
            per_page: self.per_page.unwrap_or(100),
            count_pages: self.count_pages.unwrap_or(true),
        }
    }
}

pub async fn list_records(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Query(query): Query<ListQuery>,
    Extension(auth): Extension<AuthState>,
    ClientAddr(peer): ClientAddr,
) -> Result<Response, ApiError> {
    let entity = resolve_entity(&state, &entity).await?;
    authorize(
        &auth,
        entity.schema(),
        RuleOp::List,
        request_vars(&state, peer, None),
    )?;

    let listing = entity.list(&query.to_options()).await?;
    let body = utils::response::ApiResponse::success(200, Value::Array(listing.records))
        .with_pagination(listing.pagination);
    Ok((StatusCode::OK, axum::Json(body)).into_response())
}

pub async fn read_record(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
    Extension(auth): Extension<AuthState>,
    ClientAddr(peer): ClientAddr,
) -> Result<Response, ApiError> {
    let entity = resolve_entity(&state, &entity).await?;
    authorize(
        &auth,
        entity.schema(),
        RuleOp::Get,
        request_vars(&state, peer, None),
    )?;

    let record = entity
        .read(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("record `{id}` was not found")))?;
    Ok(envelope(StatusCode::OK, record))
}

pub async fn create_record(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Extension(auth): Extension<AuthState>,
    ClientAddr(peer): ClientAddr,
    request: Request,
) -> Result<Response, ApiError> {
    let entity = resolve_entity(&state, &entity).await?;
    if entity.schema().is_view() {
        return Err(ApiError::NotFound(format!(
            "no resource at /api/v1/{}",
            entity.name()
        )));
    }

    let ingested = ingest_body(&state, entity.schema(), request).await?;
    authorize(
        &auth,
        entity.schema(),
        RuleOp::Add,
        request_vars(&state, peer, Some(&ingested.body)),
    )?;
    validate(entity.schema(), &ingested.body, ValidationMode::Create)?;

    let written = persist_staged(&state, entity.name(), &ingested.staged).await?;
    match entity.create(&ingested.body).await {
        Ok(record) => Ok(envelope(StatusCode::CREATED, record)),
        Err(err) => {
            // The DB write failed: whatever this request put on disk goes.
            state.files.remove_all_logged(entity.name(), &written).await;
            Err(err.into())
        }
    }
}

pub async fn update_record(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
    Extension(auth): Extension<AuthState>,
    ClientAddr(peer): ClientAddr,
    request: Request,
) -> Result<Response, ApiError> {
    let entity = resolve_entity(&state, &entity).await?;
    if entity.schema().is_view() {
        return Err(ApiError::NotFound(format!(
            "no resource at /api/v1/{}",
            entity.name()
        )));
    }

    let ingested = ingest_body(&state, entity.schema(), request).await?;
    authorize(
        &auth,
        entity.schema(),
        RuleOp::Update,
        request_vars(&state, peer, Some(&ingested.body)),
    )?;
    validate(entity.schema(), &ingested.body, ValidationMode::Update)?;

    let written = persist_staged(&state, entity.name(), &ingested.staged).await?;
    match entity.update(&id, &ingested.body).await {
        Ok(outcome) => {
            state
                .files
                .remove_all_logged(entity.name(), &outcome.stale_files)
                .await;
            Ok(envelope(StatusCode::OK, outcome.record))
        }
        Err(err) => {
            state.files.remove_all_logged(entity.name(), &written).await;
            Err(err.into())
        }
    }
}

pub async fn delete_record(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
    Extension(auth): Extension<AuthState>,
    ClientAddr(peer): ClientAddr,
) -> Result<Response, ApiError> {
    let entity = resolve_entity(&state, &entity).await?;
    if entity.schema().is_view() {
        return Err(ApiError::NotFound(format!(
            "no resource at /api/v1/{}",
            entity.name()
        )));
    }
    authorize(
        &auth,
        entity.schema(),
        RuleOp::Delete,
        request_vars(&state, peer, None),
    )?;

    let removed = entity.remove(&id).await?;
    let files = entity.schema().files_in_record(&removed);
    state.files.remove_all_logged(entity.name(), &files).await;
    Ok(envelope(StatusCode::OK, json!({})))
}

#[derive(Debug, Deserialize)]
pub struct PasswordLogin {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

pub async fn auth_with_password(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let bytes = axum::body::to_bytes(request.into_body(), UPLOAD_BODY_LIMIT)
        .await
        .map_err(|err| ApiError::BadRequest(format!("could not read body: {err}")))?;
    let login: PasswordLogin = serde_json::from_slice(&bytes)
        .map_err(|err| ApiError::BadRequest(format!("invalid JSON body: {err}")))?;

    let entity = resolve_entity(&state, &entity).await?;
    if !entity.schema().is_auth() {
        return Err(ApiError::NotFound(format!(
            "no resource at /api/v1/{}/auth-with-password",
            entity.name()
        )));
    }
    if login.email.is_empty() || login.password.is_empty() {
        return Err(ApiError::BadRequest(
            "email and password are required".to_string(),
        ));
    }

    let Some(record) = entity.find_auth_record(&login.email).await? else {
        return Err(ApiError::Forbidden("Invalid email or password".to_string()));
    };
    if !db::entity::verify_password(&record, &login.password) {
        return Err(ApiError::Forbidden("Invalid email or password".to_string()));
    }

    let id = record.get("id").and_then(Value::as_str).unwrap_or_default();
    let ttl = state.settings.session_timeout(entity.name()).await;
    let token = state.jwt.create_token(id, entity.name(), ttl)?;

    let mut user = record;
    redact_password(&mut user);
    Ok(envelope(StatusCode::OK, json!({"token": token, "user": user})))
}
