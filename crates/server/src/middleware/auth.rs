use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use db::schema::ADMINS_TABLE;
use serde_json::{Value, json};
use services::auth::TokenCheck;

use crate::error::ApiError;
use crate::state::AppState;

/// Per-request auth context, written by the two global middlewares and read
/// by rule guards and handlers.
#[derive(Clone, Debug)]
pub struct AuthState {
    /// The `auth` object rules evaluate against: `type`, `token`, `id`,
    /// `table`, plus the redacted user fields once hydrated.
    pub auth: Value,
    /// Verification outcome when a bearer token was presented.
    pub token_check: Option<TokenCheck>,
}

impl AuthState {
    pub fn guest() -> Self {
        AuthState {
            auth: json!({"type": "guest", "token": null, "id": null, "table": null}),
            token_check: None,
        }
    }

    pub fn table(&self) -> Option<&str> {
        self.auth.get("table").and_then(Value::as_str)
    }

    pub fn is_admin(&self) -> bool {
        self.table() == Some(ADMINS_TABLE)
    }

    /// A presented-but-invalid token always denies with its specific
    /// reason, before any rule gets a say.
    pub fn guard_token(&self) -> Result<(), ApiError> {
        if let Some(check) = &self.token_check {
            if !check.verified {
                return Err(ApiError::Forbidden(check.error.clone()));
            }
        }
        Ok(())
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        self.guard_token()?;
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "Admin auth required to access this resource.".to_string(),
            ))
        }
    }
}

/// First global middleware: lift the bearer token out of the Authorization
/// header into the request context.
pub async fn extract_token(mut request: Request, next: Next) -> Response {
    let mut auth = AuthState::guest();
    if let Some(header) = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = header.strip_prefix("Bearer ") {
            auth.auth["token"] = Value::String(token.trim().to_string());
            auth.auth["type"] = Value::String("user".to_string());
        }
    }
    request.extensions_mut().insert(auth);
    next.run(request).await
}

/// Second global middleware: resolve a verified token to its user row and
/// fold the redacted record into the auth object.
pub async fn hydrate_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(mut auth) = request.extensions().get::<AuthState>().cloned() else {
        return next.run(request).await;
    };

    let token = auth
        .auth
        .get("token")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if !token.is_empty() {
        let check = state.jwt.verify_token(&token);
        if check.verified {
            if let Some(entity) = state.registry.get(&check.table).await {
                match entity.read(&check.id).await {
                    Ok(Some(user)) => {
                        if let (Value::Object(auth_map), Value::Object(user_map)) =
                            (&mut auth.auth, &user)
                        {
                            for (key, value) in user_map {
                                auth_map.insert(key.clone(), value.clone());
                            }
                        }
                        auth.auth["type"] = Value::String("user".to_string());
                        auth.auth["id"] = Value::String(check.id.clone());
                        auth.auth["table"] = Value::String(check.table.clone());
                    }
                    Ok(None) => {
                        tracing::trace!(id = %check.id, table = %check.table, "token user no longer exists");
                    }
                    Err(err) => {
                        tracing::warn!(%err, "auth hydration lookup failed");
                    }
                }
            }
        }
        auth.token_check = Some(check);
        request.extensions_mut().insert(auth);
    }

    next.run(request).await
}
