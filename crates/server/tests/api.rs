use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use server::{AppConfig, AppState, routes};
use tempfile::TempDir;
use tower::ServiceExt;

async fn test_state() -> (AppState, TempDir) {
    let dir = TempDir::new().unwrap();
    let config = AppConfig {
        data_dir: dir.path().join("data"),
        public_dir: dir.path().join("public"),
        jwt_secret: "integration-test-secret".to_string(),
        pool_size: 2,
        ..AppConfig::default()
    };
    let state = AppState::bootstrap(config).await.unwrap();
    (state, dir)
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

async fn send_multipart(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    fields: &[(&str, &str)],
    files: &[(&str, &str, &[u8])],
) -> (StatusCode, Value) {
    const BOUNDARY: &str = "mantis-test-boundary";
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
    }
    for (name, filename, content) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    let mut builder = Request::builder().method(method).uri(uri).header(
        header::CONTENT_TYPE,
        format!("multipart/form-data; boundary={BOUNDARY}"),
    );
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let response = app
        .clone()
        .oneshot(builder.body(Body::from(body)).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

/// Creates an admin account directly and logs in over the API.
async fn admin_token(state: &AppState, app: &Router) -> String {
    let admins = state.db.entity(db::schema::EntitySchema::admins());
    admins
        .create(&json!({"email": "admin@ex.com", "password": "Abcdef12"}))
        .await
        .unwrap();

    let (status, body) = send(
        app,
        "POST",
        "/api/v1/_admins/auth-with-password",
        None,
        Some(json!({"email": "admin@ex.com", "password": "Abcdef12"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "admin login failed: {body}");
    let token = body["data"]["token"].as_str().unwrap().to_string();
    assert!(!token.is_empty());
    assert!(body["data"]["user"].get("password").is_none());
    token
}

#[tokio::test]
async fn healthcheck_reports_ok() {
    let (state, _dir) = test_state().await;
    let app = routes::router(state);
    let (status, body) = send(&app, "GET", "/api/v1/healthcheck", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["status"], 200);
}

#[tokio::test]
async fn unknown_api_route_gets_a_json_envelope() {
    let (state, _dir) = test_state().await;
    let app = routes::router(state);
    let (status, body) = send(&app, "GET", "/api/v2/whatever", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 404);
    assert!(!body["error"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn admin_guard_on_tables_and_settings() {
    let (state, _dir) = test_state().await;
    let app = routes::router(state.clone());
    let token = admin_token(&state, &app).await;

    // No token: 403 on the metadata surface.
    let (status, _) = send(&app, "GET", "/api/v1/_tables", None, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Admin token: both list and settings respond.
    let (status, body) = send(&app, "GET", "/api/v1/_tables", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK, "body: {body}");

    let (status, body) = send(&app, "GET", "/api/v1/_settings", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["appName"], "ACME Project");

    // Settings patch keeps known keys only.
    let (status, body) = send(
        &app,
        "PATCH",
        "/api/v1/_settings",
        Some(&token),
        Some(json!({"appName": "Renamed", "rogueKey": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["appName"], "Renamed");
    assert!(body["data"].get("rogueKey").is_none());
}

#[tokio::test]
async fn expired_tokens_are_named_in_the_error() {
    let (state, _dir) = test_state().await;
    let app = routes::router(state.clone());

    let stale = state.jwt.create_token("someid", "_admins", -30).unwrap();
    let (status, body) = send(&app, "GET", "/api/v1/_tables", Some(&stale), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(
        body["error"].as_str().unwrap().contains("expired"),
        "error was: {}",
        body["error"]
    );
}

#[tokio::test]
async fn entity_lifecycle_validation_and_rename() {
    let (state, _dir) = test_state().await;
    let app = routes::router(state.clone());
    let token = admin_token(&state, &app).await;

    // Create `posts` with a required title of at least 3 chars.
    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/_tables",
        Some(&token),
        Some(json!({
            "name": "posts",
            "type": "base",
            "fields": [
                {"name": "title", "type": "string", "required": true, "constraints": {"min_value": 3}}
            ],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "body: {body}");

    // Too short: 400 with the precise message.
    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/posts",
        Some(&token),
        Some(json!({"title": "hi"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "title should be at least 3 chars long");

    // Long enough: 201 with a non-empty id.
    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/posts",
        Some(&token),
        Some(json!({"title": "hey"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(!body["data"]["id"].as_str().unwrap().is_empty());

    // Rename posts -> articles: the old route set disappears, the new one
    // serves.
    let (status, body) = send(
        &app,
        "PATCH",
        "/api/v1/_tables/posts",
        Some(&token),
        Some(json!({"name": "articles"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {body}");

    let (status, _) = send(&app, "GET", "/api/v1/posts", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, "GET", "/api/v1/articles", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["title"], "hey");

    // Deleting the entity withdraws the routes entirely.
    let (status, _) = send(&app, "DELETE", "/api/v1/_tables/articles", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "GET", "/api/v1/articles", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn auth_entity_rules_and_redaction() {
    let (state, _dir) = test_state().await;
    let app = routes::router(state.clone());
    let token = admin_token(&state, &app).await;

    // users: open registration, listing restricted to users themselves.
    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/_tables",
        Some(&token),
        Some(json!({
            "name": "users",
            "type": "auth",
            "add_rule": "true",
            "list_rule": "auth.table == 'users'",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "body: {body}");

    // Guest registration works and the response omits the password.
    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/users",
        None,
        Some(json!({"email": "a@b.c", "password": "secret12", "name": "Ada"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "body: {body}");
    assert!(body["data"].get("password").is_none());

    // Login yields a token.
    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/users/auth-with-password",
        None,
        Some(json!({"email": "a@b.c", "password": "secret12"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    let user_token = body["data"]["token"].as_str().unwrap().to_string();
    assert!(!user_token.is_empty());

    // Wrong password is denied without leaking whether the account exists.
    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/users/auth-with-password",
        None,
        Some(json!({"email": "a@b.c", "password": "wrongpw1"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // list_rule admits users, denies admins and guests.
    let (status, body) = send(&app, "GET", "/api/v1/users", Some(&user_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().iter().all(|r| r.get("password").is_none()));

    let (status, _) = send(&app, "GET", "/api/v1/users", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, "GET", "/api/v1/users", None, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn file_uploads_follow_the_record_lifecycle() {
    let (state, _dir) = test_state().await;
    let app = routes::router(state.clone());
    let token = admin_token(&state, &app).await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/_tables",
        Some(&token),
        Some(json!({
            "name": "docs",
            "type": "base",
            "add_rule": "true",
            "update_rule": "true",
            "get_rule": "true",
            "delete_rule": "true",
            "fields": [{"name": "attachments", "type": "files"}],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "body: {body}");

    // Multipart create: three files, one with a name needing sanitizing.
    let (status, body) = send_multipart(
        &app,
        "POST",
        "/api/v1/docs",
        None,
        &[],
        &[
            ("attachments", "a.pdf", b"AAA"),
            ("attachments", "b report.pdf", b"BBB"),
            ("attachments", "c.pdf", b"CCC"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "body: {body}");
    let id = body["data"]["id"].as_str().unwrap().to_string();
    let stored: Vec<String> = body["data"]["attachments"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert_eq!(stored, vec!["a.pdf", "b_report.pdf", "c.pdf"]);
    for name in &stored {
        assert!(
            state.files.resolve("docs", name).is_some(),
            "{name} missing on disk"
        );
    }

    // Served back over the files endpoint.
    let request = Request::builder()
        .uri("/api/files/docs/a.pdf")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"AAA");

    // Dropping b_report.pdf from the list removes it from disk after the
    // update commits.
    let (status, body) = send(
        &app,
        "PATCH",
        &format!("/api/v1/docs/{id}"),
        None,
        Some(json!({"attachments": ["a.pdf", "c.pdf"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert!(state.files.resolve("docs", "b_report.pdf").is_none());
    assert!(state.files.resolve("docs", "a.pdf").is_some());

    // Deleting the record sweeps the rest.
    let (status, _) = send(&app, "DELETE", &format!("/api/v1/docs/{id}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(state.files.resolve("docs", "a.pdf").is_none());
    assert!(state.files.resolve("docs", "c.pdf").is_none());
}
