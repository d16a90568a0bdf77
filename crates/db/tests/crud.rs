use db::dialect::Dialect;
use db::entity::ListOptions;
use db::schema::{EntityField, EntitySchema, FieldType};
use db::DbService;
use serde_json::json;
use tempfile::TempDir;

async fn service() -> (DbService, TempDir) {
    let dir = TempDir::new().unwrap();
    let db = DbService::connect(Dialect::Sqlite, "", dir.path(), 2)
        .await
        .unwrap();
    db.migrate().await.unwrap();
    (db, dir)
}

fn posts_schema() -> EntitySchema {
    let mut schema = EntitySchema::new_base("posts");
    let mut title = EntityField::user("title", FieldType::String);
    title.required = true;
    schema.fields.push(title);
    schema.fields.push(EntityField::user("views", FieldType::Int32));
    schema
}

async fn materialize(db: &DbService, schema: EntitySchema) -> db::Entity {
    let ddl = schema.create_ddl(db.dialect);
    sqlx::query(&ddl).execute(&db.pool).await.unwrap();
    db.entity(schema)
}

#[tokio::test]
async fn create_then_read_returns_the_projection() {
    let (db, _dir) = service().await;
    let posts = materialize(&db, posts_schema()).await;

    let created = posts
        .create(&json!({"title": "hello", "views": 7, "bogus": "dropped"}))
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    assert!(!id.is_empty());
    assert_eq!(created["title"], "hello");
    assert_eq!(created["views"], 7);
    assert!(created.get("bogus").is_none());
    assert!(created["created"].as_str().is_some());
    assert!(created["updated"].as_str().is_some());

    let read = posts.read(&id).await.unwrap().unwrap();
    assert_eq!(read, created);
}

#[tokio::test]
async fn auth_records_never_leak_the_password() {
    let (db, _dir) = service().await;
    let users = materialize(&db, EntitySchema::new_auth("users")).await;

    let created = users
        .create(&json!({"email": "a@b.c", "password": "secret12", "name": "Ada"}))
        .await
        .unwrap();
    assert!(created.get("password").is_none());
    let id = created["id"].as_str().unwrap().to_string();

    let read = users.read(&id).await.unwrap().unwrap();
    assert!(read.get("password").is_none());

    let listed = users.list(&ListOptions::default()).await.unwrap();
    assert!(listed.records.iter().all(|r| r.get("password").is_none()));

    let updated = users.update(&id, &json!({"name": "Ada L"})).await.unwrap();
    assert!(updated.record.get("password").is_none());

    // The stored hash still verifies the original credential.
    let raw = users.find_auth_record("a@b.c").await.unwrap().unwrap();
    assert!(db::entity::verify_password(&raw, "secret12"));
    assert!(!db::entity::verify_password(&raw, "nope"));
}

#[tokio::test]
async fn duplicate_email_is_a_conflict() {
    let (db, _dir) = service().await;
    let users = materialize(&db, EntitySchema::new_auth("users")).await;

    users
        .create(&json!({"email": "a@b.c", "password": "secret12"}))
        .await
        .unwrap();
    let err = users
        .create(&json!({"email": "a@b.c", "password": "secret34"}))
        .await
        .unwrap_err();
    assert!(matches!(err, db::EntityError::Conflict(_)));
}

#[tokio::test]
async fn list_pages_are_disjoint_and_counted() {
    let (db, _dir) = service().await;
    let posts = materialize(&db, posts_schema()).await;

    for i in 0..7 {
        posts.create(&json!({"title": format!("post {i}")})).await.unwrap();
    }

    let page1 = posts
        .list(&ListOptions { page_index: 1, per_page: 3, count_pages: true })
        .await
        .unwrap();
    let page2 = posts
        .list(&ListOptions { page_index: 2, per_page: 3, count_pages: true })
        .await
        .unwrap();

    assert_eq!(page1.records.len(), 3);
    assert_eq!(page1.pagination.record_count, 7);
    assert_eq!(page1.pagination.page_count, 3);

    let ids1: Vec<&str> = page1.records.iter().map(|r| r["id"].as_str().unwrap()).collect();
    let ids2: Vec<&str> = page2.records.iter().map(|r| r["id"].as_str().unwrap()).collect();
    assert!(ids1.iter().all(|id| !ids2.contains(id)));
}

#[tokio::test]
async fn list_without_counting_marks_page_count_unknown() {
    let (db, _dir) = service().await;
    let posts = materialize(&db, posts_schema()).await;
    posts.create(&json!({"title": "only"})).await.unwrap();

    let page = posts.list(&ListOptions::default()).await.unwrap();
    assert_eq!(page.pagination.page_count, -1);
    assert_eq!(page.pagination.record_count, -1);
}

#[tokio::test]
async fn list_rejects_invalid_pagination() {
    let (db, _dir) = service().await;
    let posts = materialize(&db, posts_schema()).await;

    let err = posts
        .list(&ListOptions { page_index: 0, per_page: 10, count_pages: false })
        .await
        .unwrap_err();
    assert!(matches!(err, db::EntityError::InvalidArgument(_)));

    let err = posts
        .list(&ListOptions { page_index: 1, per_page: 0, count_pages: false })
        .await
        .unwrap_err();
    assert!(matches!(err, db::EntityError::InvalidArgument(_)));
}

#[tokio::test]
async fn update_ignores_system_and_unknown_keys() {
    let (db, _dir) = service().await;
    let posts = materialize(&db, posts_schema()).await;

    let created = posts.create(&json!({"title": "before"})).await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    let created_at = created["created"].as_str().unwrap().to_string();

    let updated = posts
        .update(&id, &json!({"title": "after", "id": "forged", "created": "1999", "ghost": 1}))
        .await
        .unwrap();
    assert_eq!(updated.record["title"], "after");
    assert_eq!(updated.record["id"], id.as_str());
    assert_eq!(updated.record["created"], created_at.as_str());
    assert!(updated.record.get("ghost").is_none());
}

#[tokio::test]
async fn update_diffs_file_fields() {
    let (db, _dir) = service().await;
    let mut schema = EntitySchema::new_base("docs");
    schema.fields.push(EntityField::user("attachments", FieldType::Files));
    let docs = materialize(&db, schema).await;

    let created = docs
        .create(&json!({"attachments": ["a.pdf", "b.pdf", "c.pdf"]}))
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let updated = docs
        .update(&id, &json!({"attachments": ["a.pdf", "c.pdf"]}))
        .await
        .unwrap();
    assert_eq!(updated.stale_files, vec!["b.pdf"]);

    // Null clears the field and schedules everything that was left.
    let cleared = docs.update(&id, &json!({"attachments": null})).await.unwrap();
    let mut stale = cleared.stale_files.clone();
    stale.sort();
    assert_eq!(stale, vec!["a.pdf", "c.pdf"]);
}

#[tokio::test]
async fn remove_returns_the_old_record_and_rejects_views() {
    let (db, _dir) = service().await;
    let posts = materialize(&db, posts_schema()).await;

    let created = posts.create(&json!({"title": "bye"})).await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let removed = posts.remove(&id).await.unwrap();
    assert_eq!(removed["title"], "bye");
    assert!(posts.read(&id).await.unwrap().is_none());
    assert!(matches!(posts.remove(&id).await.unwrap_err(), db::EntityError::NotFound));

    let view = EntitySchema::new_view("recent_posts", "SELECT id, title FROM posts");
    sqlx::query(&view.create_ddl(db.dialect)).execute(&db.pool).await.unwrap();
    let view_entity = db.entity(view);
    let err = view_entity.remove("whatever").await.unwrap_err();
    assert!(matches!(err, db::EntityError::InvalidArgument(_)));
}

#[tokio::test]
async fn view_entities_list_through_their_query() {
    let (db, _dir) = service().await;
    let posts = materialize(&db, posts_schema()).await;
    posts.create(&json!({"title": "visible", "views": 3})).await.unwrap();

    let view = EntitySchema::new_view("post_titles", "SELECT id, title FROM posts");
    sqlx::query(&view.create_ddl(db.dialect)).execute(&db.pool).await.unwrap();
    let titles = db.entity(view);

    let listed = titles.list(&ListOptions::default()).await.unwrap();
    assert_eq!(listed.records.len(), 1);
    assert_eq!(listed.records[0]["title"], "visible");
}

#[tokio::test]
async fn query_from_cols_matches_any_column() {
    let (db, _dir) = service().await;
    let admins = materialize(&db, EntitySchema::admins()).await;

    let created = admins
        .create(&json!({"email": "root@ex.com", "password": "Abcdef12"}))
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let by_email = admins
        .query_from_cols("root@ex.com", &["id", "email"])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_email["id"], id.as_str());

    let by_id = admins.query_from_cols(&id, &["id", "email"]).await.unwrap().unwrap();
    assert_eq!(by_id["email"], "root@ex.com");

    assert!(admins
        .query_from_cols("missing", &["id", "email"])
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn record_exists_is_false_for_broken_tables() {
    let (db, _dir) = service().await;
    // Entity whose backing table was never created: the probe must swallow
    // the driver error and report absence.
    let ghost = db.entity(EntitySchema::new_base("ghost"));
    assert!(!ghost.record_exists("anything").await);
}
