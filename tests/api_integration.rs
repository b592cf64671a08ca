//! Integration tests for the WeGrow API endpoints.
//!
//! Drives the full router over HTTP against the in-memory store, identity
//! provider, outbox and notifier, then inspects their state directly.

use axum::http::{header, HeaderName, Method, StatusCode};
use axum_test::TestServer;
use serde_json::{json, Value};
use std::sync::Arc;
use wegrow_backend::{
    auth::{derive_credential, USER_ID_HEADER},
    build_router,
    config::Config,
    handlers::AppState,
    identity::{action_code, MemoryIdentity},
    mail::Outbox,
    notify::MemoryNotifier,
    store::{Database, MemoryStore},
};

const PASSWORD: &str = "sunflower42";
const PEPPER: &str = "test-pepper";
const ITERATIONS: u32 = 1_000;
const ADMIN_EMAIL: &str = "admin@wegrow.test";

/// Router plus handles on every in-memory collaborator
struct Harness {
    server: TestServer,
    db: MemoryStore,
    identity: MemoryIdentity,
    outbox: Outbox,
    notifier: MemoryNotifier,
}

fn test_config() -> Config {
    Config {
        credential_pepper: PEPPER.to_string(),
        credential_iterations: ITERATIONS,
        admin_emails: vec![ADMIN_EMAIL.to_string()],
        new_video_topic: "new-videos".to_string(),
        action_url: "https://wegrow.test".to_string(),
        ..Config::from_env()
    }
}

fn build_harness_with(outbox: Outbox, notifier: MemoryNotifier) -> Harness {
    let config = test_config();
    let db = MemoryStore::new();
    let identity = MemoryIdentity::new(config.action_url.clone());
    let state = AppState::new(
        config,
        Arc::new(db.clone()),
        Arc::new(identity.clone()),
        Arc::new(outbox.clone()),
        Arc::new(notifier.clone()),
    );

    Harness {
        server: TestServer::new(build_router(state)).unwrap(),
        db,
        identity,
        outbox,
        notifier,
    }
}

fn build_harness() -> Harness {
    build_harness_with(Outbox::new(), MemoryNotifier::new())
}

fn user_id_header() -> HeaderName {
    HeaderName::from_static(USER_ID_HEADER)
}

/// Register and return the new UID
async fn register(h: &Harness, email: &str, username: &str) -> String {
    let response = h
        .server
        .post("/register")
        .json(&json!({"email": email, "password": PASSWORD, "username": username}))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<Value>()["uid"].as_str().unwrap().to_string()
}

/// Register an admin account (email listed in the config)
async fn register_admin(h: &Harness) -> String {
    register(h, ADMIN_EMAIL, "wegrow_admin").await
}

/// Store a post directly with a chosen sort key
async fn seed_post(db: &MemoryStore, key: i64, tags: &[&str], username: &str) -> String {
    let id = format!("post-{key}");
    db.set(
        &format!("posts/{id}"),
        json!({
            "id": id,
            "username": username,
            "title": format!("Post {key}"),
            "content": "Hello",
            "created_at": key,
            "tags": tags,
            "like_count": 0,
            "flag_count": 0
        }),
    )
    .await
    .unwrap();
    id
}

fn link_in(html: &str) -> &str {
    html.split("href=\"").nth(1).and_then(|s| s.split('"').next()).unwrap()
}

fn created_keys(body: &Value) -> Vec<i64> {
    body["posts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["created_at"].as_i64().unwrap())
        .collect()
}

// =============================================================================
// Health Endpoint Tests
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let h = build_harness();

    let response = h.server.get("/health").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

// =============================================================================
// Registration Tests
// =============================================================================

#[tokio::test]
async fn test_register_creates_user() {
    let h = build_harness();

    let response = h
        .server
        .post("/register")
        .json(&json!({
            "email": "mira@example.com",
            "password": PASSWORD,
            "username": "mira",
            "phone_number": "+15550001",
            "gender": "female",
            "child_dob": "2022-03-01"
        }))
        .await;

    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    assert_eq!(body["role"], "user");
    assert_eq!(body["verification_email_sent"], true);
    let image = body["profile_image"].as_u64().unwrap();
    assert!((1..=10).contains(&image));

    let uid = body["uid"].as_str().unwrap();
    let doc = h.db.get(&format!("users/{uid}")).await.unwrap().unwrap();
    assert_eq!(doc["username"], "mira");
    assert_eq!(doc["email"], "mira@example.com");
    assert_eq!(doc["gender"], "female");
    assert!(doc.get("password").is_none());

    let sent = h.outbox.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "mira@example.com");
}

#[tokio::test]
async fn test_register_admin_email_gets_admin_role() {
    let h = build_harness();

    let response = h
        .server
        .post("/register")
        .json(&json!({"email": ADMIN_EMAIL, "password": PASSWORD}))
        .await;

    response.assert_status(StatusCode::CREATED);
    assert_eq!(response.json::<Value>()["role"], "admin");
}

#[tokio::test]
async fn test_register_rejects_invalid_input() {
    let h = build_harness();

    let cases = [
        json!({"email": "not-an-email", "password": PASSWORD}),
        json!({"email": "a@example.com", "password": "123"}),
        json!({"email": "a@example.com", "password": PASSWORD, "gender": "robot"}),
        json!({"email": "a@example.com", "password": PASSWORD, "username": "no spaces"}),
        json!({"email": "a@example.com", "password": PASSWORD, "child_dob": "2999-01-01"}),
    ];
    for case in cases {
        let response = h.server.post("/register").json(&case).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(response.json::<Value>()["error"].is_string());
    }
    assert!(h.identity.is_empty());
}

#[tokio::test]
async fn test_register_conflicts() {
    let h = build_harness();
    h.server
        .post("/register")
        .json(&json!({
            "email": "mira@example.com",
            "password": PASSWORD,
            "username": "mira",
            "phone_number": "+15550001"
        }))
        .await
        .assert_status(StatusCode::CREATED);

    // Same email
    let response = h
        .server
        .post("/register")
        .json(&json!({"email": "MIRA@example.com", "password": PASSWORD}))
        .await;
    response.assert_status(StatusCode::CONFLICT);

    // Same username
    let response = h
        .server
        .post("/register")
        .json(&json!({"email": "omar@example.com", "password": PASSWORD, "username": "mira"}))
        .await;
    response.assert_status(StatusCode::CONFLICT);

    // Same phone
    let response = h
        .server
        .post("/register")
        .json(&json!({
            "email": "omar@example.com",
            "password": PASSWORD,
            "phone_number": "+15550001"
        }))
        .await;
    response.assert_status(StatusCode::CONFLICT);

    assert_eq!(h.identity.len(), 1);
}

#[tokio::test]
async fn test_register_rolls_back_when_username_index_is_taken() {
    let h = build_harness();
    // An index entry with no matching user document passes the pre-check
    let index = format!("usernames/{}", hex::encode("mira"));
    h.db.set(&index, json!("someone-else")).await.unwrap();

    let response = h
        .server
        .post("/register")
        .json(&json!({"email": "mira@example.com", "password": PASSWORD, "username": "mira"}))
        .await;

    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(response.json::<Value>()["error"], "username already taken");
    assert_eq!(h.identity.len(), 0);
    assert_eq!(h.db.get(&index).await.unwrap(), Some(json!("someone-else")));
    assert_eq!(h.db.get("users").await.unwrap(), None);
}

#[tokio::test]
async fn test_register_rollback_releases_claims_already_made() {
    let h = build_harness();
    let phone_index = format!("phone_numbers/{}", hex::encode("+15550001"));
    h.db.set(&phone_index, json!("someone-else")).await.unwrap();

    h.server
        .post("/register")
        .json(&json!({
            "email": "mira@example.com",
            "password": PASSWORD,
            "username": "mira",
            "phone_number": "+15550001"
        }))
        .await
        .assert_status(StatusCode::CONFLICT);

    assert!(h.identity.is_empty());
    let username_index = format!("usernames/{}", hex::encode("mira"));
    assert_eq!(h.db.get(&username_index).await.unwrap(), None);
    assert_eq!(h.db.get(&phone_index).await.unwrap(), Some(json!("someone-else")));

    // The username is free again for a clean registration
    register(&h, "mira@example.com", "mira").await;
}

#[tokio::test]
async fn test_register_survives_mail_outage() {
    let h = build_harness_with(Outbox::failing(), MemoryNotifier::new());

    let response = h
        .server
        .post("/register")
        .json(&json!({"email": "mira@example.com", "password": PASSWORD}))
        .await;

    response.assert_status(StatusCode::CREATED);
    assert_eq!(response.json::<Value>()["verification_email_sent"], false);
}

#[tokio::test]
async fn test_raw_password_never_reaches_identity_provider() {
    let h = build_harness();
    register(&h, "mira@example.com", "mira").await;

    let stored = h.identity.stored_credential("mira@example.com").unwrap();
    assert_ne!(stored, PASSWORD);
    assert!(!stored.contains(PASSWORD));
    assert_eq!(
        stored,
        derive_credential("mira@example.com", PASSWORD, PEPPER, ITERATIONS)
    );
}

// =============================================================================
// Login & Password Tests
// =============================================================================

#[tokio::test]
async fn test_login_requires_verified_email() {
    let h = build_harness();
    let uid = register(&h, "mira@example.com", "mira").await;
    let credentials = json!({"email": "mira@example.com", "password": PASSWORD});

    h.server
        .post("/login")
        .json(&credentials)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    // Follow the emailed verification link
    let sent = h.outbox.sent();
    let code = action_code(link_in(&sent[0].html)).unwrap().to_string();
    h.identity.apply_verification(&code).unwrap();

    let response = h.server.post("/login").json(&credentials).await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["uid"], uid);
    assert_eq!(body["username"], "mira");
    assert_eq!(body["role"], "user");
}

#[tokio::test]
async fn test_login_errors() {
    let h = build_harness();
    register(&h, "mira@example.com", "mira").await;
    h.identity.mark_verified("mira@example.com");

    h.server
        .post("/login")
        .json(&json!({"email": "mira@example.com", "password": "wrong-password"}))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    h.server
        .post("/login")
        .json(&json!({"email": "mira@example.com"}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    h.server
        .post("/login")
        .json(&json!({"email": "ghost@example.com", "password": PASSWORD}))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_password_reset_flow() {
    let h = build_harness();
    register(&h, "mira@example.com", "mira").await;
    h.identity.mark_verified("mira@example.com");

    h.server
        .post("/forget-password")
        .json(&json!({"email": "ghost@example.com"}))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    h.server
        .post("/forget-password")
        .json(&json!({"email": "mira@example.com"}))
        .await
        .assert_status_ok();

    let reset_mail = h.outbox.sent().pop().unwrap();
    assert!(reset_mail.subject.contains("Reset"));
    let code = action_code(link_in(&reset_mail.html)).unwrap().to_string();

    h.server
        .post("/reset-password")
        .json(&json!({"email": "mira@example.com", "oob_code": code, "new_password": "moonflower7"}))
        .await
        .assert_status_ok();

    // Codes are single-use
    h.server
        .post("/reset-password")
        .json(&json!({"email": "mira@example.com", "oob_code": code, "new_password": "another99"}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    h.server
        .post("/login")
        .json(&json!({"email": "mira@example.com", "password": PASSWORD}))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    h.server
        .post("/login")
        .json(&json!({"email": "mira@example.com", "password": "moonflower7"}))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_password_reset_requires_the_accounts_email() {
    let h = build_harness();
    register(&h, "mira@example.com", "mira").await;
    h.identity.mark_verified("mira@example.com");

    h.server
        .post("/forget-password")
        .json(&json!({"email": "mira@example.com"}))
        .await
        .assert_status_ok();
    let reset_mail = h.outbox.sent().pop().unwrap();
    let code = action_code(link_in(&reset_mail.html)).unwrap().to_string();

    let response = h
        .server
        .post("/reset-password")
        .json(&json!({"email": "someone-else@example.com", "oob_code": code, "new_password": "moonflower7"}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json::<Value>()["error"],
        "email does not match the reset code"
    );

    // Nothing changed and the code is still usable
    h.server
        .post("/login")
        .json(&json!({"email": "mira@example.com", "password": PASSWORD}))
        .await
        .assert_status_ok();

    h.server
        .post("/reset-password")
        .json(&json!({"email": " MIRA@example.com", "oob_code": code, "new_password": "moonflower7"}))
        .await
        .assert_status_ok();
    h.server
        .post("/login")
        .json(&json!({"email": "mira@example.com", "password": "moonflower7"}))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_resend_verification() {
    let h = build_harness();
    register(&h, "mira@example.com", "mira").await;

    h.server
        .post("/resend-verification")
        .json(&json!({"email": "mira@example.com"}))
        .await
        .assert_status_ok();
    assert_eq!(h.outbox.sent().len(), 2);

    h.server
        .post("/resend-verification")
        .json(&json!({"email": "ghost@example.com"}))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    h.server
        .post("/resend-verification")
        .json(&json!({}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

// =============================================================================
// Account & Profile Tests
// =============================================================================

#[tokio::test]
async fn test_delete_account_removes_profile() {
    let h = build_harness();
    let uid = register(&h, "mira@example.com", "mira").await;

    h.server
        .post("/delete_account")
        .json(&json!({"uid": uid}))
        .await
        .assert_status_ok();

    h.server
        .get("/profile")
        .add_query_param("uid", &uid)
        .await
        .assert_status(StatusCode::NOT_FOUND);

    h.server
        .post("/delete_account")
        .json(&json!({"uid": uid}))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    // Username and email are free again
    register(&h, "mira@example.com", "mira").await;
}

#[tokio::test]
async fn test_enter_data_updates_profile() {
    let h = build_harness();
    let uid = register(&h, "mira@example.com", "mira").await;

    let response = h
        .server
        .post("/enter_data")
        .json(&json!({
            "uid": uid,
            "phone_number": "+15550002",
            "name": "Mira K",
            "gender": "female",
            "city": "Pune",
            "child_dob": "2021-07-14",
            "profile_image": 7
        }))
        .await;
    response.assert_status_ok();

    let response = h.server.get("/profile").add_query_param("uid", &uid).await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["uid"], uid);
    assert_eq!(body["name"], "Mira K");
    assert_eq!(body["city"], "Pune");
    assert_eq!(body["child_dob"], "2021-07-14");
    assert_eq!(body["profile_image"], 7);
    assert_eq!(body["phone_number"], "+15550002");
}

#[tokio::test]
async fn test_enter_data_validation() {
    let h = build_harness();
    let uid = register(&h, "mira@example.com", "mira").await;
    let base = json!({"uid": uid, "name": "M", "gender": "female", "city": "Pune", "child_dob": "2021-07-14"});

    let mut bad_image = base.clone();
    bad_image["profile_image"] = json!(11);
    h.server
        .post("/enter_data")
        .json(&bad_image)
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let mut future_dob = base.clone();
    future_dob["child_dob"] = json!("2999-01-01");
    h.server
        .post("/enter_data")
        .json(&future_dob)
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let mut bad_gender = base.clone();
    bad_gender["gender"] = json!("unknown");
    h.server
        .post("/enter_data")
        .json(&bad_gender)
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let mut ghost = base.clone();
    ghost["uid"] = json!("ghost");
    h.server
        .post("/enter_data")
        .json(&ghost)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_enter_data_phone_conflict_changes_nothing() {
    let h = build_harness();
    h.server
        .post("/register")
        .json(&json!({"email": "omar@example.com", "password": PASSWORD, "phone_number": "+15550009"}))
        .await
        .assert_status(StatusCode::CREATED);
    let uid = register(&h, "mira@example.com", "mira").await;
    let before = h.db.get(&format!("users/{uid}")).await.unwrap();

    let response = h
        .server
        .post("/enter_data")
        .json(&json!({
            "uid": uid,
            "phone_number": "+15550009",
            "name": "Mira",
            "gender": "female",
            "city": "Pune",
            "child_dob": "2021-07-14"
        }))
        .await;

    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(h.db.get(&format!("users/{uid}")).await.unwrap(), before);
}

#[tokio::test]
async fn test_change_username() {
    let h = build_harness();
    let mira = register(&h, "mira@example.com", "mira").await;
    let omar = register(&h, "omar@example.com", "omar").await;

    // Held by someone else
    let before = h.db.get(&format!("users/{mira}")).await.unwrap();
    h.server
        .post("/username")
        .json(&json!({"uid": mira, "username": "omar"}))
        .await
        .assert_status(StatusCode::CONFLICT);
    assert_eq!(h.db.get(&format!("users/{mira}")).await.unwrap(), before);

    h.server
        .post("/username")
        .json(&json!({"uid": mira, "username": "mira_k"}))
        .await
        .assert_status_ok();

    let response = h.server.get("/profile").add_query_param("uid", &mira).await;
    assert_eq!(response.json::<Value>()["username"], "mira_k");

    // The old name is released
    h.server
        .post("/username")
        .json(&json!({"uid": omar, "username": "mira"}))
        .await
        .assert_status_ok();

    h.server
        .post("/username")
        .json(&json!({"uid": omar, "username": "x"}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_uid_must_name_a_single_user() {
    let h = build_harness();
    let uid = register(&h, "mira@example.com", "mira").await;
    let before = h.db.get(&format!("users/{uid}")).await.unwrap();

    for bad in [format!("{uid}/role"), "../posts".to_string(), "a.b".to_string()] {
        h.server
            .get("/profile")
            .add_query_param("uid", &bad)
            .await
            .assert_status(StatusCode::BAD_REQUEST);
        h.server
            .post("/username")
            .json(&json!({"uid": bad, "username": "hacked"}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
        h.server
            .post("/enter_data")
            .json(&json!({"uid": bad, "name": "x", "gender": "female", "city": "Oslo", "child_dob": "2022-01-01"}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
        h.server
            .post("/delete_account")
            .json(&json!({"uid": bad}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    assert_eq!(h.db.get(&format!("users/{uid}")).await.unwrap(), before);
    assert_eq!(h.identity.len(), 1);
}

#[tokio::test]
async fn test_profile_lookups() {
    let h = build_harness();
    register(&h, "mira@example.com", "mira").await;

    h.server.get("/profile").await.assert_status(StatusCode::BAD_REQUEST);

    let response = h
        .server
        .get("/profile_image")
        .add_query_param("username", "mira")
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["username"], "mira");
    assert!((1..=10).contains(&body["profile_image"].as_u64().unwrap()));

    h.server
        .get("/profile_image")
        .add_query_param("username", "nobody")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

// =============================================================================
// Feed Tests
// =============================================================================

#[tokio::test]
async fn test_create_post() {
    let h = build_harness();

    h.server
        .post("/posts")
        .json(&json!({"username": "mira", "title": "Hi", "content": "x", "tags": [" ", ""]}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let response = h
        .server
        .post("/posts")
        .json(&json!({
            "username": "mira",
            "title": "First steps",
            "content": "She walked today!",
            "image_url": "",
            "tags": ["milestones", " toddler "]
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let first: Value = response.json();
    assert!(first["created_at"].as_i64().unwrap() < 0);
    assert_eq!(first["is_resolved"], false);
    assert_eq!(first["tags"], json!(["milestones", "toddler"]));

    let second: Value = h
        .server
        .post("/posts")
        .json(&json!({"username": "mira", "title": "Later", "content": "y", "tags": ["sleep"]}))
        .await
        .json();

    // Newest first
    let body: Value = h.server.get("/posts").await.json();
    let ids: Vec<&str> = body["posts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![second["id"].as_str().unwrap(), first["id"].as_str().unwrap()]);
}

#[tokio::test]
async fn test_list_posts_pagination() {
    let h = build_harness();
    for key in [5, 4, 3, 2, 1] {
        seed_post(&h.db, key, &["sleep"], "mira").await;
    }

    let body: Value = h
        .server
        .get("/posts")
        .add_query_param("limit", 2)
        .await
        .json();
    assert_eq!(created_keys(&body), vec![1, 2]);
    assert_eq!(body["next_start_after"], 2);

    let body: Value = h
        .server
        .get("/posts")
        .add_query_param("startAfter", 3)
        .await
        .json();
    assert_eq!(created_keys(&body), vec![4, 5]);
    assert!(body["next_start_after"].is_null());

    // Unusable values fall back instead of failing
    let response = h
        .server
        .get("/posts")
        .add_query_param("limit", "lots")
        .add_query_param("startAfter", "soon")
        .await;
    response.assert_status_ok();
    assert_eq!(created_keys(&response.json::<Value>()), vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_include_comments() {
    let h = build_harness();
    let id = seed_post(&h.db, 1, &["sleep"], "mira").await;
    h.db.set(
        &format!("posts/{id}/comments/c1"),
        json!({"id": "c1", "username": "omar", "content": "Same here", "created_at": 10, "role": "user"}),
    )
    .await
    .unwrap();

    let body: Value = h.server.get("/posts").await.json();
    assert!(body["posts"][0].get("comments").is_none());

    let body: Value = h
        .server
        .get("/posts")
        .add_query_param("includeComments", "true")
        .await
        .json();
    assert_eq!(body["posts"][0]["comments"]["c1"]["content"], "Same here");
}

#[tokio::test]
async fn test_filter_by_tags_is_page_then_filter() {
    let h = build_harness();
    seed_post(&h.db, 1, &["food"], "mira").await;
    seed_post(&h.db, 2, &["sleep", "night"], "omar").await;
    seed_post(&h.db, 3, &["sleep"], "mira").await;

    h.server
        .get("/posts/tags")
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let body: Value = h
        .server
        .get("/posts/tags")
        .add_query_param("tags", "sleep,teeth")
        .add_query_param("limit", 2)
        .await
        .json();
    assert_eq!(created_keys(&body), vec![2]);
    assert_eq!(body["next_start_after"], 2);

    let body: Value = h
        .server
        .get("/posts/tags")
        .add_query_param("tags", "sleep")
        .add_query_param("limit", 2)
        .add_query_param("startAfter", 2)
        .await
        .json();
    assert_eq!(created_keys(&body), vec![3]);
}

#[tokio::test]
async fn test_filter_by_username() {
    let h = build_harness();
    seed_post(&h.db, 1, &["food"], "mira").await;
    seed_post(&h.db, 2, &["sleep"], "omar").await;
    seed_post(&h.db, 3, &["sleep"], "mira").await;

    let body: Value = h
        .server
        .get("/posts/username")
        .add_query_param("username", "mira")
        .await
        .json();
    assert_eq!(created_keys(&body), vec![1, 3]);
}

#[tokio::test]
async fn test_like_toggle_and_flag_idempotence() {
    let h = build_harness();
    let id = seed_post(&h.db, 1, &["sleep"], "mira").await;

    let like = |username: &'static str| {
        h.server
            .post("/posts/like")
            .add_query_param("post_id", &id)
            .json(&json!({"username": username}))
    };

    let body: Value = like("omar").await.json();
    assert_eq!(body["liked"], true);
    assert_eq!(body["like_count"], 1);
    let body: Value = like("zoe").await.json();
    assert_eq!(body["like_count"], 2);
    let body: Value = like("omar").await.json();
    assert_eq!(body["liked"], false);
    assert_eq!(body["like_count"], 1);

    let flag = |username: &'static str| {
        h.server
            .post("/posts/flag")
            .add_query_param("post_id", &id)
            .json(&json!({"username": username}))
    };
    assert_eq!(flag("omar").await.json::<Value>()["flag_count"], 1);
    assert_eq!(flag("omar").await.json::<Value>()["flag_count"], 1);

    let doc = h.db.get(&format!("posts/{id}")).await.unwrap().unwrap();
    assert_eq!(doc["likes"], json!({"zoe": true}));
    assert_eq!(doc["flags"], json!({"omar": true}));

    let flagged: Value = h.server.get("/posts/flag").await.json();
    assert_eq!(flagged.as_array().unwrap().len(), 1);
    assert_eq!(flagged[0]["id"], id);

    h.server
        .post("/posts/like")
        .add_query_param("post_id", "missing")
        .json(&json!({"username": "omar"}))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    h.server
        .post("/posts/like")
        .json(&json!({"username": "omar"}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_post_ids_cannot_reach_other_nodes() {
    let h = build_harness();
    let uid = register(&h, "mira@example.com", "mira").await;
    let id = seed_post(&h.db, 1, &["sleep"], "mira").await;
    h.db.set(
        &format!("posts/{id}/comments/c1"),
        json!({"id": "c1", "username": "mira", "content": "hi"}),
    )
    .await
    .unwrap();
    let user_before = h.db.get(&format!("users/{uid}")).await.unwrap();
    let comment_before = h.db.get(&format!("posts/{id}/comments/c1")).await.unwrap();

    for bad in [
        format!("../users/{uid}"),
        format!("{id}/comments/c1"),
        "post.1".to_string(),
    ] {
        let response = h
            .server
            .post("/posts/like")
            .add_query_param("post_id", &bad)
            .json(&json!({"username": "omar"}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["error"], "invalid post_id");

        h.server
            .post("/posts/flag")
            .add_query_param("post_id", &bad)
            .json(&json!({"username": "omar"}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
        h.server
            .post("/posts/comment")
            .add_query_param("post_id", &bad)
            .json(&json!({"username": "mira", "content": "hi"}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    h.server
        .post("/comments/like")
        .add_query_param("post_id", &id)
        .add_query_param("comment_id", "c1/../../x")
        .json(&json!({"username": "omar"}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    assert_eq!(h.db.get(&format!("users/{uid}")).await.unwrap(), user_before);
    assert_eq!(
        h.db.get(&format!("posts/{id}/comments/c1")).await.unwrap(),
        comment_before
    );
}

#[tokio::test]
async fn test_comments_snapshot_role_and_react() {
    let h = build_harness();
    register_admin(&h).await;
    let id = seed_post(&h.db, 1, &["sleep"], "mira").await;

    h.server
        .post("/posts/comment")
        .add_query_param("post_id", &id)
        .json(&json!({"username": "nobody", "content": "hi"}))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    h.server
        .post("/posts/comment")
        .add_query_param("post_id", "missing")
        .json(&json!({"username": "wegrow_admin", "content": "hi"}))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let response = h
        .server
        .post("/posts/comment")
        .add_query_param("post_id", &id)
        .json(&json!({"username": "wegrow_admin", "content": "Try a bedtime story"}))
        .await;
    response.assert_status(StatusCode::CREATED);
    let comment: Value = response.json();
    assert_eq!(comment["role"], "admin");
    assert_eq!(comment["is_admin"], true);
    let comment_id = comment["id"].as_str().unwrap().to_string();

    let count = h.db.get(&format!("posts/{id}/comment_count")).await.unwrap();
    assert_eq!(count, Some(json!(1)));

    let body: Value = h
        .server
        .post("/comments/like")
        .add_query_param("post_id", &id)
        .add_query_param("comment_id", &comment_id)
        .json(&json!({"username": "omar"}))
        .await
        .json();
    assert_eq!(body["like_count"], 1);

    let body: Value = h
        .server
        .post("/comments/flag")
        .add_query_param("post_id", &id)
        .add_query_param("comment_id", &comment_id)
        .json(&json!({"username": "omar"}))
        .await
        .json();
    assert_eq!(body["flag_count"], 1);

    let flagged: Value = h.server.get("/comments/flag").await.json();
    assert_eq!(flagged[&id][&comment_id]["content"], "Try a bedtime story");

    h.server
        .post("/comments/like")
        .add_query_param("post_id", &id)
        .add_query_param("comment_id", "missing")
        .json(&json!({"username": "omar"}))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

// =============================================================================
// Curated Content Tests
// =============================================================================

#[tokio::test]
async fn test_admin_gate() {
    let h = build_harness();
    let user = register(&h, "mira@example.com", "mira").await;
    let tip = json!({"title": "Naps", "content": "Short and often"});

    h.server
        .post("/tips")
        .json(&tip)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    h.server
        .post("/tips")
        .add_header(user_id_header(), user)
        .json(&tip)
        .await
        .assert_status(StatusCode::FORBIDDEN);

    h.server
        .post("/tips")
        .add_header(user_id_header(), "ghost".to_string())
        .json(&tip)
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let admin = register_admin(&h).await;
    h.server
        .post("/tips")
        .add_header(user_id_header(), admin)
        .json(&tip)
        .await
        .assert_status(StatusCode::CREATED);
}

#[tokio::test]
async fn test_admin_gate_reads_only_the_callers_role() {
    let h = build_harness();
    register_admin(&h).await;
    let id = seed_post(&h.db, 1, &["sleep"], "mira").await;
    // Comments snapshot the author's role, so an admin comment carries "admin"
    h.db.set(
        &format!("posts/{id}/comments/c1"),
        json!({"id": "c1", "username": "wegrow_admin", "role": "admin", "content": "hi"}),
    )
    .await
    .unwrap();
    h.db.set("users/mod1/role", json!("moderator")).await.unwrap();
    let tip = json!({"title": "Naps", "content": "Short and often"});

    for caller in [
        format!("../posts/{id}/comments/c1"),
        format!("x/../../posts/{id}/comments/c1"),
        "mod1".to_string(),
    ] {
        h.server
            .post("/tips")
            .add_header(user_id_header(), caller)
            .json(&tip)
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }
    assert_eq!(h.db.get("tips").await.unwrap(), None);
}

#[tokio::test]
async fn test_tip_and_contest_replace_previous() {
    let h = build_harness();
    let admin = register_admin(&h).await;

    h.server.get("/contest").await.assert_status(StatusCode::NOT_FOUND);

    for title in ["First", "Second"] {
        h.server
            .post("/tips")
            .add_header(user_id_header(), admin.clone())
            .json(&json!({"title": title, "content": "..."}))
            .await
            .assert_status(StatusCode::CREATED);
        h.server
            .post("/contest")
            .add_header(user_id_header(), admin.clone())
            .json(&json!({"title": title, "description": "Draw your family", "deadline": "2026-12-01"}))
            .await
            .assert_status(StatusCode::CREATED);
    }

    let tips: Value = h.server.get("/tips").await.json();
    let tips = tips.as_array().unwrap();
    assert_eq!(tips.len(), 1);
    assert_eq!(tips[0]["title"], "Second");
    assert!(tips[0]["id"].is_string());

    let response = h.server.get("/contest").await;
    response.assert_status_ok();
    let contest: Value = response.json();
    assert_eq!(contest["title"], "Second");
    assert_eq!(contest["deadline"], "2026-12-01");
}

#[tokio::test]
async fn test_videos_are_announced_and_ranked() {
    let h = build_harness();
    let admin = register_admin(&h).await;

    for (title, creator, rank, tag) in [
        ("Sleep", "Dr. Rao", 1, "sleep"),
        ("Food", "Dr. Lee", 5, "food"),
        ("Naps", "Dr. Rao", 3, "sleep"),
    ] {
        h.server
            .post("/videos")
            .add_header(user_id_header(), admin.clone())
            .json(&json!({
                "link": format!("https://videos.test/{title}"),
                "title": title,
                "creator": creator,
                "rank": rank,
                "tags": [tag]
            }))
            .await
            .assert_status(StatusCode::CREATED);
    }

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0].topic, "new-videos");
    assert_eq!(sent[0].title, "New Video Posted: Sleep");
    assert_eq!(sent[0].body, "Check out Dr. Rao's latest video on Sleep!");

    let all: Value = h.server.get("/videos").await.json();
    let titles: Vec<&str> = all
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["Food", "Naps", "Sleep"]);
    assert!(all[0]["id"].is_string());

    let filtered: Value = h
        .server
        .get("/videos")
        .add_query_param("creator", "Dr. Rao")
        .add_query_param("tag", "sleep")
        .await
        .json();
    assert_eq!(filtered.as_array().unwrap().len(), 2);

    h.server
        .post("/videos")
        .add_header(user_id_header(), admin)
        .json(&json!({"link": "", "title": "No link"}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_top_videos() {
    let h = build_harness();
    let admin = register_admin(&h).await;

    for rank in [2, 9] {
        h.server
            .post("/videos/top")
            .add_header(user_id_header(), admin.clone())
            .json(&json!({"link": "https://videos.test/top", "title": format!("Top {rank}"), "rank": rank}))
            .await
            .assert_status(StatusCode::CREATED);
    }

    let top: Value = h.server.get("/videos/top").await.json();
    assert_eq!(top[0]["title"], "Top 9");
    assert_eq!(top[0]["isTopVideo"], true);
    assert!(h.notifier.sent().is_empty());

    let regular: Value = h.server.get("/videos").await.json();
    assert!(regular.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_video_kept_when_announcement_fails() {
    let h = build_harness_with(Outbox::new(), MemoryNotifier::failing());
    let admin = register_admin(&h).await;

    let response = h
        .server
        .post("/videos")
        .add_header(user_id_header(), admin)
        .json(&json!({"link": "https://videos.test/a", "title": "Teething", "creator": "Dr. Lee"}))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.json::<Value>(), json!({"error": "internal server error"}));

    let videos: Value = h.server.get("/videos").await.json();
    assert_eq!(videos.as_array().unwrap().len(), 1);
    assert_eq!(videos[0]["title"], "Teething");
}

#[tokio::test]
async fn test_custom_notification() {
    let h = build_harness();
    let admin = register_admin(&h).await;

    h.server
        .post("/custom-notif")
        .add_header(user_id_header(), admin.clone())
        .json(&json!({"title": "Live Q&A", "body": "Join us at 6pm"}))
        .await
        .assert_status_ok();
    h.server
        .post("/custom-notif")
        .add_header(user_id_header(), admin.clone())
        .json(&json!({"title": "Contest", "body": "Results are out", "topic": "contest"}))
        .await
        .assert_status_ok();
    h.server
        .post("/custom-notif")
        .add_header(user_id_header(), admin)
        .json(&json!({"title": "", "body": "x"}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let topics: Vec<String> = h.notifier.sent().into_iter().map(|b| b.topic).collect();
    assert_eq!(topics, vec!["new-videos".to_string(), "contest".to_string()]);
}

// =============================================================================
// Middleware Tests
// =============================================================================

#[tokio::test]
async fn test_preflight_returns_no_content() {
    let h = build_harness();

    let response = h
        .server
        .method(Method::OPTIONS, "/register")
        .add_header(header::ORIGIN, "https://app.wegrow.test".to_string())
        .add_header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST".to_string())
        .add_header(header::ACCESS_CONTROL_REQUEST_HEADERS, "user_id".to_string())
        .await;

    response.assert_status(StatusCode::NO_CONTENT);
    assert_eq!(
        response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "*"
    );
    assert!(response.text().is_empty());

    // Bare OPTIONS without preflight headers
    h.server
        .method(Method::OPTIONS, "/posts")
        .await
        .assert_status(StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let h = build_harness();

    let response = h
        .server
        .post("/login")
        .content_type("application/json")
        .bytes("{not json".into())
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(response.json::<Value>()["error"].is_string());
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let h = build_harness();
    let content = "a".repeat(wegrow_backend::MAX_BODY_SIZE);

    let response = h
        .server
        .post("/posts")
        .json(&json!({"username": "mira", "title": "Long", "content": content, "tags": ["sleep"]}))
        .await;

    response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(response.json::<Value>()["error"], "request body too large");
    assert_eq!(h.db.get("posts").await.unwrap(), None);

    // Preflight still answers with the body limit in the stack
    h.server
        .method(Method::OPTIONS, "/posts")
        .await
        .assert_status(StatusCode::NO_CONTENT);
}
