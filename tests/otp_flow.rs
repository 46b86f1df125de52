//! End-to-end tests for the one-time code login flow.
//!
//! These tests need a reachable Postgres and are gated on `PORTICO_TEST_DSN`;
//! without it every test skips. The schema is applied idempotently, and each
//! test works with its own random addresses so the suite can share a database.

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use portico::api::{app, bootstrap, email::LogEmailSender, AuthConfig, AuthState};

const SCHEMA_SQL: &str = include_str!("../sql/schema.sql");

async fn test_pool() -> Option<PgPool> {
    let Ok(dsn) = std::env::var("PORTICO_TEST_DSN") else {
        eprintln!("Skipping integration test: PORTICO_TEST_DSN is not set");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&dsn)
        .await
        .expect("failed to connect test pool");

    for statement in SCHEMA_SQL.split(';') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        sqlx::query(statement)
            .execute(&pool)
            .await
            .expect("failed to apply schema statement");
    }

    Some(pool)
}

fn test_state(super_admin_email: &str) -> Arc<AuthState> {
    let config = AuthConfig::new("http://localhost:5173".to_string(), super_admin_email);
    Arc::new(AuthState::new(config, Arc::new(LogEmailSender)))
}

fn test_router(pool: PgPool, state: Arc<AuthState>) -> Router {
    app(pool, state).expect("failed to build router")
}

fn random_email(prefix: &str) -> String {
    format!("{prefix}-{}@example.com", Uuid::new_v4().simple())
}

fn json_request(method: Method, uri: &str, body: &Value, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn bare_request(method: Method, uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).expect("request")
}

async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.expect("response")
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn session_cookie(response: &Response) -> Option<String> {
    let value = response.headers().get(header::SET_COOKIE)?.to_str().ok()?;
    let pair = value.split(';').next()?.trim();
    pair.starts_with("portico_session=").then(|| pair.to_string())
}

async fn latest_code(pool: &PgPool, email: &str) -> String {
    let row = sqlx::query(
        "SELECT code FROM otp_tokens WHERE email = $1 AND used = FALSE \
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(email)
    .fetch_one(pool)
    .await
    .expect("issued code");
    row.get("code")
}

async fn request_code(router: &Router, email: &str) -> Response {
    send(
        router,
        json_request(
            Method::POST,
            "/v1/auth/request-code",
            &json!({ "email": email }),
            None,
        ),
    )
    .await
}

async fn verify_code(router: &Router, body: &Value) -> Response {
    send(
        router,
        json_request(Method::POST, "/v1/auth/verify-code", body, None),
    )
    .await
}

/// Log in an existing account and return its session cookie.
async fn login(router: &Router, pool: &PgPool, email: &str) -> String {
    let response = request_code(router, email).await;
    assert_eq!(response.status(), StatusCode::OK);
    let code = latest_code(pool, email).await;
    let response = verify_code(router, &json!({ "email": email, "code": code })).await;
    assert_eq!(response.status(), StatusCode::OK);
    session_cookie(&response).expect("session cookie")
}

#[tokio::test]
async fn repeated_requests_leave_one_active_code() {
    let Some(pool) = test_pool().await else { return };
    let state = test_state(&random_email("root"));
    let router = test_router(pool.clone(), state);

    let email = random_email("alice");
    let response = request_code(&router, &email).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["is_new_user"], json!(true));

    let first_code = latest_code(&pool, &email).await;

    let response = request_code(&router, &email).await;
    assert_eq!(response.status(), StatusCode::OK);
    let second_code = latest_code(&pool, &email).await;

    let row = sqlx::query("SELECT COUNT(*) AS n FROM otp_tokens WHERE email = $1 AND used = FALSE")
        .bind(&email)
        .fetch_one(&pool)
        .await
        .expect("count");
    assert_eq!(row.get::<i64, _>("n"), 1);

    // The first code is dead even if it never expired.
    let response = verify_code(
        &router,
        &json!({ "email": email, "code": first_code, "name": "Alice" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = verify_code(
        &router,
        &json!({ "email": email, "code": second_code, "name": "Alice" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn invalid_email_is_rejected_before_any_code_is_issued() {
    let Some(pool) = test_pool().await else { return };
    let state = test_state(&random_email("root"));
    let router = test_router(pool.clone(), state);

    let response = request_code(&router, "not-an-email").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn new_address_requires_registration_without_consuming_the_code() {
    let Some(pool) = test_pool().await else { return };
    let state = test_state(&random_email("root"));
    let router = test_router(pool.clone(), state);

    let email = random_email("bob");
    let response = request_code(&router, &email).await;
    assert_eq!(response.status(), StatusCode::OK);
    let code = latest_code(&pool, &email).await;

    // Valid code, unknown address, no name: one more round-trip needed.
    let response = verify_code(&router, &json!({ "email": email, "code": code })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["requires_registration"], json!(true));

    // The same code still works once the name is supplied.
    let response = verify_code(
        &router,
        &json!({ "email": email, "code": code, "name": "Bob", "mobile": "+15550100" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = session_cookie(&response).expect("session cookie");
    let body = body_json(response).await;
    assert_eq!(body["user"]["email"], json!(email));
    assert_eq!(body["user"]["role"], json!("client"));
    assert_eq!(body["user"]["name"], json!("Bob"));

    // Consumed codes cannot be redeemed twice.
    let response = verify_code(
        &router,
        &json!({ "email": email, "code": code, "name": "Bob" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["requires_registration"], json!(false));

    // The cookie resolves to an active session.
    let response = send(
        &router,
        bare_request(Method::GET, "/v1/auth/session", Some(&cookie)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["user"]["email"], json!(email));
}

#[tokio::test]
async fn expired_code_is_rejected() {
    let Some(pool) = test_pool().await else { return };
    let state = test_state(&random_email("root"));
    let router = test_router(pool.clone(), state);

    let email = random_email("carol");
    let response = request_code(&router, &email).await;
    assert_eq!(response.status(), StatusCode::OK);
    let code = latest_code(&pool, &email).await;

    sqlx::query("UPDATE otp_tokens SET expires_at = NOW() - INTERVAL '1 minute' WHERE email = $1")
        .bind(&email)
        .execute(&pool)
        .await
        .expect("expire code");

    let response = verify_code(
        &router,
        &json!({ "email": email, "code": code, "name": "Carol" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["requires_registration"], json!(false));
}

#[tokio::test]
async fn concurrent_verification_consumes_the_code_exactly_once() {
    let Some(pool) = test_pool().await else { return };
    let state = test_state(&random_email("root"));
    let router = test_router(pool.clone(), state);

    let email = random_email("dave");
    let response = request_code(&router, &email).await;
    assert_eq!(response.status(), StatusCode::OK);
    let code = latest_code(&pool, &email).await;

    let body = json!({ "email": email, "code": code, "name": "Dave" });
    let (first, second) = tokio::join!(
        router
            .clone()
            .oneshot(json_request(Method::POST, "/v1/auth/verify-code", &body, None)),
        router
            .clone()
            .oneshot(json_request(Method::POST, "/v1/auth/verify-code", &body, None)),
    );
    let first = first.expect("response").status();
    let second = second.expect("response").status();

    let mut statuses = [first, second];
    statuses.sort_by_key(StatusCode::as_u16);
    assert_eq!(statuses, [StatusCode::OK, StatusCode::BAD_REQUEST]);

    let row = sqlx::query("SELECT COUNT(*) AS n FROM users WHERE email = $1")
        .bind(&email)
        .fetch_one(&pool)
        .await
        .expect("count");
    assert_eq!(row.get::<i64, _>("n"), 1);
}

#[tokio::test]
async fn super_admin_is_seeded_protected_and_immutable() {
    let Some(pool) = test_pool().await else { return };
    let super_admin = random_email("boss");
    let state = test_state(&super_admin);
    bootstrap(&pool, &state).await.expect("bootstrap");
    // Reconciliation is idempotent across restarts.
    bootstrap(&pool, &state).await.expect("bootstrap again");
    let router = test_router(pool.clone(), state);

    let row = sqlx::query("SELECT id, role, is_protected FROM users WHERE email = $1")
        .bind(&super_admin)
        .fetch_one(&pool)
        .await
        .expect("seeded account");
    let admin_id: Uuid = row.get("id");
    assert_eq!(row.get::<String, _>("role"), "admin");
    assert!(row.get::<bool, _>("is_protected"));

    let cookie = login(&router, &pool, &super_admin).await;

    // Admins can list accounts.
    let response = send(&router, bare_request(Method::GET, "/v1/users", Some(&cookie))).await;
    assert_eq!(response.status(), StatusCode::OK);

    // The protected account can neither be demoted nor deleted.
    let response = send(
        &router,
        json_request(
            Method::PUT,
            &format!("/v1/users/{admin_id}/role"),
            &json!({ "role": "client" }),
            Some(&cookie),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = send(
        &router,
        bare_request(Method::DELETE, &format!("/v1/users/{admin_id}"), Some(&cookie)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn first_login_with_the_super_admin_address_creates_a_protected_admin() {
    let Some(pool) = test_pool().await else { return };
    let super_admin = random_email("founder");
    let state = test_state(&super_admin);
    // No bootstrap: the account comes into existence through the login flow.
    let router = test_router(pool.clone(), state);

    let response = request_code(&router, &super_admin).await;
    assert_eq!(response.status(), StatusCode::OK);
    let code = latest_code(&pool, &super_admin).await;
    let response = verify_code(
        &router,
        &json!({ "email": super_admin, "code": code, "name": "Founder" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["user"]["role"], json!("admin"));

    let row = sqlx::query("SELECT is_protected FROM users WHERE email = $1")
        .bind(&super_admin)
        .fetch_one(&pool)
        .await
        .expect("account");
    assert!(row.get::<bool, _>("is_protected"));
}

#[tokio::test]
async fn role_changes_take_effect_on_the_next_request() {
    let Some(pool) = test_pool().await else { return };
    let super_admin = random_email("boss");
    let state = test_state(&super_admin);
    bootstrap(&pool, &state).await.expect("bootstrap");
    let router = test_router(pool.clone(), state);

    let admin_cookie = login(&router, &pool, &super_admin).await;

    // Register an ordinary client.
    let client_email = random_email("eve");
    let response = request_code(&router, &client_email).await;
    assert_eq!(response.status(), StatusCode::OK);
    let code = latest_code(&pool, &client_email).await;
    let response = verify_code(
        &router,
        &json!({ "email": client_email, "code": code, "name": "Eve" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let client_cookie = session_cookie(&response).expect("session cookie");
    let body = body_json(response).await;
    let client_id = body["user"]["id"].as_str().expect("id").to_string();

    // Clients cannot reach admin routes.
    let response = send(
        &router,
        bare_request(Method::GET, "/v1/users", Some(&client_cookie)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Promote, then the same session is admin on its very next request.
    let response = send(
        &router,
        json_request(
            Method::PUT,
            &format!("/v1/users/{client_id}/role"),
            &json!({ "role": "admin" }),
            Some(&admin_cookie),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["role"], json!("admin"));

    let response = send(
        &router,
        bare_request(Method::GET, "/v1/users", Some(&client_cookie)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn deleting_an_account_invalidates_its_sessions() {
    let Some(pool) = test_pool().await else { return };
    let super_admin = random_email("boss");
    let state = test_state(&super_admin);
    bootstrap(&pool, &state).await.expect("bootstrap");
    let router = test_router(pool.clone(), state);

    let admin_cookie = login(&router, &pool, &super_admin).await;

    let client_email = random_email("frank");
    let response = request_code(&router, &client_email).await;
    assert_eq!(response.status(), StatusCode::OK);
    let code = latest_code(&pool, &client_email).await;
    let response = verify_code(
        &router,
        &json!({ "email": client_email, "code": code, "name": "Frank" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let client_cookie = session_cookie(&response).expect("session cookie");
    let body = body_json(response).await;
    let client_id = body["user"]["id"].as_str().expect("id").to_string();

    let response = send(
        &router,
        bare_request(Method::DELETE, &format!("/v1/users/{client_id}"), Some(&admin_cookie)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // FK cascade removed the session rows, so the cookie is dead.
    let response = send(
        &router,
        bare_request(Method::GET, "/v1/auth/session", Some(&client_cookie)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Deleting again reports not-found.
    let response = send(
        &router,
        bare_request(Method::DELETE, &format!("/v1/users/{client_id}"), Some(&admin_cookie)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn logout_is_idempotent_and_clears_the_cookie() {
    let Some(pool) = test_pool().await else { return };
    let super_admin = random_email("boss");
    let state = test_state(&super_admin);
    bootstrap(&pool, &state).await.expect("bootstrap");
    let router = test_router(pool.clone(), state);

    let cookie = login(&router, &pool, &super_admin).await;

    let response = send(
        &router,
        bare_request(Method::POST, "/v1/auth/logout", Some(&cookie)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let cleared = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .expect("clear cookie");
    assert!(cleared.contains("Max-Age=0"));

    let response = send(
        &router,
        bare_request(Method::GET, "/v1/auth/session", Some(&cookie)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Second logout with the same dead cookie behaves the same.
    let response = send(
        &router,
        bare_request(Method::POST, "/v1/auth/logout", Some(&cookie)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn expired_sessions_are_removed_on_lookup() {
    let Some(pool) = test_pool().await else { return };
    let super_admin = random_email("boss");
    let state = test_state(&super_admin);
    bootstrap(&pool, &state).await.expect("bootstrap");
    let router = test_router(pool.clone(), state);

    let cookie = login(&router, &pool, &super_admin).await;

    sqlx::query(
        "UPDATE sessions SET expires_at = NOW() - INTERVAL '1 minute' \
         WHERE user_id = (SELECT id FROM users WHERE email = $1)",
    )
    .bind(&super_admin)
    .execute(&pool)
    .await
    .expect("expire session");

    let response = send(
        &router,
        bare_request(Method::GET, "/v1/auth/session", Some(&cookie)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // The stale row was deleted, not just ignored.
    let row = sqlx::query(
        "SELECT COUNT(*) AS n FROM sessions \
         WHERE user_id = (SELECT id FROM users WHERE email = $1)",
    )
    .bind(&super_admin)
    .fetch_one(&pool)
    .await
    .expect("count");
    assert_eq!(row.get::<i64, _>("n"), 0);
}

#[tokio::test]
async fn profile_updates_apply_only_to_the_caller() {
    let Some(pool) = test_pool().await else { return };
    let state = test_state(&random_email("root"));
    let router = test_router(pool.clone(), state);

    let email = random_email("grace");
    let response = request_code(&router, &email).await;
    assert_eq!(response.status(), StatusCode::OK);
    let code = latest_code(&pool, &email).await;
    let response = verify_code(
        &router,
        &json!({ "email": email, "code": code, "name": "Grace" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = session_cookie(&response).expect("session cookie");

    let response = send(
        &router,
        json_request(
            Method::PATCH,
            "/v1/me",
            &json!({ "name": "Grace H.", "mobile": "+15550199" }),
            Some(&cookie),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["name"], json!("Grace H."));
    assert_eq!(body["mobile"], json!("+15550199"));

    // Absent fields stay untouched.
    let response = send(
        &router,
        json_request(Method::PATCH, "/v1/me", &json!({ "mobile": "+15550200" }), Some(&cookie)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["name"], json!("Grace H."));
    assert_eq!(body["mobile"], json!("+15550200"));

    // No cookie, no update.
    let response = send(
        &router,
        json_request(Method::PATCH, "/v1/me", &json!({ "name": "Mallory" }), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn email_addresses_are_normalized_before_use() {
    let Some(pool) = test_pool().await else { return };
    let state = test_state(&random_email("root"));
    let router = test_router(pool.clone(), state);

    let email = random_email("henry");
    let shouty = format!("  {}  ", email.to_uppercase());

    let response = request_code(&router, &shouty).await;
    assert_eq!(response.status(), StatusCode::OK);

    // The code was issued under the normalized address.
    let code = latest_code(&pool, &email).await;
    let response = verify_code(
        &router,
        &json!({ "email": shouty, "code": code, "name": "Henry" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["user"]["email"], json!(email));
}
