//! # Integration Tests for crm-api
//!
//! Drives the full router over the in-memory backends: health probes,
//! OpenAPI, entity CRUD, the area gate, user management, avatar upload,
//! sessions, the customer portal, and request metrics.

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use crm_api::state::{AppConfig, AppState, ProfilePoll};
use crm_api::store::MemoryBackend;
use crm_core::Table;

struct TestEnv {
    backend: MemoryBackend,
    app: axum::Router,
}

/// Helper: build the app over a fresh in-memory backend with a fast
/// profile poll.
fn test_env() -> TestEnv {
    env_with(false)
}

fn env_with(separation_enabled: bool) -> TestEnv {
    let config = AppConfig {
        profile_poll: ProfilePoll {
            attempts: 3,
            interval: Duration::from_millis(5),
        },
        separation_enabled,
        ..AppConfig::default()
    };
    let backend = MemoryBackend::new();
    let app = crm_api::app(AppState::with_memory(config, &backend));
    TestEnv { backend, app }
}

impl TestEnv {
    /// Register an account and return its access token and user id.
    async fn seed(&self, email: &str, metadata: Value) -> (String, String) {
        let session = self
            .backend
            .auth
            .seed_user(email, "password123", metadata)
            .await
            .unwrap();
        (session.access_token, session.user.id.to_string())
    }

    async fn staff(&self, email: &str, role: &str) -> (String, String) {
        self.seed(
            email,
            json!({"full_name": email, "user_type": "staff", "role": role}),
        )
        .await
    }

    async fn customer(&self, email: &str) -> (String, String) {
        self.seed(email, json!({"full_name": "Casey Customer"})).await
    }

    async fn send(&self, request: Request<Body>) -> axum::http::Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

fn send_json(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn delete(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

/// Helper: read response body as string.
async fn body_string(response: axum::http::Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: axum::http::Response<Body>) -> Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

fn location(response: &axum::http::Response<Body>) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
}

// -- Health Probes ------------------------------------------------------------

#[tokio::test]
async fn test_liveness_probe() {
    let env = test_env();
    let response = env.send(get("/health/liveness", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ok");
}

#[tokio::test]
async fn test_readiness_probe() {
    let env = test_env();
    let response = env.send(get("/health/readiness", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ready");
}

// -- OpenAPI ------------------------------------------------------------------

#[tokio::test]
async fn test_openapi_lists_entity_paths() {
    let env = test_env();
    let response = env.send(get("/openapi.json", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let doc = body_json(response).await;
    let paths = doc["paths"].as_object().unwrap();
    for path in [
        "/api/contacts",
        "/api/deals/{id}",
        "/api/users/{id}/role",
        "/backoffice/deals/pipeline",
        "/portal/messages",
    ] {
        assert!(paths.contains_key(path), "missing {path}");
    }
}

// -- Entity CRUD --------------------------------------------------------------

#[tokio::test]
async fn test_api_requires_session() {
    let env = test_env();
    let response = env.send(get("/api/contacts", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_duplicate_contact_email_is_allowed() {
    let env = test_env();
    let (token, _) = env.staff("rep@example.com", "sales_rep").await;
    let contact = json!({
        "first_name": "Jo",
        "last_name": "Doe",
        "email": "jo@acme.test",
    });

    for _ in 0..2 {
        let response = env
            .send(send_json("POST", "/api/contacts", Some(&token), contact.clone()))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }
    assert_eq!(env.backend.tables.row_count(Table::Contacts), 2);
}

#[tokio::test]
async fn test_contact_validation_error() {
    let env = test_env();
    let (token, _) = env.staff("rep@example.com", "sales_rep").await;
    let response = env
        .send(send_json(
            "POST",
            "/api/contacts",
            Some(&token),
            json!({"first_name": "", "last_name": "Doe", "email": "jo@acme.test"}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_viewer_cannot_create_company() {
    let env = test_env();
    let (token, _) = env.staff("viewer@example.com", "viewer").await;
    let response = env
        .send(send_json("POST", "/api/companies", Some(&token), json!({"name": "Acme"})))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(env.backend.tables.row_count(Table::Companies), 0);
}

#[tokio::test]
async fn test_deleted_task_disappears_from_list() {
    let env = test_env();
    let (token, _) = env.staff("manager@example.com", "manager").await;
    let response = env
        .send(send_json(
            "POST",
            "/api/tasks",
            Some(&token),
            json!({"title": "Call back", "priority": "high"}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let task = body_json(response).await;
    let id = task["id"].as_str().unwrap();

    let response = env.send(delete(&format!("/api/tasks/{id}"), &token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"success": true}));

    let list = body_json(env.send(get("/api/tasks", Some(&token))).await).await;
    assert!(list.as_array().unwrap().iter().all(|t| t["id"] != id));

    let response = env.send(get(&format!("/api/tasks/{id}"), Some(&token))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_completing_task_stamps_completed_at() {
    let env = test_env();
    let (token, _) = env.staff("manager@example.com", "manager").await;
    let task = body_json(
        env.send(send_json("POST", "/api/tasks", Some(&token), json!({"title": "Send quote"})))
            .await,
    )
    .await;
    let id = task["id"].as_str().unwrap();
    assert!(task["completed_at"].is_null());

    let response = env
        .send(send_json(
            "PATCH",
            &format!("/api/tasks/{id}"),
            Some(&token),
            json!({"status": "completed"}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let updated = body_json(response).await;
    assert_eq!(updated["status"], "completed");
    assert!(updated["completed_at"].is_string());
}

#[tokio::test]
async fn test_deal_stage_change_is_logged() {
    let env = test_env();
    let (token, _) = env.staff("rep@example.com", "sales_rep").await;
    let deal = body_json(
        env.send(send_json(
            "POST",
            "/api/deals",
            Some(&token),
            json!({"title": "Renewal", "value": 1200}),
        ))
        .await,
    )
    .await;
    let id = deal["id"].as_str().unwrap();
    assert_eq!(deal["stage"], "lead");

    let response = env
        .send(send_json(
            "PATCH",
            &format!("/api/deals/{id}"),
            Some(&token),
            json!({"stage": "proposal"}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["stage"], "proposal");

    let feed = body_json(
        env.send(get(
            &format!("/api/activities?related_to_type=deal&related_to_id={id}"),
            Some(&token),
        ))
        .await,
    )
    .await;
    let entries = feed.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["activity_type"], "status_change");
}

#[tokio::test]
async fn test_deal_without_value_is_rejected() {
    let env = test_env();
    let (token, _) = env.staff("rep@example.com", "sales_rep").await;
    let response = env
        .send(send_json("POST", "/api/deals", Some(&token), json!({"title": "Renewal"})))
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(env.backend.tables.row_count(Table::Deals), 0);
}

#[tokio::test]
async fn test_bad_sort_column_is_bad_request() {
    let env = test_env();
    let (token, _) = env.staff("viewer@example.com", "viewer").await;
    let response = env
        .send(get("/api/contacts?sort=password", Some(&token)))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// -- Area Gate ----------------------------------------------------------------

#[tokio::test]
async fn test_customer_redirected_from_backoffice() {
    let env = test_env();
    let (token, _) = env.customer("casey@example.com").await;
    let response = env.send(get("/backoffice", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), "/portal");
}

#[tokio::test]
async fn test_anonymous_redirected_to_login_with_return_path() {
    let env = test_env();
    let response = env.send(get("/backoffice/settings/users", None)).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        location(&response),
        "/auth/login?redirectTo=%2Fbackoffice%2Fsettings%2Fusers"
    );
}

#[tokio::test]
async fn test_viewer_forbidden_from_user_settings() {
    let env = test_env();
    let (token, _) = env.staff("viewer@example.com", "viewer").await;
    let response = env
        .send(get("/backoffice/settings/users", Some(&token)))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "FORBIDDEN");
}

#[tokio::test]
async fn test_gate_fails_open_when_user_type_column_missing() {
    let env = test_env();
    let (token, _) = env.staff("admin@example.com", "admin").await;
    env.backend.tables.drop_column(Table::Profiles, "user_type");

    let response = env.send(get("/backoffice", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_staff_can_visit_portal_without_separation() {
    let env = test_env();
    let (token, _) = env.staff("admin@example.com", "admin").await;
    let response = env.send(get("/portal", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_staff_redirected_from_portal_with_separation() {
    let env = env_with(true);
    let (token, _) = env.staff("admin@example.com", "admin").await;
    let response = env.send(get("/portal", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), "/backoffice");

    let (customer, _) = env.customer("casey@example.com").await;
    let response = env.send(get("/portal", Some(&customer))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

// -- Backoffice Views ---------------------------------------------------------

#[tokio::test]
async fn test_pipeline_board_groups_by_stage() {
    let env = test_env();
    let (token, _) = env.staff("manager@example.com", "manager").await;
    for (title, stage, value) in [
        ("A", "lead", 100),
        ("B", "lead", 250),
        ("C", "closed_won", 1000),
    ] {
        let response = env
            .send(send_json(
                "POST",
                "/api/deals",
                Some(&token),
                json!({"title": title, "stage": stage, "value": value}),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = env
        .send(get("/backoffice/deals/pipeline", Some(&token)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let board = body_json(response).await;
    let stages = board["stages"].as_array().unwrap();
    assert_eq!(stages.len(), 6);
    assert_eq!(stages[0]["stage"], "lead");
    assert_eq!(stages[0]["count"], 2);
    assert_eq!(stages[0]["total_value"], 350.0);
    assert_eq!(stages[4]["stage"], "closed_won");
    assert_eq!(stages[4]["count"], 1);
}

#[tokio::test]
async fn test_calendar_rejects_bad_month() {
    let env = test_env();
    let (token, _) = env.staff("viewer@example.com", "viewer").await;
    let response = env
        .send(get("/backoffice/calendar?month=2024-13", Some(&token)))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// -- User Management ----------------------------------------------------------

#[tokio::test]
async fn test_sole_admin_cannot_be_demoted() {
    let env = test_env();
    let (token, admin_id) = env.staff("admin@example.com", "admin").await;

    let response = env
        .send(send_json(
            "PUT",
            &format!("/api/users/{admin_id}/role"),
            Some(&token),
            json!({"role": "viewer"}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(
        body["error"]["message"],
        crm_api::routes::users::LAST_ADMIN_MESSAGE
    );

    let response = env
        .send(send_json(
            "PATCH",
            &format!("/api/users/{admin_id}"),
            Some(&token),
            json!({"role": "manager"}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let directory = body_json(
        env.send(get("/backoffice/settings/users", Some(&token)))
            .await,
    )
    .await;
    assert_eq!(directory["admin_count"], 1);
}

#[tokio::test]
async fn test_one_of_two_admins_can_be_demoted() {
    let env = test_env();
    let (token, _) = env.staff("admin@example.com", "admin").await;
    let (_, other_id) = env.staff("second@example.com", "admin").await;

    let response = env
        .send(send_json(
            "PUT",
            &format!("/api/users/{other_id}/role"),
            Some(&token),
            json!({"role": "manager"}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["role"], "manager");
}

#[tokio::test]
async fn test_non_admin_cannot_promote_self() {
    let env = test_env();
    let (token, id) = env.staff("rep@example.com", "sales_rep").await;
    let response = env
        .send(send_json(
            "PATCH",
            &format!("/api/users/{id}"),
            Some(&token),
            json!({"role": "admin"}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_creates_staff_user() {
    let env = test_env();
    let (token, _) = env.staff("admin@example.com", "admin").await;
    let response = env
        .send(send_json(
            "POST",
            "/api/users",
            Some(&token),
            json!({"email": "new@example.com", "full_name": "New Hire", "role": "sales_rep"}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["profile"]["user_type"], "staff");
    assert_eq!(body["profile"]["role"], "sales_rep");
    assert!(body["message"].as_str().unwrap().contains("new@example.com"));
}

#[tokio::test]
async fn test_staff_creation_times_out_without_profile() {
    let env = test_env();
    let (token, _) = env.staff("admin@example.com", "admin").await;
    env.backend.auth.set_profile_creation(false);

    let response = env
        .send(send_json(
            "POST",
            "/api/users",
            Some(&token),
            json!({"email": "late@example.com", "full_name": "Late", "role": "viewer"}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(
        body["error"]["message"],
        crm_api::routes::users::PROFILE_TIMEOUT_MESSAGE
    );
}

#[tokio::test]
async fn test_cannot_delete_own_account() {
    let env = test_env();
    let (token, id) = env.staff("admin@example.com", "admin").await;
    let response = env.send(delete(&format!("/api/users/{id}"), &token)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// -- Avatar Upload ------------------------------------------------------------

/// Upload form with a single field named `field`.
fn multipart_form(
    token: Option<&str>,
    field: &str,
    content_type: &str,
    bytes: Vec<u8>,
) -> Request<Body> {
    let boundary = "crm-test-boundary";
    let mut body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"avatar\"\r\nContent-Type: {content_type}\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(&bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/upload-avatar")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        );
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body)).unwrap()
}

fn multipart(token: &str, content_type: &str, bytes: Vec<u8>) -> Request<Body> {
    multipart_form(Some(token), "file", content_type, bytes)
}

async fn own_avatar(env: &TestEnv, token: &str, id: &str) -> Value {
    let response = env
        .send(send_json("PATCH", &format!("/api/users/{id}"), Some(token), json!({})))
        .await;
    body_json(response).await["avatar_url"].clone()
}

#[tokio::test]
async fn test_avatar_upload_stores_data_url() {
    let env = test_env();
    let (token, id) = env.staff("rep@example.com", "sales_rep").await;
    let response = env.send(multipart(&token, "image/png", b"png".to_vec())).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["avatarUrl"], "data:image/png;base64,cG5n");
    assert_eq!(own_avatar(&env, &token, &id).await, body["avatarUrl"]);
}

#[tokio::test]
async fn test_oversized_avatar_rejected() {
    let env = test_env();
    let (token, id) = env.staff("rep@example.com", "sales_rep").await;
    let response = env
        .send(multipart(&token, "image/jpeg", vec![0u8; 3 * 1024 * 1024]))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["message"], "File too large. Maximum size is 2MB.");
    assert!(own_avatar(&env, &token, &id).await.is_null());
}

#[tokio::test]
async fn test_non_image_avatar_rejected() {
    let env = test_env();
    let (token, id) = env.staff("rep@example.com", "sales_rep").await;
    let response = env
        .send(multipart(&token, "application/pdf", b"%PDF".to_vec()))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(own_avatar(&env, &token, &id).await.is_null());
}

#[tokio::test]
async fn test_avatar_upload_requires_session() {
    let env = test_env();
    let response = env
        .send(multipart_form(None, "file", "image/png", b"png".to_vec()))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_avatar_upload_without_file_field() {
    let env = test_env();
    let (token, id) = env.staff("rep@example.com", "sales_rep").await;
    let response = env
        .send(multipart_form(Some(&token), "photo", "image/png", b"png".to_vec()))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["message"], "No file provided");
    assert!(own_avatar(&env, &token, &id).await.is_null());
}

// -- Sessions -----------------------------------------------------------------

#[tokio::test]
async fn test_login_sets_cookie_and_redirects_by_user_type() {
    let env = test_env();
    env.staff("admin@example.com", "admin").await;

    let response = env
        .send(send_json(
            "POST",
            "/auth/login",
            None,
            json!({"email": "admin@example.com", "password": "password123"}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("crm-access-token="));
    let body = body_json(response).await;
    assert_eq!(body["redirect_to"], "/backoffice");
    assert_eq!(body["role"], "admin");

    let token_cookie = cookie.split(';').next().unwrap().to_string();
    let request = Request::builder()
        .uri("/backoffice")
        .header(header::COOKIE, token_cookie)
        .body(Body::empty())
        .unwrap();
    assert_eq!(env.send(request).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_login_follows_only_local_redirects() {
    let env = test_env();
    env.customer("casey@example.com").await;
    let response = env
        .send(send_json(
            "POST",
            "/auth/login",
            None,
            json!({
                "email": "casey@example.com",
                "password": "password123",
                "redirectTo": "//evil.example",
            }),
        ))
        .await;
    assert_eq!(body_json(response).await["redirect_to"], "/portal");
}

#[tokio::test]
async fn test_wrong_password_is_unauthorized() {
    let env = test_env();
    env.customer("casey@example.com").await;
    let response = env
        .send(send_json(
            "POST",
            "/auth/login",
            None,
            json!({"email": "casey@example.com", "password": "nope-nope"}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_sign_up_creates_customer() {
    let env = test_env();
    let response = env
        .send(send_json(
            "POST",
            "/auth/sign-up",
            None,
            json!({"email": "new@example.com", "password": "secret12", "full_name": "New"}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["user_type"], "customer");
    assert_eq!(body["redirect_to"], "/portal");
}

#[tokio::test]
async fn test_logout_ends_session_and_clears_cookie() {
    let env = test_env();
    let (token, _) = env.customer("casey@example.com").await;

    let request = Request::builder()
        .method("POST")
        .uri("/auth/logout")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = env.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response.headers().get(header::SET_COOKIE).unwrap();
    assert!(cookie.to_str().unwrap().contains("Max-Age=0"));

    let response = env.send(get("/portal", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
}

// -- Portal -------------------------------------------------------------------

#[tokio::test]
async fn test_portal_message_links_to_matched_contact() {
    let env = test_env();
    let (staff, _) = env.staff("rep@example.com", "sales_rep").await;
    let (customer, _) = env.customer("casey@example.com").await;

    let contact = body_json(
        env.send(send_json(
            "POST",
            "/api/contacts",
            Some(&staff),
            json!({"first_name": "Casey", "last_name": "Customer", "email": "casey@example.com"}),
        ))
        .await,
    )
    .await;

    let response = env
        .send(send_json(
            "POST",
            "/portal/messages",
            Some(&customer),
            json!({"message": "Can we talk pricing?"}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let activity = body_json(response).await;
    assert_eq!(activity["title"], "Customer Message");
    assert_eq!(activity["related_to_type"], "contact");
    assert_eq!(activity["related_to_id"], contact["id"]);
}

#[tokio::test]
async fn test_empty_portal_message_rejected() {
    let env = test_env();
    let (customer, _) = env.customer("casey@example.com").await;
    let response = env
        .send(send_json(
            "POST",
            "/portal/messages",
            Some(&customer),
            json!({"message": "   "}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(env.backend.tables.row_count(Table::Activities), 0);
}

// -- Metrics ------------------------------------------------------------------

#[tokio::test]
async fn test_metrics_count_requests_and_errors() {
    let env = test_env();
    env.send(get("/openapi.json", None)).await;
    env.send(get("/api/contacts", None)).await;

    let response = env.send(get("/metrics", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let snapshot = body_json(response).await;
    assert!(snapshot["requests"].as_u64().unwrap() >= 2);
    assert!(snapshot["errors"].as_u64().unwrap() >= 1);
    assert_eq!(snapshot["server_errors"], 0);
}
