//! Executor and refresher behavior against a loopback mock CRM.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::routing::{post, put};
use axum::{Form, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use onboardly_core::config::{AppConfig, CrmConfig};
use onboardly_core::domain::credential::Credential;
use onboardly_core::domain::sync::{FieldConfig, FieldOp, LinkOp, MediaOp, SyncPayload, TagOp, ValueOp};
use onboardly_core::domain::wizard::BlockMode;
use onboardly_crm::{CrmClient, InMemoryFileStore, NoopProgress, SyncExecutor};

#[derive(Default)]
struct MockCrm {
    /// `(method, path)` log of every call, in arrival order.
    requests: Mutex<Vec<(String, String)>>,
    /// Pending 500 responses for custom value PUTs.
    value_put_failures: AtomicU32,
    /// Reference ids whose PUT answers 404.
    missing_value_refs: Mutex<Vec<String>>,
    missing_link_refs: Mutex<Vec<String>>,
    /// Tag names whose create answers 500.
    failing_tags: Mutex<Vec<String>>,
    uploaded_files: Mutex<Vec<String>>,
}

impl MockCrm {
    fn record(&self, method: &str, path: String) {
        self.requests.lock().expect("lock requests").push((method.to_string(), path));
    }

    fn count(&self, method: &str, path: &str) -> usize {
        self.requests
            .lock()
            .expect("lock requests")
            .iter()
            .filter(|(m, p)| m == method && p == path)
            .count()
    }
}

async fn create_field(
    State(state): State<Arc<MockCrm>>,
    Path(location_id): Path<String>,
    Json(_body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.record("POST", format!("/locations/{location_id}/customFields"));
    (StatusCode::CREATED, Json(json!({"id": "cf-new"})))
}

async fn create_value(
    State(state): State<Arc<MockCrm>>,
    Path(location_id): Path<String>,
    Json(_body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.record("POST", format!("/locations/{location_id}/customValues"));
    (StatusCode::CREATED, Json(json!({"id": "cv-new"})))
}

async fn update_value(
    State(state): State<Arc<MockCrm>>,
    Path((location_id, reference_id)): Path<(String, String)>,
    Json(_body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.record("PUT", format!("/locations/{location_id}/customValues/{reference_id}"));

    if state.missing_value_refs.lock().expect("lock refs").contains(&reference_id) {
        return (StatusCode::NOT_FOUND, Json(json!({"message": "custom value not found"})));
    }
    if state.value_put_failures.load(Ordering::SeqCst) > 0 {
        state.value_put_failures.fetch_sub(1, Ordering::SeqCst);
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"message": "flaky"})));
    }
    (StatusCode::OK, Json(json!({"id": reference_id})))
}

async fn create_link(
    State(state): State<Arc<MockCrm>>,
    Json(_body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.record("POST", "/links/".to_string());
    (StatusCode::CREATED, Json(json!({"id": "tl-new"})))
}

async fn update_link(
    State(state): State<Arc<MockCrm>>,
    Path(reference_id): Path<String>,
    Json(_body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.record("PUT", format!("/links/{reference_id}"));

    if state.missing_link_refs.lock().expect("lock refs").contains(&reference_id) {
        return (StatusCode::NOT_FOUND, Json(json!({"message": "link not found"})));
    }
    (StatusCode::OK, Json(json!({"id": reference_id})))
}

async fn create_tag(
    State(state): State<Arc<MockCrm>>,
    Path(location_id): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.record("POST", format!("/locations/{location_id}/tags"));

    let name = body.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
    if state.failing_tags.lock().expect("lock tags").contains(&name) {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"message": "tag rejected"})));
    }
    (StatusCode::CREATED, Json(json!({"name": name})))
}

async fn upload_media(
    State(state): State<Arc<MockCrm>>,
    mut multipart: Multipart,
) -> (StatusCode, Json<Value>) {
    state.record("POST", "/medias/upload-file".to_string());

    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("file") {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let _ = field.bytes().await;
            state.uploaded_files.lock().expect("lock uploads").push(file_name);
        }
    }
    (StatusCode::CREATED, Json(json!({"fileId": "media-new"})))
}

#[derive(Deserialize)]
struct TokenRequest {
    grant_type: String,
    refresh_token: String,
    client_id: String,
    client_secret: String,
}

async fn token_endpoint(
    State(state): State<Arc<MockCrm>>,
    Form(request): Form<TokenRequest>,
) -> (StatusCode, Json<Value>) {
    state.record("POST", "/oauth/token".to_string());

    if request.grant_type != "refresh_token"
        || request.client_id != "client-1"
        || request.client_secret != "secret-1"
        || request.refresh_token != "rt-old"
    {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid_grant"})));
    }

    (
        StatusCode::OK,
        Json(json!({
            "access_token": "at-refreshed",
            "expires_in": 86_400,
            "token_type": "Bearer",
        })),
    )
}

async fn spawn_mock(state: Arc<MockCrm>) -> String {
    let app = Router::new()
        .route("/locations/{location_id}/customFields", post(create_field))
        .route("/locations/{location_id}/customValues", post(create_value))
        .route("/locations/{location_id}/customValues/{reference_id}", put(update_value))
        .route("/links/", post(create_link))
        .route("/links/{reference_id}", put(update_link))
        .route("/locations/{location_id}/tags", post(create_tag))
        .route("/medias/upload-file", post(upload_media))
        .route("/oauth/token", post(token_endpoint))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind mock crm");
    let addr = listener.local_addr().expect("mock crm addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve mock crm");
    });

    format!("http://{addr}")
}

fn crm_config(base_url: &str) -> CrmConfig {
    let mut config = AppConfig::default().crm;
    config.base_url = base_url.to_string();
    config.token_url = format!("{base_url}/oauth/token");
    config.client_id = Some("client-1".to_string());
    config.client_secret = Some("secret-1".to_string().into());
    config
}

fn executor_for(base_url: &str, files: Arc<InMemoryFileStore>) -> SyncExecutor {
    let config = crm_config(base_url);
    let credential = Credential::decode(Some("pk-live-test"));
    let client = CrmClient::build(&credential, &config).expect("build client");
    SyncExecutor::new(client, files, "loc-1")
}

#[tokio::test]
async fn put_404_on_custom_value_falls_back_to_exactly_one_create() {
    let state = Arc::new(MockCrm::default());
    state.missing_value_refs.lock().expect("lock refs").push("cv-gone".to_string());
    let base_url = spawn_mock(Arc::clone(&state)).await;

    let payload = SyncPayload {
        custom_values: vec![ValueOp {
            block_id: "b-val".to_string(),
            mode: BlockMode::Existing,
            reference_id: Some("cv-gone".to_string()),
            name: "Welcome message".to_string(),
            value: "Hi there".to_string(),
        }],
        ..SyncPayload::default()
    };

    let executor = executor_for(&base_url, InMemoryFileStore::new());
    let diff = executor.execute(&payload, &NoopProgress).await.expect("execute");

    assert_eq!(diff.values.len(), 1);
    assert!(diff.values[0].fallback);
    assert!(diff.values[0].error.is_none());
    assert_eq!(state.count("PUT", "/locations/loc-1/customValues/cv-gone"), 1);
    assert_eq!(state.count("POST", "/locations/loc-1/customValues"), 1);
}

#[tokio::test]
async fn trigger_link_update_falls_back_on_404_and_creates_directly_otherwise() {
    let state = Arc::new(MockCrm::default());
    state.missing_link_refs.lock().expect("lock refs").push("tl-gone".to_string());
    let base_url = spawn_mock(Arc::clone(&state)).await;

    let payload = SyncPayload {
        trigger_links: vec![
            LinkOp {
                block_id: "b-upd".to_string(),
                mode: BlockMode::Existing,
                reference_id: Some("tl-gone".to_string()),
                name: "Book a call".to_string(),
                redirect_to: "https://example.com/call".to_string(),
            },
            LinkOp {
                block_id: "b-new".to_string(),
                mode: BlockMode::Create,
                reference_id: None,
                name: "Docs".to_string(),
                redirect_to: "https://example.com/docs".to_string(),
            },
        ],
        ..SyncPayload::default()
    };

    let executor = executor_for(&base_url, InMemoryFileStore::new());
    let diff = executor.execute(&payload, &NoopProgress).await.expect("execute");

    assert_eq!(diff.trigger_links.len(), 2);
    assert!(diff.trigger_links[0].fallback);
    assert!(!diff.trigger_links[1].fallback);
    assert_eq!(state.count("PUT", "/links/tl-gone"), 1);
    assert_eq!(state.count("POST", "/links/"), 2);
}

#[tokio::test]
async fn tag_failures_are_isolated_per_name() {
    let state = Arc::new(MockCrm::default());
    state.failing_tags.lock().expect("lock tags").push("new client".to_string());
    let base_url = spawn_mock(Arc::clone(&state)).await;

    let payload = SyncPayload {
        tags: vec![TagOp {
            block_id: "b-tags".to_string(),
            names: vec!["vip".to_string(), "new client".to_string(), "vip".to_string()],
        }],
        ..SyncPayload::default()
    };

    let executor = executor_for(&base_url, InMemoryFileStore::new());
    let diff = executor.execute(&payload, &NoopProgress).await.expect("execute");

    assert_eq!(state.count("POST", "/locations/loc-1/tags"), 3);
    assert_eq!(diff.tags.len(), 3);
    assert!(diff.tags[0].error.is_none());
    assert!(diff.tags[1].error.is_some());
    assert!(diff.tags[2].error.is_none());
}

#[tokio::test]
async fn retried_attempt_skips_categories_that_already_completed() {
    let state = Arc::new(MockCrm::default());
    state.value_put_failures.store(1, Ordering::SeqCst);
    let base_url = spawn_mock(Arc::clone(&state)).await;

    let payload = SyncPayload {
        custom_fields: vec![FieldOp {
            block_id: "b-field".to_string(),
            mode: BlockMode::Create,
            config: FieldConfig {
                name: "Budget".to_string(),
                data_type: "TEXT".to_string(),
                placeholder: String::new(),
                options: Vec::new(),
            },
            value: json!("5000"),
        }],
        custom_values: vec![ValueOp {
            block_id: "b-val".to_string(),
            mode: BlockMode::Existing,
            reference_id: Some("cv-1".to_string()),
            name: "Welcome".to_string(),
            value: "Hello".to_string(),
        }],
        ..SyncPayload::default()
    };

    let executor = executor_for(&base_url, InMemoryFileStore::new());

    let first = executor.execute(&payload, &NoopProgress).await;
    assert!(first.is_err(), "flaky PUT should abort the first attempt");

    let diff = executor.execute(&payload, &NoopProgress).await.expect("second attempt");
    assert_eq!(diff.fields.len(), 1);
    assert_eq!(diff.values.len(), 1);

    // The completed fields category did not re-run on retry.
    assert_eq!(state.count("POST", "/locations/loc-1/customFields"), 1);
    assert_eq!(state.count("PUT", "/locations/loc-1/customValues/cv-1"), 2);
}

#[tokio::test]
async fn media_sync_downloads_from_storage_and_uploads_multipart() {
    let state = Arc::new(MockCrm::default());
    let base_url = spawn_mock(Arc::clone(&state)).await;

    let files = InMemoryFileStore::new();
    files.insert("uploads/logo.png", vec![0x89, 0x50, 0x4e, 0x47]).await;

    let payload = SyncPayload {
        media: vec![MediaOp {
            block_id: "b-media".to_string(),
            storage_key: "uploads/logo.png".to_string(),
            file_name: "logo.png".to_string(),
            mime_type: Some("image/png".to_string()),
        }],
        ..SyncPayload::default()
    };

    let executor = executor_for(&base_url, files);
    let diff = executor.execute(&payload, &NoopProgress).await.expect("execute");

    assert_eq!(diff.media.len(), 1);
    assert_eq!(
        state.uploaded_files.lock().expect("lock uploads").as_slice(),
        ["logo.png".to_string()]
    );
}

#[tokio::test]
async fn missing_media_file_aborts_the_attempt() {
    let state = Arc::new(MockCrm::default());
    let base_url = spawn_mock(Arc::clone(&state)).await;

    let payload = SyncPayload {
        media: vec![MediaOp {
            block_id: "b-media".to_string(),
            storage_key: "uploads/absent.png".to_string(),
            file_name: "absent.png".to_string(),
            mime_type: None,
        }],
        ..SyncPayload::default()
    };

    let executor = executor_for(&base_url, InMemoryFileStore::new());
    let result = executor.execute(&payload, &NoopProgress).await;
    assert!(result.is_err());
    assert_eq!(state.count("POST", "/medias/upload-file"), 0);
}

#[tokio::test]
async fn existing_mode_fields_are_recorded_as_skipped_without_calls() {
    let state = Arc::new(MockCrm::default());
    let base_url = spawn_mock(Arc::clone(&state)).await;

    let payload = SyncPayload {
        custom_fields: vec![FieldOp {
            block_id: "b-field".to_string(),
            mode: BlockMode::Existing,
            config: FieldConfig::default(),
            value: json!("ignored"),
        }],
        ..SyncPayload::default()
    };

    let executor = executor_for(&base_url, InMemoryFileStore::new());
    let diff = executor.execute(&payload, &NoopProgress).await.expect("execute");

    assert_eq!(diff.fields.len(), 1);
    assert!(diff.fields[0].skipped.is_some());
    assert_eq!(state.count("POST", "/locations/loc-1/customFields"), 0);
}

#[tokio::test]
async fn refresh_merges_the_grant_over_the_stored_credential() {
    let state = Arc::new(MockCrm::default());
    let base_url = spawn_mock(Arc::clone(&state)).await;
    let config = crm_config(&base_url);

    let stored = serde_json::json!({
        "kind": "oauth",
        "access_token": "at-stale",
        "refresh_token": "rt-old",
        "scope": ["locations.readonly"],
        "provider_account_id": "comp-1",
    })
    .to_string();
    let credential = Credential::decode(Some(&stored));

    let http = reqwest::Client::new();
    let refreshed =
        onboardly_crm::refresh(&http, &credential, &config).await.expect("refresh succeeds");

    assert_eq!(refreshed.current_access_token(), Some("at-refreshed"));
    // Grant omitted a refresh token and scope: old values carry forward.
    assert_eq!(refreshed.refresh_token(), Some("rt-old"));
    let Credential::Oauth(oauth) = refreshed else { panic!("expected oauth credential") };
    assert_eq!(oauth.scope, vec!["locations.readonly"]);
    assert_eq!(oauth.provider_account_id.as_deref(), Some("comp-1"));
    assert_eq!(state.count("POST", "/oauth/token"), 1);
}

#[tokio::test]
async fn refresh_surfaces_token_endpoint_failures() {
    let state = Arc::new(MockCrm::default());
    let base_url = spawn_mock(Arc::clone(&state)).await;
    let config = crm_config(&base_url);

    let stored = serde_json::json!({
        "kind": "oauth",
        "access_token": "at-stale",
        "refresh_token": "rt-revoked",
    })
    .to_string();
    let credential = Credential::decode(Some(&stored));

    let http = reqwest::Client::new();
    let result = onboardly_crm::refresh(&http, &credential, &config).await;
    assert!(matches!(result, Err(onboardly_crm::OAuthError::Endpoint { status: 401, .. })));
}
