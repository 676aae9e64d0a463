//! HTTP surface tests.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use fieldsync_gateway::{create_router, init_identity, AdmissionPolicy, AppState, GatewayConfig, ServerSecret};
use fieldsync_store::{
    CreateOptions, CreateProject, DeviceIdentity, LocalStore, ProjectHandle, ProjectKey,
    ProjectStore, ProjectSummary, PublicId, ReplicationStream, StoreResult,
};
use serde_json::{json, Value};

const TOKEN: &str = "correct-horse-battery-staple";

struct TestApp {
    server: TestServer,
    store: Arc<LocalStore>,
}

async fn app_with(config: GatewayConfig) -> TestApp {
    let store = Arc::new(LocalStore::temporary().unwrap());
    init_identity(store.as_ref(), &config.server_name)
        .await
        .unwrap();
    let state = AppState::new(store.clone(), config);
    let server = TestServer::new(create_router(state)).unwrap();
    TestApp { server, store }
}

fn config() -> GatewayConfig {
    GatewayConfig::new(ServerSecret::new(TOKEN).unwrap(), "Test server")
}

async fn app() -> TestApp {
    app_with(config()).await
}

fn bearer(token: &str) -> (HeaderName, HeaderValue) {
    (
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
    )
}

fn hex(byte: u8) -> String {
    hex::encode([byte; 32])
}

fn registration(byte: u8) -> Value {
    json!({
        "projectName": format!("Project {byte}"),
        "projectKey": hex(byte),
        "encryptionKeys": {
            "auth": hex(byte.wrapping_add(1)),
            "config": hex(byte.wrapping_add(2)),
            "data": hex(byte.wrapping_add(3)),
            "blobIndex": hex(byte.wrapping_add(4)),
            "blob": hex(byte.wrapping_add(5)),
        }
    })
}

fn public_id_of(store: &LocalStore, byte: u8) -> PublicId {
    store.derive_public_id(&ProjectKey::from_bytes([byte; 32]))
}

async fn register(app: &TestApp, body: &Value) -> axum_test::TestResponse {
    let (name, value) = bearer(TOKEN);
    app.server
        .put("/projects")
        .add_header(name, value)
        .json(body)
        .await
}

fn error_code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap_or_default()
}

#[tokio::test]
async fn test_healthcheck() {
    let app = app().await;

    let response = app.server.get("/healthcheck").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["projects"], 0);
    assert_eq!(body["activeSessions"], 0);
}

#[tokio::test]
async fn test_info_reports_device_identity() {
    let app = app().await;
    let identity = app.store.device_identity().await.unwrap();

    let response = app.server.get("/info").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["deviceId"], identity.device_id.to_hex());
    assert_eq!(body["data"]["name"], "Test server");
}

#[tokio::test]
async fn test_project_routes_require_bearer() {
    let app = app().await;

    let missing = app.server.get("/projects").await;
    assert_eq!(missing.status_code(), StatusCode::UNAUTHORIZED);

    let (name, value) = bearer("wrong-horse-battery-staple!");
    let wrong = app.server.get("/projects").add_header(name, value).await;
    assert_eq!(wrong.status_code(), StatusCode::UNAUTHORIZED);

    let malformed = app
        .server
        .get("/projects")
        .add_header(AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="))
        .await;
    assert_eq!(malformed.status_code(), StatusCode::UNAUTHORIZED);

    // Malformed and wrong credentials are indistinguishable.
    let wrong_body: Value = wrong.json();
    let malformed_body: Value = malformed.json();
    assert_eq!(wrong_body, malformed_body);
    assert_eq!(error_code(&wrong_body), "UNAUTHORIZED");

    // Registration is rejected before the body is even looked at.
    let response = app
        .server
        .put("/projects")
        .json(&json!({ "garbage": true }))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.store.project_count(), 0);
}

#[tokio::test]
async fn test_register_capacity_and_idempotency() {
    let app = app().await;
    let identity = app.store.device_identity().await.unwrap();

    let first = register(&app, &registration(1)).await;
    first.assert_status_ok();
    let body: Value = first.json();
    assert_eq!(body["data"]["deviceId"], identity.device_id.to_hex());
    assert_eq!(app.store.project_count(), 1);

    let second = register(&app, &registration(2)).await;
    assert_eq!(second.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(&second.json()), "TOO_MANY_PROJECTS");
    assert_eq!(app.store.project_count(), 1);

    let retry = register(&app, &registration(1)).await;
    retry.assert_status_ok();
    assert_eq!(app.store.project_count(), 1);

    let (name, value) = bearer(TOKEN);
    let list = app.server.get("/projects").add_header(name, value).await;
    list.assert_status_ok();
    let body: Value = list.json();
    let projects = body["data"].as_array().unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(
        projects[0]["projectId"],
        public_id_of(&app.store, 1).to_hex()
    );
    assert_eq!(projects[0]["name"], "Project 1");
}

#[tokio::test]
async fn test_register_allowlist() {
    let allowed = {
        let scratch = LocalStore::temporary().unwrap();
        public_id_of(&scratch, 1)
    };
    let app =
        app_with(config().with_admission_policy(AdmissionPolicy::Allowlist(vec![allowed]))).await;

    let rejected = register(&app, &registration(2)).await;
    assert_eq!(rejected.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(&rejected.json()), "PROJECT_NOT_IN_ALLOWLIST");
    assert_eq!(app.store.project_count(), 0);

    register(&app, &registration(1)).await.assert_status_ok();
    assert_eq!(app.store.project_count(), 1);
}

#[tokio::test]
async fn test_register_rejects_malformed_input() {
    let app = app().await;

    let mut bad_hex = registration(1);
    bad_hex["projectKey"] = json!(format!("zz{}", &hex(1)[2..]));
    let response = register(&app, &bad_hex).await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&response.json()), "INVALID_REQUEST");

    let mut short_key = registration(1);
    short_key["encryptionKeys"]["blob"] = json!("abcd");
    let response = register(&app, &short_key).await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let mut missing = registration(1);
    missing["encryptionKeys"]
        .as_object_mut()
        .unwrap()
        .remove("blobIndex");
    let response = register(&app, &missing).await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let mut no_name = registration(1);
    no_name["projectName"] = json!("");
    let response = register(&app, &no_name).await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    assert_eq!(app.store.project_count(), 0);
}

#[tokio::test]
async fn test_register_announces_base_url() {
    let app = app().await;
    let (name, value) = bearer(TOKEN);

    app.server
        .put("/projects")
        .add_header(name, value)
        .add_header(
            HeaderName::from_static("x-forwarded-host"),
            HeaderValue::from_static("sync.example.org"),
        )
        .add_header(
            HeaderName::from_static("x-forwarded-proto"),
            HeaderValue::from_static("https"),
        )
        .json(&registration(1))
        .await
        .assert_status_ok();

    let identity = app.store.device_identity().await.unwrap();
    assert_eq!(identity.base_url(), Some("https://sync.example.org"));
    assert_eq!(identity.name, "Test server");
}

#[tokio::test]
async fn test_sync_requires_known_project() {
    let app = app().await;

    let malformed = app.server.get("/sync/not-a-project").await;
    assert_eq!(malformed.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(&malformed.json()), "PROJECT_NOT_FOUND");

    let unknown = app.server.get(&format!("/sync/{}", hex(9))).await;
    assert_eq!(unknown.status_code(), StatusCode::NOT_FOUND);

    register(&app, &registration(1)).await.assert_status_ok();
    let known = public_id_of(&app.store, 1);

    // Ids are lowercase only.
    let upper = app
        .server
        .get(&format!("/sync/{}", known.to_hex().to_uppercase()))
        .await;
    assert_eq!(upper.status_code(), StatusCode::NOT_FOUND);

    // Not a WebSocket handshake, but the project exists.
    let response = app.server.get(&format!("/sync/{known}")).await;
    assert_ne!(response.status_code(), StatusCode::NOT_FOUND);
    assert_ne!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_sync_auth_when_required() {
    let app = app_with(config().with_require_sync_auth(true)).await;
    register(&app, &registration(1)).await.assert_status_ok();
    let known = public_id_of(&app.store, 1);

    let response = app.server.get(&format!("/sync/{known}")).await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    // Unknown projects are indistinguishable from known ones without a
    // credential.
    let response = app.server.get(&format!("/sync/{}", hex(9))).await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    let (name, value) = bearer(TOKEN);
    let response = app
        .server
        .get(&format!("/sync/{known}"))
        .add_header(name, value)
        .await;
    assert_ne!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert_ne!(response.status_code(), StatusCode::NOT_FOUND);
}

/// A store that records projects under the wrong public id.
struct MisreportingStore(LocalStore);

#[async_trait]
impl ProjectStore for MisreportingStore {
    fn derive_public_id(&self, project_key: &ProjectKey) -> PublicId {
        self.0.derive_public_id(project_key)
    }

    async fn list_projects(&self) -> StoreResult<Vec<ProjectSummary>> {
        self.0.list_projects().await
    }

    async fn create_project(
        &self,
        params: CreateProject,
        options: CreateOptions,
    ) -> StoreResult<PublicId> {
        self.0.create_project(params, options).await?;
        Ok(PublicId::from_bytes([0xee; 32]))
    }

    async fn get_project(&self, public_id: &PublicId) -> StoreResult<ProjectHandle> {
        self.0.get_project(public_id).await
    }

    async fn device_identity(&self) -> StoreResult<DeviceIdentity> {
        self.0.device_identity().await
    }

    async fn set_device_identity(&self, identity: DeviceIdentity) -> StoreResult<()> {
        self.0.set_device_identity(identity).await
    }

    async fn open_replication_stream(
        &self,
        project: &ProjectHandle,
    ) -> StoreResult<ReplicationStream> {
        self.0.open_replication_stream(project).await
    }

    fn start_sync(&self, project: &ProjectHandle) {
        self.0.start_sync(project)
    }
}

#[tokio::test]
async fn test_public_id_mismatch_aborts_request() {
    let store = Arc::new(MisreportingStore(LocalStore::temporary().unwrap()));
    let state = AppState::new(store, config());
    let server = TestServer::new(create_router(state)).unwrap();

    let (name, value) = bearer(TOKEN);
    let response = server
        .put("/projects")
        .add_header(name, value)
        .json(&registration(1))
        .await;
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_code(&response.json()), "INTERNAL_ERROR");

    // The server keeps serving other requests.
    server.get("/healthcheck").await.assert_status_ok();
}
