//! REST API for the registry service (served on port 11111 by default).
//!
//! Exposes the identity service, the document store and the atomic
//! enrollment operations as JSON over HTTP:
//! - `/signup`, `/login`, `/logout`, `/me`, `/password`
//! - `/collections/:collection/docs[/:id]` for generic document access
//! - `/courses/:id/enrollment` (POST registers, DELETE drops)
//! - `/reports/sql` for admin SQL over the catalog
//!
//! Everything except signup, login and health sits behind bearer-token auth.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::access;
use crate::auth::IdentityService;
use crate::error::{AuthError, EnrollmentError, Error, ValidationError};
use crate::models::{Collection, Course, Identity, ProfileFields, Session};
use crate::report::{ReportEngine, ReportTable};
use crate::storage::{Document, FieldUpdates, Fields, Storage};

/// Shared app state for REST handlers (Arc-wrapped for concurrency)
pub struct AppState {
    storage: Storage,
    identity: Arc<IdentityService>,
}

#[derive(Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub profile: ProfileFields,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct PasswordRequest {
    pub current: String,
    pub new: String,
}

#[derive(Serialize, Deserialize)]
pub struct SqlRequest {
    pub sql: String,
}

/// Generic acknowledgement body (JSON)
#[derive(Serialize, Deserialize, Debug)]
pub struct RestResponse {
    pub success: bool,
    pub message: String,
    pub results: Vec<String>, // ids created by the call, if any
}

impl RestResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Self::with_results(message, vec![])
    }

    fn with_results(message: impl Into<String>, results: Vec<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            results,
        })
    }
}

/// Bearer token of the current request, kept so logout can revoke it.
#[derive(Clone)]
struct BearerToken(String);

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Auth(AuthError::InvalidEmail | AuthError::WeakPassword { .. }) => StatusCode::BAD_REQUEST,
            Error::Auth(AuthError::DuplicateAccount) => StatusCode::CONFLICT,
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Enrollment(EnrollmentError::NotAuthenticated) => StatusCode::UNAUTHORIZED,
            Error::Enrollment(EnrollmentError::CourseNotFound) => StatusCode::NOT_FOUND,
            Error::Enrollment(_) => StatusCode::CONFLICT,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::Remote(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Error> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(AuthError::NotAuthenticated)?
        .to_owned();

    let identity = state.identity.verify(&token)?;

    req.extensions_mut().insert(identity);
    req.extensions_mut().insert(BearerToken(token));
    Ok(next.run(req).await)
}

/// Create the Axum router over a store and identity service.
pub fn create_router(storage: Storage, identity: Arc<IdentityService>) -> Router {
    let state = Arc::new(AppState { storage, identity });

    let auth_routes = Router::new()
        .route("/logout", post(logout_handler))
        .route("/me", get(me_handler))
        .route("/password", post(password_handler))
        .route(
            "/collections/:collection/docs",
            get(list_docs_handler).post(add_doc_handler),
        )
        .route(
            "/collections/:collection/docs/:doc_id",
            get(get_doc_handler).put(set_doc_handler).patch(update_doc_handler),
        )
        .route(
            "/courses/:course_id/enrollment",
            post(enroll_handler).delete(withdraw_handler),
        )
        .route("/reports/sql", post(sql_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/signup", post(signup_handler))
        .route("/login", post(login_handler))
        .route("/health", get(health_handler))
        .merge(auth_routes)
        .with_state(state)
}

fn collection(name: &str) -> Result<Collection, Error> {
    Collection::parse(name).ok_or_else(|| Error::NotFound {
        collection: name.to_owned(),
        id: String::new(),
    })
}

async fn signup_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SignupRequest>,
) -> Result<Json<RestResponse>, Error> {
    let account_id = state
        .identity
        .sign_up(&payload.email, &payload.password, &payload.profile)?;
    Ok(RestResponse::with_results("Account created successfully!", vec![account_id]))
}

async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<Session>, Error> {
    state.identity.authenticate(&payload.email, &payload.password).map(Json)
}

async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Extension(BearerToken(token)): Extension<BearerToken>,
) -> Json<RestResponse> {
    state.identity.end_session(&token);
    RestResponse::ok("Logged out successfully")
}

async fn me_handler(Extension(identity): Extension<Identity>) -> Json<Identity> {
    Json(identity)
}

async fn password_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<PasswordRequest>,
) -> Result<Json<RestResponse>, Error> {
    state
        .identity
        .change_password(&identity, &payload.current, &payload.new)?;
    Ok(RestResponse::ok("Password updated successfully!"))
}

async fn list_docs_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Vec<Document>>, Error> {
    Ok(Json(state.storage.list_docs(collection(&name)?)?))
}

async fn get_doc_handler(
    State(state): State<Arc<AppState>>,
    Path((name, doc_id)): Path<(String, String)>,
) -> Result<Json<Document>, Error> {
    Ok(Json(state.storage.get_doc(collection(&name)?, &doc_id)?))
}

async fn add_doc_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(name): Path<String>,
    Json(fields): Json<Fields>,
) -> Result<Json<RestResponse>, Error> {
    let collection = collection(&name)?;
    access::can_set(Some(&identity), collection, &fields)?;
    let id = state.storage.add_doc(collection, &fields)?;
    tracing::info!(%collection, %id, by = %identity.account_id, "document added");
    Ok(RestResponse::with_results("Document added", vec![id]))
}

async fn set_doc_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path((name, doc_id)): Path<(String, String)>,
    Json(fields): Json<Fields>,
) -> Result<Json<RestResponse>, Error> {
    let collection = collection(&name)?;
    access::can_set(Some(&identity), collection, &fields)?;
    state.storage.replace_doc(collection, &doc_id, &fields)?;
    Ok(RestResponse::ok(format!("{collection}/{doc_id} written")))
}

async fn update_doc_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path((name, doc_id)): Path<(String, String)>,
    Json(updates): Json<FieldUpdates>,
) -> Result<Json<RestResponse>, Error> {
    let collection = collection(&name)?;
    access::can_update(Some(&identity), collection, &doc_id, &updates)?;
    if access::touches_relation(&updates) {
        return Err(Error::Forbidden);
    }
    state.storage.update_doc(collection, &doc_id, &updates)?;
    Ok(RestResponse::ok(format!("{collection}/{doc_id} updated")))
}

async fn enroll_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(course_id): Path<String>,
) -> Result<Json<RestResponse>, Error> {
    state.storage.enroll(&identity.account_id, &course_id)?;
    tracing::info!(account_id = %identity.account_id, %course_id, "registered");
    Ok(RestResponse::ok("Successfully registered for course!"))
}

async fn withdraw_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(course_id): Path<String>,
) -> Result<Json<RestResponse>, Error> {
    state.storage.withdraw(&identity.account_id, &course_id)?;
    tracing::info!(account_id = %identity.account_id, %course_id, "dropped");
    Ok(RestResponse::ok("Course dropped successfully!"))
}

/// Handler: admin SQL over an Arrow projection of the catalog
async fn sql_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<SqlRequest>,
) -> Result<Json<ReportTable>, Error> {
    access::require_admin(Some(&identity))?;
    tracing::debug!(sql = %payload.sql, "report query");
    if payload.sql.trim().is_empty() {
        return Err(ValidationError::missing("sql").into());
    }
    let courses: Vec<Course> = state.storage.list_records(Collection::Courses)?;
    let engine = ReportEngine::new(&courses)?;
    Ok(Json(engine.table(&payload.sql).await?))
}

/// Health check handler
async fn health_handler() -> Json<RestResponse> {
    RestResponse::ok("course registry healthy")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::test_settings;
    use crate::config::AuthSettings;
    use crate::models::Role;
    use axum::body::{to_bytes, Body};
    use serde_json::{json, Value};
    use tower::ServiceExt; // For .oneshot() testing

    fn app() -> (Router, Storage) {
        app_with(test_settings())
    }

    fn app_with(settings: AuthSettings) -> (Router, Storage) {
        let storage = Storage::temporary().expect("storage for REST test");
        let identity = Arc::new(IdentityService::new(storage.clone(), settings));
        identity
            .create_account(
                "admin@uni.edu",
                "admin123",
                &ProfileFields {
                    role: Role::Admin,
                    ..Default::default()
                },
            )
            .unwrap();
        (create_router(storage.clone(), identity), storage)
    }

    async fn call(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().uri(uri).method(method);
        if let Some(token) = token {
            request = request.header("authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.expect("request");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn login(app: &Router, email: &str, password: &str) -> String {
        let (status, body) = call(app, "POST", "/login", None, Some(json!({"email": email, "password": password}))).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_and_auth_guard() {
        let (app, _) = app();
        let (status, _) = call(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&app, "GET", "/collections/courses/docs", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["kind"], "auth");

        let (status, _) = call(&app, "GET", "/me", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_signup_login_and_logout() {
        let (app, _) = app();
        let signup = json!({"email": "ada@uni.edu", "password": "secret1", "profile": {"name": "Ada"}});
        let (status, body) = call(&app, "POST", "/signup", None, Some(signup.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"].as_array().unwrap().len(), 1);

        let (status, body) = call(&app, "POST", "/signup", None, Some(signup)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["detail"]["code"], "duplicate_account");

        let token = login(&app, "ada@uni.edu", "secret1").await;
        let (status, me) = call(&app, "GET", "/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["role"], "student");

        let (status, _) = call(&app, "POST", "/logout", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, "GET", "/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_course_creation_and_enrollment_flow() {
        let (app, storage) = app();
        call(
            &app,
            "POST",
            "/signup",
            None,
            Some(json!({"email": "ada@uni.edu", "password": "secret1"})),
        )
        .await;
        let admin = login(&app, "admin@uni.edu", "admin123").await;
        let student = login(&app, "ada@uni.edu", "secret1").await;

        let course = json!({
            "code": "BIO101", "name": "Intro Biology", "department": "Biology",
            "level": 100, "credits": 3, "capacity": 1, "registeredStudentIds": [], "active": true
        });
        let (status, _) = call(&app, "POST", "/collections/courses/docs", Some(&student), Some(course.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) = call(&app, "POST", "/collections/courses/docs", Some(&admin), Some(course)).await;
        assert_eq!(status, StatusCode::OK);
        let course_id = body["results"][0].as_str().unwrap().to_string();

        let uri = format!("/courses/{course_id}/enrollment");
        let (status, _) = call(&app, "POST", &uri, Some(&student), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&app, "POST", &uri, Some(&student), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["detail"]["code"], "already_registered");

        let stored: Course = storage.get_doc(Collection::Courses, &course_id).unwrap().decode().unwrap();
        assert_eq!(stored.enrolled(), 1);

        let (status, _) = call(&app, "DELETE", &uri, Some(&student), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&app, "DELETE", &uri, Some(&student), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["detail"]["code"], "not_registered");

        let (status, _) = call(&app, "POST", "/courses/missing/enrollment", Some(&student), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_signup_is_closed_by_default() {
        let admin = json!({"email": "root@uni.edu", "password": "secret1", "profile": {"role": "admin"}});
        let (app, _) = app();
        let (status, body) = call(&app, "POST", "/signup", None, Some(admin.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["kind"], "forbidden");
        let (status, _) = call(&app, "POST", "/login", None, Some(json!({"email": "root@uni.edu", "password": "secret1"}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (open, _) = app_with(AuthSettings {
            allow_admin_signup: true,
            ..test_settings()
        });
        let (status, _) = call(&open, "POST", "/signup", None, Some(admin)).await;
        assert_eq!(status, StatusCode::OK);
        let token = login(&open, "root@uni.edu", "secret1").await;
        let (_, me) = call(&open, "GET", "/me", Some(&token), None).await;
        assert_eq!(me["role"], "admin");
    }

    #[tokio::test]
    async fn test_rosters_only_change_through_enrollment() {
        let (app, storage) = app();
        call(
            &app,
            "POST",
            "/signup",
            None,
            Some(json!({"email": "ada@uni.edu", "password": "secret1"})),
        )
        .await;
        let admin = login(&app, "admin@uni.edu", "admin123").await;
        let student = login(&app, "ada@uni.edu", "secret1").await;

        let stuffed = json!({
            "code": "BIO101", "name": "Intro Biology", "department": "Biology",
            "capacity": 1, "registeredStudentIds": ["x1", "x2", "x3"]
        });
        let (status, _) = call(&app, "POST", "/collections/courses/docs", Some(&admin), Some(stuffed)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(storage.list_docs(Collection::Courses).unwrap().is_empty());

        let course = json!({"code": "BIO101", "name": "Intro Biology", "department": "Biology", "capacity": 1});
        let (_, body) = call(&app, "POST", "/collections/courses/docs", Some(&admin), Some(course)).await;
        let course_id = body["results"][0].as_str().unwrap().to_string();
        let (status, _) = call(&app, "POST", &format!("/courses/{course_id}/enrollment"), Some(&student), None).await;
        assert_eq!(status, StatusCode::OK);

        let uri = format!("/collections/courses/docs/{course_id}");
        let rename = json!({"code": "BIO101", "name": "Biology I", "department": "Biology", "capacity": 1});
        let (status, _) = call(&app, "PUT", &uri, Some(&admin), Some(rename)).await;
        assert_eq!(status, StatusCode::OK);
        let stored: Course = storage.get_doc(Collection::Courses, &course_id).unwrap().decode().unwrap();
        assert_eq!(stored.name, "Biology I");
        assert_eq!(stored.enrolled(), 1);

        let wipe = json!({"code": "BIO101", "name": "Biology I", "department": "Biology", "registeredStudentIds": ["x1"]});
        let (status, _) = call(&app, "PUT", &uri, Some(&admin), Some(wipe)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let bad = json!({"code": "BAD", "name": "Bad", "department": "Biology", "level": "one hundred"});
        let (status, body) = call(&app, "POST", "/collections/courses/docs", Some(&admin), Some(bad)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["detail"]["code"], "invalid_document");
        assert_eq!(storage.list_docs(Collection::Courses).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_profile_patch_rules_and_reports() {
        let (app, _) = app();
        let (_, body) = call(
            &app,
            "POST",
            "/signup",
            None,
            Some(json!({"email": "ada@uni.edu", "password": "secret1"})),
        )
        .await;
        let account_id = body["results"][0].as_str().unwrap().to_string();
        let student = login(&app, "ada@uni.edu", "secret1").await;

        let uri = format!("/collections/users/docs/{account_id}");
        let patch = json!({"department": {"op": "set", "value": "Biology"}});
        let (status, _) = call(&app, "PATCH", &uri, Some(&student), Some(patch)).await;
        assert_eq!(status, StatusCode::OK);
        let (_, doc) = call(&app, "GET", &uri, Some(&student), None).await;
        assert_eq!(doc["fields"]["department"], "Biology");

        let promote = json!({"role": {"op": "set", "value": "admin"}});
        let (status, _) = call(&app, "PATCH", &uri, Some(&student), Some(promote)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let sql = json!({"sql": "SELECT COUNT(*) AS n FROM courses"});
        let (status, _) = call(&app, "POST", "/reports/sql", Some(&student), Some(sql.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let admin = login(&app, "admin@uni.edu", "admin123").await;
        let (status, table) = call(&app, "POST", "/reports/sql", Some(&admin), Some(sql)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(table["rows"][0][0], "0");

        let (status, _) = call(&app, "GET", "/collections/tenants/docs", Some(&admin), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
