//! HTTP API.
//!
//! JSON endpoints for remote unlock, enrollment, the gallery list, and
//! status, plus the MJPEG live view. Unlock and enrollment require
//! administrator credentials; the credential check happens before any
//! hardware-facing call.

use crate::door::{DoorError, DoorStatus, TriggerSource};
use crate::engine::EngineError;
use crate::recognition::LastMatch;
use crate::state::AppState;
use crate::stream;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/status", get(status))
        .route("/api/stream", get(video_stream))
        .route("/api/unlock", post(unlock))
        .route("/api/faces", get(list_faces))
        .route("/api/faces", post(enroll_face))
        .route("/api/faces/:id", delete(remove_face))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Deserialize)]
struct AdminCreds {
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct EnrollRequest {
    username: String,
    password: String,
    name: String,
}

#[derive(Serialize)]
struct ApiMessage {
    status: &'static str,
    message: String,
}

impl ApiMessage {
    fn success(message: impl Into<String>) -> Json<Self> {
        Json(Self { status: "success", message: message.into() })
    }

    fn error(message: impl Into<String>) -> Json<Self> {
        Json(Self { status: "error", message: message.into() })
    }
}

#[derive(Serialize)]
struct FaceSummary {
    id: i64,
    name: String,
    created_at: String,
}

#[derive(Serialize)]
struct EnrollResponse {
    status: &'static str,
    id: i64,
    name: String,
}

#[derive(Serialize)]
struct CameraHealth {
    healthy: bool,
    consecutive_failures: u32,
}

#[derive(Serialize)]
struct StatusResponse {
    door: DoorStatus,
    last_match: Option<LastMatch>,
    enrolled: usize,
    camera: CameraHealth,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let failures = state.frames.consecutive_failures();
    Json(StatusResponse {
        door: state.door.status(),
        last_match: state.last_match.borrow().clone(),
        enrolled: state.gallery.snapshot().len(),
        camera: CameraHealth {
            healthy: failures == 0 && state.frames.latest().is_some(),
            consecutive_failures: failures,
        },
    })
}

async fn video_stream(State(state): State<AppState>) -> Response {
    let session = stream::mjpeg_stream(
        state.frames.clone(),
        stream::StreamConfig {
            frame_interval: state.config.stream_interval,
            jpeg_quality: state.config.jpeg_quality,
        },
    );
    let mut response = Body::from_stream(session).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(stream::content_type()));
    response
}

async fn unlock(State(state): State<AppState>, Json(creds): Json<AdminCreds>) -> Response {
    if let Err(denied) = authorize(&state, &creds.username, &creds.password).await {
        return denied;
    }

    tracing::info!(admin = %creds.username, "remote unlock requested");
    match state.door.open(TriggerSource::RemoteCommand).await {
        Ok(()) => (StatusCode::OK, ApiMessage::success("door opened")).into_response(),
        Err(e @ DoorError::AlreadyInProgress(_)) => {
            (StatusCode::CONFLICT, ApiMessage::error(e.to_string())).into_response()
        }
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            ApiMessage::error(format!("door actuation failed: {e}")),
        )
            .into_response(),
    }
}

async fn list_faces(State(state): State<AppState>) -> Json<Vec<FaceSummary>> {
    let faces = state
        .gallery
        .snapshot()
        .iter()
        .map(|f| FaceSummary {
            id: f.id,
            name: f.name.clone(),
            created_at: f.created_at.clone(),
        })
        .collect();
    Json(faces)
}

async fn enroll_face(State(state): State<AppState>, Json(req): Json<EnrollRequest>) -> Response {
    if let Err(denied) = authorize(&state, &req.username, &req.password).await {
        return denied;
    }

    let name = req.name.trim();
    if name.is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            ApiMessage::error("name must not be empty"),
        )
            .into_response();
    }

    tracing::info!(name, "enrollment requested");
    let embedding = match state.engine.enroll(state.config.enroll_attempts).await {
        Ok(embedding) => embedding,
        Err(EngineError::NoFaceDetected) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiMessage::error("no face detected; face the camera and retry"),
            )
                .into_response();
        }
        Err(e) => {
            tracing::error!(error = %e, "enrollment capture failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiMessage::error("enrollment failed"),
            )
                .into_response();
        }
    };

    let id = match state.store.gallery().append(name, &embedding).await {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(error = %e, "enrollment write failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiMessage::error("enrollment failed"),
            )
                .into_response();
        }
    };

    refresh_gallery(&state).await;
    (
        StatusCode::CREATED,
        Json(EnrollResponse { status: "success", id, name: name.to_string() }),
    )
        .into_response()
}

async fn remove_face(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(creds): Json<AdminCreds>,
) -> Response {
    if let Err(denied) = authorize(&state, &creds.username, &creds.password).await {
        return denied;
    }

    match state.store.gallery().remove(id).await {
        Ok(true) => {
            refresh_gallery(&state).await;
            (StatusCode::OK, ApiMessage::success("face removed")).into_response()
        }
        Ok(false) => {
            (StatusCode::NOT_FOUND, ApiMessage::error("no such face")).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, id, "face removal failed");
            (StatusCode::INTERNAL_SERVER_ERROR, ApiMessage::error("removal failed"))
                .into_response()
        }
    }
}

/// Credential gate for privileged endpoints. Never logs the password.
async fn authorize(state: &AppState, username: &str, password: &str) -> Result<(), Response> {
    match state.store.admins().verify(username, password).await {
        Ok(true) => Ok(()),
        Ok(false) => {
            tracing::warn!(username, "authorization rejected");
            Err((StatusCode::UNAUTHORIZED, ApiMessage::error("invalid credentials"))
                .into_response())
        }
        Err(e) => {
            tracing::error!(error = %e, "credential check failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiMessage::error("credential check failed"),
            )
                .into_response())
        }
    }
}

/// Refresh the matcher's gallery snapshot after an enrollment write.
/// The write already succeeded; a refresh failure only delays visibility.
async fn refresh_gallery(state: &AppState) {
    if let Err(e) = state.gallery.refresh().await {
        tracing::error!(error = %e, "gallery snapshot refresh failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::door::testing::FakeLock;
    use crate::door::DoorController;
    use crate::engine::spawn_test_engine;
    use crate::recognition::LastMatch;
    use axum::http::Request;
    use janus_core::{Embedding, ExtractOutcome};
    use janus_hw::{CameraError, CaptureBackend, Frame, FrameSource, SourceConfig};
    use janus_store::{EmbeddingSealer, Store};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::watch;
    use tower::ServiceExt;

    struct DarkBackend;

    impl CaptureBackend for DarkBackend {
        fn capture(&mut self) -> Result<Frame, CameraError> {
            Err(CameraError::CaptureFailed("no camera in tests".into()))
        }
    }

    struct TestContext {
        state: AppState,
        lock: Arc<FakeLock>,
        _source: FrameSource,
    }

    async fn context(enroll_succeeds: bool) -> TestContext {
        let store = Store::open_in_memory(Arc::new(EmbeddingSealer::new(&[5u8; 32])))
            .await
            .unwrap();
        store.admins().upsert("admin", "hunter2").await.unwrap();
        let gallery = janus_store::GalleryCache::load(store.gallery().clone())
            .await
            .unwrap();

        let source = FrameSource::spawn(DarkBackend, SourceConfig::default());
        let engine = spawn_test_engine(
            |_frame| Ok(ExtractOutcome::NoFace),
            move |_attempts| {
                if enroll_succeeds {
                    Ok(Embedding { values: vec![1.0, 0.0] })
                } else {
                    Err(EngineError::NoFaceDetected)
                }
            },
        );

        let lock = FakeLock::new();
        let (door, _door_status) =
            DoorController::new(lock.clone(), Duration::from_millis(50));
        let (_match_tx, last_match) = watch::channel::<Option<LastMatch>>(None);

        let mut config = test_config();
        config.enroll_attempts = 1;

        let state = AppState {
            config: Arc::new(config),
            store,
            gallery,
            engine,
            door,
            frames: source.handle(),
            last_match,
        };
        TestContext { state, lock, _source: source }
    }

    fn test_config() -> Config {
        Config::from_env()
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_healthz() {
        let ctx = context(true).await;
        let response = router(ctx.state)
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unlock_rejects_bad_credentials() {
        let ctx = context(true).await;
        let response = router(ctx.state)
            .oneshot(json_request(
                "POST",
                "/api/unlock",
                json!({"username": "admin", "password": "wrong"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ctx.lock.actuations(), 0, "hardware untouched on auth failure");
        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_unlock_opens_door() {
        let ctx = context(true).await;
        let response = router(ctx.state)
            .oneshot(json_request(
                "POST",
                "/api/unlock",
                json!({"username": "admin", "password": "hunter2"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(ctx.lock.actuations(), 1);
    }

    #[tokio::test]
    async fn test_unlock_while_open_conflicts() {
        let ctx = context(true).await;
        ctx.state.door.open(TriggerSource::Recognition).await.unwrap();

        let response = router(ctx.state)
            .oneshot(json_request(
                "POST",
                "/api/unlock",
                json!({"username": "admin", "password": "hunter2"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(ctx.lock.actuations(), 1, "second actuation rejected");
    }

    #[tokio::test]
    async fn test_enroll_then_listed() {
        let ctx = context(true).await;
        let app = router(ctx.state.clone());

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/faces",
                json!({"username": "admin", "password": "hunter2", "name": "alice"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["name"], "alice");

        let response = app
            .oneshot(Request::get("/api/faces").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["name"], "alice");
        assert!(body[0].get("embedding").is_none(), "embeddings never leave the store");
    }

    #[tokio::test]
    async fn test_enroll_no_face_is_unprocessable() {
        let ctx = context(false).await;
        let response = router(ctx.state)
            .oneshot(json_request(
                "POST",
                "/api/faces",
                json!({"username": "admin", "password": "hunter2", "name": "alice"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_remove_unknown_face() {
        let ctx = context(true).await;
        let response = router(ctx.state)
            .oneshot(json_request(
                "DELETE",
                "/api/faces/42",
                json!({"username": "admin", "password": "hunter2"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_shape() {
        let ctx = context(true).await;
        let response = router(ctx.state)
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["door"]["state"], "idle");
        assert_eq!(body["enrolled"], 0);
        assert!(body["last_match"].is_null());
        assert!(body["camera"]["healthy"].is_boolean());
    }
}
