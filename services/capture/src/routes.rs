//! Capture service routes

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    models::{
        receipt::{UploadReceiptRequest, UploadReceiptResponse},
        session::{CreateSessionResponse, SessionStatus, SessionUploadResponse},
    },
    session::SessionError,
    state::AppState,
};

/// Multipart field carrying the receipt image
const FILE_FIELD: &str = "file";

/// Create the router for the capture service
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes;

    Router::new()
        .route("/health", get(health_check))
        .route("/mobile/sessions", post(create_session))
        .route("/mobile/sessions/:session_id", get(get_session))
        .route("/mobile/sessions/:session_id/upload", post(upload_to_session))
        .route("/receipts/upload", post(upload_receipt))
        .route("/receipts/:id", get(get_receipt))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match &state.db_pool {
        Some(pool) => backend_status(common::database::health_check(pool).await),
        None => "disabled",
    };
    let redis = match &state.redis_pool {
        Some(pool) => backend_status(pool.health_check().await),
        None => "disabled",
    };

    Json(json!({
        "status": "ok",
        "service": "capture-service",
        "database": database,
        "redis": redis,
    }))
}

fn backend_status(healthy: bool) -> &'static str {
    if healthy { "ok" } else { "unavailable" }
}

/// Open a new capture session for a mobile device
pub async fn create_session(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let session = state.sessions.create_session().await?;
    Ok(Json(CreateSessionResponse::from(&session)))
}

/// Get a capture session by ID
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let session_id = parse_session_id(&session_id)?;
    let session = state.sessions.get_session(session_id).await?;
    Ok(Json(session))
}

/// Upload a receipt image through a capture session
///
/// The session is consumed before the image is stored. If storing or
/// ingesting fails the session is released so the device can retry.
pub async fn upload_to_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let session_id = parse_session_id(&session_id)?;
    let session = state.sessions.get_session(session_id).await?;

    match (session.status, session.receipt_id) {
        (SessionStatus::Consumed, Some(receipt_id)) => {
            info!(session_id = %session_id, receipt_id = %receipt_id, "Replayed session upload");
            return Ok(Json(SessionUploadResponse {
                success: true,
                receipt_id,
            }));
        }
        (SessionStatus::Expired, _) => return Err(ApiError::Gone("Session expired".to_string())),
        (SessionStatus::Consumed, None) | (SessionStatus::Active, _) => {}
    }

    let image = read_image(multipart).await?;

    state
        .sessions
        .consume_session(session_id)
        .await
        .map_err(|e| match e {
            SessionError::AlreadyConsumed(_) => {
                ApiError::Conflict("Upload already in progress for this session".to_string())
            }
            other => other.into(),
        })?;

    let receipt_id = match store_and_ingest(&state, image).await {
        Ok(receipt_id) => receipt_id,
        Err(e) => {
            if let Err(release_err) = state.sessions.release_session(session_id).await {
                error!(session_id = %session_id, error = %release_err, "Failed to release session");
            }
            return Err(e);
        }
    };

    if let Err(e) = state.sessions.bind_receipt(session_id, receipt_id).await {
        warn!(
            session_id = %session_id,
            receipt_id = %receipt_id,
            error = %e,
            "Receipt created but not bound to its session"
        );
    }

    Ok(Json(SessionUploadResponse {
        success: true,
        receipt_id,
    }))
}

/// Register an image that was already uploaded by the client
pub async fn upload_receipt(
    State(state): State<AppState>,
    Json(payload): Json<UploadReceiptRequest>,
) -> ApiResult<impl IntoResponse> {
    let image_url = payload
        .image_url
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Image URL is required".to_string()))?;

    let ingestion = state.ingestion.ingest(&image_url).await?;
    let timings = ingestion.timings;

    match &payload.client_timings {
        Some(client_timings) => info!(
            receipt_id = %ingestion.receipt_id,
            started_at_ms = timings.started_at.timestamp_millis(),
            db_insert_ms = timings.persist_elapsed.as_millis() as u64,
            total_ms = timings.dispatch_elapsed.as_millis() as u64,
            client_timings = %client_timings,
            "Receipt upload timings"
        ),
        None => info!(
            receipt_id = %ingestion.receipt_id,
            started_at_ms = timings.started_at.timestamp_millis(),
            db_insert_ms = timings.persist_elapsed.as_millis() as u64,
            total_ms = timings.dispatch_elapsed.as_millis() as u64,
            "Receipt upload timings"
        ),
    }

    Ok(Json(UploadReceiptResponse {
        receipt_id: ingestion.receipt_id,
    }))
}

/// Get a receipt by ID
pub async fn get_receipt(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = Uuid::parse_str(&id).map_err(|_| ApiError::NotFound("Receipt not found".to_string()))?;
    let receipt = state
        .receipts
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Receipt not found".to_string()))?;

    Ok(Json(receipt))
}

/// An image read from a multipart upload
struct ImageUpload {
    file_name: String,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

async fn read_image(mut multipart: Multipart) -> ApiResult<ImageUpload> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or("receipt").to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?;

        if bytes.is_empty() {
            break;
        }

        return Ok(ImageUpload {
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    Err(ApiError::BadRequest(
        "No receipt image file was provided".to_string(),
    ))
}

async fn store_and_ingest(state: &AppState, image: ImageUpload) -> ApiResult<Uuid> {
    let image_url = state
        .storage
        .store(&image.file_name, image.content_type.as_deref(), image.bytes)
        .await?;

    Ok(state
        .ingestion
        .create_receipt_and_trigger_extraction(&image_url)
        .await?)
}

/// Unparseable ids cannot name a session, so they are reported as missing
fn parse_session_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound("Session not found or expired".to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        config::SessionConfig,
        ingestion::IngestionCoordinator,
        repositories::{MemorySessionStore, ReceiptStore},
        session::SessionManager,
        testing::{InMemoryImageStorage, InMemoryReceiptStore, RecordingTrigger},
    };

    const BOUNDARY: &str = "receipt-capture-boundary";

    struct Harness {
        state: AppState,
        receipts: Arc<InMemoryReceiptStore>,
        trigger: Arc<RecordingTrigger>,
        storage: Arc<InMemoryImageStorage>,
    }

    fn harness_with(
        receipts: InMemoryReceiptStore,
        storage: InMemoryImageStorage,
        session: SessionConfig,
    ) -> Harness {
        let receipts = Arc::new(receipts);
        let trigger = Arc::new(RecordingTrigger::new());
        let storage = Arc::new(storage);

        let state = AppState {
            sessions: SessionManager::new(Arc::new(MemorySessionStore::new()), session),
            ingestion: IngestionCoordinator::new(receipts.clone(), trigger.clone()),
            receipts: receipts.clone(),
            storage: storage.clone(),
            db_pool: None,
            redis_pool: None,
            max_upload_bytes: 1024 * 1024,
        };

        Harness {
            state,
            receipts,
            trigger,
            storage,
        }
    }

    fn harness() -> Harness {
        harness_with(
            InMemoryReceiptStore::new(),
            InMemoryImageStorage::new(),
            SessionConfig::default(),
        )
    }

    fn multipart_request(uri: &str, field: &str, file_name: &str, bytes: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: image/jpeg\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn json_request(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn open_session(state: &AppState) -> String {
        let (status, body) = send(state, empty_request("POST", "/mobile/sessions")).await;
        assert_eq!(status, StatusCode::OK);
        body["sessionId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_reports_disabled_backends() {
        let h = harness();

        let (status, body) = send(&h.state, empty_request("GET", "/health")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["database"], "disabled");
        assert_eq!(body["redis"], "disabled");
    }

    #[tokio::test]
    async fn test_create_session_response_shape() {
        let h = harness();

        let (status, body) = send(&h.state, empty_request("POST", "/mobile/sessions")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "active");
        assert_eq!(body["expiresInSeconds"], 900);
        assert!(Uuid::parse_str(body["sessionId"].as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_get_session_round_trips_and_unknown_is_404() {
        let h = harness();
        let session_id = open_session(&h.state).await;

        let (status, body) = send(
            &h.state,
            empty_request("GET", &format!("/mobile/sessions/{session_id}")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sessionId"], session_id.as_str());
        assert_eq!(body["status"], "active");

        let (status, body) = send(
            &h.state,
            empty_request("GET", &format!("/mobile/sessions/{}", Uuid::new_v4())),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Session not found or expired");

        let (status, _) = send(&h.state, empty_request("GET", "/mobile/sessions/not-a-uuid")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_session_upload_creates_pending_receipt_and_dispatches() {
        let h = harness();
        let session_id = open_session(&h.state).await;

        let (status, body) = send(
            &h.state,
            multipart_request(
                &format!("/mobile/sessions/{session_id}/upload"),
                "file",
                "lunch.jpg",
                b"jpeg-bytes",
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let receipt_id = Uuid::parse_str(body["receiptId"].as_str().unwrap()).unwrap();

        let rows = h.receipts.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, receipt_id);
        assert_eq!(rows[0].image_path, "https://store/lunch.jpg");
        assert_eq!(h.storage.stored(), vec![("lunch.jpg".to_string(), 10)]);

        let dispatched = h.trigger.dispatched();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].receipt_id, receipt_id);

        let (_, session) = send(
            &h.state,
            empty_request("GET", &format!("/mobile/sessions/{session_id}")),
        )
        .await;
        assert_eq!(session["status"], "consumed");
        assert_eq!(session["receiptId"], receipt_id.to_string());
    }

    #[tokio::test]
    async fn test_session_upload_replay_returns_existing_receipt() {
        let h = harness();
        let session_id = open_session(&h.state).await;
        let uri = format!("/mobile/sessions/{session_id}/upload");

        let (_, first) = send(&h.state, multipart_request(&uri, "file", "a.jpg", b"one")).await;
        let (status, second) = send(&h.state, multipart_request(&uri, "file", "a.jpg", b"one")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["receiptId"], first["receiptId"]);
        assert_eq!(h.receipts.rows().len(), 1);
        assert_eq!(h.trigger.dispatched().len(), 1);
    }

    #[tokio::test]
    async fn test_session_upload_without_file_is_400_and_keeps_session_active() {
        let h = harness();
        let session_id = open_session(&h.state).await;

        let (status, body) = send(
            &h.state,
            multipart_request(
                &format!("/mobile/sessions/{session_id}/upload"),
                "attachment",
                "a.jpg",
                b"bytes",
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No receipt image file was provided");

        let (_, session) = send(
            &h.state,
            empty_request("GET", &format!("/mobile/sessions/{session_id}")),
        )
        .await;
        assert_eq!(session["status"], "active");
    }

    #[tokio::test]
    async fn test_session_upload_to_unknown_session_is_404() {
        let h = harness();

        let (status, _) = send(
            &h.state,
            multipart_request(
                &format!("/mobile/sessions/{}/upload", Uuid::new_v4()),
                "file",
                "a.jpg",
                b"bytes",
            ),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_session_upload_to_expired_session_is_410() {
        let h = harness_with(
            InMemoryReceiptStore::new(),
            InMemoryImageStorage::new(),
            SessionConfig::expiring_after(0),
        );
        let session_id = open_session(&h.state).await;

        let (status, body) = send(
            &h.state,
            multipart_request(
                &format!("/mobile/sessions/{session_id}/upload"),
                "file",
                "a.jpg",
                b"bytes",
            ),
        )
        .await;

        assert_eq!(status, StatusCode::GONE);
        assert_eq!(body["error"], "Session expired");
        assert!(h.receipts.rows().is_empty());
    }

    #[tokio::test]
    async fn test_session_upload_in_progress_is_409() {
        let h = harness();
        let session_id = open_session(&h.state).await;
        h.state
            .sessions
            .consume_session(Uuid::parse_str(&session_id).unwrap())
            .await
            .unwrap();

        let (status, body) = send(
            &h.state,
            multipart_request(
                &format!("/mobile/sessions/{session_id}/upload"),
                "file",
                "a.jpg",
                b"bytes",
            ),
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Upload already in progress for this session");
        assert!(h.receipts.rows().is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_is_500_and_releases_session() {
        let h = harness_with(
            InMemoryReceiptStore::new(),
            InMemoryImageStorage::failing(),
            SessionConfig::default(),
        );
        let session_id = open_session(&h.state).await;

        let (status, _) = send(
            &h.state,
            multipart_request(
                &format!("/mobile/sessions/{session_id}/upload"),
                "file",
                "a.jpg",
                b"bytes",
            ),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(h.trigger.dispatched().is_empty());

        let (_, session) = send(
            &h.state,
            empty_request("GET", &format!("/mobile/sessions/{session_id}")),
        )
        .await;
        assert_eq!(session["status"], "active");
    }

    #[tokio::test]
    async fn test_persistence_failure_is_500_without_dispatch() {
        let h = harness_with(
            InMemoryReceiptStore::failing(),
            InMemoryImageStorage::new(),
            SessionConfig::default(),
        );
        let session_id = open_session(&h.state).await;

        let (status, body) = send(
            &h.state,
            multipart_request(
                &format!("/mobile/sessions/{session_id}/upload"),
                "file",
                "a.jpg",
                b"bytes",
            ),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Database error");
        assert!(h.trigger.dispatched().is_empty());
    }

    #[tokio::test]
    async fn test_receipt_upload_by_url() {
        let h = harness();

        let (status, body) = send(
            &h.state,
            json_request(
                "/receipts/upload",
                json!({
                    "image_url": "https://cdn.example/r.jpg",
                    "client_timings": {"upload_ms": 120}
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let receipt_id = body["receipt_id"].as_str().unwrap().to_string();

        let (status, receipt) =
            send(&h.state, empty_request("GET", &format!("/receipts/{receipt_id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(receipt["status"], "pending");
        assert_eq!(receipt["source"], "upload");
        assert_eq!(receipt["image_path"], "https://cdn.example/r.jpg");
    }

    #[tokio::test]
    async fn test_receipt_upload_without_url_is_400() {
        let h = harness();

        let (status, body) = send(&h.state, json_request("/receipts/upload", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Image URL is required");

        let (status, _) = send(
            &h.state,
            json_request("/receipts/upload", json!({"image_url": "   "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(h.receipts.rows().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_receipt_is_404() {
        let h = harness();

        let (status, body) = send(
            &h.state,
            empty_request("GET", &format!("/receipts/{}", Uuid::new_v4())),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Receipt not found");
        assert!(h.receipts.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_receipt_id_is_json_404() {
        let h = harness();

        let (status, body) = send(&h.state, empty_request("GET", "/receipts/not-a-uuid")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Receipt not found");
    }

    #[tokio::test]
    async fn test_upload_after_released_claim_succeeds() {
        let h = harness();
        let session_id = open_session(&h.state).await;
        let id = Uuid::parse_str(&session_id).unwrap();
        h.state.sessions.consume_session(id).await.unwrap();
        h.state.sessions.release_session(id).await.unwrap();

        let (status, body) = send(
            &h.state,
            multipart_request(
                &format!("/mobile/sessions/{session_id}/upload"),
                "file",
                "a.jpg",
                b"bytes",
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(h.receipts.rows().len(), 1);
    }
}
