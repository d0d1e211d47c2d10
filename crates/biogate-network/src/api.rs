//! REST surface.
//!
//! ```text
//! GET  /devices/{address}/attendance
//! GET  /devices/{address}/users
//! GET  /devices/{address}/info
//! POST /devices/{address}/test-voice
//! POST /devices/{address}/templates
//! GET  /devices/{address}/realtime      (websocket)
//! GET  /health                          (no API key)
//! GET  /ws                              (websocket, no API key)
//! ```
//!
//! Every `/devices` route requires the `X-API-Key` header. A request may
//! override the configured terminal password with `X-Device-Password`.

use axum::extract::{FromRequestParts, Path, Query, Request, State};
use axum::http::request::Parts;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use biogate_core::compat::is_compatible;
use biogate_core::constants::{API_KEY_HEADER, DEVICE_PASSWORD_HEADER, VOICE_THANK_YOU};
use biogate_core::{
    AttendanceRecord, DeviceAddress, DeviceCredential, DeviceInfo, User, UserTemplate,
};
use biogate_device::HealthSummary;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::{ApiError, Result};
use crate::state::AppState;
use crate::ws;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let devices = Router::new()
        .route("/{address}/attendance", get(attendance))
        .route("/{address}/users", get(users))
        .route("/{address}/info", get(info))
        .route("/{address}/test-voice", post(test_voice))
        .route("/{address}/templates", post(upload_templates))
        .route("/{address}/realtime", get(ws::realtime))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .nest("/devices", devices)
        .route("/health", get(health))
        .route("/ws", get(ws::subscribe))
        .with_state(state)
}

async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !state.api_key.verify(presented) {
        warn!(path = %request.uri().path(), "Rejected request with invalid API key");
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(request).await)
}

/// Terminal addressed by the `{address}` path segment, with the optional
/// per-request password.
#[derive(Debug, Clone)]
pub struct DeviceTarget {
    pub address: DeviceAddress,
    pub credential: Option<DeviceCredential>,
}

impl<S: Send + Sync> FromRequestParts<S> for DeviceTarget {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        let address: DeviceAddress = raw
            .parse()
            .map_err(|e: biogate_core::Error| ApiError::bad_request(e.to_string()))?;

        let credential = match parts.headers.get(DEVICE_PASSWORD_HEADER) {
            None => None,
            Some(value) => {
                let password = value.to_str().map_err(|_| {
                    ApiError::bad_request(format!("{DEVICE_PASSWORD_HEADER} must be ASCII"))
                })?;
                Some(DeviceCredential::new(password))
            }
        };

        Ok(Self {
            address,
            credential,
        })
    }
}

async fn attendance(
    State(state): State<AppState>,
    target: DeviceTarget,
) -> Result<Json<Vec<AttendanceRecord>>> {
    let records = state
        .service
        .get_attendance(&target.address, target.credential)
        .await
        .map_err(ApiError::device("Failed to fetch attendance"))?;
    debug!(device = %target.address, records = records.len(), "Attendance fetched");
    Ok(Json(records))
}

async fn users(State(state): State<AppState>, target: DeviceTarget) -> Result<Json<Vec<User>>> {
    let users = state
        .service
        .get_users(&target.address, target.credential)
        .await
        .map_err(ApiError::device("Failed to fetch users"))?;
    debug!(device = %target.address, users = users.len(), "Users fetched");
    Ok(Json(users))
}

/// Terminal identity plus whether the model/firmware pair is supported.
#[derive(Debug, Serialize)]
pub struct DeviceInfoResponse {
    #[serde(flatten)]
    pub info: DeviceInfo,
    pub compatible: bool,
}

async fn info(
    State(state): State<AppState>,
    target: DeviceTarget,
) -> Result<Json<DeviceInfoResponse>> {
    let info = state
        .service
        .get_device_info(&target.address, target.credential)
        .await
        .map_err(ApiError::device("Failed to fetch device info"))?;
    let compatible = is_compatible(&info);
    if !compatible {
        warn!(
            device = %target.address,
            platform = %info.platform,
            firmware = %info.firmware_version,
            "Terminal model or firmware is not in the compatibility list"
        );
    }
    Ok(Json(DeviceInfoResponse { info, compatible }))
}

#[derive(Debug, Deserialize)]
pub struct VoiceQuery {
    /// Prompt to play; defaults to "thank you"
    pub index: Option<u8>,
}

async fn test_voice(
    State(state): State<AppState>,
    target: DeviceTarget,
    Query(query): Query<VoiceQuery>,
) -> Result<Json<Value>> {
    let index = query.index.unwrap_or(VOICE_THANK_YOU);
    state
        .service
        .test_voice(&target.address, target.credential, index)
        .await
        .map_err(ApiError::device("Voice test failed"))?;
    Ok(Json(json!({ "message": "Voice test executed" })))
}

async fn upload_templates(
    State(state): State<AppState>,
    target: DeviceTarget,
    Json(templates): Json<Vec<UserTemplate>>,
) -> Result<Json<Value>> {
    if templates.is_empty() {
        return Err(ApiError::bad_request("at least one template is required"));
    }
    for template in &templates {
        template
            .validate()
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
    }

    let stored = state
        .service
        .upload_templates(&target.address, target.credential, templates)
        .await
        .map_err(ApiError::device("Failed to upload templates"))?;
    Ok(Json(json!({ "message": "Templates uploaded", "stored": stored })))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub service_status: &'static str,
    pub devices: HealthSummary,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        service_status: "running",
        devices: state.status.summary().await,
    })
}
