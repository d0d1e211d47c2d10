//! Integration tests for the REST surface, driven through the router
//! without binding a socket.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use biogate_core::ServiceConfig;
use biogate_device::mock::{SimulatedConnector, TerminalHandle};
use biogate_device::{DeviceService, DeviceStatusCache, StatusPoller};
use biogate_network::{AppState, BroadcastHub, router};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const KEY: &str = "test-key";
const HOST: &str = "10.0.0.7";

struct Harness {
    app: Router,
    state: AppState,
    connector: SimulatedConnector,
}

impl Harness {
    fn new(hosts: &[&str]) -> Self {
        let config = ServiceConfig::default()
            .api_key(KEY)
            .device_timeout(Duration::from_millis(50))
            .backoff_unit(Duration::from_millis(1))
            .reconnect_attempts(2);
        let connector = SimulatedConnector::new();
        for host in hosts {
            connector.add_terminal(host).seed_demo();
        }
        let service = DeviceService::new(Arc::new(connector.clone()), &config);
        let state = AppState::new(service, DeviceStatusCache::new(), BroadcastHub::new(), &config);
        Self {
            app: router(state.clone()),
            state,
            connector,
        }
    }

    fn terminal(&self, host: &str) -> TerminalHandle {
        self.connector.terminal(host).unwrap()
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(authed(Request::get(uri)).body(Body::empty()).unwrap())
            .await
    }
}

fn authed(builder: axum::http::request::Builder) -> axum::http::request::Builder {
    builder.header("x-api-key", KEY)
}

#[tokio::test]
async fn test_missing_api_key_is_rejected() {
    let harness = Harness::new(&[HOST]);
    let request = Request::get("/devices/10.0.0.7/users")
        .body(Body::empty())
        .unwrap();

    let (status, body) = harness.send(request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Invalid or missing API key");
    assert_eq!(harness.terminal(HOST).stats().connect_attempts, 0);
}

#[tokio::test]
async fn test_wrong_api_key_is_rejected() {
    let harness = Harness::new(&[HOST]);
    let request = Request::get("/devices/10.0.0.7/attendance")
        .header("x-api-key", "nope")
        .body(Body::empty())
        .unwrap();

    let (status, _) = harness.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_realtime_requires_api_key() {
    let harness = Harness::new(&[HOST]);
    let request = Request::get("/devices/10.0.0.7/realtime")
        .body(Body::empty())
        .unwrap();

    let (status, _) = harness.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_list_users() {
    let harness = Harness::new(&[HOST]);

    let (status, body) = harness.get("/devices/10.0.0.7/users").await;

    assert_eq!(status, StatusCode::OK);
    let users = body.as_array().unwrap();
    assert_eq!(users.len(), 3);
    assert_eq!(users[0]["privilege"], "Admin");
    assert_eq!(users[1]["privilege"], "User");
    assert!(harness.terminal(HOST).stats().enabled);
}

#[tokio::test]
async fn test_list_attendance() {
    let harness = Harness::new(&[HOST]);

    let (status, body) = harness.get("/devices/10.0.0.7/attendance").await;

    assert_eq!(status, StatusCode::OK);
    let records = body.as_array().unwrap();
    assert_eq!(records.len(), 4);
    assert_eq!(records[0]["user_id"], "1001");
    assert!(records[0]["timestamp"].as_str().unwrap().contains('T'));
}

#[tokio::test]
async fn test_device_info_reports_compatibility() {
    let harness = Harness::new(&[HOST]);

    let (status, body) = harness.get("/devices/10.0.0.7/info").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["platform"], "ZEM600_TFT");
    assert_eq!(body["compatible"], true);
    assert!(body["device_time"].is_string());
}

#[tokio::test]
async fn test_device_info_unknown_firmware() {
    let harness = Harness::new(&[HOST]);
    harness
        .terminal(HOST)
        .set_info(biogate_device::RawDeviceInfo {
            firmware_version: "Ver 8.0.1".to_string(),
            device_name: "Unknown".to_string(),
            serial_number: "X1".to_string(),
            mac_address: "00:00:00:00:00:00".to_string(),
            platform: "JZ4725_TFT".to_string(),
            device_time: chrono::NaiveDate::from_ymd_opt(2025, 3, 1)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
        });

    let (status, body) = harness.get("/devices/10.0.0.7/info").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["compatible"], false);
    assert_eq!(body["device_time"], "2025-03-01 08:00:00");
}

#[tokio::test]
async fn test_unreachable_device_is_service_unavailable() {
    let harness = Harness::new(&[HOST]);
    harness.terminal(HOST).set_reachable(false);

    let (status, body) = harness.get("/devices/10.0.0.7/users").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let detail = body["detail"].as_str().unwrap();
    assert!(detail.starts_with("Failed to fetch users: "), "{detail}");
    assert!(detail.contains("10.0.0.7"), "{detail}");
    assert!(harness.state.service.registry().is_empty());
}

#[tokio::test]
async fn test_invalid_address_is_bad_request() {
    let harness = Harness::new(&[HOST]);

    let (status, body) = harness.get("/devices/10.0.0.7:notaport/users").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn test_device_password_header_overrides_default() {
    let harness = Harness::new(&[HOST]);
    harness.terminal(HOST).set_password("4321");

    let (status, _) = harness.get("/devices/10.0.0.7/users").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let request = authed(Request::get("/devices/10.0.0.7/users"))
        .header("x-device-password", "4321")
        .body(Body::empty())
        .unwrap();
    let (status, body) = harness.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_voice_prompt() {
    let harness = Harness::new(&[HOST]);
    let request = authed(Request::post("/devices/10.0.0.7/test-voice"))
        .body(Body::empty())
        .unwrap();

    let (status, body) = harness.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Voice test executed");
    assert_eq!(harness.terminal(HOST).stats().voice_prompts, vec![0]);
}

#[tokio::test]
async fn test_voice_prompt_with_index() {
    let harness = Harness::new(&[HOST]);
    let request = authed(Request::post("/devices/10.0.0.7/test-voice?index=3"))
        .body(Body::empty())
        .unwrap();

    let (status, _) = harness.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(harness.terminal(HOST).stats().voice_prompts, vec![3]);
}

fn templates_request(body: Value) -> Request<Body> {
    authed(Request::post("/devices/10.0.0.7/templates"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_upload_templates() {
    let harness = Harness::new(&[HOST]);
    let body = json!([
        { "user_id": "1001", "finger_index": 0, "template": [1, 2, 3] },
        { "user_id": "1002", "finger_index": 6, "template": [9, 9] },
    ]);

    let (status, body) = harness.send(templates_request(body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stored"], 2);
    assert_eq!(harness.terminal(HOST).stats().templates.len(), 2);
}

#[tokio::test]
async fn test_invalid_template_is_rejected_before_connecting() {
    let harness = Harness::new(&[HOST]);
    let body = json!([{ "user_id": "1001", "finger_index": 12, "template": [1] }]);

    let (status, body) = harness.send(templates_request(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("finger_index"));
    assert_eq!(harness.terminal(HOST).stats().connect_attempts, 0);
}

#[tokio::test]
async fn test_empty_template_list_is_rejected() {
    let harness = Harness::new(&[HOST]);

    let (status, _) = harness.send(templates_request(json!([]))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_before_any_check() {
    let harness = Harness::new(&[HOST]);
    let request = Request::get("/health").body(Body::empty()).unwrap();

    let (status, body) = harness.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service_status"], "running");
    assert_eq!(body["devices"]["message"], "No devices have been checked yet");
}

#[tokio::test]
async fn test_health_after_poll_cycle() {
    let harness = Harness::new(&[HOST, "10.0.0.8"]);
    harness.terminal("10.0.0.8").set_reachable(false);
    let poller = StatusPoller::new(
        harness.state.service.clone(),
        harness.state.status.clone(),
        vec![HOST.parse().unwrap(), "10.0.0.8".parse().unwrap()],
        Duration::from_secs(60),
    );
    poller.run_cycle().await;

    let request = Request::get("/health").body(Body::empty()).unwrap();
    let (status, body) = harness.send(request).await;

    assert_eq!(status, StatusCode::OK);
    let devices = &body["devices"];
    assert_eq!(devices["total"], 2);
    assert_eq!(devices["online"], 1);
    assert_eq!(devices["offline"], 1);
    assert_eq!(devices["details"][HOST]["status"], "online");
    assert_eq!(devices["details"]["10.0.0.8"]["status"], "offline");
    assert!(devices["details"][HOST]["last_update_seconds"].is_number());
}
