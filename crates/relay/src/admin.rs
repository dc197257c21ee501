//! HTTP admin surface for the route planner.
//!
//! | Method | Path                         | Response                   |
//! |--------|------------------------------|----------------------------|
//! | GET    | `/routeplanner/status`       | 200 with planner status    |
//! | POST   | `/routeplanner/free/address` | 204, 400 on a bad address  |
//! | POST   | `/routeplanner/free/all`     | 204                        |

use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tracing::info;

use crate::route_planner::{RoutePlanner, RoutePlannerStatus};

#[derive(Debug, Deserialize)]
pub struct FreeAddressRequest {
    pub address: String,
}

#[derive(Debug)]
pub struct AdminError {
    status: StatusCode,
    message: String,
}

impl AdminError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({
                "status": self.status.as_u16(),
                "error": self.status.canonical_reason().unwrap_or_default(),
                "message": self.message,
            })),
        )
            .into_response()
    }
}

/// Router exposing `planner` under `/routeplanner`.
pub fn router(planner: Arc<RoutePlanner>) -> Router {
    Router::new()
        .route("/routeplanner/status", get(status))
        .route("/routeplanner/free/address", post(free_address))
        .route("/routeplanner/free/all", post(free_all))
        .with_state(planner)
}

async fn status(State(planner): State<Arc<RoutePlanner>>) -> Json<RoutePlannerStatus> {
    Json(planner.status())
}

async fn free_address(
    State(planner): State<Arc<RoutePlanner>>,
    Json(request): Json<FreeAddressRequest>,
) -> Result<StatusCode, AdminError> {
    let address: IpAddr = request
        .address
        .trim()
        .parse()
        .map_err(|_| AdminError::bad_request(format!("Invalid address: {}", request.address)))?;
    let was_banned = planner.free_ip(&address);
    info!(%address, was_banned, "Address freed via admin API");
    Ok(StatusCode::NO_CONTENT)
}

async fn free_all(State(planner): State<Arc<RoutePlanner>>) -> StatusCode {
    planner.free_all();
    info!("All addresses freed via admin API");
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route_planner::{ManualClock, RoutePlannerConfig, RoutePlannerStrategy};
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, header};
    use serde_json::Value;
    use tower::ServiceExt;

    const T0: i64 = 1_700_000_000_000;

    fn planner() -> Arc<RoutePlanner> {
        let config = RoutePlannerConfig::new(vec!["10.0.0.0/30".parse().unwrap()])
            .with_strategy(RoutePlannerStrategy::RotateOnBan);
        Arc::new(RoutePlanner::with_clock(config, Arc::new(ManualClock::new(T0))).unwrap())
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_status_shape() {
        let planner = planner();
        planner.ban_ip("10.0.0.1".parse().unwrap());

        let response = router(planner)
            .oneshot(Request::get("/routeplanner/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["class"], "RotatingIpRoutePlanner");
        assert_eq!(json["details"]["ipBlock"]["type"], "Inet4Address");
        assert_eq!(json["details"]["ipBlock"]["size"], "4");
        let failing = &json["details"]["failingAddresses"][0];
        assert_eq!(failing["failingAddress"], "10.0.0.1");
        assert_eq!(failing["failingTimestamp"], T0);
        assert_eq!(failing["failingTime"], "Tue Nov 14 22:13:20 UTC 2023");
    }

    #[tokio::test]
    async fn test_free_address() {
        let planner = planner();
        let address: IpAddr = "10.0.0.2".parse().unwrap();
        planner.ban_ip(address);

        let response = router(planner.clone())
            .oneshot(post_json(
                "/routeplanner/free/address",
                r#"{"address":"10.0.0.2"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(!planner.is_banned(&address));
    }

    #[tokio::test]
    async fn test_free_address_rejects_garbage() {
        let response = router(planner())
            .oneshot(post_json(
                "/routeplanner/free/address",
                r#"{"address":"not-an-ip"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_free_all() {
        let planner = planner();
        planner.ban_ip("10.0.0.1".parse().unwrap());
        planner.ban_ip("10.0.0.3".parse().unwrap());

        let response = router(planner.clone())
            .oneshot(post_json("/routeplanner/free/all", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(planner.status().details.failing_addresses.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_route_and_wrong_method() {
        let app = router(planner());
        let missing = app
            .clone()
            .oneshot(Request::get("/routeplanner/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let wrong = app
            .oneshot(Request::get("/routeplanner/free/all").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
