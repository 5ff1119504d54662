use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use registry_client::InstanceRecord;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::{HelloService, ServiceError};

pub const JSON_CONTENT_TYPE: &str = "application/json;charset=utf-8";

/// JSON response carrying the `charset=utf-8` content type.
pub struct JsonBody<T>(pub T);

impl<T: Serialize> IntoResponse for JsonBody<T> {
    fn into_response(self) -> Response {
        match serde_json::to_vec(&self.0) {
            Ok(body) => (
                [(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))],
                body,
            )
                .into_response(),
            Err(e) => {
                tracing::error!("Failed to encode response: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SayHelloResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    #[serde(rename = "serviceName")]
    pub service_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    pub instances: Vec<InstanceRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::InvalidRequest(_) => {
                tracing::warn!("Request rejected: {}", self);
                StatusCode::BAD_REQUEST
            }
            _ => {
                tracing::error!("Request failed: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            JsonBody(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

pub async fn say_hello(State(service): State<HelloService>) -> JsonBody<SayHelloResponse> {
    JsonBody(SayHelloResponse {
        message: service.say_hello().to_string(),
    })
}

pub async fn health_check(State(service): State<HelloService>) -> JsonBody<HealthCheckResponse> {
    JsonBody(HealthCheckResponse {
        status: service.health_check(),
    })
}

pub async fn discovery(
    State(service): State<HelloService>,
    query: Result<Query<DiscoveryRequest>, QueryRejection>,
) -> Result<JsonBody<DiscoveryResponse>, ServiceError> {
    let Query(req) = query.map_err(|e| ServiceError::InvalidRequest(e.body_text()))?;
    let instances = service.discover_service(&req.service_name).await?;
    Ok(JsonBody(DiscoveryResponse { instances }))
}

pub fn make_router(service: HelloService) -> Router {
    Router::new()
        .route("/say-hello", get(say_hello))
        .route("/health", get(health_check))
        .route("/discovery", get(discovery))
        .with_state(service)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use registry_client::{InMemoryDiscoverClient, RegistryError};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(client: InMemoryDiscoverClient) -> Router {
        make_router(HelloService::new(Arc::new(client)))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, String, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        (status, content_type, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_say_hello() {
        let (status, content_type, body) = get_json(app(InMemoryDiscoverClient::new()), "/say-hello").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type, JSON_CONTENT_TYPE);
        assert_eq!(body, serde_json::json!({"message": "Hello I am a service"}));
    }

    #[tokio::test]
    async fn test_health_check() {
        let (status, content_type, body) = get_json(app(InMemoryDiscoverClient::new()), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type, JSON_CONTENT_TYPE);
        assert_eq!(body, serde_json::json!({"status": true}));
    }

    #[tokio::test]
    async fn test_discovery_lists_instances() {
        let client = InMemoryDiscoverClient::new()
            .with_instance(InstanceRecord::new("SayHello:1", "SayHello", "10.0.0.1", 10086));

        let (status, _, body) = get_json(app(client), "/discovery?serviceName=SayHello").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["instances"][0]["id"], "SayHello:1");
        assert_eq!(body["instances"][0]["port"], 10086);
    }

    #[tokio::test]
    async fn test_discovery_not_found_is_500() {
        let (status, content_type, body) = get_json(
            app(InMemoryDiscoverClient::new()),
            "/discovery?serviceName=Missing",
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(content_type, JSON_CONTENT_TYPE);
        assert_eq!(body, serde_json::json!({"error": "Service not existed"}));
    }

    #[tokio::test]
    async fn test_discovery_without_service_name_is_json_400() {
        let (status, content_type, body) =
            get_json(app(InMemoryDiscoverClient::new()), "/discovery").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(content_type, JSON_CONTENT_TYPE);
        let error = body["error"].as_str().unwrap();
        assert!(error.starts_with("Invalid request: "));
        assert!(error.contains("serviceName"));
    }

    #[tokio::test]
    async fn test_registry_error_body() {
        let response = ServiceError::from(RegistryError::UnexpectedStatus(503)).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.error, "registry responded with status 503");
    }
}
