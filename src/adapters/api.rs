//! Request router and management API.
//!
//! `/api/clients...` dispatches to the limiter CRUD handlers; every other
//! path falls through to the retrying proxy transport. The admission filter
//! and access logging wrap the whole router (admission only when the limiter
//! is enabled). Management errors are JSON `{code, message}` bodies with the
//! HTTP status mirrored in `code`.
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Request, State},
    http::StatusCode,
    middleware::from_fn,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    adapters::{
        middleware::{access_log_middleware, create_rate_limit_middleware},
        proxy::ProxyService,
    },
    core::limiter::{LimiterError, RateLimiter},
};

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            code: status.as_u16(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct CreateClientRequest {
    client_id: String,
    capacity: f64,
    rate_per_sec: f64,
}

#[derive(Debug, Deserialize)]
struct UpdateClientRequest {
    capacity: f64,
    rate_per_sec: f64,
}

#[derive(Debug, Serialize)]
struct ClientResponse {
    client_id: String,
    capacity: f64,
    rate_per_sec: f64,
}

/// Assemble the full request router.
pub fn build_router(
    proxy: Arc<ProxyService>,
    limiter: Option<Arc<RateLimiter>>,
    header_ip: &str,
) -> Router {
    let mut router = Router::new().fallback(proxy_request).with_state(proxy);

    if let Some(limiter) = &limiter {
        let management = Router::new()
            .route("/api/clients", post(create_client))
            .route(
                "/api/clients/{id}",
                get(get_client).put(update_client).delete(delete_client),
            )
            .with_state(Arc::clone(limiter));
        router = router.merge(management);
    }

    // Admission sits inside access logging, so denials are logged too.
    if let Some(limiter) = limiter {
        router = router.layer(from_fn(create_rate_limit_middleware(
            limiter,
            header_ip.to_string(),
        )));
    }
    router.layer(from_fn(access_log_middleware))
}

async fn proxy_request(State(proxy): State<Arc<ProxyService>>, req: Request) -> Response {
    tracing::debug!(method = %req.method(), path = %req.uri().path(), "proxy request");

    match proxy.forward(req).await {
        Ok(response) => response.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "proxy dispatch failed");
            (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
        }
    }
}

async fn create_client(
    State(limiter): State<Arc<RateLimiter>>,
    payload: Result<Json<CreateClientRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(body)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid request");
    };

    if limiter.get_client(&body.client_id).is_some() {
        return error_response(StatusCode::CONFLICT, "Client already exists");
    }

    match limiter.set_client_limit(&body.client_id, body.capacity, body.rate_per_sec) {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(e) => {
            tracing::error!(client_id = %body.client_id, error = %e, "failed to create client");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to persist client")
        }
    }
}

async fn get_client(State(limiter): State<Arc<RateLimiter>>, Path(id): Path<String>) -> Response {
    match limiter.get_client(&id) {
        Some((capacity, rate)) => Json(ClientResponse {
            client_id: id,
            capacity,
            rate_per_sec: rate,
        })
        .into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Client not found"),
    }
}

async fn update_client(
    State(limiter): State<Arc<RateLimiter>>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateClientRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(body)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid request");
    };

    match limiter.update_client_limit(&id, body.capacity, body.rate_per_sec) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(LimiterError::NotFound) => error_response(StatusCode::NOT_FOUND, "Client not found"),
        Err(LimiterError::Storage(e)) => {
            tracing::error!(client_id = %id, error = %e, "failed to update client");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to persist client")
        }
    }
}

async fn delete_client(
    State(limiter): State<Arc<RateLimiter>>,
    Path(id): Path<String>,
) -> Response {
    if limiter.get_client(&id).is_none() {
        return error_response(StatusCode::NOT_FOUND, "Client not found");
    }

    match limiter.remove_client(&id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            tracing::error!(client_id = %id, error = %e, "failed to delete client");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete client")
        }
    }
}
