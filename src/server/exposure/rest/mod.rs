//! REST API exposure for mounted resources
//!
//! The REST exposure consumes a `ServerHost` and produces an Axum `Router`.
//! Handlers only decode the HTTP request into a [`ResourceRequest`]; every
//! operation semantic lives in the resource pipeline.

use super::super::host::ServerHost;
use crate::core::error::ResourceError;
use crate::operation::{Resource, ResourceRequest, ResourceResponse};
use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

type Params = Query<HashMap<String, String>>;

/// REST API exposure implementation
pub struct RestExposure;

impl RestExposure {
    /// Build the REST router from a host
    ///
    /// Returns a router with:
    /// - Health check routes
    /// - Resource routes for every mount
    /// - Custom routes
    pub fn build_router(host: Arc<ServerHost>, custom_routes: Vec<Router>) -> Result<Router> {
        let mut app = Self::health_routes().merge(host.resources.build_routes());

        for custom_router in custom_routes {
            app = app.merge(custom_router);
        }

        Ok(app.layer(TraceLayer::new_for_http()))
    }

    /// Build health check routes
    fn health_routes() -> Router {
        Router::new()
            .route("/health", get(Self::health_check))
            .route("/healthz", get(Self::health_check))
    }

    /// Health check endpoint handler
    async fn health_check() -> Json<Value> {
        Json(json!({
            "status": "ok",
            "service": "restshape"
        }))
    }
}

/// Routes of one mounted resource
///
/// - GET /{path} - list
/// - POST /{path} - create
/// - POST /{path}/search - search
/// - GET /{path}/{id} - single
/// - PUT /{path}/{id} - update
/// - PATCH /{path}/{id} - patch
/// - DELETE /{path}/{id} - destroy
pub fn resource_routes(path: &str, resource: Arc<Resource>) -> Router {
    Router::new()
        .route(&format!("/{path}"), get(list).post(create))
        .route(&format!("/{path}/search"), post(search))
        .route(
            &format!("/{path}/{{id}}"),
            get(single).put(update).patch(patch).delete(destroy),
        )
        .with_state(resource)
}

/// Decode a JSON request body; an empty body is null
fn decode_body(body: &Bytes) -> Result<Value, ResourceError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(body)?)
}

fn request(params: HashMap<String, String>, body: &Bytes) -> Result<ResourceRequest, ResourceResponse> {
    let body = decode_body(body).map_err(ResourceResponse::from)?;
    let mut request = ResourceRequest::new().body(body);
    request.params = params;
    Ok(request)
}

async fn list(State(resource): State<Arc<Resource>>, Query(params): Params) -> ResourceResponse {
    let mut request = ResourceRequest::new();
    request.params = params;
    resource.list(request).await
}

async fn search(
    State(resource): State<Arc<Resource>>,
    Query(params): Params,
    body: Bytes,
) -> ResourceResponse {
    match request(params, &body) {
        Ok(request) => resource.search(request).await,
        Err(response) => response,
    }
}

async fn single(
    State(resource): State<Arc<Resource>>,
    Path(id): Path<String>,
    Query(params): Params,
) -> ResourceResponse {
    let mut request = ResourceRequest::new().id(id);
    request.params = params;
    resource.single(request).await
}

async fn create(
    State(resource): State<Arc<Resource>>,
    Query(params): Params,
    body: Bytes,
) -> ResourceResponse {
    match request(params, &body) {
        Ok(request) => resource.create(request).await,
        Err(response) => response,
    }
}

async fn update(
    State(resource): State<Arc<Resource>>,
    Path(id): Path<String>,
    Query(params): Params,
    body: Bytes,
) -> ResourceResponse {
    match request(params, &body) {
        Ok(request) => resource.update(request.id(id)).await,
        Err(response) => response,
    }
}

async fn patch(
    State(resource): State<Arc<Resource>>,
    Path(id): Path<String>,
    Query(params): Params,
    body: Bytes,
) -> ResourceResponse {
    match request(params, &body) {
        Ok(request) => resource.patch(request.id(id)).await,
        Err(response) => response,
    }
}

async fn destroy(
    State(resource): State<Arc<Resource>>,
    Path(id): Path<String>,
    Query(params): Params,
) -> ResourceResponse {
    let mut request = ResourceRequest::new().id(id);
    request.params = params;
    resource.destroy(request).await
}
