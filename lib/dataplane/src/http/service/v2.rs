// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Open Inference Protocol V2 over REST, including the model repository extension.

use super::{RouteDoc, State};
use axum::{
    Json, Router,
    extract::Path,
    http::{HeaderMap, Method},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use serde_json::json;
use std::sync::Arc;

use crate::error::DataPlaneError;

const SERVER_METADATA_PATH: &str = "/v2";
const MODEL_METADATA_PATH: &str = "/v2/models/{name}";
const MODEL_READY_PATH: &str = "/v2/models/{name}/ready";
const INFER_PATH: &str = "/v2/models/{name}/infer";
const EXPLAIN_PATH: &str = "/v2/models/{name}/explain";
const LOAD_PATH: &str = "/v2/repository/models/{name}/load";
const UNLOAD_PATH: &str = "/v2/repository/models/{name}/unload";

pub fn v2_router(state: Arc<State>) -> (Vec<RouteDoc>, Router) {
    let docs: Vec<RouteDoc> = vec![
        RouteDoc::new(Method::GET, SERVER_METADATA_PATH),
        RouteDoc::new(Method::GET, MODEL_METADATA_PATH),
        RouteDoc::new(Method::GET, MODEL_READY_PATH),
        RouteDoc::new(Method::POST, INFER_PATH),
        RouteDoc::new(Method::POST, EXPLAIN_PATH),
        RouteDoc::new(Method::POST, LOAD_PATH),
        RouteDoc::new(Method::POST, UNLOAD_PATH),
    ];

    let router = Router::new()
        .route(SERVER_METADATA_PATH, get(server_metadata_handler))
        .route(MODEL_METADATA_PATH, get(model_metadata_handler))
        .route(MODEL_READY_PATH, get(model_ready_handler))
        .route(INFER_PATH, post(infer_handler))
        .route(EXPLAIN_PATH, post(explain_handler))
        .route(LOAD_PATH, post(load_handler))
        .route(UNLOAD_PATH, post(unload_handler))
        .with_state(state);

    (docs, router)
}

async fn server_metadata_handler(
    axum::extract::State(state): axum::extract::State<Arc<State>>,
) -> impl IntoResponse {
    Json(state.dataplane().metadata())
}

async fn model_metadata_handler(
    axum::extract::State(state): axum::extract::State<Arc<State>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, DataPlaneError> {
    Ok(Json(state.dataplane().model_metadata(&name)?))
}

async fn model_ready_handler(
    axum::extract::State(state): axum::extract::State<Arc<State>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, DataPlaneError> {
    if !state.dataplane().model_ready(&name).await? {
        return Err(DataPlaneError::ModelNotReady(name));
    }
    Ok(Json(json!({ "name": name, "ready": true })))
}

async fn infer_handler(
    axum::extract::State(state): axum::extract::State<Arc<State>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, DataPlaneError> {
    let dataplane = state.dataplane();
    let (decoded, attributes) = dataplane.decode_infer_request(&name, body, &headers)?;
    let cloudevent = decoded.cloudevent_kind();
    let (result, _) = dataplane.infer(&name, decoded.into_payload(), &headers).await?;
    let encoded = dataplane.encode(&name, result, cloudevent, &attributes)?;
    Ok(encoded.into_response())
}

async fn explain_handler(
    axum::extract::State(state): axum::extract::State<Arc<State>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, DataPlaneError> {
    let dataplane = state.dataplane();
    let (decoded, attributes) = dataplane.decode_infer_request(&name, body, &headers)?;
    let cloudevent = decoded.cloudevent_kind();
    let (result, _) = dataplane.explain(&name, decoded.into_payload(), &headers).await?;
    let encoded = dataplane.encode(&name, result, cloudevent, &attributes)?;
    Ok(encoded.into_response())
}

async fn load_handler(
    axum::extract::State(state): axum::extract::State<Arc<State>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, DataPlaneError> {
    if !state.dataplane().load(&name).await? {
        return Err(DataPlaneError::ModelNotReady(name));
    }
    Ok(Json(json!({ "name": name, "load": true })))
}

async fn unload_handler(
    axum::extract::State(state): axum::extract::State<Arc<State>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, DataPlaneError> {
    state.dataplane().unload(&name).await?;
    Ok(Json(json!({ "name": name, "unload": true })))
}
