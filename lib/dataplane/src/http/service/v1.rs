// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! V1 prediction protocol. Actions are addressed as `/v1/models/{name}:{verb}`.

use super::{RouteDoc, State};
use axum::{
    Json, Router,
    extract::Path,
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use serde_json::json;
use std::sync::Arc;

use crate::error::DataPlaneError;

const ROOT_PATH: &str = "/";
const MODELS_PATH: &str = "/v1/models";
const MODEL_PATH: &str = "/v1/models/{name}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Predict,
    Explain,
}

// Splits `mnist:predict` into the model name and verb.
fn parse_action(name_action: &str) -> Option<(&str, Verb)> {
    let (name, verb) = name_action.rsplit_once(':')?;
    let verb = match verb {
        "predict" => Verb::Predict,
        "explain" => Verb::Explain,
        _ => return None,
    };
    (!name.is_empty()).then_some((name, verb))
}

pub fn v1_router(state: Arc<State>) -> (Vec<RouteDoc>, Router) {
    let docs: Vec<RouteDoc> = vec![
        RouteDoc::new(Method::GET, ROOT_PATH),
        RouteDoc::new(Method::GET, MODELS_PATH),
        RouteDoc::new(Method::GET, MODEL_PATH),
        RouteDoc::new(Method::POST, "/v1/models/{name}:predict"),
        RouteDoc::new(Method::POST, "/v1/models/{name}:explain"),
    ];

    let router = Router::new()
        .route(ROOT_PATH, get(live_handler))
        .route(MODELS_PATH, get(models_handler))
        .route(MODEL_PATH, get(model_ready_handler).post(action_handler))
        .with_state(state);

    (docs, router)
}

async fn live_handler(
    axum::extract::State(state): axum::extract::State<Arc<State>>,
) -> Result<Response, DataPlaneError> {
    if state.dataplane().live().await? {
        Ok(Json(json!({ "status": "alive" })).into_response())
    } else {
        Ok((StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "not alive" }))).into_response())
    }
}

async fn models_handler(
    axum::extract::State(state): axum::extract::State<Arc<State>>,
) -> impl IntoResponse {
    let mut models: Vec<String> = state.dataplane().repository().get_models().into_keys().collect();
    models.sort();
    Json(json!({ "models": models }))
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

async fn action_handler(
    axum::extract::State(state): axum::extract::State<Arc<State>>,
    Path(name_action): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, DataPlaneError> {
    let Some((name, verb)) = parse_action(&name_action) else {
        return Ok((StatusCode::NOT_FOUND, "Route not found").into_response());
    };

    let dataplane = state.dataplane();
    let (decoded, attributes) = dataplane.decode(body.into(), &headers)?;
    let cloudevent = decoded.cloudevent_kind();
    let payload = decoded.into_payload();
    let (result, _) = match verb {
        Verb::Predict => dataplane.infer(name, payload, &headers).await?,
        Verb::Explain => dataplane.explain(name, payload, &headers).await?,
    };
    let encoded = dataplane.encode(name, result, cloudevent, &attributes)?;
    Ok(encoded.into_response())
}
