// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use super::{RouteDoc, State};
use axum::{Json, Router, http::Method, http::StatusCode, response::IntoResponse, routing::get};
use serde_json::json;
use std::sync::Arc;

use crate::error::DataPlaneError;

const LIVE_PATH: &str = "/v2/health/live";
const READY_PATH: &str = "/v2/health/ready";

pub fn health_router(state: Arc<State>) -> (Vec<RouteDoc>, Router) {
    let docs: Vec<RouteDoc> = vec![
        RouteDoc::new(Method::GET, LIVE_PATH),
        RouteDoc::new(Method::GET, READY_PATH),
    ];

    let router = Router::new()
        .route(LIVE_PATH, get(live_handler))
        .route(READY_PATH, get(ready_handler))
        .with_state(state);

    (docs, router)
}

fn status(ok: bool) -> StatusCode {
    if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn live_handler(
    axum::extract::State(state): axum::extract::State<Arc<State>>,
) -> Result<impl IntoResponse, DataPlaneError> {
    let live = state.dataplane().live().await?;
    Ok((status(live), Json(json!({ "live": live }))))
}

async fn ready_handler(
    axum::extract::State(state): axum::extract::State<Arc<State>>,
) -> Result<impl IntoResponse, DataPlaneError> {
    let ready = state.dataplane().ready().await?;
    Ok((status(ready), Json(json!({ "ready": ready }))))
}
