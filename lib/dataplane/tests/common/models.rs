// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::http::HeaderMap;
use kserve_dataplane::protocols::{InferOutput, InferResponse, InferTensor};
use kserve_dataplane::{DataPlaneError, InferPayload, InferResult, Model, Result};
use serde_json::{Value, json};

/// Returns every input unchanged as an output of the same name. V1 bodies are
/// answered with their `instances` as `predictions`.
pub struct EchoModel {
    name: String,
    ready: AtomicBool,
    pub loads: AtomicUsize,
}

impl EchoModel {
    pub fn new(name: &str, ready: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            ready: AtomicBool::new(ready),
            loads: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Model for EchoModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn load(&self) -> Result<bool> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.ready.store(true, Ordering::SeqCst);
        Ok(true)
    }

    async fn predict(&self, payload: InferPayload, _headers: &HeaderMap) -> Result<InferResult> {
        match payload {
            InferPayload::Json(body) => Ok(InferResult::Json(json!({
                "predictions": body.get("instances").cloned().unwrap_or(Value::Null)
            }))),
            InferPayload::V2(request) => {
                let outputs = request
                    .inputs
                    .iter()
                    .map(|input| InferTensor::with_data(input.name.clone(), input.shape.clone(), input.as_tensor()?))
                    .collect::<Result<Vec<InferOutput>>>()?;
                Ok(InferResult::V2(InferResponse::new(request.id, self.name.clone(), outputs)))
            }
            InferPayload::Bytes(bytes) => Ok(InferResult::Json(json!({ "size": bytes.len() }))),
        }
    }

    async fn explain(&self, payload: InferPayload, _headers: &HeaderMap) -> Result<InferResult> {
        match payload {
            InferPayload::Json(body) => Ok(InferResult::Json(json!({ "explanations": body }))),
            _ => Err(DataPlaneError::invalid_input("explain takes JSON only")),
        }
    }
}

/// Loads fine but every prediction fails.
pub struct FailingModel;

#[async_trait]
impl Model for FailingModel {
    fn name(&self) -> &str {
        "failing"
    }

    fn ready(&self) -> bool {
        true
    }

    async fn load(&self) -> Result<bool> {
        Ok(true)
    }

    async fn predict(&self, _payload: InferPayload, _headers: &HeaderMap) -> Result<InferResult> {
        Err(DataPlaneError::inference("model exploded"))
    }
}

/// Never becomes ready.
pub struct BrokenModel;

#[async_trait]
impl Model for BrokenModel {
    fn name(&self) -> &str {
        "broken"
    }

    fn ready(&self) -> bool {
        false
    }

    async fn load(&self) -> Result<bool> {
        Err(DataPlaneError::inference("weights missing"))
    }

    async fn predict(&self, _payload: InferPayload, _headers: &HeaderMap) -> Result<InferResult> {
        Err(DataPlaneError::inference("unreachable"))
    }
}
