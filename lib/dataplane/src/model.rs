// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The capability interface every served model implements.

use async_trait::async_trait;
use axum::http::HeaderMap;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DataPlaneError, Result};
use crate::protocols::{InferRequest, InferResponse, TensorMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModelKind {
    #[default]
    Predictive,
    /// Served through the OpenAI-compatible endpoints only
    OpenAI,
}

/// Decoded request body handed to a model.
#[derive(Debug, Clone, PartialEq)]
pub enum InferPayload {
    /// REST v1 body or JSON CloudEvent data
    Json(Value),
    V2(InferRequest),
    /// CloudEvent data that is not JSON
    Bytes(Bytes),
}

#[derive(Debug, Clone, PartialEq)]
pub enum InferResult {
    Json(Value),
    V2(InferResponse),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub name: String,
    pub versions: Vec<String>,
    pub platform: String,
    pub inputs: Vec<TensorMetadata>,
    pub outputs: Vec<TensorMetadata>,
}

#[async_trait]
pub trait Model: Send + Sync {
    fn name(&self) -> &str;

    /// Ready to serve inference.
    fn ready(&self) -> bool;

    /// Loads the model and reports whether it became ready.
    async fn load(&self) -> Result<bool>;

    async fn predict(&self, payload: InferPayload, headers: &HeaderMap) -> Result<InferResult>;

    async fn explain(&self, _payload: InferPayload, _headers: &HeaderMap) -> Result<InferResult> {
        Err(DataPlaneError::NotImplemented(format!(
            "Model {} does not support explain",
            self.name()
        )))
    }

    fn get_input_types(&self) -> Vec<TensorMetadata> {
        Vec::new()
    }

    fn get_output_types(&self) -> Vec<TensorMetadata> {
        Vec::new()
    }

    fn metadata(&self) -> ModelMetadata {
        ModelMetadata {
            name: self.name().to_string(),
            versions: Vec::new(),
            platform: String::new(),
            inputs: self.get_input_types(),
            outputs: self.get_output_types(),
        }
    }

    /// Releases resources before the model is removed from the repository.
    async fn stop(&self) {}

    fn kind(&self) -> ModelKind {
        ModelKind::Predictive
    }
}

/// REST v1 `instances` and v2 `inputs` must be lists when present.
pub fn validate(payload: &InferPayload) -> Result<()> {
    if let InferPayload::Json(Value::Object(body)) = payload {
        for key in ["instances", "inputs"] {
            if body.get(key).is_some_and(|v| !v.is_array()) {
                return Err(DataPlaneError::InvalidInput(format!(
                    "Expected \"{key}\" to be a list"
                )));
            }
        }
    }
    Ok(())
}
