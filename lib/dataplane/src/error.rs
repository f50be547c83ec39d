// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

pub type Result<T, E = DataPlaneError> = std::result::Result<T, E>;

/// Errors surfaced by the data plane to REST and gRPC callers.
#[derive(Debug, thiserror::Error)]
pub enum DataPlaneError {
    /// Malformed payload, shape/datatype mismatch or protocol misuse
    #[error("{0}")]
    InvalidInput(String),

    #[error("Model with name {0} does not exist.")]
    ModelNotFound(String),

    #[error("Model with name {0} is not ready.")]
    ModelNotReady(String),

    /// Failure inside the model or while talking to a remote predictor.
    /// `status` carries the upstream HTTP status when there was one.
    #[error("{reason}")]
    InferenceError { reason: String, status: Option<u16> },

    #[error("{0}")]
    NotImplemented(String),

    #[error("Server is not ready")]
    ServerNotReady,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl DataPlaneError {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        DataPlaneError::InvalidInput(reason.into())
    }

    pub fn inference(reason: impl Into<String>) -> Self {
        DataPlaneError::InferenceError {
            reason: reason.into(),
            status: None,
        }
    }

    pub fn upstream(reason: impl Into<String>, status: u16) -> Self {
        DataPlaneError::InferenceError {
            reason: reason.into(),
            status: Some(status),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            DataPlaneError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            DataPlaneError::ModelNotFound(_) => StatusCode::NOT_FOUND,
            DataPlaneError::ModelNotReady(_) | DataPlaneError::ServerNotReady => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DataPlaneError::InferenceError { status, .. } => status
                .and_then(|s| StatusCode::from_u16(s).ok())
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            DataPlaneError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            DataPlaneError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message returned to callers. Internal errors are not exposed.
    pub fn public_message(&self) -> String {
        match self {
            DataPlaneError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for DataPlaneError {
    fn into_response(self) -> Response {
        if let DataPlaneError::Internal(err) = &self {
            tracing::error!(error = ?err, "internal data plane error");
        }
        (
            self.status_code(),
            Json(ErrorResponse {
                error: self.public_message(),
            }),
        )
            .into_response()
    }
}

impl From<DataPlaneError> for tonic::Status {
    fn from(err: DataPlaneError) -> Self {
        let message = err.public_message();
        match err {
            DataPlaneError::InvalidInput(_) => tonic::Status::invalid_argument(message),
            DataPlaneError::ModelNotFound(_) => tonic::Status::not_found(message),
            DataPlaneError::ModelNotReady(_) | DataPlaneError::ServerNotReady => {
                tonic::Status::unavailable(message)
            }
            DataPlaneError::InferenceError { .. } => tonic::Status::internal(message),
            DataPlaneError::NotImplemented(_) => tonic::Status::unimplemented(message),
            DataPlaneError::Internal(err) => {
                tracing::error!(error = ?err, "internal data plane error");
                tonic::Status::internal(message)
            }
        }
    }
}

impl From<serde_json::Error> for DataPlaneError {
    fn from(err: serde_json::Error) -> Self {
        DataPlaneError::InvalidInput(err.to_string())
    }
}
