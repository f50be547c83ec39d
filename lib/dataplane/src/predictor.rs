// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Client for a remote predictor process, used in transformer deployments
//! where this server sits in front of the actual model server.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::OnceCell;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};

use kserve_runtime::logging::{X_B3_TRACEID, X_REQUEST_ID};
use kserve_runtime::{PredictorProtocol, ServerConfig};

use crate::error::{DataPlaneError, Result};
use crate::grpc::service::kserve::inference;
use crate::grpc::service::kserve::inference::grpc_inference_service_client::GrpcInferenceServiceClient;
use crate::model::{InferPayload, InferResult, Model};
use crate::protocols::infer_type::INFERENCE_HEADER_CONTENT_LENGTH;
use crate::protocols::{InferRequest, InferResponse};

const FORWARDED_HEADERS: [&str; 2] = [X_REQUEST_ID, X_B3_TRACEID];

pub struct PredictorClient {
    host: String,
    protocol: PredictorProtocol,
    use_ssl: bool,
    timeout: Duration,
    http: reqwest::Client,
    grpc: OnceCell<GrpcInferenceServiceClient<Channel>>,
}

impl PredictorClient {
    pub fn new(
        host: impl Into<String>,
        protocol: PredictorProtocol,
        use_ssl: bool,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(anyhow::Error::from)?;
        Ok(Self {
            host: host.into(),
            protocol,
            use_ssl,
            timeout,
            http,
            grpc: OnceCell::new(),
        })
    }

    /// `None` unless a predictor host is configured.
    pub fn from_config(config: &ServerConfig) -> Result<Option<Self>> {
        config
            .predictor_host
            .as_ref()
            .map(|host| {
                Self::new(
                    host.clone(),
                    config.predictor_protocol,
                    config.predictor_use_ssl,
                    config.predictor_request_timeout(),
                )
            })
            .transpose()
    }

    pub fn protocol(&self) -> PredictorProtocol {
        self.protocol
    }

    fn base_url(&self) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{scheme}://{}", self.host)
    }

    // gRPC needs an explicit port and always uses a plaintext channel
    fn grpc_url(&self) -> String {
        if self.host.contains(':') {
            format!("http://{}", self.host)
        } else {
            format!("http://{}:80", self.host)
        }
    }

    async fn grpc_client(&self) -> Result<GrpcInferenceServiceClient<Channel>> {
        let client = self
            .grpc
            .get_or_try_init(|| async {
                let endpoint = Endpoint::from_shared(self.grpc_url())
                    .map_err(|e| {
                        DataPlaneError::inference(format!(
                            "Invalid predictor host {}: {e}",
                            self.host
                        ))
                    })?
                    .timeout(self.timeout);
                Ok::<_, DataPlaneError>(GrpcInferenceServiceClient::new(endpoint.connect_lazy()))
            })
            .await?;
        Ok(client.clone())
    }

    /// GET probe; a non-2xx status is a negative answer.
    async fn probe(&self, path: &str) -> Result<bool> {
        let url = format!("{}{path}", self.base_url());
        let response = self.http.get(&url).send().await.map_err(|e| {
            tracing::warn!(url = %url, error = %e, "predictor health probe failed");
            DataPlaneError::inference(format!("Failed to reach predictor at {url}: {e}"))
        })?;
        Ok(response.status().is_success())
    }

    fn grpc_error(rpc: &str, status: tonic::Status) -> DataPlaneError {
        tracing::warn!(rpc, code = ?status.code(), message = status.message(), "predictor gRPC call failed");
        DataPlaneError::inference(format!("Predictor {rpc} failed: {}", status.message()))
    }

    pub async fn is_live(&self) -> Result<bool> {
        match self.protocol {
            PredictorProtocol::RestV1 => self.probe("/").await,
            PredictorProtocol::RestV2 => self.probe("/v2/health/live").await,
            PredictorProtocol::GrpcV2 => {
                let response = self
                    .grpc_client()
                    .await?
                    .server_live(inference::ServerLiveRequest {})
                    .await
                    .map_err(|s| Self::grpc_error("ServerLive", s))?;
                Ok(response.into_inner().live)
            }
        }
    }

    pub async fn is_ready(&self) -> Result<bool> {
        match self.protocol {
            PredictorProtocol::RestV1 => self.probe("/").await,
            PredictorProtocol::RestV2 => self.probe("/v2/health/ready").await,
            PredictorProtocol::GrpcV2 => {
                let response = self
                    .grpc_client()
                    .await?
                    .server_ready(inference::ServerReadyRequest {})
                    .await
                    .map_err(|s| Self::grpc_error("ServerReady", s))?;
                Ok(response.into_inner().ready)
            }
        }
    }

    pub async fn is_model_ready(&self, name: &str) -> Result<bool> {
        match self.protocol {
            PredictorProtocol::RestV1 => self.probe(&format!("/v1/models/{name}")).await,
            PredictorProtocol::RestV2 => self.probe(&format!("/v2/models/{name}/ready")).await,
            PredictorProtocol::GrpcV2 => {
                let response = self
                    .grpc_client()
                    .await?
                    .model_ready(inference::ModelReadyRequest {
                        name: name.to_string(),
                        version: String::new(),
                    })
                    .await
                    .map_err(|s| Self::grpc_error("ModelReady", s))?;
                Ok(response.into_inner().ready)
            }
        }
    }

    async fn post(
        &self,
        path: &str,
        body: Vec<u8>,
        json_length: Option<usize>,
        headers: &HeaderMap,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{path}", self.base_url());
        let mut request = self.http.post(&url).body(body);
        request = match json_length {
            Some(len) => request
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .header(INFERENCE_HEADER_CONTENT_LENGTH, len),
            None => request.header(reqwest::header::CONTENT_TYPE, "application/json"),
        };
        for name in FORWARDED_HEADERS {
            if let Some(value) = headers.get(name) {
                request = request.header(name, value.clone());
            }
        }

        let response = request.send().await.map_err(|e| {
            tracing::warn!(url = %url, error = %e, "predictor request failed");
            DataPlaneError::inference(format!("Failed to reach predictor at {url}: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            tracing::warn!(url = %url, status = status.as_u16(), reason = %reason, "predictor returned an error");
            return Err(DataPlaneError::upstream(reason, status.as_u16()));
        }
        Ok(response)
    }

    pub async fn post_json(&self, path: &str, body: &Value, headers: &HeaderMap) -> Result<Value> {
        let response = self.post(path, serde_json::to_vec(body)?, None, headers).await?;
        let bytes = response.bytes().await.map_err(|e| {
            DataPlaneError::inference(format!("Failed to read predictor response: {e}"))
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            DataPlaneError::inference(format!("Predictor returned invalid JSON: {e}"))
        })
    }

    /// REST v2 inference, binary tensors travel in the hybrid body.
    pub async fn infer_v2(
        &self,
        model_name: &str,
        request: &InferRequest,
        headers: &HeaderMap,
    ) -> Result<InferResponse> {
        let (body, json_length) = request.to_rest()?;
        let path = format!("/v2/models/{model_name}/infer");
        let response = self.post(&path, body, json_length, headers).await?;

        let json_length = response
            .headers()
            .get(INFERENCE_HEADER_CONTENT_LENGTH)
            .map(|v| {
                v.to_str()
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .ok_or_else(|| {
                        DataPlaneError::inference("Predictor returned an invalid inference-header-content-length")
                    })
            })
            .transpose()?;
        let bytes: Bytes = response.bytes().await.map_err(|e| {
            DataPlaneError::inference(format!("Failed to read predictor response: {e}"))
        })?;
        InferResponse::from_bytes(&bytes, json_length)
    }

    pub async fn infer_grpc(&self, request: &InferRequest, headers: &HeaderMap) -> Result<InferResponse> {
        let mut grpc_request = tonic::Request::new(inference::ModelInferRequest::try_from(request)?);
        for name in FORWARDED_HEADERS {
            if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok())
                && let Ok(value) = MetadataValue::try_from(value)
            {
                grpc_request.metadata_mut().insert(name, value);
            }
        }

        let response = self
            .grpc_client()
            .await?
            .model_infer(grpc_request)
            .await
            .map_err(|s| Self::grpc_error("ModelInfer", s))?;
        InferResponse::try_from(response.into_inner())
    }
}

impl std::fmt::Debug for PredictorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictorClient")
            .field("host", &self.host)
            .field("protocol", &self.protocol)
            .field("use_ssl", &self.use_ssl)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// A model served by the remote predictor. Register it as a
/// [`crate::model_repository::ModelHandle::Remote`].
pub struct PredictorProxyModel {
    name: String,
    client: Arc<PredictorClient>,
}

impl PredictorProxyModel {
    pub fn new(name: impl Into<String>, client: Arc<PredictorClient>) -> Self {
        Self {
            name: name.into(),
            client,
        }
    }

    fn unsupported(&self, payload: &InferPayload) -> DataPlaneError {
        let kind = match payload {
            InferPayload::Json(_) => "JSON",
            InferPayload::V2(_) => "v2 inference",
            InferPayload::Bytes(_) => "binary",
        };
        DataPlaneError::InvalidInput(format!(
            "Predictor for model {} speaks {} and can not forward {kind} payloads",
            self.name,
            self.client.protocol()
        ))
    }
}

#[async_trait]
impl Model for PredictorProxyModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn ready(&self) -> bool {
        true
    }

    async fn load(&self) -> Result<bool> {
        Ok(true)
    }

    async fn predict(&self, payload: InferPayload, headers: &HeaderMap) -> Result<InferResult> {
        let name = self.name.as_str();
        match (self.client.protocol(), payload) {
            (PredictorProtocol::RestV1, InferPayload::Json(body)) => {
                let path = format!("/v1/models/{name}:predict");
                Ok(InferResult::Json(self.client.post_json(&path, &body, headers).await?))
            }
            (PredictorProtocol::RestV2, InferPayload::Json(body)) => {
                let path = format!("/v2/models/{name}/infer");
                Ok(InferResult::Json(self.client.post_json(&path, &body, headers).await?))
            }
            (PredictorProtocol::RestV2, InferPayload::V2(request)) => Ok(InferResult::V2(
                self.client.infer_v2(name, &request, headers).await?,
            )),
            (PredictorProtocol::GrpcV2, InferPayload::V2(request)) => Ok(InferResult::V2(
                self.client.infer_grpc(&request, headers).await?,
            )),
            (PredictorProtocol::GrpcV2, InferPayload::Json(body)) => {
                let request = InferRequest::from_rest(body, name)?;
                Ok(InferResult::V2(self.client.infer_grpc(&request, headers).await?))
            }
            (_, payload) => Err(self.unsupported(&payload)),
        }
    }

    async fn explain(&self, payload: InferPayload, headers: &HeaderMap) -> Result<InferResult> {
        let name = self.name.as_str();
        let path = match self.client.protocol() {
            PredictorProtocol::RestV1 => format!("/v1/models/{name}:explain"),
            PredictorProtocol::RestV2 => format!("/v2/models/{name}/explain"),
            PredictorProtocol::GrpcV2 => {
                return Err(DataPlaneError::NotImplemented(
                    "Explain is not supported over gRPC".to_string(),
                ));
            }
        };
        let body = match payload {
            InferPayload::Json(body) => body,
            InferPayload::V2(request) => {
                let (body, json_length) = request.to_rest()?;
                if json_length.is_some() {
                    return Err(DataPlaneError::invalid_input(
                        "Explain requests can not carry binary tensor data",
                    ));
                }
                serde_json::from_slice(&body)?
            }
            other => return Err(self.unsupported(&other)),
        };
        Ok(InferResult::Json(self.client.post_json(&path, &body, headers).await?))
    }
}
