// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Protocol independent request handling shared by the HTTP and gRPC
//! services: health, metadata, body decoding, dispatch and response encoding.

use std::sync::Arc;
use std::time::Instant;

use axum::http::{HeaderMap, HeaderValue, StatusCode, header::CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use kserve_runtime::{DEFAULT_SERVER_NAME, ServerConfig};

use crate::cloudevent::{self, APPLICATION_JSON, Attributes, CloudEventKind, JSON_CONTENT_TYPES};
use crate::error::{DataPlaneError, Result};
use crate::model::{self, InferPayload, InferResult, Model, ModelKind, ModelMetadata};
use crate::model_repository::ModelRepository;
use crate::predictor::PredictorClient;
use crate::protocols::infer_type::INFERENCE_HEADER_CONTENT_LENGTH;
use crate::protocols::{InferRequest, RequestedOutput};

pub const MODEL_REPOSITORY_EXTENSION: &str = "model_repository_extension";

const APPLICATION_OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMetadata {
    pub name: String,
    pub version: String,
    pub extensions: Vec<String>,
}

/// Request body as handed over by a transport.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Bytes(Bytes),
    Infer(InferRequest),
}

impl From<Bytes> for RequestBody {
    fn from(body: Bytes) -> Self {
        RequestBody::Bytes(body)
    }
}

impl From<InferRequest> for RequestBody {
    fn from(request: InferRequest) -> Self {
        RequestBody::Infer(request)
    }
}

/// Decoded payload together with the envelope it arrived in.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedBody {
    Plain(InferPayload),
    StructuredCloudEvent(InferPayload),
    BinaryCloudEvent(InferPayload),
}

impl DecodedBody {
    pub fn payload(&self) -> &InferPayload {
        match self {
            DecodedBody::Plain(p)
            | DecodedBody::StructuredCloudEvent(p)
            | DecodedBody::BinaryCloudEvent(p) => p,
        }
    }

    pub fn into_payload(self) -> InferPayload {
        match self {
            DecodedBody::Plain(p)
            | DecodedBody::StructuredCloudEvent(p)
            | DecodedBody::BinaryCloudEvent(p) => p,
        }
    }

    /// Envelope the response goes back in, the same one the request came in.
    pub fn cloudevent_kind(&self) -> Option<CloudEventKind> {
        match self {
            DecodedBody::Plain(_) => None,
            DecodedBody::StructuredCloudEvent(_) => Some(CloudEventKind::Structured),
            DecodedBody::BinaryCloudEvent(_) => Some(CloudEventKind::Binary),
        }
    }

    fn try_map(self, f: impl FnOnce(InferPayload) -> Result<InferPayload>) -> Result<Self> {
        Ok(match self {
            DecodedBody::Plain(p) => DecodedBody::Plain(f(p)?),
            DecodedBody::StructuredCloudEvent(p) => DecodedBody::StructuredCloudEvent(f(p)?),
            DecodedBody::BinaryCloudEvent(p) => DecodedBody::BinaryCloudEvent(f(p)?),
        })
    }
}

/// Serialized response ready to be written by the HTTP layer.
#[derive(Debug, Clone)]
pub struct EncodedResponse {
    pub body: Vec<u8>,
    pub headers: HeaderMap,
}

impl IntoResponse for EncodedResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, self.headers, self.body).into_response()
    }
}

// Response preferences carried over from the request.
struct RequestContext {
    id: String,
    from_grpc: bool,
    use_binary_outputs: bool,
    request_outputs: Vec<RequestedOutput>,
}

impl RequestContext {
    fn from_payload(payload: &InferPayload) -> Option<Self> {
        match payload {
            InferPayload::V2(request) => Some(Self {
                id: request.id.clone(),
                from_grpc: request.from_grpc,
                use_binary_outputs: request.use_binary_outputs,
                request_outputs: request.request_outputs.clone(),
            }),
            _ => None,
        }
    }

    fn apply(self, result: InferResult, model_name: &str) -> InferResult {
        match result {
            InferResult::V2(mut response) => {
                if response.id.is_empty() {
                    response.id = self.id;
                }
                if response.model_name.is_empty() {
                    response.model_name = model_name.to_string();
                }
                response.from_grpc = self.from_grpc;
                response.use_binary_outputs |= self.use_binary_outputs;
                response.request_outputs = self.request_outputs;
                InferResult::V2(response)
            }
            other => other,
        }
    }
}

pub struct DataPlane {
    repository: Arc<ModelRepository>,
    server_name: String,
    server_version: String,
    predictor_health: Option<Arc<PredictorClient>>,
}

impl DataPlane {
    pub fn new(repository: Arc<ModelRepository>) -> Self {
        Self {
            repository,
            server_name: DEFAULT_SERVER_NAME.to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            predictor_health: None,
        }
    }

    /// Builds the data plane for `config`. The predictor is probed for health
    /// only when a predictor host is set and the health check is enabled.
    pub fn from_config(config: &ServerConfig, repository: Arc<ModelRepository>) -> Result<Self> {
        let mut dataplane = Self::new(repository).with_server_name(config.server_name.clone());
        if config.enable_predictor_health_check
            && let Some(client) = PredictorClient::from_config(config)?
        {
            dataplane = dataplane.with_predictor_health(Arc::new(client));
        }
        Ok(dataplane)
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    pub fn with_predictor_health(mut self, client: Arc<PredictorClient>) -> Self {
        self.predictor_health = Some(client);
        self
    }

    pub fn repository(&self) -> &Arc<ModelRepository> {
        &self.repository
    }

    /// Looks up a model, loading it first when it is registered but not ready.
    pub async fn get_model(&self, name: &str) -> Result<Arc<dyn Model>> {
        let lookup = || {
            self.repository
                .get_model(name)
                .ok_or_else(|| DataPlaneError::ModelNotFound(name.to_string()))
        };
        let handle = lookup()?;
        if handle.is_ready() {
            return Ok(handle.model().clone());
        }

        let lock = self.repository.load_lock(name);
        let _guard = lock.lock().await;

        // Another request may have loaded, replaced or unloaded it meanwhile
        let handle = lookup()?;
        let model = handle.model().clone();
        if handle.is_ready() {
            return Ok(model);
        }

        match model.load().await {
            Ok(true) => {
                tracing::info!(model = name, "model loaded on first use");
                Ok(model)
            }
            Ok(false) => {
                tracing::warn!(model = name, "model did not become ready");
                Err(DataPlaneError::ModelNotReady(name.to_string()))
            }
            Err(e) => {
                tracing::warn!(model = name, error = %e, "model load failed");
                Err(DataPlaneError::ModelNotReady(name.to_string()))
            }
        }
    }

    pub async fn live(&self) -> Result<bool> {
        match &self.predictor_health {
            Some(predictor) => predictor.is_live().await,
            None => Ok(true),
        }
    }

    pub async fn ready(&self) -> Result<bool> {
        let models_ready = self
            .repository
            .get_models()
            .values()
            .all(|handle| handle.is_ready());
        if !models_ready {
            return Ok(false);
        }
        match &self.predictor_health {
            // An unreachable predictor leaves the whole server unable to serve
            Some(predictor) => predictor.is_ready().await.map_err(|e| {
                tracing::warn!(error = %e, "predictor readiness check failed");
                DataPlaneError::ServerNotReady
            }),
            None => Ok(true),
        }
    }

    pub async fn model_ready(&self, name: &str) -> Result<bool> {
        let handle = self
            .repository
            .get_model(name)
            .ok_or_else(|| DataPlaneError::ModelNotFound(name.to_string()))?;
        if !handle.is_ready() {
            return Ok(false);
        }
        match &self.predictor_health {
            Some(predictor) => predictor.is_model_ready(name).await,
            None => Ok(true),
        }
    }

    pub fn metadata(&self) -> ServerMetadata {
        ServerMetadata {
            name: self.server_name.clone(),
            version: self.server_version.clone(),
            extensions: vec![MODEL_REPOSITORY_EXTENSION.to_string()],
        }
    }

    pub fn model_metadata(&self, name: &str) -> Result<ModelMetadata> {
        let handle = self
            .repository
            .get_model(name)
            .ok_or_else(|| DataPlaneError::ModelNotFound(name.to_string()))?;
        let mut metadata = handle.model().metadata();
        metadata.name = name.to_string();
        Ok(metadata)
    }

    /// Resolves a request body into its payload and CloudEvent attributes.
    pub fn decode(&self, body: RequestBody, headers: &HeaderMap) -> Result<(DecodedBody, Attributes)> {
        let bytes = match body {
            RequestBody::Infer(request) => {
                return Ok((DecodedBody::Plain(InferPayload::V2(request)), Attributes::new()));
            }
            RequestBody::Bytes(bytes) => bytes,
        };

        let start = Instant::now();
        let size = bytes.len();
        let decoded = if cloudevent::has_binary_headers(headers) {
            let (payload, attributes) = cloudevent::decode_binary(bytes, headers)?;
            (DecodedBody::BinaryCloudEvent(payload), attributes)
        } else if cloudevent::content_type(headers).is_some_and(|ct| !JSON_CONTENT_TYPES.contains(&ct))
        {
            (DecodedBody::Plain(InferPayload::Bytes(bytes)), Attributes::new())
        } else {
            let body: Value = serde_json::from_slice(&bytes).map_err(|e| {
                DataPlaneError::InvalidInput(format!("Unrecognized request format: {e}"))
            })?;
            if cloudevent::is_structured(&body) {
                let (data, attributes) = cloudevent::decode_structured(body);
                (DecodedBody::StructuredCloudEvent(InferPayload::Json(data)), attributes)
            } else {
                (DecodedBody::Plain(InferPayload::Json(body)), Attributes::new())
            }
        };
        tracing::debug!(
            size,
            elapsed_us = start.elapsed().as_micros() as u64,
            "decoded request body"
        );
        Ok(decoded)
    }

    /// Decodes a v2 infer body into an [`InferRequest`]. A hybrid body is
    /// recognised by the `inference-header-content-length` header.
    pub fn decode_infer_request(
        &self,
        model_name: &str,
        body: Bytes,
        headers: &HeaderMap,
    ) -> Result<(DecodedBody, Attributes)> {
        if let Some(value) = headers.get(INFERENCE_HEADER_CONTENT_LENGTH) {
            let json_length = value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .ok_or_else(|| {
                    DataPlaneError::InvalidInput(format!(
                        "Invalid {INFERENCE_HEADER_CONTENT_LENGTH} header: {value:?}"
                    ))
                })?;
            let request = InferRequest::from_bytes(&body, Some(json_length), model_name)?;
            return Ok((DecodedBody::Plain(InferPayload::V2(request)), Attributes::new()));
        }

        let (decoded, attributes) = self.decode(RequestBody::Bytes(body), headers)?;
        let decoded = decoded.try_map(|payload| match payload {
            InferPayload::Json(value) => Ok(InferPayload::V2(InferRequest::from_rest(value, model_name)?)),
            InferPayload::Bytes(_) => Err(DataPlaneError::invalid_input(
                "Unrecognized request format: inference requests must be JSON or carry an inference-header-content-length header",
            )),
            request @ InferPayload::V2(_) => Ok(request),
        })?;
        Ok((decoded, attributes))
    }

    /// Serializes a result for REST. `cloudevent` is the envelope the request
    /// was decoded from, see [`DecodedBody::cloudevent_kind`].
    pub fn encode(
        &self,
        model_name: &str,
        result: InferResult,
        cloudevent: Option<CloudEventKind>,
        attributes: &Attributes,
    ) -> Result<EncodedResponse> {
        let (body, json_length) = match result {
            InferResult::V2(response) => response.to_rest()?,
            InferResult::Json(value) => (serde_json::to_vec(&value)?, None),
        };

        if let Some(kind) = cloudevent {
            if json_length.is_some() {
                return Err(DataPlaneError::invalid_input(
                    "CloudEvent responses can not carry binary tensor data, request outputs with binary_data set to false",
                ));
            }
            let (headers, body) = cloudevent::create_response_event(model_name, body, attributes, kind)?;
            return Ok(EncodedResponse { body, headers });
        }

        let mut response_headers = HeaderMap::new();
        match json_length {
            Some(length) => {
                response_headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_OCTET_STREAM));
                response_headers.insert(INFERENCE_HEADER_CONTENT_LENGTH, HeaderValue::from(length));
            }
            None => {
                response_headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
            }
        }
        Ok(EncodedResponse {
            body,
            headers: response_headers,
        })
    }

    async fn checked_model(&self, model_name: &str, method: &str) -> Result<Arc<dyn Model>> {
        let model = self.get_model(model_name).await?;
        if model.kind() == ModelKind::OpenAI {
            return Err(DataPlaneError::InvalidInput(format!(
                "Model {model_name} is of type OpenAIModel. It does not support the {method} method."
            )));
        }
        Ok(model)
    }

    pub async fn infer(
        &self,
        model_name: &str,
        payload: InferPayload,
        headers: &HeaderMap,
    ) -> Result<(InferResult, HeaderMap)> {
        let model = self.checked_model(model_name, "infer").await?;
        model::validate(&payload)?;
        let context = RequestContext::from_payload(&payload);
        let result = model.predict(payload, headers).await?;
        let result = match context {
            Some(context) => context.apply(result, model_name),
            None => result,
        };
        Ok((result, headers.clone()))
    }

    pub async fn explain(
        &self,
        model_name: &str,
        payload: InferPayload,
        headers: &HeaderMap,
    ) -> Result<(InferResult, HeaderMap)> {
        let model = self.checked_model(model_name, "explain").await?;
        model::validate(&payload)?;
        let context = RequestContext::from_payload(&payload);
        let result = model.explain(payload, headers).await?;
        let result = match context {
            Some(context) => context.apply(result, model_name),
            None => result,
        };
        Ok((result, headers.clone()))
    }

    pub async fn load(&self, name: &str) -> Result<bool> {
        self.repository.load_model(name).await
    }

    pub async fn unload(&self, name: &str) -> Result<()> {
        self.repository.unload(name).await
    }
}

impl std::fmt::Debug for DataPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataPlane")
            .field("repository", &self.repository)
            .field("server_name", &self.server_name)
            .field("server_version", &self.server_version)
            .field("predictor_health", &self.predictor_health.is_some())
            .finish()
    }
}
