// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use anyhow::Result;
use derive_builder::Builder;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, transport::Server};

use kserve_runtime::ServerConfig;

use crate::dataplane::DataPlane;
use crate::error::DataPlaneError;
use crate::model::{InferPayload, InferResult};
use crate::protocols::{InferRequest, InferResponse, TensorMetadata};

pub mod inference {
    tonic::include_proto!("inference");
}
use inference::grpc_inference_service_server::{GrpcInferenceService, GrpcInferenceServiceServer};
use inference::{
    ModelInferRequest, ModelInferResponse, ModelMetadataRequest, ModelMetadataResponse,
    ModelReadyRequest, ModelReadyResponse, RepositoryModelLoadRequest, RepositoryModelLoadResponse,
    RepositoryModelUnloadRequest, RepositoryModelUnloadResponse, ServerLiveRequest,
    ServerLiveResponse, ServerMetadataRequest, ServerMetadataResponse, ServerReadyRequest,
    ServerReadyResponse,
};

pub struct State {
    dataplane: Arc<DataPlane>,
}

impl State {
    pub fn new(dataplane: Arc<DataPlane>) -> Self {
        Self { dataplane }
    }

    pub fn dataplane(&self) -> &DataPlane {
        Arc::as_ref(&self.dataplane)
    }
}

#[derive(Clone)]
pub struct KserveService {
    // The state we share with every request handler
    state: Arc<State>,

    port: u16,
    host: String,
}

#[derive(Clone, Builder)]
#[builder(pattern = "owned", build_fn(private, name = "build_internal"))]
pub struct KserveServiceConfig {
    #[builder(default = "8081")]
    port: u16,

    #[builder(setter(into), default = "String::from(\"0.0.0.0\")")]
    host: String,

    dataplane: Arc<DataPlane>,
}

impl KserveService {
    pub fn builder() -> KserveServiceConfigBuilder {
        KserveServiceConfigBuilder::default()
    }

    /// Listens on `grpc_host:grpc_port` from `config`.
    pub fn from_config(config: &ServerConfig, dataplane: Arc<DataPlane>) -> Result<Self> {
        Self::builder()
            .host(config.grpc_host.clone())
            .port(config.grpc_port)
            .dataplane(dataplane)
            .build()
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn state_clone(&self) -> Arc<State> {
        self.state.clone()
    }

    pub fn state(&self) -> &State {
        Arc::as_ref(&self.state)
    }

    fn dataplane(&self) -> &DataPlane {
        self.state().dataplane()
    }

    pub async fn spawn(&self, cancel_token: CancellationToken) -> JoinHandle<Result<()>> {
        let this = self.clone();
        tokio::spawn(async move { this.run(cancel_token).await })
    }

    pub async fn run(&self, cancel_token: CancellationToken) -> Result<()> {
        let address = self.address();
        tracing::info!(address = %address, "Starting KServe gRPC service on: {address}");

        let observer = cancel_token.child_token();
        Server::builder()
            .add_service(GrpcInferenceServiceServer::new(self.clone()))
            .serve_with_shutdown(address.parse()?, observer.cancelled_owned())
            .await
            .inspect_err(|_| cancel_token.cancel())?;

        Ok(())
    }
}

impl KserveServiceConfigBuilder {
    pub fn build(self) -> Result<KserveService, anyhow::Error> {
        let config: KserveServiceConfig = self.build_internal()?;

        Ok(KserveService {
            state: Arc::new(State::new(config.dataplane)),
            port: config.port,
            host: config.host,
        })
    }
}

fn tensor_metadata(tensors: Vec<TensorMetadata>) -> Vec<inference::model_metadata_response::TensorMetadata> {
    tensors
        .into_iter()
        .map(|tensor| inference::model_metadata_response::TensorMetadata {
            name: tensor.name,
            datatype: tensor.datatype.to_string(),
            shape: tensor.shape,
        })
        .collect()
}

// A v1 style model answers with JSON; it must still hold a v2 response.
fn into_infer_response(result: InferResult) -> Result<InferResponse, DataPlaneError> {
    match result {
        InferResult::V2(response) => Ok(response),
        InferResult::Json(value) => InferResponse::from_rest(value).map_err(|e| {
            DataPlaneError::inference(format!(
                "Model returned a response that is not a v2 inference response: {e}"
            ))
        }),
    }
}

#[tonic::async_trait]
impl GrpcInferenceService for KserveService {
    async fn server_live(
        &self,
        _request: Request<ServerLiveRequest>,
    ) -> Result<Response<ServerLiveResponse>, Status> {
        let live = self.dataplane().live().await?;
        Ok(Response::new(ServerLiveResponse { live }))
    }

    async fn server_ready(
        &self,
        _request: Request<ServerReadyRequest>,
    ) -> Result<Response<ServerReadyResponse>, Status> {
        let ready = self.dataplane().ready().await?;
        Ok(Response::new(ServerReadyResponse { ready }))
    }

    async fn model_ready(
        &self,
        request: Request<ModelReadyRequest>,
    ) -> Result<Response<ModelReadyResponse>, Status> {
        let name = request.into_inner().name;
        let ready = self.dataplane().model_ready(&name).await?;
        Ok(Response::new(ModelReadyResponse { ready }))
    }

    async fn server_metadata(
        &self,
        _request: Request<ServerMetadataRequest>,
    ) -> Result<Response<ServerMetadataResponse>, Status> {
        let metadata = self.dataplane().metadata();
        Ok(Response::new(ServerMetadataResponse {
            name: metadata.name,
            version: metadata.version,
            extensions: metadata.extensions,
        }))
    }

    async fn model_metadata(
        &self,
        request: Request<ModelMetadataRequest>,
    ) -> Result<Response<ModelMetadataResponse>, Status> {
        let name = request.into_inner().name;
        let metadata = self.dataplane().model_metadata(&name)?;
        Ok(Response::new(ModelMetadataResponse {
            name: metadata.name,
            versions: metadata.versions,
            platform: metadata.platform,
            inputs: tensor_metadata(metadata.inputs),
            outputs: tensor_metadata(metadata.outputs),
        }))
    }

    async fn model_infer(
        &self,
        request: Request<ModelInferRequest>,
    ) -> Result<Response<ModelInferResponse>, Status> {
        let headers = request.metadata().clone().into_headers();
        let request = InferRequest::try_from(request.into_inner())?;
        let model_name = request.model_name.clone();
        let request_id = request.id.clone();

        let (result, _) = self
            .dataplane()
            .infer(&model_name, InferPayload::V2(request), &headers)
            .await
            .inspect_err(|e| tracing::debug!(model = %model_name, error = %e, "gRPC inference failed"))?;

        let mut response = into_infer_response(result)?;
        if response.id.is_empty() {
            response.id = request_id;
        }
        if response.model_name.is_empty() {
            response.model_name = model_name;
        }
        let reply = ModelInferResponse::try_from(&response)?;
        Ok(Response::new(reply))
    }

    async fn repository_model_load(
        &self,
        request: Request<RepositoryModelLoadRequest>,
    ) -> Result<Response<RepositoryModelLoadResponse>, Status> {
        let model_name = request.into_inner().model_name;
        let is_loaded = self.dataplane().load(&model_name).await?;
        Ok(Response::new(RepositoryModelLoadResponse {
            model_name,
            is_loaded,
        }))
    }

    async fn repository_model_unload(
        &self,
        request: Request<RepositoryModelUnloadRequest>,
    ) -> Result<Response<RepositoryModelUnloadResponse>, Status> {
        let model_name = request.into_inner().model_name;
        self.dataplane().unload(&model_name).await?;
        Ok(Response::new(RepositoryModelUnloadResponse {
            model_name,
            is_unloaded: true,
        }))
    }
}
