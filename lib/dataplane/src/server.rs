// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! HTTP and gRPC frontends sharing one [`DataPlane`], wired from [`ServerConfig`].

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use kserve_runtime::ServerConfig;

use crate::dataplane::DataPlane;
use crate::grpc::service::kserve::KserveService;
use crate::http::service::HttpService;
use crate::model_repository::ModelRepository;

pub struct ModelServer {
    dataplane: Arc<DataPlane>,
    http: HttpService,
    grpc: KserveService,
}

impl ModelServer {
    pub fn from_config(config: &ServerConfig, repository: Arc<ModelRepository>) -> Result<Self> {
        let dataplane = Arc::new(DataPlane::from_config(config, repository)?);
        let http = HttpService::from_config(config, dataplane.clone())?;
        let grpc = KserveService::from_config(config, dataplane.clone())?;
        Ok(Self {
            dataplane,
            http,
            grpc,
        })
    }

    pub fn dataplane(&self) -> &Arc<DataPlane> {
        &self.dataplane
    }

    pub fn http(&self) -> &HttpService {
        &self.http
    }

    pub fn grpc(&self) -> &KserveService {
        &self.grpc
    }

    /// Loads every model under the models directory, then serves both
    /// protocols until `cancel_token` is cancelled or one of them fails.
    pub async fn run(&self, cancel_token: CancellationToken) -> Result<()> {
        self.dataplane.repository().load_models().await?;
        tracing::info!(
            models = self.dataplane.repository().get_models().len(),
            "model repository loaded"
        );

        let grpc = self.grpc.spawn(cancel_token.clone()).await;
        let http = self.http.run(cancel_token.clone()).await;

        // Either service stopping takes the other one down
        cancel_token.cancel();
        let grpc = grpc.await?;
        http.and(grpc)
    }
}
