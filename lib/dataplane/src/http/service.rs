// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! REST frontends for the V1 and Open Inference Protocol V2 APIs.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use axum::{Router, http::Method, http::StatusCode, response::IntoResponse};
use derive_builder::Builder;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use kserve_runtime::ServerConfig;
use kserve_runtime::logging::make_request_span;

use crate::dataplane::DataPlane;

pub mod health;
pub mod v1;
pub mod v2;

/// Method and path of a mounted route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDoc {
    method: Method,
    path: String,
}

impl RouteDoc {
    pub fn new<T: Into<String>>(method: Method, path: T) -> Self {
        RouteDoc {
            method,
            path: path.into(),
        }
    }
}

impl fmt::Display for RouteDoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

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
pub struct HttpService {
    state: Arc<State>,
    router: Router,
    port: u16,
    host: String,
    route_docs: Vec<RouteDoc>,
}

#[derive(Clone, Builder)]
#[builder(pattern = "owned", build_fn(private, name = "build_internal"))]
pub struct HttpServiceConfig {
    #[builder(default = "8080")]
    port: u16,

    #[builder(setter(into), default = "String::from(\"0.0.0.0\")")]
    host: String,

    dataplane: Arc<DataPlane>,
}

impl HttpService {
    pub fn builder() -> HttpServiceConfigBuilder {
        HttpServiceConfigBuilder::default()
    }

    /// Listens on `http_host:http_port` from `config`.
    pub fn from_config(config: &ServerConfig, dataplane: Arc<DataPlane>) -> Result<Self> {
        Self::builder()
            .host(config.http_host.clone())
            .port(config.http_port)
            .dataplane(dataplane)
            .build()
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn state_clone(&self) -> Arc<State> {
        self.state.clone()
    }

    pub fn route_docs(&self) -> &[RouteDoc] {
        &self.route_docs
    }

    pub async fn spawn(&self, cancel_token: CancellationToken) -> JoinHandle<Result<()>> {
        let this = self.clone();
        tokio::spawn(async move { this.run(cancel_token).await })
    }

    pub async fn run(&self, cancel_token: CancellationToken) -> Result<()> {
        let address = self.address();
        tracing::info!(address = %address, "Starting HTTP service on: {address}");

        let listener = TcpListener::bind(&address).await.inspect_err(|e| {
            tracing::error!(address = %address, error = %e, "failed to bind HTTP service");
        })?;

        let observer = cancel_token.child_token();
        axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(observer.cancelled_owned())
            .await
            .inspect_err(|_| cancel_token.cancel())?;

        Ok(())
    }
}

impl HttpServiceConfigBuilder {
    pub fn build(self) -> Result<HttpService, anyhow::Error> {
        let config: HttpServiceConfig = self.build_internal()?;
        let state = Arc::new(State::new(config.dataplane));

        let mut router = Router::new();
        let mut route_docs = Vec::new();
        for (docs, route) in [
            health::health_router(state.clone()),
            v1::v1_router(state.clone()),
            v2::v2_router(state.clone()),
        ] {
            route_docs.extend(docs);
            router = router.merge(route);
        }

        for doc in &route_docs {
            tracing::debug!(route = %doc, "mounted route");
        }

        let router = router
            .fallback(|| async { (StatusCode::NOT_FOUND, "Route not found").into_response() })
            .layer(TraceLayer::new_for_http().make_span_with(make_request_span));

        Ok(HttpService {
            state,
            router,
            port: config.port,
            host: config.host,
            route_docs,
        })
    }
}
