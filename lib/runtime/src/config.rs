// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use derive_builder::Builder;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

pub mod environment_names;

const DEFAULT_HTTP_HOST: &str = "0.0.0.0";
const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_GRPC_HOST: &str = "0.0.0.0";
const DEFAULT_GRPC_PORT: u16 = 8081;

/// Default upstream request timeout
pub const DEFAULT_PREDICTOR_REQUEST_TIMEOUT_SECS: u64 = 600;

/// Name reported by server metadata
pub const DEFAULT_SERVER_NAME: &str = "kserve-dataplane";

/// System-wide config file, lowest priority after the built-in defaults
const SYSTEM_CONFIG_PATH: &str = "/opt/kserve/etc/server.toml";

/// Wire protocol spoken to the remote predictor
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy, Default)]
pub enum PredictorProtocol {
    #[default]
    #[serde(rename = "v1")]
    RestV1,
    #[serde(rename = "v2")]
    RestV2,
    #[serde(rename = "grpc-v2")]
    GrpcV2,
}

impl fmt::Display for PredictorProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PredictorProtocol::RestV1 => "v1",
            PredictorProtocol::RestV2 => "v2",
            PredictorProtocol::GrpcV2 => "grpc-v2",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for PredictorProtocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "v1" => Ok(PredictorProtocol::RestV1),
            "v2" => Ok(PredictorProtocol::RestV2),
            "grpc-v2" => Ok(PredictorProtocol::GrpcV2),
            other => anyhow::bail!(
                "Invalid predictor protocol: '{other}'. Expected one of: v1, v2, grpc-v2"
            ),
        }
    }
}

/// Server configuration
/// Defines the listeners, the optional remote predictor and the model directory
#[derive(Serialize, Deserialize, Validate, Debug, Builder, Clone, PartialEq)]
#[builder(build_fn(private, name = "build_internal"), derive(Debug, Serialize))]
pub struct ServerConfig {
    /// HTTP listener host
    /// Set this at runtime with environment variable KSERVE_HTTP_HOST
    #[builder(default = "DEFAULT_HTTP_HOST.to_string()")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub http_host: String,

    /// HTTP listener port
    /// Set this at runtime with environment variable KSERVE_HTTP_PORT
    #[builder(default = "DEFAULT_HTTP_PORT")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub http_port: u16,

    /// gRPC listener host
    /// Set this at runtime with environment variable KSERVE_GRPC_HOST
    #[builder(default = "DEFAULT_GRPC_HOST.to_string()")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub grpc_host: String,

    /// gRPC listener port
    /// Set this at runtime with environment variable KSERVE_GRPC_PORT
    #[builder(default = "DEFAULT_GRPC_PORT")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub grpc_port: u16,

    /// Remote predictor `host[:port]`. When set the server runs in transformer mode
    /// Set this at runtime with environment variable KSERVE_PREDICTOR_HOST
    #[builder(default = "None")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub predictor_host: Option<String>,

    /// Set this at runtime with environment variable KSERVE_PREDICTOR_PROTOCOL
    #[builder(default)]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub predictor_protocol: PredictorProtocol,

    /// Use https / TLS when talking to the predictor
    #[builder(default = "false")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub predictor_use_ssl: bool,

    /// Upstream request timeout in seconds
    /// Set this at runtime with environment variable KSERVE_PREDICTOR_REQUEST_TIMEOUT_SECS
    #[validate(range(min = 1))]
    #[builder(default = "DEFAULT_PREDICTOR_REQUEST_TIMEOUT_SECS")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub predictor_request_timeout_secs: u64,

    /// Probe the predictor's liveness/readiness as part of our own
    #[builder(default = "false")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub enable_predictor_health_check: bool,

    /// Directory whose subdirectories are loaded as models on startup
    #[builder(default = "None")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub model_dir: Option<PathBuf>,

    /// Name reported by server metadata
    #[validate(length(min = 1))]
    #[builder(default = "DEFAULT_SERVER_NAME.to_string()")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub server_name: String,
}

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http={}:{}, ", self.http_host, self.http_port)?;
        write!(f, "grpc={}:{}, ", self.grpc_host, self.grpc_port)?;
        match &self.predictor_host {
            Some(host) => write!(
                f,
                "predictor={host} ({}, ssl={}, timeout={}s, health_check={}), ",
                self.predictor_protocol,
                self.predictor_use_ssl,
                self.predictor_request_timeout_secs,
                self.enable_predictor_health_check
            )?,
            None => write!(f, "predictor=none, ")?,
        }
        match &self.model_dir {
            Some(dir) => write!(f, "model_dir={}, ", dir.display())?,
            None => write!(f, "model_dir=none, ")?,
        }
        write!(f, "server_name={}", self.server_name)
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    pub(crate) fn figment() -> Figment {
        use environment_names::server;

        let mut figment = Figment::new()
            .merge(Serialized::defaults(ServerConfig::default()))
            .merge(Toml::file(SYSTEM_CONFIG_PATH));

        if let Ok(path) = std::env::var(server::KSERVE_CONFIG_PATH)
            && !path.is_empty()
        {
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(Env::prefixed(server::PREFIX).filter_map(|k| {
            let full_key = format!("{}{}", server::PREFIX, k.as_str());
            // filters out empty environment variables
            match std::env::var(&full_key) {
                Ok(v) if !v.is_empty() => Some(k.into()),
                _ => None,
            }
        }))
    }

    /// Load the server configuration from the environment and configuration files
    /// Configuration is prioritised in the following order, where the last has the lowest priority:
    /// 1. Environment variables prefixed with `KSERVE_`
    /// 2. The TOML file named by `KSERVE_CONFIG_PATH`
    /// 3. /opt/kserve/etc/server.toml
    /// 4. Built-in defaults
    pub fn from_settings() -> Result<ServerConfig> {
        let config: ServerConfig = Self::figment().extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Transformer mode: requests are forwarded to a remote predictor
    pub fn is_transformer(&self) -> bool {
        self.predictor_host.is_some()
    }

    pub fn predictor_request_timeout(&self) -> Duration {
        Duration::from_secs(self.predictor_request_timeout_secs)
    }

    pub fn http_address(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    pub fn grpc_address(&self) -> String {
        format!("{}:{}", self.grpc_host, self.grpc_port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            grpc_host: DEFAULT_GRPC_HOST.to_string(),
            grpc_port: DEFAULT_GRPC_PORT,
            predictor_host: None,
            predictor_protocol: PredictorProtocol::default(),
            predictor_use_ssl: false,
            predictor_request_timeout_secs: DEFAULT_PREDICTOR_REQUEST_TIMEOUT_SECS,
            enable_predictor_health_check: false,
            model_dir: None,
            server_name: DEFAULT_SERVER_NAME.to_string(),
        }
    }
}

impl ServerConfigBuilder {
    /// Build and validate the server configuration
    pub fn build(&self) -> Result<ServerConfig> {
        let config = self.build_internal()?;
        config.validate()?;
        Ok(config)
    }
}

/// Check if a string is truthy
/// This will be used to evaluate environment variables or any other subjective
/// configuration parameters that can be set by the user that should be evaluated
/// as a boolean value.
pub fn is_truthy(val: &str) -> bool {
    matches!(val.to_lowercase().as_str(), "1" | "true" | "on" | "yes")
}

pub fn parse_bool(val: &str) -> anyhow::Result<bool> {
    if is_truthy(val) {
        Ok(true)
    } else if is_falsey(val) {
        Ok(false)
    } else {
        anyhow::bail!(
            "Invalid boolean value: '{}'. Expected one of: true/false, 1/0, on/off, yes/no",
            val
        )
    }
}

/// Check if a string is falsey (opposite of [`is_truthy`])
pub fn is_falsey(val: &str) -> bool {
    matches!(val.to_lowercase().as_str(), "0" | "false" | "off" | "no")
}

/// Check if an environment variable is truthy
pub fn env_is_truthy(env: &str) -> bool {
    match std::env::var(env) {
        Ok(val) => is_truthy(val.as_str()),
        Err(_) => false,
    }
}

/// Check if an environment variable is falsey
pub fn env_is_falsey(env: &str) -> bool {
    match std::env::var(env) {
        Ok(val) => is_falsey(val.as_str()),
        Err(_) => false,
    }
}

/// Check whether JSONL logging enabled
/// Set the `KSERVE_LOGGING_JSONL` environment variable a [`is_truthy`] value
pub fn jsonl_logging_enabled() -> bool {
    env_is_truthy(environment_names::logging::KSERVE_LOGGING_JSONL)
}

/// Check whether logging with ANSI terminal escape codes and colors is disabled.
/// Set the `KSERVE_DISABLE_ANSI_LOGGING` environment variable a [`is_truthy`] value
pub fn disable_ansi_logging() -> bool {
    env_is_truthy(environment_names::logging::KSERVE_DISABLE_ANSI_LOGGING)
}

/// Check whether to use local timezone for logging timestamps (default is UTC)
pub fn use_local_timezone() -> bool {
    env_is_truthy(environment_names::logging::KSERVE_LOG_USE_LOCAL_TZ)
}
