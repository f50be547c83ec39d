// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Shared runtime concerns of the KServe data plane: layered server
//! configuration and structured logging.

pub use anyhow::{
    Context as ErrorContext, Error, Ok as OK, Result, anyhow as error, bail as raise,
};

pub mod config;
pub mod logging;

pub use config::{DEFAULT_SERVER_NAME, PredictorProtocol, ServerConfig, ServerConfigBuilder};
pub use tokio_util::sync::CancellationToken;
