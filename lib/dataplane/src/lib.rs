// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! # KServe Data Plane
//!
//! Serves models over the V1 REST, Open Inference Protocol V2 REST and V2 gRPC
//! APIs. Requests from every protocol are decoded into [`protocols::InferRequest`]
//! (or raw JSON for V1), dispatched through [`dataplane::DataPlane`] to a model
//! registered in the [`model_repository::ModelRepository`], and encoded back
//! into the caller's protocol.

pub mod cloudevent;
pub mod dataplane;
pub mod error;
pub mod grpc;
pub mod http;
pub mod model;
pub mod model_repository;
pub mod predictor;
pub mod protocols;
pub mod server;

pub use dataplane::DataPlane;
pub use error::{DataPlaneError, Result};
pub use model::{InferPayload, InferResult, Model, ModelKind};
pub use model_repository::{ModelHandle, ModelRepository};
pub use server::ModelServer;
