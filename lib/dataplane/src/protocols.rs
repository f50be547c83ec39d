// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod codec;
pub mod infer_type;
pub mod tensor;

pub use infer_type::{
    InferInput, InferOutput, InferRequest, InferResponse, InferTensor, RequestedOutput,
    TensorContents,
};
pub use tensor::{DataType, FlattenTensor, ParameterValue, Parameters, TensorMetadata};
