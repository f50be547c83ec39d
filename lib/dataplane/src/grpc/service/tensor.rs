// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use bytes::Bytes;

use super::kserve::inference;
use crate::error::{DataPlaneError, Result};
use crate::protocols::infer_type::{
    BINARY_DATA_SIZE, InferRequest, InferResponse, InferTensor, RequestedOutput, TensorContents,
};
use crate::protocols::tensor::{DataType, FlattenTensor, ParameterValue, Parameters};

use inference::infer_parameter::ParameterChoice;

/// Convert KServe InferParameter to ParameterValue
pub fn grpc_param_to_value(key: &str, param: &inference::InferParameter) -> Result<ParameterValue> {
    param
        .parameter_choice
        .as_ref()
        .ok_or_else(|| DataPlaneError::InvalidInput(format!("Parameter '{key}' has no value")))
        .map(|choice| match choice {
            ParameterChoice::BoolParam(v) => ParameterValue::Bool(*v),
            ParameterChoice::Int64Param(v) => ParameterValue::Int64(*v),
            ParameterChoice::StringParam(v) => ParameterValue::String(v.clone()),
        })
}

/// Convert ParameterValue to KServe InferParameter
pub fn value_to_grpc_param(param: &ParameterValue) -> inference::InferParameter {
    let parameter_choice = match param {
        ParameterValue::Bool(v) => ParameterChoice::BoolParam(*v),
        ParameterValue::Int64(v) => ParameterChoice::Int64Param(*v),
        ParameterValue::String(v) => ParameterChoice::StringParam(v.clone()),
    };

    inference::InferParameter {
        parameter_choice: Some(parameter_choice),
    }
}

fn params_from_grpc(params: &HashMap<String, inference::InferParameter>) -> Result<Parameters> {
    params
        .iter()
        .map(|(k, v)| grpc_param_to_value(k, v).map(|value| (k.clone(), value)))
        .collect()
}

// binary_data_size only has meaning on the REST wire
fn params_to_grpc(params: &Parameters) -> HashMap<String, inference::InferParameter> {
    params
        .iter()
        .filter(|(k, _)| k.as_str() != BINARY_DATA_SIZE)
        .map(|(k, v)| (k.clone(), value_to_grpc_param(v)))
        .collect()
}

fn narrow<S: Copy, T: TryFrom<S>>(name: &str, datatype: DataType, values: &[S]) -> Result<Vec<T>> {
    values
        .iter()
        .map(|&v| T::try_from(v))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| {
            DataPlaneError::InvalidInput(format!(
                "Contents of tensor {name} are out of range for {datatype}"
            ))
        })
}

fn tensor_from_contents(
    name: &str,
    datatype: DataType,
    contents: inference::InferTensorContents,
) -> Result<FlattenTensor> {
    Ok(match datatype {
        DataType::Bool => FlattenTensor::Bool(contents.bool_contents),
        DataType::Uint8 => FlattenTensor::Uint8(narrow(name, datatype, &contents.uint_contents)?),
        DataType::Uint16 => FlattenTensor::Uint16(narrow(name, datatype, &contents.uint_contents)?),
        DataType::Uint32 => FlattenTensor::Uint32(contents.uint_contents),
        DataType::Uint64 => FlattenTensor::Uint64(contents.uint64_contents),
        DataType::Int8 => FlattenTensor::Int8(narrow(name, datatype, &contents.int_contents)?),
        DataType::Int16 => FlattenTensor::Int16(narrow(name, datatype, &contents.int_contents)?),
        DataType::Int32 => FlattenTensor::Int32(contents.int_contents),
        DataType::Int64 => FlattenTensor::Int64(contents.int64_contents),
        DataType::Float16 => {
            return Err(DataPlaneError::InvalidInput(format!(
                "Tensor {name} is FP16 which must be sent in raw contents"
            )));
        }
        DataType::Float32 => FlattenTensor::Float32(contents.fp32_contents),
        DataType::Float64 => FlattenTensor::Float64(contents.fp64_contents),
        DataType::Bytes => FlattenTensor::Bytes(contents.bytes_contents),
    })
}

fn tensor_contents(name: &str, data: &FlattenTensor) -> Result<inference::InferTensorContents> {
    Ok(match data {
        FlattenTensor::Bool(data) => inference::InferTensorContents {
            bool_contents: data.clone(),
            ..Default::default()
        },
        FlattenTensor::Uint8(data) => inference::InferTensorContents {
            uint_contents: data.iter().map(|&x| x as u32).collect(),
            ..Default::default()
        },
        FlattenTensor::Uint16(data) => inference::InferTensorContents {
            uint_contents: data.iter().map(|&x| x as u32).collect(),
            ..Default::default()
        },
        FlattenTensor::Uint32(data) => inference::InferTensorContents {
            uint_contents: data.clone(),
            ..Default::default()
        },
        FlattenTensor::Uint64(data) => inference::InferTensorContents {
            uint64_contents: data.clone(),
            ..Default::default()
        },
        FlattenTensor::Int8(data) => inference::InferTensorContents {
            int_contents: data.iter().map(|&x| x as i32).collect(),
            ..Default::default()
        },
        FlattenTensor::Int16(data) => inference::InferTensorContents {
            int_contents: data.iter().map(|&x| x as i32).collect(),
            ..Default::default()
        },
        FlattenTensor::Int32(data) => inference::InferTensorContents {
            int_contents: data.clone(),
            ..Default::default()
        },
        FlattenTensor::Int64(data) => inference::InferTensorContents {
            int64_contents: data.clone(),
            ..Default::default()
        },
        FlattenTensor::Float16(_) => {
            return Err(DataPlaneError::InvalidInput(format!(
                "Tensor {name} is FP16 which must be sent in raw contents"
            )));
        }
        FlattenTensor::Float32(data) => inference::InferTensorContents {
            fp32_contents: data.clone(),
            ..Default::default()
        },
        FlattenTensor::Float64(data) => inference::InferTensorContents {
            fp64_contents: data.clone(),
            ..Default::default()
        },
        FlattenTensor::Bytes(data) => inference::InferTensorContents {
            bytes_contents: data.clone(),
            ..Default::default()
        },
    })
}

/// Fields shared by the gRPC input and output tensor messages.
struct GrpcTensor {
    name: String,
    datatype: String,
    shape: Vec<i64>,
    parameters: HashMap<String, inference::InferParameter>,
    contents: Option<inference::InferTensorContents>,
}

impl From<inference::model_infer_request::InferInputTensor> for GrpcTensor {
    fn from(t: inference::model_infer_request::InferInputTensor) -> Self {
        Self {
            name: t.name,
            datatype: t.datatype,
            shape: t.shape,
            parameters: t.parameters,
            contents: t.contents,
        }
    }
}

impl From<inference::model_infer_response::InferOutputTensor> for GrpcTensor {
    fn from(t: inference::model_infer_response::InferOutputTensor) -> Self {
        Self {
            name: t.name,
            datatype: t.datatype,
            shape: t.shape,
            parameters: t.parameters,
            contents: t.contents,
        }
    }
}

/// Decodes the tensors of a message. When `raw` is non-empty every tensor
/// takes its data from the raw buffer at the same position.
fn decode_tensors(tensors: Vec<GrpcTensor>, raw: Vec<Vec<u8>>, field: &str) -> Result<Vec<InferTensor>> {
    // Protocol requires if raw contents are used to hold tensor data,
    // they must be used for all tensors.
    if !raw.is_empty() && tensors.len() != raw.len() {
        return Err(DataPlaneError::InvalidInput(format!(
            "`{field}` must be used for all tensors, got {} raw contents for {} tensors",
            raw.len(),
            tensors.len()
        )));
    }
    let use_raw = !raw.is_empty();
    let mut raw = raw.into_iter();

    tensors
        .into_iter()
        .map(|t| {
            if use_raw && t.contents.is_some() {
                return Err(DataPlaneError::InvalidInput(format!(
                    "contents field must not be specified when using {field}. Got tensor {}",
                    t.name
                )));
            }
            let mut tensor = InferTensor {
                datatype: t.datatype.parse()?,
                parameters: params_from_grpc(&t.parameters)?,
                name: t.name,
                shape: t.shape,
                contents: TensorContents::Empty,
            };
            match raw.next() {
                Some(buffer) => tensor.set_raw(Bytes::from(buffer))?,
                None => {
                    let data = tensor_from_contents(
                        &tensor.name,
                        tensor.datatype,
                        t.contents.unwrap_or_default(),
                    )?;
                    tensor.set_data(data, false)?;
                }
            }
            Ok(tensor)
        })
        .collect()
}

/// Encodes one tensor, appending to `raw` when raw contents are in use.
fn encode_tensor(
    tensor: &InferTensor,
    use_raw: bool,
    raw: &mut Vec<Vec<u8>>,
) -> Result<Option<inference::InferTensorContents>> {
    if use_raw {
        raw.push(tensor.raw_bytes()?.to_vec());
        Ok(None)
    } else {
        Ok(Some(tensor_contents(&tensor.name, &tensor.as_tensor()?)?))
    }
}

// The protocol is all-or-nothing for raw contents, so a single binary or
// FP16 tensor moves every tensor to raw form.
fn needs_raw(tensors: &[InferTensor]) -> bool {
    tensors
        .iter()
        .any(|t| t.is_binary() || t.datatype.requires_binary())
}

impl TryFrom<inference::ModelInferRequest> for InferRequest {
    type Error = DataPlaneError;

    fn try_from(request: inference::ModelInferRequest) -> Result<Self, Self::Error> {
        let use_binary_outputs = !request.raw_input_contents.is_empty();
        let inputs = decode_tensors(
            request.inputs.into_iter().map(GrpcTensor::from).collect(),
            request.raw_input_contents,
            "raw_input_contents",
        )?;

        let request_outputs = request
            .outputs
            .into_iter()
            .map(|output| {
                Ok(RequestedOutput {
                    parameters: params_from_grpc(&output.parameters)?,
                    name: output.name,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let infer_request = InferRequest {
            id: if !request.id.is_empty() {
                request.id
            } else {
                uuid::Uuid::new_v4().to_string()
            },
            model_name: request.model_name,
            model_version: Some(request.model_version).filter(|v| !v.is_empty()),
            parameters: params_from_grpc(&request.parameters)?,
            inputs,
            request_outputs,
            from_grpc: true,
            use_binary_outputs,
        };
        infer_request.validate_request_outputs()?;
        Ok(infer_request)
    }
}

impl TryFrom<&InferRequest> for inference::ModelInferRequest {
    type Error = DataPlaneError;

    fn try_from(request: &InferRequest) -> Result<Self, Self::Error> {
        let use_raw = needs_raw(&request.inputs);
        let mut infer_request = inference::ModelInferRequest {
            model_name: request.model_name.clone(),
            model_version: request.model_version.clone().unwrap_or_default(),
            id: request.id.clone(),
            parameters: params_to_grpc(&request.parameters),
            inputs: Vec::with_capacity(request.inputs.len()),
            outputs: request
                .request_outputs
                .iter()
                .map(|output| inference::model_infer_request::InferRequestedOutputTensor {
                    name: output.name.clone(),
                    parameters: params_to_grpc(&output.parameters),
                })
                .collect(),
            raw_input_contents: vec![],
        };

        for input in &request.inputs {
            let contents = encode_tensor(input, use_raw, &mut infer_request.raw_input_contents)?;
            infer_request
                .inputs
                .push(inference::model_infer_request::InferInputTensor {
                    name: input.name.clone(),
                    datatype: input.datatype.to_string(),
                    shape: input.shape.clone(),
                    parameters: params_to_grpc(&input.parameters),
                    contents,
                });
        }
        Ok(infer_request)
    }
}

impl TryFrom<inference::ModelInferResponse> for InferResponse {
    type Error = DataPlaneError;

    fn try_from(response: inference::ModelInferResponse) -> Result<Self, Self::Error> {
        let use_binary_outputs = !response.raw_output_contents.is_empty();
        let outputs = decode_tensors(
            response.outputs.into_iter().map(GrpcTensor::from).collect(),
            response.raw_output_contents,
            "raw_output_contents",
        )?;

        Ok(InferResponse {
            id: response.id,
            model_name: response.model_name,
            model_version: Some(response.model_version).filter(|v| !v.is_empty()),
            parameters: params_from_grpc(&response.parameters)?,
            outputs,
            from_grpc: true,
            use_binary_outputs,
            request_outputs: Vec::new(),
        })
    }
}

impl TryFrom<&InferResponse> for inference::ModelInferResponse {
    type Error = DataPlaneError;

    fn try_from(response: &InferResponse) -> Result<Self, Self::Error> {
        let use_raw = response.use_binary_outputs || needs_raw(&response.outputs);
        let mut infer_response = inference::ModelInferResponse {
            model_name: response.model_name.clone(),
            model_version: response.model_version.clone().unwrap_or_default(),
            id: response.id.clone(),
            parameters: params_to_grpc(&response.parameters),
            outputs: Vec::with_capacity(response.outputs.len()),
            raw_output_contents: vec![],
        };

        for output in &response.outputs {
            let contents = encode_tensor(output, use_raw, &mut infer_response.raw_output_contents)?;
            infer_response
                .outputs
                .push(inference::model_infer_response::InferOutputTensor {
                    name: output.name.clone(),
                    datatype: output.datatype.to_string(),
                    shape: output.shape.clone(),
                    parameters: params_to_grpc(&output.parameters),
                    contents,
                });
        }
        Ok(infer_response)
    }
}
