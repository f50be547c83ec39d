// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Protocol-neutral inference request/response types and their REST v2 wire form.
//!
//! The REST v2 body is a JSON document optionally followed by a binary block.
//! Every tensor whose parameters carry `binary_data_size` takes that many bytes
//! from the block, in tensor order. The JSON prefix length travels in the
//! `inference-header-content-length` header.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::codec;
use super::tensor::{DataType, FlattenTensor, ParameterValue, Parameters};
use crate::error::{DataPlaneError, Result};

/// Byte length of a tensor's slice of the binary block.
pub const BINARY_DATA_SIZE: &str = "binary_data_size";
/// Request-level flag asking for every output in binary form.
pub const BINARY_DATA_OUTPUT: &str = "binary_data_output";
/// Per requested output flag.
pub const BINARY_DATA: &str = "binary_data";
/// HTTP header carrying the JSON prefix length of a hybrid body.
pub const INFERENCE_HEADER_CONTENT_LENGTH: &str = "inference-header-content-length";

#[derive(Debug, Clone, PartialEq, Default)]
pub enum TensorContents {
    #[default]
    Empty,
    Data(FlattenTensor),
    /// Little-endian packed elements, see [`codec::encode_raw`]
    Raw(Bytes),
}

/// A named tensor of an inference request or response.
#[derive(Debug, Clone, PartialEq)]
pub struct InferTensor {
    pub name: String,
    pub shape: Vec<i64>,
    pub datatype: DataType,
    pub parameters: Parameters,
    pub contents: TensorContents,
}

pub type InferInput = InferTensor;
pub type InferOutput = InferTensor;

impl InferTensor {
    pub fn new(name: impl Into<String>, shape: Vec<i64>, datatype: DataType) -> Self {
        Self {
            name: name.into(),
            shape,
            datatype,
            parameters: Parameters::new(),
            contents: TensorContents::Empty,
        }
    }

    /// Tensor holding `data` inline. The datatype is taken from the data.
    pub fn with_data(name: impl Into<String>, shape: Vec<i64>, data: FlattenTensor) -> Result<Self> {
        let mut tensor = Self::new(name, shape, data.data_type());
        let binary = tensor.datatype.requires_binary();
        tensor.set_data(data, binary)?;
        Ok(tensor)
    }

    /// Replaces the contents. With `binary` the elements are packed into raw
    /// bytes and `binary_data_size` records their length.
    pub fn set_data(&mut self, data: FlattenTensor, binary: bool) -> Result<()> {
        if data.data_type() != self.datatype {
            return Err(DataPlaneError::InvalidInput(format!(
                "Tensor {} has datatype {} but data of type {} was provided",
                self.name,
                self.datatype,
                data.data_type()
            )));
        }
        codec::validate_shape(&self.shape, data.len())?;

        if binary {
            let raw = codec::encode_raw(&data);
            self.parameters.insert(
                BINARY_DATA_SIZE.to_string(),
                ParameterValue::Int64(raw.len() as i64),
            );
            self.contents = TensorContents::Raw(Bytes::from(raw));
        } else {
            if self.datatype.requires_binary() {
                return Err(DataPlaneError::InvalidInput(format!(
                    "Tensor {} is {} which can only be sent as binary data",
                    self.name, self.datatype
                )));
            }
            self.parameters.remove(BINARY_DATA_SIZE);
            self.contents = TensorContents::Data(data);
        }
        Ok(())
    }

    /// Stores already packed bytes after checking them against shape and datatype.
    pub fn set_raw(&mut self, raw: Bytes) -> Result<()> {
        codec::decode_raw(&raw, &self.shape, self.datatype).map_err(|e| {
            DataPlaneError::InvalidInput(format!("Invalid raw contents for tensor {}: {e}", self.name))
        })?;
        self.parameters.insert(
            BINARY_DATA_SIZE.to_string(),
            ParameterValue::Int64(raw.len() as i64),
        );
        self.contents = TensorContents::Raw(raw);
        Ok(())
    }

    /// Typed elements, decoding raw contents when needed.
    pub fn as_tensor(&self) -> Result<FlattenTensor> {
        match &self.contents {
            TensorContents::Data(data) => Ok(data.clone()),
            TensorContents::Raw(raw) => codec::decode_raw(raw, &self.shape, self.datatype),
            TensorContents::Empty => Err(self.empty_error()),
        }
    }

    /// Packed bytes, encoding typed contents when needed.
    pub fn raw_bytes(&self) -> Result<Bytes> {
        match &self.contents {
            TensorContents::Raw(raw) => Ok(raw.clone()),
            TensorContents::Data(data) => Ok(Bytes::from(codec::encode_raw(data))),
            TensorContents::Empty => Err(self.empty_error()),
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self.contents, TensorContents::Raw(_))
    }

    fn empty_error(&self) -> DataPlaneError {
        DataPlaneError::InvalidInput(format!("Tensor {} has no data", self.name))
    }

    fn to_rest(&self, binary: bool, block: &mut Vec<u8>) -> Result<RestTensor> {
        let mut parameters = self.parameters.clone();
        let data = if binary {
            let raw = self.raw_bytes()?;
            parameters.insert(
                BINARY_DATA_SIZE.to_string(),
                ParameterValue::Int64(raw.len() as i64),
            );
            block.extend_from_slice(&raw);
            None
        } else {
            parameters.remove(BINARY_DATA_SIZE);
            Some(Value::Array(codec::encode_json(&self.as_tensor()?)?))
        };
        Ok(RestTensor {
            name: self.name.clone(),
            shape: self.shape.clone(),
            datatype: self.datatype.to_string(),
            parameters,
            data,
        })
    }

    fn from_rest(wire: RestTensor, cursor: &mut BinaryCursor<'_>) -> Result<Self> {
        let datatype: DataType = wire.datatype.parse()?;
        let mut tensor = Self {
            name: wire.name,
            shape: wire.shape,
            datatype,
            parameters: wire.parameters,
            contents: TensorContents::Empty,
        };

        let binary_size = tensor
            .parameters
            .get(BINARY_DATA_SIZE)
            .map(|size| size.as_i64().and_then(|s| usize::try_from(s).ok()));

        match (binary_size, wire.data) {
            (Some(size), _) => {
                let size = size.ok_or_else(|| {
                    DataPlaneError::InvalidInput(format!(
                        "binary_data_size of tensor {} must be a non-negative integer",
                        tensor.name
                    ))
                })?;
                let raw = cursor.take(&tensor.name, size)?;
                tensor.set_raw(raw)?;
            }
            (None, Some(data)) => {
                let data = codec::decode_json(&data, &tensor.shape, datatype)?;
                tensor.contents = TensorContents::Data(data);
            }
            (None, None) => {
                return Err(DataPlaneError::InvalidInput(format!(
                    "Tensor {} has neither data nor binary_data_size",
                    tensor.name
                )));
            }
        }
        Ok(tensor)
    }
}

/// Output requested by the caller, with optional per-output parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestedOutput {
    pub name: String,
    pub parameters: Parameters,
}

impl RequestedOutput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Parameters::new(),
        }
    }

    /// `Some(_)` only when the caller stated a preference
    pub fn binary_data(&self) -> Option<bool> {
        self.parameters.get(BINARY_DATA).and_then(ParameterValue::as_bool)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferRequest {
    pub id: String,
    pub model_name: String,
    pub model_version: Option<String>,
    pub parameters: Parameters,
    pub inputs: Vec<InferInput>,
    pub request_outputs: Vec<RequestedOutput>,
    /// Arrived over gRPC
    pub from_grpc: bool,
    /// Outputs default to binary form
    pub use_binary_outputs: bool,
}

impl InferRequest {
    pub fn new(model_name: impl Into<String>, inputs: Vec<InferInput>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            model_name: model_name.into(),
            model_version: None,
            parameters: Parameters::new(),
            inputs,
            request_outputs: Vec::new(),
            from_grpc: false,
            use_binary_outputs: false,
        }
    }

    pub fn input(&self, name: &str) -> Option<&InferInput> {
        self.inputs.iter().find(|input| input.name == name)
    }

    /// Assigns one raw buffer per input, in input order.
    pub fn with_raw_inputs(&mut self, raw_inputs: Vec<Bytes>) -> Result<()> {
        if raw_inputs.len() != self.inputs.len() {
            return Err(DataPlaneError::InvalidInput(format!(
                "Got {} raw inputs for {} input tensors, raw contents must be used for all inputs",
                raw_inputs.len(),
                self.inputs.len()
            )));
        }
        for (input, raw) in self.inputs.iter_mut().zip(raw_inputs) {
            input.set_raw(raw)?;
        }
        if !self.inputs.is_empty() {
            self.use_binary_outputs = true;
        }
        Ok(())
    }

    /// Each output name may be requested at most once.
    pub fn validate_request_outputs(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for output in &self.request_outputs {
            if !seen.insert(output.name.as_str()) {
                return Err(DataPlaneError::InvalidInput(format!(
                    "Output {} is requested more than once",
                    output.name
                )));
            }
        }
        Ok(())
    }

    /// REST v2 body, plus the JSON prefix length when a binary block follows.
    pub fn to_rest(&self) -> Result<(Vec<u8>, Option<usize>)> {
        let mut block = Vec::new();
        let inputs = self
            .inputs
            .iter()
            .map(|input| {
                let binary = input.is_binary() || input.datatype.requires_binary();
                input.to_rest(binary, &mut block)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut parameters = self.parameters.clone();
        if self.use_binary_outputs {
            parameters.insert(BINARY_DATA_OUTPUT.to_string(), ParameterValue::Bool(true));
        }

        let wire = RestInferRequest {
            id: Some(self.id.clone()),
            parameters,
            inputs,
            outputs: self.request_outputs.iter().map(RestRequestedOutput::from).collect(),
        };
        Ok(frame(serde_json::to_vec(&wire)?, block))
    }

    /// Parses a REST v2 body. `json_length` is `None` when the whole body is JSON.
    pub fn from_bytes(body: &Bytes, json_length: Option<usize>, model_name: &str) -> Result<Self> {
        let json = json_prefix(body, json_length)?;
        let wire: RestInferRequest = serde_json::from_slice(json)?;
        Self::from_wire(wire, BinaryCursor::new(body, json_length), model_name)
    }

    /// Pure JSON form of [`InferRequest::from_bytes`].
    pub fn from_rest(value: Value, model_name: &str) -> Result<Self> {
        let wire: RestInferRequest = serde_json::from_value(value)?;
        let body = Bytes::new();
        Self::from_wire(wire, BinaryCursor::new(&body, None), model_name)
    }

    fn from_wire(
        mut wire: RestInferRequest,
        mut cursor: BinaryCursor<'_>,
        model_name: &str,
    ) -> Result<Self> {
        let use_binary_outputs = match wire.parameters.remove(BINARY_DATA_OUTPUT) {
            None => false,
            Some(value) => value.as_bool().ok_or_else(|| {
                DataPlaneError::InvalidInput(format!(
                    "{BINARY_DATA_OUTPUT} parameter must be a boolean"
                ))
            })?,
        };

        let inputs = wire
            .inputs
            .into_iter()
            .map(|input| InferTensor::from_rest(input, &mut cursor))
            .collect::<Result<Vec<_>>>()?;
        cursor.finish()?;

        let request = Self {
            id: wire
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            model_name: model_name.to_string(),
            model_version: None,
            parameters: wire.parameters,
            inputs,
            request_outputs: wire.outputs.into_iter().map(RequestedOutput::from).collect(),
            from_grpc: false,
            use_binary_outputs,
        };
        request.validate_request_outputs()?;
        Ok(request)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferResponse {
    pub id: String,
    pub model_name: String,
    pub model_version: Option<String>,
    pub parameters: Parameters,
    pub outputs: Vec<InferOutput>,
    pub from_grpc: bool,
    pub use_binary_outputs: bool,
    /// Per-output preferences copied from the request
    pub request_outputs: Vec<RequestedOutput>,
}

impl InferResponse {
    pub fn new(id: impl Into<String>, model_name: impl Into<String>, outputs: Vec<InferOutput>) -> Self {
        Self {
            id: id.into(),
            model_name: model_name.into(),
            model_version: None,
            parameters: Parameters::new(),
            outputs,
            from_grpc: false,
            use_binary_outputs: false,
            request_outputs: Vec::new(),
        }
    }

    pub fn output(&self, name: &str) -> Option<&InferOutput> {
        self.outputs.iter().find(|output| output.name == name)
    }

    fn output_is_binary(&self, output: &InferOutput) -> Result<bool> {
        let preference = self
            .request_outputs
            .iter()
            .find(|requested| requested.name == output.name)
            .and_then(RequestedOutput::binary_data);
        match preference {
            Some(true) => Ok(true),
            Some(false) if output.datatype.requires_binary() => Err(DataPlaneError::InvalidInput(
                format!(
                    "Output {} is {} which can not be sent as JSON, binary_data must not be false",
                    output.name, output.datatype
                ),
            )),
            Some(false) => Ok(false),
            None => Ok(self.use_binary_outputs || output.datatype.requires_binary()),
        }
    }

    /// REST v2 body, plus the JSON prefix length when a binary block follows.
    pub fn to_rest(&self) -> Result<(Vec<u8>, Option<usize>)> {
        let mut block = Vec::new();
        let mut outputs = Vec::with_capacity(self.outputs.len());
        for output in &self.outputs {
            let binary = self.output_is_binary(output)?;
            outputs.push(output.to_rest(binary, &mut block)?);
        }

        let wire = RestInferResponse {
            model_name: self.model_name.clone(),
            model_version: self.model_version.clone(),
            id: self.id.clone(),
            parameters: self.parameters.clone(),
            outputs,
        };
        Ok(frame(serde_json::to_vec(&wire)?, block))
    }

    pub fn from_bytes(body: &Bytes, json_length: Option<usize>) -> Result<Self> {
        let json = json_prefix(body, json_length)?;
        let wire: RestInferResponse = serde_json::from_slice(json)?;
        Self::from_wire(wire, BinaryCursor::new(body, json_length))
    }

    pub fn from_rest(value: Value) -> Result<Self> {
        let wire: RestInferResponse = serde_json::from_value(value)?;
        let body = Bytes::new();
        Self::from_wire(wire, BinaryCursor::new(&body, None))
    }

    fn from_wire(wire: RestInferResponse, mut cursor: BinaryCursor<'_>) -> Result<Self> {
        let outputs = wire
            .outputs
            .into_iter()
            .map(|output| InferTensor::from_rest(output, &mut cursor))
            .collect::<Result<Vec<_>>>()?;
        cursor.finish()?;
        Ok(Self {
            id: wire.id,
            model_name: wire.model_name,
            model_version: wire.model_version.filter(|v| !v.is_empty()),
            parameters: wire.parameters,
            outputs,
            from_grpc: false,
            use_binary_outputs: false,
            request_outputs: Vec::new(),
        })
    }
}

fn frame(mut json: Vec<u8>, block: Vec<u8>) -> (Vec<u8>, Option<usize>) {
    if block.is_empty() {
        return (json, None);
    }
    let json_length = json.len();
    json.extend_from_slice(&block);
    (json, Some(json_length))
}

fn json_prefix(body: &[u8], json_length: Option<usize>) -> Result<&[u8]> {
    match json_length {
        None => Ok(body),
        Some(len) if len <= body.len() => Ok(&body[..len]),
        Some(len) => Err(DataPlaneError::InvalidInput(format!(
            "inference-header-content-length {len} exceeds the body length {}",
            body.len()
        ))),
    }
}

/// Walks the binary block that follows the JSON prefix.
struct BinaryCursor<'a> {
    body: &'a Bytes,
    offset: Option<usize>,
}

impl<'a> BinaryCursor<'a> {
    fn new(body: &'a Bytes, json_length: Option<usize>) -> Self {
        Self {
            body,
            offset: json_length,
        }
    }

    fn take(&mut self, name: &str, size: usize) -> Result<Bytes> {
        let offset = self.offset.ok_or_else(|| {
            DataPlaneError::InvalidInput(format!(
                "Tensor {name} has binary_data_size but no inference-header-content-length was provided"
            ))
        })?;
        let end = offset
            .checked_add(size)
            .filter(|&end| end <= self.body.len())
            .ok_or_else(|| {
                DataPlaneError::InvalidInput(format!(
                    "binary_data_size {size} of tensor {name} reaches past the end of the body"
                ))
            })?;
        self.offset = Some(end);
        Ok(self.body.slice(offset..end))
    }

    /// Every byte after the JSON prefix must belong to a tensor.
    fn finish(&self) -> Result<()> {
        match self.offset {
            Some(offset) if offset < self.body.len() => Err(DataPlaneError::InvalidInput(format!(
                "{} unexpected trailing bytes after the binary data",
                self.body.len() - offset
            ))),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RestTensor {
    name: String,
    shape: Vec<i64>,
    datatype: String,
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    parameters: Parameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RestRequestedOutput {
    name: String,
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    parameters: Parameters,
}

impl From<&RequestedOutput> for RestRequestedOutput {
    fn from(output: &RequestedOutput) -> Self {
        Self {
            name: output.name.clone(),
            parameters: output.parameters.clone(),
        }
    }
}

impl From<RestRequestedOutput> for RequestedOutput {
    fn from(output: RestRequestedOutput) -> Self {
        Self {
            name: output.name,
            parameters: output.parameters,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RestInferRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    parameters: Parameters,
    inputs: Vec<RestTensor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    outputs: Vec<RestRequestedOutput>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RestInferResponse {
    model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model_version: Option<String>,
    #[serde(default)]
    id: String,
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    parameters: Parameters,
    outputs: Vec<RestTensor>,
}
