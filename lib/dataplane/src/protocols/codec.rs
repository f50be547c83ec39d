// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Conversions between [`FlattenTensor`] and its two wire representations:
//! little-endian raw bytes (gRPC raw contents, REST binary extension) and
//! JSON element lists (REST `data`).
//!
//! BYTES elements are encoded raw as `{u32 LE length}{content}` each, back to back.

use serde_json::{Number, Value};

use super::tensor::{DataType, FlattenTensor};
use crate::error::{DataPlaneError, Result};

/// Number of elements implied by `shape`. Negative dimensions are rejected.
pub fn element_count(shape: &[i64]) -> Result<usize> {
    shape.iter().try_fold(1usize, |acc, &d| {
        if d < 0 {
            Err(DataPlaneError::InvalidInput(format!(
                "Shape contains negative dimension: {d}"
            )))
        } else {
            acc.checked_mul(d as usize).ok_or_else(|| {
                DataPlaneError::invalid_input("Overflow occurred while calculating element count")
            })
        }
    })
}

/// Checks that `shape` describes exactly `actual` elements
pub fn validate_shape(shape: &[i64], actual: usize) -> Result<()> {
    let expected = element_count(shape)?;
    if expected != actual {
        return Err(DataPlaneError::InvalidInput(format!(
            "Shape {shape:?} does not match the number of elements, expected {expected} elements, got {actual} elements"
        )));
    }
    Ok(())
}

/// Packs the tensor into little-endian bytes.
pub fn encode_raw(tensor: &FlattenTensor) -> Vec<u8> {
    match tensor {
        FlattenTensor::Bool(data) => data.iter().map(|&b| u8::from(b)).collect(),
        FlattenTensor::Uint8(data) => data.clone(),
        FlattenTensor::Uint16(data) => data.iter().flat_map(|&x| x.to_le_bytes()).collect(),
        FlattenTensor::Uint32(data) => data.iter().flat_map(|&x| x.to_le_bytes()).collect(),
        FlattenTensor::Uint64(data) => data.iter().flat_map(|&x| x.to_le_bytes()).collect(),
        FlattenTensor::Int8(data) => data.iter().map(|&x| x as u8).collect(),
        FlattenTensor::Int16(data) => data.iter().flat_map(|&x| x.to_le_bytes()).collect(),
        FlattenTensor::Int32(data) => data.iter().flat_map(|&x| x.to_le_bytes()).collect(),
        FlattenTensor::Int64(data) => data.iter().flat_map(|&x| x.to_le_bytes()).collect(),
        FlattenTensor::Float16(data) => data.iter().flat_map(|&x| x.to_le_bytes()).collect(),
        FlattenTensor::Float32(data) => data.iter().flat_map(|&x| x.to_le_bytes()).collect(),
        FlattenTensor::Float64(data) => data.iter().flat_map(|&x| x.to_le_bytes()).collect(),
        FlattenTensor::Bytes(data) => {
            let total: usize = data.iter().map(|item| item.len() + 4).sum();
            let mut bytes = Vec::with_capacity(total);
            for item in data {
                let len = item.len() as u32;
                bytes.extend_from_slice(&len.to_le_bytes());
                bytes.extend_from_slice(item);
            }
            bytes
        }
    }
}

/// Inverse of [`encode_raw`]; the buffer must hold exactly `product(shape)` elements.
pub fn decode_raw(raw: &[u8], shape: &[i64], datatype: DataType) -> Result<FlattenTensor> {
    let element_count = element_count(shape)?;

    // For BYTES type, we need to parse length-prefixed strings
    if datatype == DataType::Bytes {
        let items = decode_bytes_elements(raw)?;
        if items.len() != element_count {
            return Err(DataPlaneError::InvalidInput(format!(
                "Raw BYTES element count does not match shape {shape:?}, expected {element_count} elements, got {} elements",
                items.len()
            )));
        }
        return Ok(FlattenTensor::Bytes(items));
    }

    let data_size = datatype.size();
    if !raw.len().is_multiple_of(data_size) {
        return Err(DataPlaneError::InvalidInput(format!(
            "Raw {datatype} content length {} must be a multiple of {data_size}",
            raw.len()
        )));
    } else if raw.len() / data_size != element_count {
        return Err(DataPlaneError::InvalidInput(format!(
            "Raw {datatype} content does not match shape {shape:?}, expected {element_count} elements, got {} elements",
            raw.len() / data_size
        )));
    }

    // Vec<u8> can not be reinterpreted as Vec<T> because of alignment, so
    // every element is rebuilt from its little-endian bytes.
    Ok(match datatype {
        DataType::Bool => FlattenTensor::Bool(raw.iter().map(|&b| b != 0).collect()),
        DataType::Uint8 => FlattenTensor::Uint8(raw.to_vec()),
        DataType::Uint16 => FlattenTensor::Uint16(le_chunks(raw, u16::from_le_bytes)),
        DataType::Uint32 => FlattenTensor::Uint32(le_chunks(raw, u32::from_le_bytes)),
        DataType::Uint64 => FlattenTensor::Uint64(le_chunks(raw, u64::from_le_bytes)),
        DataType::Int8 => FlattenTensor::Int8(raw.iter().map(|&b| b as i8).collect()),
        DataType::Int16 => FlattenTensor::Int16(le_chunks(raw, i16::from_le_bytes)),
        DataType::Int32 => FlattenTensor::Int32(le_chunks(raw, i32::from_le_bytes)),
        DataType::Int64 => FlattenTensor::Int64(le_chunks(raw, i64::from_le_bytes)),
        DataType::Float16 => FlattenTensor::Float16(le_chunks(raw, u16::from_le_bytes)),
        DataType::Float32 => FlattenTensor::Float32(le_chunks(raw, f32::from_le_bytes)),
        DataType::Float64 => FlattenTensor::Float64(le_chunks(raw, f64::from_le_bytes)),
        DataType::Bytes => unreachable!("BYTES handled above"),
    })
}

fn le_chunks<const N: usize, T>(raw: &[u8], from_le: impl Fn([u8; N]) -> T) -> Vec<T> {
    raw.chunks_exact(N)
        .map(|chunk| {
            let mut buf = [0u8; N];
            buf.copy_from_slice(chunk);
            from_le(buf)
        })
        .collect()
}

fn decode_bytes_elements(raw: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut items = vec![];
    let mut offset = 0;
    while offset + 4 <= raw.len() {
        let len = u32::from_le_bytes([
            raw[offset],
            raw[offset + 1],
            raw[offset + 2],
            raw[offset + 3],
        ]) as usize;
        offset += 4;
        if offset + len > raw.len() {
            return Err(DataPlaneError::invalid_input(
                "Invalid length-prefixed BYTES content, length exceeds raw content size",
            ));
        }
        items.push(raw[offset..offset + len].to_vec());
        offset += len;
    }
    if offset != raw.len() {
        return Err(DataPlaneError::invalid_input(
            "Invalid length-prefixed BYTES content, extra bytes at the end",
        ));
    }
    Ok(items)
}

/// Row-major JSON elements of the tensor.
///
/// BYTES elements must be valid UTF-8 and FP16 has no JSON form; both cases
/// need the binary transport instead.
pub fn encode_json(tensor: &FlattenTensor) -> Result<Vec<Value>> {
    fn float(x: f64) -> Result<Value> {
        Number::from_f64(x).map(Value::Number).ok_or_else(|| {
            DataPlaneError::InvalidInput(format!(
                "Failed to encode {x} as JSON. Please use binary data for non-finite values"
            ))
        })
    }

    Ok(match tensor {
        FlattenTensor::Bool(data) => data.iter().map(|&b| Value::Bool(b)).collect(),
        FlattenTensor::Uint8(data) => data.iter().map(|&x| Value::from(x)).collect(),
        FlattenTensor::Uint16(data) => data.iter().map(|&x| Value::from(x)).collect(),
        FlattenTensor::Uint32(data) => data.iter().map(|&x| Value::from(x)).collect(),
        FlattenTensor::Uint64(data) => data.iter().map(|&x| Value::from(x)).collect(),
        FlattenTensor::Int8(data) => data.iter().map(|&x| Value::from(x)).collect(),
        FlattenTensor::Int16(data) => data.iter().map(|&x| Value::from(x)).collect(),
        FlattenTensor::Int32(data) => data.iter().map(|&x| Value::from(x)).collect(),
        FlattenTensor::Int64(data) => data.iter().map(|&x| Value::from(x)).collect(),
        FlattenTensor::Float16(_) => {
            return Err(DataPlaneError::invalid_input(
                "FP16 tensors can not be represented in JSON. Please use binary data",
            ));
        }
        FlattenTensor::Float32(data) => data
            .iter()
            .map(|&x| float(f64::from(x)))
            .collect::<Result<_>>()?,
        FlattenTensor::Float64(data) => data.iter().map(|&x| float(x)).collect::<Result<_>>()?,
        FlattenTensor::Bytes(data) => data
            .iter()
            .map(|item| match std::str::from_utf8(item) {
                Ok(s) => Ok(Value::String(s.to_string())),
                Err(e) => Err(DataPlaneError::InvalidInput(format!(
                    "Failed to encode BYTES element using UTF-8 ({e}). Please use binary data"
                ))),
            })
            .collect::<Result<_>>()?,
    })
}

/// Inverse of [`encode_json`]. Nested lists are flattened row-major.
pub fn decode_json(data: &Value, shape: &[i64], datatype: DataType) -> Result<FlattenTensor> {
    if datatype == DataType::Float16 {
        return Err(DataPlaneError::invalid_input(
            "FP16 tensors can not be represented in JSON. Please use binary data",
        ));
    }
    if !data.is_array() {
        return Err(DataPlaneError::invalid_input("Tensor data must be a list"));
    }

    let mut values = Vec::new();
    flatten(data, &mut values);
    validate_shape(shape, values.len())?;

    let tensor = match datatype {
        DataType::Bool => FlattenTensor::Bool(convert(&values, datatype, Value::as_bool)?),
        DataType::Uint8 => FlattenTensor::Uint8(convert(&values, datatype, |v| {
            v.as_u64().and_then(|x| u8::try_from(x).ok())
        })?),
        DataType::Uint16 => FlattenTensor::Uint16(convert(&values, datatype, |v| {
            v.as_u64().and_then(|x| u16::try_from(x).ok())
        })?),
        DataType::Uint32 => FlattenTensor::Uint32(convert(&values, datatype, |v| {
            v.as_u64().and_then(|x| u32::try_from(x).ok())
        })?),
        DataType::Uint64 => FlattenTensor::Uint64(convert(&values, datatype, Value::as_u64)?),
        DataType::Int8 => FlattenTensor::Int8(convert(&values, datatype, |v| {
            v.as_i64().and_then(|x| i8::try_from(x).ok())
        })?),
        DataType::Int16 => FlattenTensor::Int16(convert(&values, datatype, |v| {
            v.as_i64().and_then(|x| i16::try_from(x).ok())
        })?),
        DataType::Int32 => FlattenTensor::Int32(convert(&values, datatype, |v| {
            v.as_i64().and_then(|x| i32::try_from(x).ok())
        })?),
        DataType::Int64 => FlattenTensor::Int64(convert(&values, datatype, Value::as_i64)?),
        DataType::Float32 => FlattenTensor::Float32(convert(&values, datatype, |v| {
            v.as_f64().map(|x| x as f32)
        })?),
        DataType::Float64 => FlattenTensor::Float64(convert(&values, datatype, Value::as_f64)?),
        DataType::Bytes => FlattenTensor::Bytes(convert(&values, datatype, |v| {
            v.as_str().map(|s| s.as_bytes().to_vec())
        })?),
        DataType::Float16 => unreachable!("FP16 rejected above"),
    };
    Ok(tensor)
}

fn flatten<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| flatten(item, out)),
        other => out.push(other),
    }
}

fn convert<T>(
    values: &[&Value],
    datatype: DataType,
    f: impl Fn(&Value) -> Option<T>,
) -> Result<Vec<T>> {
    values
        .iter()
        .enumerate()
        .map(|(idx, &v)| {
            f(v).ok_or_else(|| {
                DataPlaneError::InvalidInput(format!(
                    "Element {idx} ({v}) is not a valid {datatype} value"
                ))
            })
        })
        .collect()
}
