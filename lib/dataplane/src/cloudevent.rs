// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! CloudEvents 1.0 over HTTP, binary and structured content modes.
//!
//! Binary mode carries the attributes in `ce-*` headers and the event data as
//! the body. Structured mode carries a JSON envelope with the attributes and a
//! `data` member, sent as `application/cloudevents+json`.

use axum::http::{HeaderMap, HeaderName, HeaderValue, header::CONTENT_TYPE};
use bytes::Bytes;
use serde_json::Value;

use kserve_runtime::config::env_is_truthy;
use kserve_runtime::config::environment_names::cloudevent::{CE_MERGE, CE_SOURCE, CE_TYPE};

use crate::error::{DataPlaneError, Result};
use crate::model::InferPayload;

pub const CE_SPECVERSION: &str = "ce-specversion";
pub const CE_SOURCE_HEADER: &str = "ce-source";
pub const CE_TYPE_HEADER: &str = "ce-type";
pub const CE_ID: &str = "ce-id";

const CE_HEADER_PREFIX: &str = "ce-";

pub const APPLICATION_JSON: &str = "application/json";
pub const APPLICATION_CLOUDEVENTS_JSON: &str = "application/cloudevents+json";
pub const APPLICATION_LD_JSON: &str = "application/ld+json";

/// Content types decoded as JSON request bodies
pub const JSON_CONTENT_TYPES: [&str; 3] =
    [APPLICATION_JSON, APPLICATION_CLOUDEVENTS_JSON, APPLICATION_LD_JSON];

const SPEC_VERSION: &str = "1.0";
const DEFAULT_RESPONSE_TYPE: &str = "io.kserve.inference.response";
const STRUCTURED_KEYS: [&str; 6] = ["time", "type", "source", "id", "specversion", "data"];

/// CloudEvent attributes without the data.
pub type Attributes = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudEventKind {
    Binary,
    Structured,
}

/// All required context attributes are present as `ce-*` headers.
pub fn has_binary_headers(headers: &HeaderMap) -> bool {
    [CE_SPECVERSION, CE_SOURCE_HEADER, CE_TYPE_HEADER, CE_ID]
        .iter()
        .all(|name| headers.contains_key(*name))
}

pub fn is_structured(body: &Value) -> bool {
    body.as_object()
        .is_some_and(|obj| STRUCTURED_KEYS.iter().all(|key| obj.contains_key(*key)))
}

/// Media type of the request body, without parameters such as `charset`.
pub fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::trim)
}

fn binary_attributes(headers: &HeaderMap) -> Attributes {
    let mut attributes: Attributes = headers
        .iter()
        .filter_map(|(name, value)| {
            name.as_str().strip_prefix(CE_HEADER_PREFIX).map(|attr| {
                (
                    attr.to_string(),
                    Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
                )
            })
        })
        .collect();
    if let Some(content_type) = content_type(headers) {
        attributes.insert(
            "datacontenttype".to_string(),
            Value::String(content_type.to_string()),
        );
    }
    attributes
}

/// Unwraps a binary mode event. Data that is not UTF-8 JSON passes through
/// as bytes unless the content type claims JSON.
pub fn decode_binary(body: Bytes, headers: &HeaderMap) -> Result<(InferPayload, Attributes)> {
    let attributes = binary_attributes(headers);
    let parsed = std::str::from_utf8(&body)
        .map_err(|e| e.to_string())
        .and_then(|s| serde_json::from_str::<Value>(s).map_err(|e| e.to_string()));

    match parsed {
        Ok(data) => Ok((InferPayload::Json(data), attributes)),
        Err(e)
            if matches!(
                content_type(headers),
                Some(APPLICATION_JSON | APPLICATION_CLOUDEVENTS_JSON)
            ) =>
        {
            Err(DataPlaneError::InvalidInput(format!(
                "Failed to decode or parse binary json cloudevent: {e}"
            )))
        }
        Err(_) => Ok((InferPayload::Bytes(body), attributes)),
    }
}

/// Splits a structured mode envelope into its data and attributes.
pub fn decode_structured(body: Value) -> (Value, Attributes) {
    match body {
        Value::Object(mut attributes) => {
            let data = attributes.remove("data").unwrap_or(Value::Null);
            (data, attributes)
        }
        other => (other, Attributes::new()),
    }
}

fn response_attributes(model_name: &str, request: &Attributes, kind: CloudEventKind) -> Attributes {
    let mut attributes = Attributes::new();
    if env_is_truthy(CE_MERGE) {
        attributes = request.clone();
        match kind {
            CloudEventKind::Binary => {
                attributes.remove("datacontenttype");
            }
            CloudEventKind::Structured => {
                attributes.remove("id");
                attributes.remove("time");
            }
        }
    }

    let source = std::env::var(CE_SOURCE)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("io.kserve.inference.{model_name}"));
    let event_type = std::env::var(CE_TYPE)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_RESPONSE_TYPE.to_string());

    attributes.insert("id".to_string(), Value::String(uuid::Uuid::new_v4().to_string()));
    attributes.insert("specversion".to_string(), Value::String(SPEC_VERSION.to_string()));
    attributes.insert("source".to_string(), Value::String(source));
    attributes.insert("type".to_string(), Value::String(event_type));
    attributes.insert(
        "time".to_string(),
        Value::String(chrono::Utc::now().to_rfc3339()),
    );
    attributes
}

/// Wraps a serialized JSON response into a response event of `kind`.
/// Returns the response headers and body.
pub fn create_response_event(
    model_name: &str,
    body: Vec<u8>,
    request: &Attributes,
    kind: CloudEventKind,
) -> Result<(HeaderMap, Vec<u8>)> {
    let attributes = response_attributes(model_name, request, kind);
    let mut headers = HeaderMap::new();

    match kind {
        CloudEventKind::Binary => {
            for (attr, value) in &attributes {
                let name = HeaderName::try_from(format!("{CE_HEADER_PREFIX}{attr}"))
                    .map_err(|e| DataPlaneError::InvalidInput(format!("Invalid CloudEvent attribute {attr}: {e}")))?;
                let value = match value {
                    Value::String(s) => HeaderValue::try_from(s.as_str()),
                    other => HeaderValue::try_from(other.to_string()),
                }
                .map_err(|e| DataPlaneError::InvalidInput(format!("Invalid CloudEvent attribute {attr}: {e}")))?;
                headers.insert(name, value);
            }
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
            Ok((headers, body))
        }
        CloudEventKind::Structured => {
            let mut envelope = attributes;
            envelope.insert("data".to_string(), serde_json::from_slice(&body)?);
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static(APPLICATION_CLOUDEVENTS_JSON),
            );
            Ok((headers, serde_json::to_vec(&Value::Object(envelope))?))
        }
    }
}
