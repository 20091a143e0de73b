//! Graph-family framing: the JSON `$batch` envelope and its response
//! parser.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

use crate::batch::container::Batch;
use crate::batch::SubResponse;
use crate::error::{ConvoyError, Result};

/// Request content type, also attached per sub-request when it carries a
/// body.
pub(crate) const GRAPH_CONTENT_TYPE: &str = "application/json";

#[derive(Serialize)]
struct EnvelopeRequest<'a> {
    id: String,
    method: &'static str,
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    headers: Option<HashMap<&'static str, &'static str>>,
}

#[derive(Serialize)]
struct Envelope<'a> {
    requests: Vec<EnvelopeRequest<'a>>,
}

#[derive(Deserialize)]
struct EnvelopeResponse {
    id: String,
    status: u16,
    #[serde(default)]
    body: Option<Value>,
}

#[derive(Deserialize)]
struct ResponseEnvelope {
    responses: Vec<EnvelopeResponse>,
}

/// Serialize the given requests into one `{"requests": […]}` envelope.
///
/// Sub-request ids are stringified 1-based indices within the envelope.
/// A request's JSON body is embedded verbatim as a raw JSON object, never
/// as a re-encoded string; a body that is not valid JSON fails the whole
/// framing.
pub(crate) fn frame_envelope(batch: &Batch, orders: &[usize]) -> Result<String> {
    let mut requests = Vec::with_capacity(orders.len());
    for (index, &order) in orders.iter().enumerate() {
        let request = batch
            .get_request(order)
            .ok_or_else(|| ConvoyError::Other(format!("no request at order {}", order)))?;
        let body = match request.primary.json_body.as_deref() {
            Some(json) => Some(RawValue::from_string(json.to_string())?),
            None => None,
        };
        let headers = body
            .is_some()
            .then(|| HashMap::from([("Content-Type", GRAPH_CONTENT_TYPE)]));
        requests.push(EnvelopeRequest {
            id: (index + 1).to_string(),
            method: request.method.as_str(),
            url: &request.primary.url,
            body,
            headers,
        });
    }
    Ok(serde_json::to_string(&Envelope { requests })?)
}

/// Deserialize the `{"responses": […]}` envelope and bind each response
/// to its originating request via the 1-based id.
pub(crate) fn parse_envelope(text: &str, orders: &[usize]) -> Result<Vec<SubResponse>> {
    let envelope: ResponseEnvelope = serde_json::from_str(text)
        .map_err(|e| ConvoyError::MalformedResponse(format!("batch envelope: {}", e)))?;

    let mut responses = Vec::with_capacity(envelope.responses.len());
    for response in envelope.responses {
        let id: usize = response.id.parse().map_err(|_| {
            ConvoyError::MalformedResponse(format!("response id not numeric: {}", response.id))
        })?;
        let order = id
            .checked_sub(1)
            .and_then(|index| orders.get(index))
            .copied()
            .ok_or_else(|| {
                ConvoyError::MalformedResponse(format!("response id out of range: {}", id))
            })?;
        let body = match response.body {
            Some(Value::Null) | None => String::new(),
            Some(value) => value.to_string(),
        };
        responses.push(SubResponse {
            order,
            status: response.status,
            body,
        });
    }
    Ok(responses)
}
