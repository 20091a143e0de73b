//! REST-family framing: per-site partitioning, MIME `multipart/mixed`
//! serialization with OData changesets, and the line-oriented parser for
//! the multipart response.

use log::warn;
use uuid::Uuid;

use crate::batch::container::Batch;
use crate::batch::{HttpMethod, SubResponse};
use crate::error::{ConvoyError, Result};

const CRLF: &str = "\r\n";
const ODATA_VERBOSE: &str = "application/json;odata=verbose";

/// One per-site slice of a REST batch. A batched REST call may only
/// address a single site root, so a batch spanning sites becomes one
/// sub-batch per distinct root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RestSubBatch {
    pub site: String,
    pub orders: Vec<usize>,
}

impl RestSubBatch {
    /// Endpoint the framed multipart is POSTed to.
    pub fn batch_url(&self) -> String {
        format!("{}/_api/$batch", self.site)
    }
}

/// Group the given requests by site root, preserving first-seen site
/// order and each request's original order within its group.
pub(crate) fn partition_by_site(batch: &Batch, orders: &[usize]) -> Result<Vec<RestSubBatch>> {
    let mut subs: Vec<RestSubBatch> = Vec::new();
    for &order in orders {
        let request = batch
            .get_request(order)
            .ok_or_else(|| ConvoyError::Other(format!("no request at order {}", order)))?;
        let site = request.site_root().ok_or_else(|| {
            ConvoyError::InvalidInput(format!(
                "REST request URL has no /_api/ segment: {}",
                request.primary.url
            ))
        })?;
        match subs.iter_mut().find(|s| s.site == site) {
            Some(sub) => sub.orders.push(order),
            None => subs.push(RestSubBatch {
                site: site.to_string(),
                orders: vec![order],
            }),
        }
    }
    Ok(subs)
}

/// Serialize the given requests into one `multipart/mixed` body.
///
/// GET parts are plain `application/http` parts; mutating operations are
/// wrapped in a single-request changeset with `If-Match: *`. Parts are
/// emitted in ascending order, which is the order the server echoes
/// sub-responses back in.
pub(crate) fn frame_multipart(batch: &Batch, orders: &[usize], boundary: &str) -> String {
    let mut body = String::new();

    for &order in orders {
        let request = match batch.get_request(order) {
            Some(request) => request,
            None => continue,
        };
        match request.method {
            HttpMethod::Get => {
                body.push_str(&format!("--{}{}", boundary, CRLF));
                body.push_str(&format!("Content-Type: application/http{}", CRLF));
                body.push_str(&format!("Content-Transfer-Encoding: binary{}", CRLF));
                body.push_str(CRLF);
                body.push_str(&format!("GET {} HTTP/1.1{}", request.primary.url, CRLF));
                body.push_str(&format!("Accept: {}{}", ODATA_VERBOSE, CRLF));
                body.push_str(CRLF);
                body.push_str(CRLF);
            }
            HttpMethod::Post | HttpMethod::Patch | HttpMethod::Delete => {
                let changeset = format!("changeset_{}", Uuid::new_v4());
                body.push_str(&format!("--{}{}", boundary, CRLF));
                body.push_str(&format!(
                    "Content-Type: multipart/mixed; boundary={}{}",
                    changeset, CRLF
                ));
                body.push_str(CRLF);

                body.push_str(&format!("--{}{}", changeset, CRLF));
                body.push_str(&format!("Content-Type: application/http{}", CRLF));
                body.push_str(&format!("Content-Transfer-Encoding: binary{}", CRLF));
                body.push_str(CRLF);
                body.push_str(&format!(
                    "{} {} HTTP/1.1{}",
                    request.method.as_str(),
                    request.primary.url,
                    CRLF
                ));
                body.push_str(&format!("Accept: {}{}", ODATA_VERBOSE, CRLF));
                match request.primary.json_body.as_deref() {
                    Some(json) if request.method.has_body() => {
                        body.push_str(&format!("Content-Type: {}{}", ODATA_VERBOSE, CRLF));
                        body.push_str(&format!("Content-Length: {}{}", json.len(), CRLF));
                        body.push_str(&format!("If-Match: *{}", CRLF));
                        body.push_str(CRLF);
                        body.push_str(json);
                        body.push_str(CRLF);
                    }
                    _ => {
                        body.push_str(&format!("If-Match: *{}", CRLF));
                        body.push_str(CRLF);
                    }
                }
                body.push_str(&format!("--{}--{}", changeset, CRLF));
            }
        }
    }

    body.push_str(&format!("--{}--{}", boundary, CRLF));
    body
}

/// Parse the line-oriented multipart response.
///
/// Sub-responses arrive in the same order the sub-requests were
/// serialized, so a counter over `orders` binds each parsed status and
/// body to its originating request. A body is recognized as the first
/// line starting with `{` after a status line; a `204 No Content` status
/// attaches an empty body immediately.
pub(crate) fn parse_multipart_response(
    text: &str,
    orders: &[usize],
) -> Result<Vec<SubResponse>> {
    let mut responses = Vec::new();
    let mut pending_status: Option<u16> = None;
    let mut next = 0usize;

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("HTTP/1.1 ") {
            if pending_status.is_some() {
                warn!("Sub-response without JSON body line, skipping");
                pending_status = None;
            }
            let status: u16 = rest
                .get(..3)
                .and_then(|code| code.parse().ok())
                .ok_or_else(|| {
                    ConvoyError::MalformedResponse(format!(
                        "status line not parseable: {}",
                        line
                    ))
                })?;
            if status == 204 {
                if next >= orders.len() {
                    return Err(ConvoyError::MalformedResponse(
                        "more sub-responses than sub-requests".to_string(),
                    ));
                }
                responses.push(SubResponse {
                    order: orders[next],
                    status,
                    body: String::new(),
                });
                next += 1;
            } else {
                pending_status = Some(status);
            }
        } else if let Some(status) = pending_status {
            if line.starts_with('{') {
                if next >= orders.len() {
                    return Err(ConvoyError::MalformedResponse(
                        "more sub-responses than sub-requests".to_string(),
                    ));
                }
                responses.push(SubResponse {
                    order: orders[next],
                    status,
                    body: line.to_string(),
                });
                next += 1;
                pending_status = None;
            }
        }
    }

    if next < orders.len() {
        warn!(
            "Multipart response carried {} sub-response(s) for {} sub-request(s)",
            next,
            orders.len()
        );
    }
    Ok(responses)
}
