//! Removal of identical GETs before dispatch.

use log::debug;

use crate::batch::container::Batch;
use crate::batch::HttpMethod;

/// Remove later duplicates of identical GET calls from the batch.
///
/// Two GETs are identical when their primary call targets match (URL plus
/// body text). The first occurrence in insertion order is kept; every
/// later duplicate is removed and never serialized, so no response is
/// attached to it. Non-GET requests are untouched: two identical POSTs
/// are independent creations.
///
/// Returns the removed order values.
pub(crate) fn prune_duplicate_gets(batch: &mut Batch) -> Vec<usize> {
    let mut kept: Vec<(usize, String, Option<String>)> = Vec::new();
    let mut duplicates = Vec::new();

    for request in batch.requests() {
        if request.method != HttpMethod::Get {
            continue;
        }
        let seen = kept
            .iter()
            .any(|(_, url, body)| *url == request.primary.url && *body == request.primary.json_body);
        if seen {
            duplicates.push(request.order);
        } else {
            kept.push((
                request.order,
                request.primary.url.clone(),
                request.primary.json_body.clone(),
            ));
        }
    }

    for order in &duplicates {
        batch.remove_request(*order);
    }
    if !duplicates.is_empty() {
        debug!(
            "Removed {} duplicate GET request(s) from batch {}",
            duplicates.len(),
            batch.id()
        );
    }
    duplicates
}
