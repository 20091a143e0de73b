//! Family resolution: whole-batch dispatch, wholesale REST fall-back, or
//! a split into two sibling dispatches.

use crate::batch::container::Batch;
use crate::batch::ApiFamily;

/// How a batch reaches the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchPlan {
    /// Every request is Graph-family: one JSON envelope dispatch.
    Graph,
    /// Every request is REST-family: one multipart dispatch.
    Rest,
    /// Mixed families, but every Graph request has a REST backup:
    /// rewrite the batch wholesale and dispatch as REST.
    FallBackToRest,
    /// Mixed families without full backup coverage: dispatch the REST
    /// requests first, then the Graph requests, preserving each request's
    /// original order within its sibling.
    Split,
}

/// Apply the family decision table once per execute.
///
/// The fall-back is preferred over a split: staying within one family
/// keeps a single framing and a single authentication round-trip.
pub(crate) fn resolve(batch: &Batch) -> DispatchPlan {
    if batch.has_mixed_api_types() {
        if batch.can_fall_back_to_rest() {
            DispatchPlan::FallBackToRest
        } else {
            DispatchPlan::Split
        }
    } else if batch.use_graph_batch() {
        DispatchPlan::Graph
    } else {
        DispatchPlan::Rest
    }
}

/// Partition a mixed batch's order values by family, each side in
/// ascending order.
pub(crate) fn split_by_family(batch: &Batch) -> (Vec<usize>, Vec<usize>) {
    let mut rest = Vec::new();
    let mut graph = Vec::new();
    for request in batch.requests() {
        match request.family() {
            ApiFamily::Rest => rest.push(request.order),
            ApiFamily::Graph => graph.push(request.order),
        }
    }
    (rest, graph)
}
