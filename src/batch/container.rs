//! Ordered container of queued requests with a stable identity.

use std::collections::BTreeMap;

use crate::batch::request::{ApiCall, BatchRequest};
use crate::batch::{ApiFamily, BatchId, HttpMethod};
use crate::error::{ConvoyError, Result};
use crate::mapping::{FromJsonCast, PostMappingHook};
use crate::model::{EntityInfo, ModelRef};

/// An ordered set of queued operations dispatched together.
///
/// Requests are keyed by their insertion order; order values are
/// contiguous and unique within a batch and iteration always follows
/// them. Once executed, a batch is inert: the client reaps it on the
/// next dispatch.
pub struct Batch {
    id: BatchId,
    requests: BTreeMap<usize, BatchRequest>,
    next_order: usize,
    executed: bool,
}

impl Batch {
    pub(crate) fn new(id: BatchId) -> Self {
        Self {
            id,
            requests: BTreeMap::new(),
            next_order: 0,
            executed: false,
        }
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn executed(&self) -> bool {
        self.executed
    }

    pub(crate) fn mark_executed(&mut self) {
        self.executed = true;
    }

    /// Append a queued operation, assigning the next order value.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        model: ModelRef,
        entity: EntityInfo,
        method: HttpMethod,
        primary: ApiCall,
        backup: Option<ApiCall>,
        from_json_cast: Option<FromJsonCast>,
        post_mapping: Option<PostMappingHook>,
    ) -> usize {
        assert!(!self.executed, "cannot append to an executed batch");
        let order = self.next_order;
        self.next_order += 1;
        self.requests.insert(
            order,
            BatchRequest {
                order,
                method,
                primary,
                backup,
                model,
                entity,
                from_json_cast,
                post_mapping,
                response_json: None,
                response_status: None,
            },
        );
        order
    }

    pub fn get_request(&self, order: usize) -> Option<&BatchRequest> {
        self.requests.get(&order)
    }

    pub(crate) fn get_request_mut(&mut self, order: usize) -> Option<&mut BatchRequest> {
        self.requests.get_mut(&order)
    }

    pub(crate) fn remove_request(&mut self, order: usize) -> Option<BatchRequest> {
        self.requests.remove(&order)
    }

    /// Requests in insertion order.
    pub fn requests(&self) -> impl Iterator<Item = &BatchRequest> {
        self.requests.values()
    }

    /// Order values in insertion order.
    pub(crate) fn orders(&self) -> Vec<usize> {
        self.requests.keys().copied().collect()
    }

    /// True when every queued request targets the Graph family.
    pub fn use_graph_batch(&self) -> bool {
        self.requests
            .values()
            .all(|r| r.family() == ApiFamily::Graph)
    }

    /// True when both families are present.
    pub fn has_mixed_api_types(&self) -> bool {
        let mut saw_rest = false;
        let mut saw_graph = false;
        for request in self.requests.values() {
            match request.family() {
                ApiFamily::Rest => saw_rest = true,
                ApiFamily::Graph => saw_graph = true,
            }
        }
        saw_rest && saw_graph
    }

    /// True when every Graph request carries a REST backup call, making a
    /// wholesale rewrite onto the REST family possible.
    pub fn can_fall_back_to_rest(&self) -> bool {
        self.requests
            .values()
            .filter(|r| r.family() == ApiFamily::Graph)
            .all(|r| r.has_rest_backup())
    }

    /// Rewrite every Graph request onto its REST backup call.
    ///
    /// Callers must have checked [`Batch::can_fall_back_to_rest`]; a Graph
    /// request without a REST backup fails the whole rewrite before any
    /// request is touched.
    pub fn make_rest_only(&mut self) -> Result<()> {
        if !self.can_fall_back_to_rest() {
            return Err(ConvoyError::Precondition(
                "batch contains Graph requests without REST backup calls".to_string(),
            ));
        }
        for request in self.requests.values_mut() {
            if request.family() == ApiFamily::Graph {
                request.promote_backup();
            }
        }
        Ok(())
    }
}
