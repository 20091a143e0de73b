//! Capability traits the engine requires from the caller's domain model.
//!
//! The engine never owns domain objects: a queued request keeps a weak
//! back-reference to the model it will populate, and the model's parent
//! collection stays on the caller's side. Everything the dispatcher and
//! the reconciler need from a model is expressed as an explicit
//! capability here rather than reflective member lookup.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;

/// Shared handle to a domain model instance.
pub type SharedModel = Arc<Mutex<dyn DomainModel>>;

/// Weak back-reference from a queued request to its bound model.
pub type ModelRef = Weak<Mutex<dyn DomainModel>>;

/// Dirty-state tracking on mutable domain objects.
///
/// A model that supports committing has its pending changes cleared after
/// a successful PATCH dispatch.
pub trait Transient {
    fn commit(&mut self);
}

/// The interface a domain entity exposes to the batch engine.
pub trait DomainModel: Send {
    /// Stable name of the concrete entity type, used to group results
    /// of the same kind during reconciliation.
    fn type_name(&self) -> &'static str;

    /// Whether the named field currently holds a value.
    fn has_value(&self, field: &str) -> bool;

    /// Current value of the named field, if any.
    fn get_value(&self, field: &str) -> Option<Value>;

    /// Merge the other instance's properties and child collections into
    /// this one. Called when two requests in one batch materialized the
    /// same logical entity twice.
    fn merge_from(&mut self, other: &dyn DomainModel);

    fn set_deleted(&mut self);

    fn is_deleted(&self) -> bool;

    /// Dirty-state capability, when the entity supports it.
    fn transient(&mut self) -> Option<&mut dyn Transient> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A parent collection that manages membership of domain models.
///
/// Removal is by instance identity, not by key: the reconciler removes
/// the exact duplicate or deleted instance it holds a handle to.
pub trait ModelCollection: Send + Sync {
    fn remove(&self, model: &SharedModel) -> bool;
}

/// Per-entity metadata a request carries into the batch.
#[derive(Clone, Default)]
pub struct EntityInfo {
    /// Key field name on the REST family representation.
    pub rest_key_field: Option<String>,
    /// Key field name on the Graph family representation.
    pub graph_key_field: Option<String>,
    /// The collection the bound model lives in, if any.
    pub parent: Option<Arc<dyn ModelCollection>>,
}

impl EntityInfo {
    pub fn new(rest_key_field: Option<String>, graph_key_field: Option<String>) -> Self {
        Self {
            rest_key_field,
            graph_key_field,
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: Arc<dyn ModelCollection>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// The key field for the family the batch was dispatched through.
    pub fn key_field(&self, graph: bool) -> Option<&str> {
        if graph {
            self.graph_key_field.as_deref()
        } else {
            self.rest_key_field.as_deref()
        }
    }
}

impl fmt::Debug for EntityInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityInfo")
            .field("rest_key_field", &self.rest_key_field)
            .field("graph_key_field", &self.graph_key_field)
            .field("parent", &self.parent.is_some())
            .finish()
    }
}
