//! Post-execution reconciliation: merge duplicate GET results onto one
//! canonical model, then propagate deletes into parent collections.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::batch::container::Batch;
use crate::batch::HttpMethod;
use crate::model::SharedModel;

/// Reconcile the in-memory model graph with a dispatched batch.
///
/// Merging runs before delete propagation so that a duplicate's child
/// collections land on the canonical instance before any removal.
pub(crate) fn reconcile(batch: &Batch) {
    merge_duplicate_results(batch);
    propagate_deletes(batch);
}

/// Collapse GET results that materialized the same logical entity twice.
///
/// Requests group by (entity type, key-field value); the key field is the
/// Graph one when the whole batch ran as Graph, the REST one otherwise.
/// Within a group the lowest-order request's model is canonical: every
/// other model is merged into it, removed from its parent collection, and
/// flagged deleted.
fn merge_duplicate_results(batch: &Batch) {
    let use_graph = batch.use_graph_batch();
    let mut groups: HashMap<(String, String), Vec<(usize, SharedModel, &crate::model::EntityInfo)>> =
        HashMap::new();

    for request in batch.requests() {
        if request.method != HttpMethod::Get || !request.succeeded() {
            continue;
        }
        let Some(model) = request.model.upgrade() else {
            continue;
        };
        let Some(key_field) = request.entity.key_field(use_graph) else {
            continue;
        };
        let key_value = {
            let guard = model.lock().unwrap();
            if !guard.has_value(key_field) {
                continue;
            }
            match guard.get_value(key_field) {
                Some(value) if !value.is_null() => {
                    (guard.type_name().to_string(), value.to_string())
                }
                _ => continue,
            }
        };
        groups
            .entry(key_value)
            .or_default()
            .push((request.order, model, &request.entity));
    }

    for ((type_name, key), mut group) in groups {
        if group.len() < 2 {
            continue;
        }
        group.sort_by_key(|(order, _, _)| *order);
        debug!(
            "Merging {} duplicate result(s) for {} key {}",
            group.len() - 1,
            type_name,
            key
        );

        let (_, canonical, _) = &group[0];
        for (_, duplicate, entity) in &group[1..] {
            // The caller may have bound several requests to one instance;
            // there is nothing to merge then, and locking both sides
            // would deadlock.
            if Arc::ptr_eq(canonical, duplicate) {
                continue;
            }
            {
                let mut canonical_guard = canonical.lock().unwrap();
                let duplicate_guard = duplicate.lock().unwrap();
                canonical_guard.merge_from(&*duplicate_guard);
            }
            if let Some(parent) = &entity.parent {
                parent.remove(duplicate);
            }
            duplicate.lock().unwrap().set_deleted();
        }
    }
}

/// Flag every deleted entity and drop it from its parent collection.
fn propagate_deletes(batch: &Batch) {
    for request in batch.requests() {
        if request.method != HttpMethod::Delete || !request.succeeded() {
            continue;
        }
        let Some(model) = request.model.upgrade() else {
            continue;
        };
        model.lock().unwrap().set_deleted();
        if let Some(parent) = &request.entity.parent {
            parent.remove(&model);
        }
    }
}
