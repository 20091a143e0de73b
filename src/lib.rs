//! # Convoy - Batched API Dispatch Engine
//!
//! A client-side request batching and dispatch engine for document
//! collaboration backends that expose two endpoint families over the same
//! logical domain: a site-scoped REST family and a Graph family.
//!
//! Callers accumulate entity operations (read, create, update, delete)
//! into batches. Executing a batch groups the queued operations into one
//! or few server-side multi-request payloads, ships each payload over
//! HTTP, demultiplexes the per-sub-request responses, and reconciles the
//! returned data with the caller's in-memory domain model.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use convoy::batch::{BatchClient, ClientConfig};
//! use convoy::mapping::NoopMapper;
//! use convoy::transport::AnonymousAuth;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = BatchClient::new(
//!         ClientConfig::default(),
//!         Arc::new(AnonymousAuth),
//!         Arc::new(NoopMapper),
//!     );
//!
//!     let id = client.ensure_batch();
//!     // ... append requests via client.get_batch_mut(&id) ...
//!     client.execute_batch(id).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! Appending an operation binds it to a domain model through the
//! capability traits in [`model`]:
//!
//! ```ignore
//! let order = client.get_batch_mut(&id).unwrap().add(
//!     Arc::downgrade(&list_model),
//!     EntityInfo::new(Some("Id".into()), Some("id".into())),
//!     HttpMethod::Get,
//!     ApiCall::new(ApiFamily::Graph, "sites/abc/lists/42"),
//!     Some(ApiCall::new(ApiFamily::Rest, "https://host/sites/a/_api/web/lists('42')")),
//!     None,
//!     None,
//! );
//! ```
//!
//! ## Features
//!
//! - **Two wire framings**: MIME `multipart/mixed` with OData changesets
//!   for the REST family, a JSON `$batch` envelope for the Graph family
//! - **Family fall-back**: mixed batches rewrite wholesale to REST when
//!   every Graph request carries a REST backup call, and split into two
//!   sibling dispatches otherwise
//! - **Per-site partitioning**: REST batches spanning site roots become
//!   one multipart call per site
//! - **GET deduplication**: identical reads collapse before dispatch
//! - **Reconciliation**: duplicate results merge onto one canonical
//!   model, deletes propagate into parent collections

pub mod batch;
pub mod error;
pub mod mapping;
pub mod model;
pub mod transport;

pub use error::{ConvoyError, Result};
