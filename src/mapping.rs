//! Seam between dispatched responses and the caller's JSON-to-model
//! mapping layer.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::batch::request::BatchRequest;
use crate::error::Result;

/// Casting hook applied while mapping a response fragment into a model.
pub type FromJsonCast = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Hook invoked with the raw response text once mapping has finished.
pub type PostMappingHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Populates a request's bound domain model from its attached response.
///
/// Implementations read [`BatchRequest::response_json`], resolve the weak
/// model reference, and write the decoded fields into the model. The
/// request's `from_json_cast` and `post_mapping` hooks are applied by the
/// mapper, not by the engine.
#[async_trait]
pub trait JsonMapper: Send + Sync {
    async fn map(&self, request: &mut BatchRequest) -> Result<()>;
}

/// Mapper that leaves models untouched.
///
/// Useful when a caller only needs the raw response text attached to each
/// request, and in tests of the wire layer.
pub struct NoopMapper;

#[async_trait]
impl JsonMapper for NoopMapper {
    async fn map(&self, _request: &mut BatchRequest) -> Result<()> {
        Ok(())
    }
}
