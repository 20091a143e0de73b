//! The queued-operation model: one request per entity operation, immutable
//! after append apart from the response slots the dispatcher fills.

use std::fmt;

use crate::batch::{ApiFamily, HttpMethod};
use crate::mapping::{FromJsonCast, PostMappingHook};
use crate::model::{EntityInfo, ModelRef};

/// One concrete endpoint call: target URL plus optional JSON body.
///
/// A request holds a primary call in its own family and may hold a backup
/// call in the other family, used when a mixed batch falls back wholesale
/// to REST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCall {
    pub family: ApiFamily,
    pub url: String,
    pub json_body: Option<String>,
}

impl ApiCall {
    pub fn new(family: ApiFamily, url: impl Into<String>) -> Self {
        Self {
            family,
            url: url.into(),
            json_body: None,
        }
    }

    pub fn with_body(family: ApiFamily, url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            family,
            url: url.into(),
            json_body: Some(body.into()),
        }
    }

    /// Equality of target used by GET deduplication: URL plus body text.
    pub(crate) fn same_target(&self, other: &ApiCall) -> bool {
        self.url == other.url && self.json_body == other.json_body
    }
}

/// A queued operation inside a batch.
pub struct BatchRequest {
    /// Insertion index within the batch, 0-based, stable for the batch's
    /// lifetime. Sub-response demultiplexing keys off this.
    pub order: usize,
    pub method: HttpMethod,
    pub primary: ApiCall,
    pub backup: Option<ApiCall>,
    /// Weak back-reference to the bound domain model. The model owns
    /// itself; the request only points.
    pub model: ModelRef,
    pub entity: EntityInfo,
    pub from_json_cast: Option<FromJsonCast>,
    pub post_mapping: Option<PostMappingHook>,
    /// Response body text, populated by the dispatcher. Empty for 204.
    pub response_json: Option<String>,
    /// Sub-response HTTP status, populated by the dispatcher.
    pub response_status: Option<u16>,
}

impl BatchRequest {
    /// The family the request currently dispatches through.
    pub fn family(&self) -> ApiFamily {
        self.primary.family
    }

    /// Whether this request can be rewritten onto the REST family.
    pub fn has_rest_backup(&self) -> bool {
        matches!(&self.backup, Some(call) if call.family == ApiFamily::Rest)
    }

    /// Promote the backup call into the primary slot.
    ///
    /// Only meaningful for Graph requests carrying a REST backup; the
    /// container checks that before calling.
    pub(crate) fn promote_backup(&mut self) {
        if let Some(backup) = self.backup.take() {
            self.primary = backup;
        }
    }

    /// Site root of a REST call: the prefix of the URL up to the first
    /// `/_api/` segment.
    pub fn site_root(&self) -> Option<&str> {
        self.primary.url.split_once("/_api/").map(|(site, _)| site)
    }

    pub(crate) fn attach_response(&mut self, body: String, status: u16) {
        self.response_json = Some(body);
        self.response_status = Some(status);
    }

    /// Whether a 2xx sub-response has been attached.
    pub fn succeeded(&self) -> bool {
        matches!(self.response_status, Some(status) if (200..300).contains(&status))
    }

    /// Whether the attached response carries a body worth mapping.
    pub fn has_response_body(&self) -> bool {
        matches!(&self.response_json, Some(body) if !body.is_empty())
    }
}

impl fmt::Debug for BatchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchRequest")
            .field("order", &self.order)
            .field("method", &self.method)
            .field("primary", &self.primary)
            .field("backup", &self.backup)
            .field("entity", &self.entity)
            .field("response_status", &self.response_status)
            .finish()
    }
}
