//! The batch client: owns the batches, resolves each batch's dispatch
//! plan, ships the framed calls sequentially, and funnels responses back
//! through the parsers, the mapping helper, and the reconciler.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use uuid::Uuid;

use crate::batch::container::Batch;
use crate::batch::request::BatchRequest;
use crate::batch::split::DispatchPlan;
use crate::batch::{dedup, graph, reconcile, rest, split};
use crate::batch::{BatchId, HttpMethod, SubResponse};
use crate::error::{ConvoyError, Result};
use crate::mapping::JsonMapper;
use crate::transport::{AuthProvider, HttpTransport, OutboundRequest, Transport};

/// Graph endpoint version a client addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GraphVersion {
    V1,
    #[default]
    Beta,
}

impl GraphVersion {
    pub fn segment(&self) -> &'static str {
        match self {
            Self::V1 => "v1.0",
            Self::Beta => "beta",
        }
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URI of the Graph endpoint family
    pub graph_base: String,
    /// Graph endpoint version
    pub graph_version: GraphVersion,
    /// Request timeout in seconds
    pub timeout: u64,
    /// Maximum number of whole-call attempts in the bundled transports
    pub max_retries: u32,
    /// Base delay for exponential backoff (milliseconds)
    pub retry_base_delay: u64,
    /// User agent string
    pub user_agent: String,
    /// Most sub-requests one Graph envelope may carry
    pub max_graph_requests_per_call: usize,
    /// Most sub-requests one REST multipart may carry
    pub max_rest_requests_per_call: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            graph_base: "https://graph.example.net".to_string(),
            graph_version: GraphVersion::default(),
            timeout: 30,
            max_retries: 3,
            retry_base_delay: 100,
            user_agent: format!("convoy/{}", env!("CARGO_PKG_VERSION")),
            max_graph_requests_per_call: 20,
            max_rest_requests_per_call: 100,
        }
    }
}

impl ClientConfig {
    fn graph_batch_url(&self) -> String {
        format!(
            "{}/{}/$batch",
            self.graph_base.trim_end_matches('/'),
            self.graph_version.segment()
        )
    }
}

/// A failed sub-response recorded by the collecting execution mode.
#[derive(Debug, Clone)]
pub struct SubRequestError {
    pub order: usize,
    pub url: String,
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureMode {
    /// First non-2xx sub-response aborts the batch.
    Fail,
    /// Non-2xx sub-responses are recorded and execution continues.
    Collect,
}

/// Accumulates queued operations into batches and dispatches them.
///
/// The client exclusively owns its batches map. One logical session uses
/// one client from one task at a time; the transports, authentication
/// provider, and mapping helper it holds may be shared across sessions.
pub struct BatchClient {
    config: ClientConfig,
    auth: Arc<dyn AuthProvider>,
    rest_transport: Arc<dyn Transport>,
    graph_transport: Arc<dyn Transport>,
    mapper: Arc<dyn JsonMapper>,
    batches: HashMap<BatchId, Batch>,
}

impl BatchClient {
    /// Create a client with the bundled HTTP transports.
    pub fn new(
        config: ClientConfig,
        auth: Arc<dyn AuthProvider>,
        mapper: Arc<dyn JsonMapper>,
    ) -> Self {
        let rest_transport = Arc::new(HttpTransport::new(&config));
        let graph_transport = Arc::new(HttpTransport::new(&config));
        Self::with_transports(config, auth, rest_transport, graph_transport, mapper)
    }

    /// Create a client with caller-supplied transports.
    pub fn with_transports(
        config: ClientConfig,
        auth: Arc<dyn AuthProvider>,
        rest_transport: Arc<dyn Transport>,
        graph_transport: Arc<dyn Transport>,
        mapper: Arc<dyn JsonMapper>,
    ) -> Self {
        Self {
            config,
            auth,
            rest_transport,
            graph_transport,
            mapper,
            batches: HashMap::new(),
        }
    }

    /// Create a new batch and return its id.
    pub fn ensure_batch(&mut self) -> BatchId {
        let id = Uuid::new_v4();
        self.batches.insert(id, Batch::new(id));
        id
    }

    /// Look up or create the batch with the given id.
    ///
    /// Joining an in-flight id is idempotent: an existing batch is left
    /// untouched.
    pub fn ensure_batch_with_id(&mut self, id: BatchId) -> BatchId {
        self.batches.entry(id).or_insert_with(|| Batch::new(id));
        id
    }

    pub fn contains_batch(&self, id: &BatchId) -> bool {
        self.batches.contains_key(id)
    }

    pub fn get_batch(&self, id: &BatchId) -> Option<&Batch> {
        self.batches.get(id)
    }

    /// Mutable access for appending requests to an open batch.
    pub fn get_batch_mut(&mut self, id: &BatchId) -> Option<&mut Batch> {
        self.batches.get_mut(id)
    }

    /// Execute a batch: dedup, resolve the family plan, frame, ship,
    /// parse, map, and reconcile. The first failing sub-response aborts
    /// with [`ConvoyError::SubRequestFailed`] and skips reconciliation.
    ///
    /// Executing an already-executed (reaped) or unknown id is a no-op.
    ///
    /// Cancellation is dropping the returned future. Responses attached
    /// by HTTP calls that completed before the drop survive on their
    /// requests, but the batch stays un-executed and unreconciled; a
    /// later `execute_batch` on the same id re-dispatches every request
    /// still in the batch and overwrites stale responses.
    pub async fn execute_batch(&mut self, id: BatchId) -> Result<()> {
        self.execute_internal(id, FailureMode::Fail).await.map(|_| ())
    }

    /// Execute a batch without aborting on failed sub-responses.
    ///
    /// Envelope-level transport failures and malformed responses still
    /// abort; a non-2xx sub-response is recorded and returned while the
    /// rest of the batch proceeds. Failed requests keep no response and
    /// are skipped by reconciliation.
    pub async fn execute_batch_collecting(
        &mut self,
        id: BatchId,
    ) -> Result<Vec<SubRequestError>> {
        self.execute_internal(id, FailureMode::Collect).await
    }

    async fn execute_internal(
        &mut self,
        id: BatchId,
        mode: FailureMode,
    ) -> Result<Vec<SubRequestError>> {
        self.reap_executed();

        let auth = Arc::clone(&self.auth);
        let rest_transport = Arc::clone(&self.rest_transport);
        let graph_transport = Arc::clone(&self.graph_transport);
        let mapper = Arc::clone(&self.mapper);
        let config = self.config.clone();

        let Some(batch) = self.batches.get_mut(&id) else {
            debug!("Batch {} not present, nothing to execute", id);
            return Ok(Vec::new());
        };
        if batch.is_empty() {
            batch.mark_executed();
            return Ok(Vec::new());
        }

        dedup::prune_duplicate_gets(batch);

        let mut failures = Vec::new();
        match split::resolve(batch) {
            DispatchPlan::Graph => {
                let orders = batch.orders();
                dispatch_graph(
                    &config, &*auth, &*graph_transport, &*mapper, batch, &orders, mode,
                    &mut failures,
                )
                .await?;
            }
            DispatchPlan::Rest => {
                let orders = batch.orders();
                dispatch_rest(
                    &config, &*auth, &*rest_transport, &*mapper, batch, &orders, mode,
                    &mut failures,
                )
                .await?;
            }
            DispatchPlan::FallBackToRest => {
                info!("Mixed batch {} falls back to the REST family", id);
                batch.make_rest_only()?;
                let orders = batch.orders();
                dispatch_rest(
                    &config, &*auth, &*rest_transport, &*mapper, batch, &orders, mode,
                    &mut failures,
                )
                .await?;
            }
            DispatchPlan::Split => {
                info!("Mixed batch {} splits into REST and Graph siblings", id);
                let (rest_orders, graph_orders) = split::split_by_family(batch);
                dispatch_rest(
                    &config, &*auth, &*rest_transport, &*mapper, batch, &rest_orders, mode,
                    &mut failures,
                )
                .await?;
                dispatch_graph(
                    &config, &*auth, &*graph_transport, &*mapper, batch, &graph_orders, mode,
                    &mut failures,
                )
                .await?;
            }
        }

        reconcile::reconcile(batch);
        batch.mark_executed();
        debug!("Batch {} executed with {} request(s)", id, batch.len());
        Ok(failures)
    }

    /// Drop every executed batch. Runs at the start of each execute.
    fn reap_executed(&mut self) {
        let before = self.batches.len();
        self.batches.retain(|_, batch| !batch.executed());
        let reaped = before - self.batches.len();
        if reaped > 0 {
            debug!("Reaped {} executed batch(es)", reaped);
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_rest(
    config: &ClientConfig,
    auth: &dyn AuthProvider,
    transport: &dyn Transport,
    mapper: &dyn JsonMapper,
    batch: &mut Batch,
    orders: &[usize],
    mode: FailureMode,
    failures: &mut Vec<SubRequestError>,
) -> Result<()> {
    let subs = rest::partition_by_site(batch, orders)?;
    for sub in subs {
        for chunk in sub.orders.chunks(config.max_rest_requests_per_call.max(1)) {
            let boundary = format!("batch_{}", batch.id());
            let body = rest::frame_multipart(batch, chunk, &boundary);
            let mut outbound = OutboundRequest::new(
                sub.batch_url(),
                format!("multipart/mixed; boundary={}", boundary),
                body,
            );
            let target = outbound.target_uri()?;
            auth.authenticate(&target, &mut outbound).await?;

            debug!(
                "Dispatching REST batch of {} request(s) to {}",
                chunk.len(),
                outbound.url
            );
            let response = transport.send(&outbound).await?;
            if !response.is_success() {
                return Err(ConvoyError::TransportFailure {
                    status: response.status,
                    body: response.body,
                });
            }

            let parsed = rest::parse_multipart_response(&response.body, chunk)?;
            apply_sub_responses(batch, parsed, mode, failures, mapper).await?;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_graph(
    config: &ClientConfig,
    auth: &dyn AuthProvider,
    transport: &dyn Transport,
    mapper: &dyn JsonMapper,
    batch: &mut Batch,
    orders: &[usize],
    mode: FailureMode,
    failures: &mut Vec<SubRequestError>,
) -> Result<()> {
    for chunk in orders.chunks(config.max_graph_requests_per_call.max(1)) {
        let body = graph::frame_envelope(batch, chunk)?;
        let mut outbound =
            OutboundRequest::new(config.graph_batch_url(), graph::GRAPH_CONTENT_TYPE, body);
        let target = outbound.target_uri()?;
        auth.authenticate(&target, &mut outbound).await?;

        debug!(
            "Dispatching Graph batch of {} request(s) to {}",
            chunk.len(),
            outbound.url
        );
        let response = transport.send(&outbound).await?;
        if !response.is_success() {
            return Err(ConvoyError::TransportFailure {
                status: response.status,
                body: response.body,
            });
        }

        let parsed = graph::parse_envelope(&response.body, chunk)?;
        apply_sub_responses(batch, parsed, mode, failures, mapper).await?;
    }
    Ok(())
}

/// Attach parsed sub-responses to their requests, run the mapping helper
/// over every request that came back with a body, and commit transient
/// models behind successful PATCHes.
async fn apply_sub_responses(
    batch: &mut Batch,
    parsed: Vec<SubResponse>,
    mode: FailureMode,
    failures: &mut Vec<SubRequestError>,
    mapper: &dyn JsonMapper,
) -> Result<()> {
    for sub in parsed {
        let Some(request) = batch.get_request_mut(sub.order) else {
            continue;
        };
        if !(200..300).contains(&sub.status) {
            let url = request.primary.url.clone();
            match mode {
                FailureMode::Fail => {
                    return Err(ConvoyError::SubRequestFailed {
                        url,
                        status: sub.status,
                        body: sub.body,
                    });
                }
                FailureMode::Collect => {
                    warn!("Sub-request {} returned {}", url, sub.status);
                    failures.push(SubRequestError {
                        order: sub.order,
                        url,
                        status: sub.status,
                        body: sub.body,
                    });
                    continue;
                }
            }
        }

        request.attach_response(sub.body, sub.status);
        if request.has_response_body() {
            mapper.map(request).await?;
        }
        if request.method == HttpMethod::Patch {
            commit_transient(request);
        }
    }
    Ok(())
}

fn commit_transient(request: &BatchRequest) {
    if let Some(model) = request.model.upgrade() {
        let mut guard = model.lock().unwrap();
        if let Some(transient) = guard.transient() {
            transient.commit();
        }
    }
}
