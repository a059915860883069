//! Vista query façade (in-process).
//!
//! [`Console`] answers filtered, ordered, paginated queries over one store
//! snapshot, fetches live telemetry through the delegate registry and forwards
//! mutations to an external sink. Frontends depend on this crate only.

#![forbid(unsafe_code)]

pub mod page;
pub mod plans;
pub mod settings;

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vista_agent::{DelegateError, DelegateRegistry, Telemetry};
use vista_core::{AddressSpaceKey, CachedObject, Kind, ObjectKey};
use vista_store::ObjectStore;

pub use page::{window, Window};
pub use plans::{AddressType, PlanDetails};
pub use settings::Settings;

/// API errors suitable for transport over RPC later.
#[derive(Debug, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum VistaError {
    #[error("parse: {0}")]
    Parse(String),
    #[error("evaluation: {0}")]
    Evaluation(String),
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type VistaResult<T> = Result<T, VistaError>;

/// One page request over a single kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub kind: Kind,
    /// `None` (or empty) spans all namespaces; ignored for cluster-scoped kinds.
    pub namespace: Option<String>,
    pub filter: Option<String>,
    pub order_by: Option<String>,
    pub offset: Option<i64>,
    pub first: Option<i64>,
}

impl QueryRequest {
    pub fn new(kind: Kind) -> Self {
        Self { kind, namespace: None, filter: None, order_by: None, offset: None, first: None }
    }

    pub fn namespace(mut self, ns: impl Into<String>) -> Self { self.namespace = Some(ns.into()); self }
    pub fn filter(mut self, f: impl Into<String>) -> Self { self.filter = Some(f.into()); self }
    pub fn order_by(mut self, o: impl Into<String>) -> Self { self.order_by = Some(o.into()); self }
    pub fn offset(mut self, o: i64) -> Self { self.offset = Some(o); self }
    pub fn first(mut self, n: i64) -> Self { self.first = Some(n); self }
}

/// A result window plus the number of matches before pagination.
#[derive(Debug, Clone)]
pub struct QueryPage {
    pub items: Vec<Arc<CachedObject>>,
    pub total: usize,
}

/// Write request forwarded to the platform; the cache only changes once the
/// resulting watch event comes back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    Create { key: ObjectKey, payload: serde_json::Value },
    Replace { key: ObjectKey, payload: serde_json::Value },
    Delete { key: ObjectKey },
}

impl Mutation {
    pub fn key(&self) -> &ObjectKey {
        match self {
            Mutation::Create { key, .. } | Mutation::Replace { key, .. } | Mutation::Delete { key } => key,
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            Mutation::Create { .. } => "create",
            Mutation::Replace { .. } => "replace",
            Mutation::Delete { .. } => "delete",
        }
    }
}

#[async_trait::async_trait]
pub trait MutationSink: Send + Sync {
    async fn submit(&self, mutation: Mutation) -> anyhow::Result<()>;
}

pub struct Console {
    store: Arc<ObjectStore>,
    registry: Arc<DelegateRegistry>,
    sink: Option<Arc<dyn MutationSink>>,
}

impl Console {
    pub fn new(store: Arc<ObjectStore>, registry: Arc<DelegateRegistry>) -> Self { Self { store, registry, sink: None } }

    pub fn with_sink(mut self, sink: Arc<dyn MutationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn store(&self) -> &Arc<ObjectStore> { &self.store }

    /// Filter, count, order and window one snapshot of `req.kind`.
    pub fn query(&self, req: &QueryRequest) -> VistaResult<QueryPage> {
        let t0 = Instant::now();
        let filter = vista_filter::parse_filter(req.filter.as_deref()).map_err(|e| VistaError::Parse(format!("filter: {}", e)))?;
        let order = vista_filter::parse_order(req.order_by.as_deref()).map_err(|e| VistaError::Parse(format!("order_by: {}", e)))?;
        let ns = if req.kind.namespaced() { req.namespace.as_deref().filter(|s| !s.is_empty()) } else { None };

        let snap = self.store.snapshot();
        let listed = snap.list(req.kind, ns);
        let scanned = listed.len();
        let mut matched = vista_filter::retain_matching(listed, filter.as_ref()).map_err(|e| {
            metrics::counter!("query_errors_total", 1u64, "kind" => req.kind.as_str());
            VistaError::Evaluation(e.to_string())
        })?;
        let total = matched.len();
        if let Some(order) = &order { order.sort(&mut matched); }
        let w = window(req.offset, req.first, total);
        let items: Vec<_> = matched.drain(w.lower..w.upper).collect();

        let took_ms = t0.elapsed().as_millis();
        metrics::counter!("queries_total", 1u64, "kind" => req.kind.as_str());
        metrics::histogram!("query_latency_ms", took_ms as f64);
        info!(kind = %req.kind, ns = %ns.unwrap_or("(all)"), epoch = snap.epoch(), scanned, total, returned = items.len(), took_ms = %took_ms, "api: query ok");
        Ok(QueryPage { items, total })
    }

    pub fn get(&self, kind: Kind, namespace: &str, name: &str) -> VistaResult<Arc<CachedObject>> {
        let ns = if kind.namespaced() { namespace } else { "" };
        self.store.get(kind, ns, name).ok_or_else(|| VistaError::NotFound(ObjectKey::new(kind, ns, name).to_string()))
    }

    /// Live telemetry for the address space that owns `obj`.
    pub fn live_metrics(&self, obj: &CachedObject) -> VistaResult<Telemetry> {
        let key = owning_address_space(obj)?;
        let handle = self.registry.get(&key).ok_or_else(|| VistaError::NotFound(format!("no collector for address space {}", key)))?;
        match handle.collect() {
            Ok(t) => {
                metrics::counter!("live_metrics_total", 1u64, "outcome" => "ok");
                Ok(t)
            }
            Err(e @ DelegateError::Orphaned(_)) => {
                metrics::counter!("live_metrics_total", 1u64, "outcome" => "orphaned");
                Err(VistaError::NotFound(e.to_string()))
            }
            Err(e @ DelegateError::Collect { .. }) => {
                metrics::counter!("live_metrics_total", 1u64, "outcome" => "error");
                warn!(key = %key, error = ?e, "api: telemetry collection failed");
                Err(VistaError::Internal(e.to_string()))
            }
        }
    }

    /// Validate and forward a mutation; the cache itself is never written here.
    pub async fn mutate(&self, mutation: Mutation) -> VistaResult<()> {
        validate_mutation(&mutation)?;
        let sink = self.sink.as_ref().ok_or_else(|| VistaError::Validation("mutations are disabled".into()))?;
        let key = mutation.key().clone();
        let verb = mutation.verb();
        let t0 = Instant::now();
        sink.submit(mutation).await.map_err(|e| VistaError::Internal(format!("{} {}: {:#}", verb, key, e)))?;
        info!(key = %key, verb, took_ms = %t0.elapsed().as_millis(), "api: mutation submitted");
        Ok(())
    }

    /// Address types and their plans offered by an address space type.
    pub fn address_types(&self, address_space_type: &str) -> VistaResult<Vec<AddressType>> {
        let schema = self
            .store
            .get(Kind::AddressSpaceSchema, "", address_space_type)
            .ok_or_else(|| VistaError::NotFound(format!("address space schema {}", address_space_type)))?;
        let types = plans::address_types(&schema.payload);
        debug!(schema = %address_space_type, types = types.len(), "api: address types");
        Ok(types)
    }
}

fn spec_address_space(obj: &CachedObject) -> Option<&str> {
    obj.payload.pointer("/spec/addressSpace").and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

fn owning_address_space(obj: &CachedObject) -> VistaResult<AddressSpaceKey> {
    let ns = obj.namespace();
    let name = match obj.kind() {
        Kind::AddressSpace => Some(obj.name()),
        // Address names are "<address space>.<address>".
        Kind::Address => spec_address_space(obj).or_else(|| obj.name().split_once('.').map(|(space, _)| space)),
        Kind::Connection | Kind::Link => spec_address_space(obj),
        other => return Err(VistaError::Validation(format!("{} has no live metrics", other))),
    };
    match name {
        Some(n) if !n.is_empty() => Ok(AddressSpaceKey::new(ns, n)),
        _ => Err(VistaError::Validation(format!("cannot determine address space of {}", obj.key))),
    }
}

fn validate_mutation(m: &Mutation) -> VistaResult<()> {
    let key = m.key();
    if key.kind.is_telemetry() {
        return Err(VistaError::Validation(format!("{} objects are reported by collectors and cannot be changed", key.kind)));
    }
    if key.name.is_empty() { return Err(VistaError::Validation("name is required".into())); }
    if key.kind.namespaced() == key.namespace.is_empty() {
        let what = if key.kind.namespaced() { "requires" } else { "does not take" };
        return Err(VistaError::Validation(format!("{} {} a namespace", key.kind, what)));
    }
    match m {
        Mutation::Create { payload, .. } | Mutation::Replace { payload, .. } if !payload.is_object() => {
            Err(VistaError::Validation("payload must be a JSON object".into()))
        }
        _ => Ok(()),
    }
}
