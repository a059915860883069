//! Vista core types: resource kinds, cached objects, field access and the
//! normalized watch event shared by every source feeding the cache.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub mod kinds;

pub mod prelude {
    pub use super::{
        AddressSpaceKey, CachedObject, EventOp, FieldAccess, FieldPath, FieldValue, Kind, ObjectKey, WatchEvent,
    };
}

// ---------------- Kinds and identity ----------------

/// Resource kinds held by the cache. The last two are pushed by collector agents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    AddressSpace,
    Address,
    AuthenticationService,
    AddressSpaceSchema,
    Connection,
    Link,
}

impl Kind {
    pub const ALL: [Kind; 6] = [
        Kind::AddressSpace,
        Kind::Address,
        Kind::AuthenticationService,
        Kind::AddressSpaceSchema,
        Kind::Connection,
        Kind::Link,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::AddressSpace => "AddressSpace",
            Kind::Address => "Address",
            Kind::AuthenticationService => "AuthenticationService",
            Kind::AddressSpaceSchema => "AddressSpaceSchema",
            Kind::Connection => "Connection",
            Kind::Link => "Link",
        }
    }

    /// Cluster-scoped kinds carry an empty namespace in their key.
    pub fn namespaced(&self) -> bool { !matches!(self, Kind::AddressSpaceSchema) }

    /// Telemetry kinds are produced by collectors, never by the cluster API.
    pub fn is_telemetry(&self) -> bool { matches!(self, Kind::Connection | Kind::Link) }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for Kind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// Identity key of a cached object: `(kind, namespace, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub kind: Kind,
    /// Empty for cluster-scoped kinds.
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: Kind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { kind, namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() { write!(f, "{}/{}", self.kind, self.name) } else { write!(f, "{}/{}/{}", self.kind, self.namespace, self.name) }
    }
}

/// Key of an address space, used to look up its telemetry delegate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AddressSpaceKey {
    pub namespace: String,
    pub name: String,
}

impl AddressSpaceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }

    pub fn object_key(&self) -> ObjectKey { ObjectKey::new(Kind::AddressSpace, self.namespace.clone(), self.name.clone()) }
}

impl fmt::Display for AddressSpaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}/{}", self.namespace, self.name) }
}

// ---------------- Cached objects ----------------

/// An object as held by the store. Shared behind `Arc`; never mutated after ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedObject {
    pub key: ObjectKey,
    /// Monotonic token supplied by the source (resource revision).
    pub version: u64,
    /// `metadata.creationTimestamp` in unix seconds, 0 when absent.
    pub creation_ts: i64,
    /// Kind-specific shape as delivered by the source.
    pub payload: serde_json::Value,
}

impl CachedObject {
    pub fn new(key: ObjectKey, version: u64, payload: serde_json::Value) -> Self {
        let creation_ts = payload
            .pointer("/metadata/creationTimestamp")
            .and_then(|v| v.as_str())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp())
            .unwrap_or(0);
        Self { key, version, creation_ts, payload }
    }

    pub fn kind(&self) -> Kind { self.key.kind }
    pub fn namespace(&self) -> &str { &self.key.namespace }
    pub fn name(&self) -> &str { &self.key.name }
}

// ---------------- Field access ----------------

/// A scalar resolved from an object at a field path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Str(&'a str),
    Num(f64),
    Bool(bool),
}

impl<'a> FieldValue<'a> {
    /// Null, arrays and objects are not comparable scalars and resolve to absent.
    pub fn from_json(v: &'a serde_json::Value) -> Option<Self> {
        match v {
            serde_json::Value::String(s) => Some(FieldValue::Str(s)),
            serde_json::Value::Number(n) => n.as_f64().map(FieldValue::Num),
            serde_json::Value::Bool(b) => Some(FieldValue::Bool(*b)),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Str(_) => "string",
            FieldValue::Num(_) => "number",
            FieldValue::Bool(_) => "boolean",
        }
    }
}

impl fmt::Display for FieldValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Str(s) => f.write_str(s),
            FieldValue::Num(n) => write!(f, "{}", n),
            FieldValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// One step of a field path: an object member or an array index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid field path {path:?}: {reason}")]
pub struct PathError {
    pub path: String,
    pub reason: &'static str,
}

/// Validated dotted field path, e.g. `status.phase` or `spec.ports[0]`.
/// The JSONPath-like form `$.status.phase` is accepted too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: SmallVec<[Segment; 4]>,
}

impl FieldPath {
    pub fn parse(text: &str) -> Result<Self, PathError> {
        let err = |reason| PathError { path: text.to_string(), reason };
        let s = text.strip_prefix("$.").unwrap_or(text);
        if s.is_empty() { return Err(err("empty path")); }
        let mut segments = SmallVec::new();
        for seg in s.split('.') {
            if seg.is_empty() { return Err(err("empty segment")); }
            let (name, index) = match seg.find('[') {
                Some(open) => {
                    let inner = seg[open + 1..].strip_suffix(']').ok_or_else(|| err("unterminated index"))?;
                    if inner.is_empty() || !inner.chars().all(|c| c.is_ascii_digit()) { return Err(err("index must be digits")); }
                    let idx = inner.parse::<usize>().map_err(|_| err("index out of range"))?;
                    (&seg[..open], Some(idx))
                }
                None => (seg, None),
            };
            if name.is_empty() { return Err(err("empty segment")); }
            if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                return Err(err("segment has invalid characters"));
            }
            segments.push(Segment::Key(name.to_string()));
            if let Some(i) = index { segments.push(Segment::Index(i)); }
        }
        Ok(Self { raw: text.to_string(), segments })
    }

    pub fn as_str(&self) -> &str { &self.raw }
    pub fn segments(&self) -> &[Segment] { &self.segments }

    fn is(&self, dotted: &[&str]) -> bool {
        self.segments.len() == dotted.len()
            && self.segments.iter().zip(dotted).all(|(s, d)| matches!(s, Segment::Key(k) if k == d))
    }

    /// Walk a JSON document along this path.
    pub fn resolve<'a>(&self, root: &'a serde_json::Value) -> Option<&'a serde_json::Value> {
        let mut cur = root;
        for seg in self.segments.iter() {
            cur = match seg {
                Segment::Key(k) => cur.get(k.as_str())?,
                Segment::Index(i) => cur.get(*i)?,
            };
        }
        Some(cur)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.raw) }
}

/// Capability the filter and order engines evaluate against.
pub trait FieldAccess {
    fn field(&self, path: &FieldPath) -> Option<FieldValue<'_>>;
}

impl FieldAccess for serde_json::Value {
    fn field(&self, path: &FieldPath) -> Option<FieldValue<'_>> { path.resolve(self).and_then(FieldValue::from_json) }
}

impl FieldAccess for CachedObject {
    fn field(&self, path: &FieldPath) -> Option<FieldValue<'_>> {
        // Identity and version come from cache metadata, not from the payload.
        if path.is(&["kind"]) { return Some(FieldValue::Str(self.key.kind.as_str())); }
        if path.is(&["metadata", "name"]) { return Some(FieldValue::Str(&self.key.name)); }
        if path.is(&["metadata", "namespace"]) {
            return if self.key.kind.namespaced() { Some(FieldValue::Str(&self.key.namespace)) } else { None };
        }
        if path.is(&["metadata", "resourceVersion"]) { return Some(FieldValue::Num(self.version as f64)); }
        self.payload.field(path)
    }
}

impl<T: FieldAccess + ?Sized> FieldAccess for Arc<T> {
    fn field(&self, path: &FieldPath) -> Option<FieldValue<'_>> { (**self).field(path) }
}

impl<T: FieldAccess + ?Sized> FieldAccess for &T {
    fn field(&self, path: &FieldPath) -> Option<FieldValue<'_>> { (**self).field(path) }
}

// ---------------- Normalized watch events ----------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventOp {
    Add,
    Update,
    Delete,
}

/// Event shape every source (cluster watch, collector push) is normalized into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    pub op: EventOp,
    pub kind: Kind,
    pub namespace: String,
    pub name: String,
    /// Required for add/update; optional on delete.
    pub version: Option<u64>,
    pub payload: Option<serde_json::Value>,
}

impl WatchEvent {
    pub fn add(kind: Kind, namespace: &str, name: &str, version: u64, payload: serde_json::Value) -> Self {
        Self { op: EventOp::Add, kind, namespace: namespace.to_string(), name: name.to_string(), version: Some(version), payload: Some(payload) }
    }

    pub fn update(kind: Kind, namespace: &str, name: &str, version: u64, payload: serde_json::Value) -> Self {
        Self { op: EventOp::Update, ..Self::add(kind, namespace, name, version, payload) }
    }

    pub fn delete(kind: Kind, namespace: &str, name: &str, version: Option<u64>) -> Self {
        Self { op: EventOp::Delete, kind, namespace: namespace.to_string(), name: name.to_string(), version, payload: None }
    }

    pub fn key(&self) -> ObjectKey { ObjectKey::new(self.kind, self.namespace.clone(), self.name.clone()) }
}
