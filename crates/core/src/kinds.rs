//! Kind catalog: cluster API coordinates and display columns per kind.
//!
//! This module provides:
//! - The group/version each cluster-sourced kind is served under
//! - A column set per kind (Namespace/Name + kind-specific fields + Age)
//! - Cell rendering for a cached object

#![forbid(unsafe_code)]

use smallvec::SmallVec;

use crate::{CachedObject, FieldAccess, FieldPath, Kind};

/// Group/version a kind is served under; `None` for collector-pushed kinds.
pub fn api_coordinates(kind: Kind) -> Option<(&'static str, &'static str)> {
    match kind {
        Kind::AddressSpace | Kind::Address | Kind::AddressSpaceSchema => Some(("enmasse.io", "v1beta1")),
        Kind::AuthenticationService => Some(("admin.enmasse.io", "v1beta1")),
        Kind::Connection | Kind::Link => None,
    }
}

/// `group/version/Kind` key, the form used by the watch adapter.
pub fn gvk_key(kind: Kind) -> Option<String> {
    api_coordinates(kind).map(|(g, v)| format!("{}/{}/{}", g, v, kind))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Namespace,
    Name,
    Age,
    Field(&'static str),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnSpec {
    pub kind: ColumnKind,
    pub label: &'static str,
}

fn col(kind: ColumnKind, label: &'static str) -> ColumnSpec { ColumnSpec { kind, label } }

fn field(path: &'static str, label: &'static str) -> ColumnSpec { col(ColumnKind::Field(path), label) }

/// Full column set for a kind, including Namespace/Name/Age.
pub fn columns_for(kind: Kind) -> Vec<ColumnSpec> {
    let mut cols: Vec<ColumnSpec> = Vec::new();
    if kind.namespaced() {
        cols.push(col(ColumnKind::Namespace, "Namespace"));
    }
    cols.push(col(ColumnKind::Name, "Name"));

    match kind {
        Kind::AddressSpace => {
            cols.push(field("spec.type", "Type"));
            cols.push(field("spec.plan", "Plan"));
            cols.push(field("status.phase", "Phase"));
        }
        Kind::Address => {
            cols.push(field("spec.address", "Address"));
            cols.push(field("spec.type", "Type"));
            cols.push(field("spec.plan", "Plan"));
            cols.push(field("status.phase", "Phase"));
        }
        Kind::AuthenticationService => {
            cols.push(field("spec.type", "Type"));
            cols.push(field("status.phase", "Phase"));
        }
        Kind::AddressSpaceSchema => {
            // cluster-scoped: Name, Description, Age
            cols.push(field("spec.description", "Description"));
        }
        Kind::Connection => {
            cols.push(field("spec.hostname", "Host"));
            cols.push(field("spec.containerId", "Container"));
            cols.push(field("spec.protocol", "Protocol"));
        }
        Kind::Link => {
            cols.push(field("spec.connection", "Connection"));
            cols.push(field("spec.role", "Role"));
            cols.push(field("spec.address", "Address"));
        }
    }

    cols.push(col(ColumnKind::Age, "Age"));
    cols
}

/// Render one row for `obj` against `cols`; `now` is unix seconds.
pub fn render_row(obj: &CachedObject, cols: &[ColumnSpec], now: i64) -> SmallVec<[String; 8]> {
    cols.iter()
        .map(|c| match &c.kind {
            ColumnKind::Namespace => obj.namespace().to_string(),
            ColumnKind::Name => obj.name().to_string(),
            ColumnKind::Age => render_age(obj.creation_ts, now),
            ColumnKind::Field(p) => FieldPath::parse(p)
                .ok()
                .and_then(|path| obj.field(&path).map(|v| v.to_string()))
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect()
}

fn render_age(creation_ts: i64, now: i64) -> String {
    if creation_ts <= 0 { return "-".into(); }
    let secs = (now - creation_ts).max(0);
    match secs {
        s if s < 120 => format!("{}s", s),
        s if s < 2 * 3600 => format!("{}m", s / 60),
        s if s < 2 * 86_400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ObjectKey;

    #[test]
    fn columns_follow_scope() {
        let cols = columns_for(Kind::AddressSpaceSchema);
        assert_eq!(cols[0].kind, ColumnKind::Name);
        let cols = columns_for(Kind::Address);
        assert_eq!(cols[0].kind, ColumnKind::Namespace);
        assert_eq!(cols.last().map(|c| c.label), Some("Age"));
    }

    #[test]
    fn render_row_fills_missing_with_dash() {
        let o = CachedObject::new(
            ObjectKey::new(Kind::Address, "ns1", "q1"),
            3,
            serde_json::json!({
                "metadata": { "creationTimestamp": "2020-01-01T00:00:00Z" },
                "spec": { "address": "q1", "type": "queue" },
            }),
        );
        let cols = columns_for(Kind::Address);
        let row = render_row(&o, &cols, o.creation_ts + 300);
        assert_eq!(row.as_slice(), &["ns1", "q1", "q1", "queue", "-", "-", "5m"]);
    }

    #[test]
    fn gvk_keys() {
        assert_eq!(gvk_key(Kind::Address).as_deref(), Some("enmasse.io/v1beta1/Address"));
        assert_eq!(gvk_key(Kind::Link), None);
    }
}
