//! Vista kubehub: list/watch wiring that feeds normalized events to the ingest loop.

#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use kube::{
    api::Api,
    core::{ApiResource, DynamicObject, GroupVersionKind},
    runtime::watcher::{self, Event},
    runtime::WatchStreamExt,
    Client,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vista_core::{kinds, EventOp, Kind, WatchEvent};
use vista_ingest::IngestMsg;

fn parse_gvk_key(key: &str) -> Result<GroupVersionKind> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] => Ok(GroupVersionKind::gvk("", version, kind)),
        [group, version, kind] => Ok(GroupVersionKind::gvk(group, version, kind)),
        _ => Err(anyhow!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key)),
    }
}

/// API resource a kind is listed from; collector-pushed kinds have none.
pub fn api_resource(kind: Kind) -> Result<ApiResource> {
    let key = kinds::gvk_key(kind).ok_or_else(|| anyhow!("{} is reported by collectors, not watched", kind))?;
    let gvk = parse_gvk_key(&key)?;
    let plural = match kind {
        Kind::Address => "addresses".to_string(),
        other => format!("{}s", other.as_str().to_ascii_lowercase()),
    };
    Ok(ApiResource::from_gvk_with_plural(&gvk, &plural))
}

fn strip_managed_fields(v: &mut serde_json::Value) {
    if let Some(obj) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        obj.remove("managedFields");
    }
}

/// Normalize a raw object into a watch event. Deletes tolerate a missing or
/// unparsable `resourceVersion`; adds and updates do not.
pub fn event_from_value(kind: Kind, mut raw: serde_json::Value, op: EventOp) -> Result<WatchEvent> {
    strip_managed_fields(&mut raw);
    let meta = raw.get("metadata").ok_or_else(|| anyhow!("object missing metadata"))?;
    let name = meta.get("name").and_then(|v| v.as_str()).filter(|s| !s.is_empty()).ok_or_else(|| anyhow!("object missing metadata.name"))?.to_string();
    let namespace = if kind.namespaced() { meta.get("namespace").and_then(|v| v.as_str()).unwrap_or("").to_string() } else { String::new() };
    let rv = meta.get("resourceVersion").and_then(|v| v.as_str());
    let version = match (op, rv) {
        (EventOp::Delete, rv) => rv.and_then(|s| s.parse::<u64>().ok()),
        (_, Some(s)) => Some(s.parse::<u64>().with_context(|| format!("parsing resourceVersion {:?} of {}/{}", s, kind, name))?),
        (_, None) => return Err(anyhow!("{} {}/{} has no resourceVersion", kind, namespace, name)),
    };
    let payload = if op == EventOp::Delete { None } else { Some(raw) };
    Ok(WatchEvent { op, kind, namespace, name, version, payload })
}

pub fn event_from(kind: Kind, obj: &DynamicObject, op: EventOp) -> Result<WatchEvent> {
    let raw = serde_json::to_value(obj).context("serializing DynamicObject")?;
    event_from_value(kind, raw, op)
}

fn convert_all(kind: Kind, list: &[DynamicObject]) -> Vec<WatchEvent> {
    list.iter()
        .filter_map(|o| match event_from(kind, o, EventOp::Update) {
            Ok(ev) => Some(ev),
            Err(e) => {
                warn!(kind = %kind, error = %e, "skipping unconvertible object");
                metrics::counter!("watch_convert_errors_total", 1u64, "kind" => kind.as_str());
                None
            }
        })
        .collect()
}

/// Map one watcher event to an ingest message; `None` when nothing is worth sending.
fn ingest_msg(kind: Kind, namespace: Option<&str>, ev: Event<DynamicObject>) -> Option<IngestMsg> {
    let converted = match ev {
        Event::Applied(o) => event_from(kind, &o, EventOp::Update),
        Event::Deleted(o) => event_from(kind, &o, EventOp::Delete),
        Event::Restarted(list) => {
            debug!(kind = %kind, count = list.len(), "watch restart");
            let objects = convert_all(kind, &list);
            return Some(IngestMsg::Resync { kind, namespace: namespace.map(str::to_string), objects });
        }
    };
    match converted {
        Ok(ev) => Some(IngestMsg::Event(ev)),
        Err(e) => {
            warn!(kind = %kind, error = %e, "skipping unconvertible event");
            metrics::counter!("watch_convert_errors_total", 1u64, "kind" => kind.as_str());
            None
        }
    }
}

/// List+watch `kind` (all namespaces when `namespace` is `None`) and forward
/// events into `tx`. With `resync` set the watch is restarted periodically,
/// which relists and reconciles the cache. Returns when `tx` is closed.
pub async fn start_watcher(kind: Kind, namespace: Option<&str>, resync: Option<Duration>, tx: mpsc::Sender<IngestMsg>) -> Result<()> {
    let client = Client::try_default().await.context("building kube client")?;
    let ar = api_resource(kind)?;
    let api: Api<DynamicObject> = match namespace.filter(|_| kind.namespaced()) {
        Some(ns) => Api::namespaced_with(client, ns, &ar),
        None => Api::all_with(client, &ar),
    };
    let scope = namespace.filter(|_| kind.namespaced());

    loop {
        let stream = watcher::watcher(api.clone(), watcher::Config::default()).default_backoff();
        futures::pin_mut!(stream);
        info!(kind = %kind, ns = ?scope, "watcher started");
        let deadline = async {
            match resync {
                Some(d) if !d.is_zero() => tokio::time::sleep(d).await,
                _ => std::future::pending::<()>().await,
            }
        };
        futures::pin_mut!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => {
                    debug!(kind = %kind, "periodic relist");
                    break;
                }
                next = stream.next() => match next {
                    Some(Ok(ev)) => {
                        metrics::counter!("watch_events_total", 1u64, "kind" => kind.as_str());
                        if let Some(msg) = ingest_msg(kind, scope, ev) {
                            if tx.send(msg).await.is_err() {
                                info!(kind = %kind, "ingest closed; watcher stopping");
                                return Ok(());
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(kind = %kind, error = %e, "watch error");
                        metrics::counter!("watch_errors_total", 1u64, "kind" => kind.as_str());
                    }
                    None => {
                        warn!(kind = %kind, "watcher stream ended");
                        return Ok(());
                    }
                },
            }
        }
    }
}

/// Spawn one watcher task per cluster-sourced kind in `kinds`.
pub fn spawn_watchers(
    wanted: &[Kind],
    namespace: Option<String>,
    resync: Option<Duration>,
    tx: mpsc::Sender<IngestMsg>,
) -> Vec<(Kind, JoinHandle<Result<()>>)> {
    wanted
        .iter()
        .copied()
        .filter(|k| kinds::api_coordinates(*k).is_some())
        .map(|kind| {
            let tx = tx.clone();
            let ns = namespace.clone();
            let handle = tokio::spawn(async move {
                let res = start_watcher(kind, ns.as_deref(), resync, tx).await;
                if let Err(e) = &res { warn!(kind = %kind, error = %e, "watcher failed"); }
                res
            });
            (kind, handle)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn api_resources_for_cluster_kinds() {
        let ar = api_resource(Kind::Address).unwrap();
        assert_eq!((ar.group.as_str(), ar.version.as_str(), ar.plural.as_str()), ("enmasse.io", "v1beta1", "addresses"));
        assert_eq!(api_resource(Kind::AddressSpaceSchema).unwrap().plural, "addressspaceschemas");
        assert_eq!(api_resource(Kind::AuthenticationService).unwrap().group, "admin.enmasse.io");
        assert!(api_resource(Kind::Connection).is_err());
    }

    #[test]
    fn gvk_key_parsing() {
        assert_eq!(parse_gvk_key("v1/ConfigMap").unwrap().group, "");
        assert_eq!(parse_gvk_key("enmasse.io/v1beta1/Address").unwrap().kind, "Address");
        assert!(parse_gvk_key("Address").is_err());
    }

    #[test]
    fn converts_applied_object() {
        let raw = json!({
            "apiVersion": "enmasse.io/v1beta1",
            "kind": "Address",
            "metadata": { "name": "space.q1", "namespace": "ns1", "resourceVersion": "42", "managedFields": [{}] },
            "spec": { "address": "q1", "type": "queue" },
        });
        let ev = event_from_value(Kind::Address, raw, EventOp::Update).unwrap();
        assert_eq!((ev.namespace.as_str(), ev.name.as_str(), ev.version), ("ns1", "space.q1", Some(42)));
        let payload = ev.payload.unwrap();
        assert!(payload.pointer("/metadata/managedFields").is_none());
        assert_eq!(payload.pointer("/spec/type"), Some(&json!("queue")));
    }

    #[test]
    fn cluster_scoped_drops_namespace() {
        let raw = json!({ "metadata": { "name": "standard", "namespace": "ignored", "resourceVersion": "7" } });
        let ev = event_from_value(Kind::AddressSpaceSchema, raw, EventOp::Add).unwrap();
        assert_eq!(ev.namespace, "");
    }

    #[test]
    fn delete_tolerates_missing_version() {
        let ev = event_from_value(Kind::AddressSpace, json!({ "metadata": { "name": "s", "namespace": "n" } }), EventOp::Delete).unwrap();
        assert_eq!(ev.version, None);
        assert!(ev.payload.is_none());
        assert!(event_from_value(Kind::AddressSpace, json!({ "metadata": { "name": "s", "namespace": "n" } }), EventOp::Update).is_err());
        assert!(event_from_value(Kind::AddressSpace, json!({ "metadata": { "name": "s", "resourceVersion": "x1" } }), EventOp::Add).is_err());
        assert!(event_from_value(Kind::AddressSpace, json!({ "metadata": { "resourceVersion": "1" } }), EventOp::Add).is_err());
    }

    #[test]
    fn restart_becomes_scoped_resync() {
        let obj: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "enmasse.io/v1beta1",
            "kind": "AddressSpace",
            "metadata": { "name": "s1", "namespace": "ns1", "resourceVersion": "3" },
        }))
        .unwrap();
        match ingest_msg(Kind::AddressSpace, Some("ns1"), Event::Restarted(vec![obj])) {
            Some(IngestMsg::Resync { kind, namespace, objects }) => {
                assert_eq!(kind, Kind::AddressSpace);
                assert_eq!(namespace.as_deref(), Some("ns1"));
                assert_eq!(objects.len(), 1);
                assert_eq!(objects[0].version, Some(3));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
