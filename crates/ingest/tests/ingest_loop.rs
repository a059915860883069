#![forbid(unsafe_code)]

use std::sync::Arc;

use vista_core::{Kind, WatchEvent};
use vista_ingest::{spawn_ingest, IngestMsg, Ingestor};
use vista_store::ObjectStore;

fn obj(phase: &str) -> serde_json::Value { serde_json::json!({ "status": { "phase": phase } }) }

async fn run_sequence(seq: &[IngestMsg]) -> Vec<(String, String, u64)> {
    let store = Arc::new(ObjectStore::new());
    let (tx, handle) = spawn_ingest(Arc::new(Ingestor::new(Arc::clone(&store))), 16);
    for m in seq.iter().cloned() { tx.send(m).await.unwrap(); }
    drop(tx);
    let stats = handle.await.unwrap();
    assert_eq!(stats.rejected, 1);
    let mut canon: Vec<(String, String, u64)> = store
        .list(Kind::Address, None)
        .iter()
        .map(|o| (o.namespace().to_string(), o.name().to_string(), o.version))
        .collect();
    canon.sort_unstable();
    canon
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deterministic_across_runs() {
    let seq = vec![
        IngestMsg::Event(WatchEvent::add(Kind::Address, "ns1", "a", 1, obj("Active"))),
        IngestMsg::Event(WatchEvent::add(Kind::Address, "ns2", "b", 1, obj("Active"))),
        IngestMsg::Event(WatchEvent::add(Kind::Address, "ns3", "c", 1, obj("Active"))),
        // out-of-order update and duplicate events
        IngestMsg::Event(WatchEvent::update(Kind::Address, "ns2", "b", 3, obj("Failed"))),
        IngestMsg::Event(WatchEvent::update(Kind::Address, "ns2", "b", 2, obj("Pending"))),
        IngestMsg::Event(WatchEvent::update(Kind::Address, "ns2", "b", 3, obj("Failed"))),
        // malformed: dropped, the stream carries on
        IngestMsg::Event(WatchEvent::add(Kind::Address, "ns1", "", 1, obj("Active"))),
        IngestMsg::Event(WatchEvent::delete(Kind::Address, "ns3", "c", None)),
        IngestMsg::Event(WatchEvent::add(Kind::Address, "prod", "d", 7, obj("Active"))),
        // re-list of ns1 that omits nothing and adds e
        IngestMsg::Resync {
            kind: Kind::Address,
            namespace: Some("ns1".into()),
            objects: vec![
                WatchEvent::update(Kind::Address, "ns1", "a", 1, obj("Active")),
                WatchEvent::update(Kind::Address, "ns1", "e", 4, obj("Active")),
            ],
        },
    ];

    let c1 = run_sequence(&seq).await;
    let c2 = run_sequence(&seq).await;
    assert_eq!(c1, c2, "canonical store view must be deterministic across runs");
    assert_eq!(
        c1,
        vec![
            ("ns1".to_string(), "a".to_string(), 1),
            ("ns1".to_string(), "e".to_string(), 4),
            ("ns2".to_string(), "b".to_string(), 3),
            ("prod".to_string(), "d".to_string(), 7),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn readers_see_progress_through_epoch_watch() {
    let store = Arc::new(ObjectStore::new());
    let mut epochs = store.subscribe_epoch();
    let (tx, handle) = spawn_ingest(Arc::new(Ingestor::new(Arc::clone(&store))), 8);
    tx.send(IngestMsg::Event(WatchEvent::add(Kind::AddressSpace, "ns1", "space", 1, obj("Active")))).await.unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(5), epochs.changed()).await.unwrap().unwrap();
    assert!(*epochs.borrow() >= 1);
    assert!(store.get(Kind::AddressSpace, "ns1", "space").is_some());
    drop(tx);
    handle.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stats_count_resync_rejections() {
    let store = Arc::new(ObjectStore::new());
    let (tx, handle) = spawn_ingest(Arc::new(Ingestor::new(Arc::clone(&store))), 4);
    tx.send(IngestMsg::Event(WatchEvent::add(Kind::Address, "ns1", "", 1, obj("Active")))).await.unwrap();
    tx.send(IngestMsg::Resync {
        kind: Kind::Address,
        namespace: Some("ns1".into()),
        objects: vec![
            WatchEvent::update(Kind::Address, "ns1", "a", 1, obj("Active")),
            WatchEvent::update(Kind::Address, "ns2", "x", 1, obj("Active")),
            WatchEvent::update(Kind::AddressSpace, "ns1", "space", 1, obj("Active")),
        ],
    })
    .await
    .unwrap();
    drop(tx);
    let stats = handle.await.unwrap();
    assert_eq!(stats.resyncs, 1);
    assert_eq!(stats.rejected, 3, "one malformed event plus two listed objects out of scope");
    assert_eq!(store.list(Kind::Address, None).len(), 1);
}
