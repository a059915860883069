#![forbid(unsafe_code)]

use std::sync::Arc;
use std::thread;

use vista_core::{CachedObject, Kind, ObjectKey};
use vista_store::ObjectStore;

fn obj(name: &str, version: u64) -> CachedObject {
    CachedObject::new(ObjectKey::new(Kind::Address, "ns", name), version, serde_json::json!({ "status": { "gen": version } }))
}

#[test]
fn readers_never_observe_half_applied_transactions() {
    let store = Arc::new(ObjectStore::new());
    store.transaction::<_, ()>(|t| {
        t.put(obj("left", 0));
        t.put(obj("right", 0));
        Ok(())
    }).unwrap();

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for v in 1..=500u64 {
                store.transaction::<_, ()>(|t| {
                    t.put(obj("left", v));
                    t.put(obj("right", v));
                    Ok(())
                }).unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut last_epoch = 0;
                for _ in 0..2_000 {
                    let snap = store.snapshot();
                    assert!(snap.epoch() >= last_epoch, "epochs must not go backwards");
                    last_epoch = snap.epoch();
                    let l = snap.get(Kind::Address, "ns", "left").map(|o| o.version);
                    let r = snap.get(Kind::Address, "ns", "right").map(|o| o.version);
                    assert_eq!(l, r, "both writes of a transaction land together");
                    assert_eq!(snap.list(Kind::Address, None).len(), 2);
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for r in readers { r.join().unwrap(); }
    assert_eq!(store.get(Kind::Address, "ns", "left").map(|o| o.version), Some(500));
}

#[test]
fn replay_basic_sequence() {
    let store = ObjectStore::new();
    store.put(obj("a", 1));
    store.put(obj("b", 1));
    let snap1 = store.snapshot();
    assert_eq!(snap1.epoch(), 2);
    assert_eq!(snap1.len(), 2);

    store.put(obj("a", 2));
    store.delete(Kind::Address, "ns", "b");
    let snap2 = store.snapshot();
    assert_eq!(snap2.epoch(), 4);
    assert_eq!(snap2.len(), 1);
    assert_eq!(snap2.list(Kind::Address, Some("ns"))[0].version, 2);
    // the earlier view still holds both objects
    assert_eq!(snap1.len(), 2);
}
