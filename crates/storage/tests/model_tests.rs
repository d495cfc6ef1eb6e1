//! Model-based tests for the memory tier
//!
//! Random operation sequences are applied to a `MemoryStore` and to a plain
//! `BTreeMap`; reads and read views must agree with the model.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use proptest::prelude::*;
use rand::Rng;
use tierkv_core::{MemoryTier, ReadView};
use tierkv_storage::MemoryStore;

#[derive(Debug, Clone)]
enum Op {
    Set(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let key = prop::collection::vec(0u8..4, 0..3);
    prop_oneof![
        3 => (key.clone(), prop::collection::vec(any::<u8>(), 0..8)).prop_map(|(k, v)| Op::Set(k, v)),
        1 => key.prop_map(Op::Delete),
    ]
}

fn view_contents(store: &MemoryStore, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    let view = store.read_view().unwrap();
    let mut out = Vec::new();
    view.ascend(prefix, &mut |k, v| {
        out.push((k.to_vec(), v.to_vec()));
        true
    })
    .unwrap();
    out
}

proptest! {
    #[test]
    fn store_matches_model(ops in prop::collection::vec(op_strategy(), 0..64)) {
        let store = MemoryStore::new();
        let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Set(k, v) => {
                    store.set(k.clone(), v.clone(), None).unwrap();
                    model.insert(k, v);
                }
                Op::Delete(k) => {
                    let removed = store.delete(&k).unwrap();
                    prop_assert_eq!(removed, model.remove(&k));
                }
            }
        }

        prop_assert_eq!(store.len(), model.len());
        let expected: Vec<_> = model.clone().into_iter().collect();
        prop_assert_eq!(view_contents(&store, b""), expected);

        let prefixed: Vec<_> = model
            .into_iter()
            .filter(|(k, _)| k.first() == Some(&1))
            .collect();
        prop_assert_eq!(view_contents(&store, &[1]), prefixed);
    }
}

#[test]
fn test_views_are_isolated_from_concurrent_writers() {
    let store = Arc::new(MemoryStore::new());
    for i in 0..100u32 {
        store.set(i.to_be_bytes().to_vec(), b"seed".to_vec(), None).unwrap();
    }

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            let mut rng = rand::thread_rng();
            for _ in 0..1000 {
                let key: u32 = rng.gen_range(0..200);
                store.set(key.to_be_bytes().to_vec(), b"new".to_vec(), None).unwrap();
            }
        })
    };

    for _ in 0..20 {
        let view = store.read_view().unwrap();
        let first = view_len(&view);
        thread::yield_now();
        assert_eq!(view_len(&view), first);
        assert!(first >= 100);
    }
    writer.join().unwrap();
}

fn view_len(view: &impl ReadView) -> usize {
    let mut n = 0;
    view.ascend(b"", &mut |_, _| {
        n += 1;
        true
    })
    .unwrap();
    n
}
