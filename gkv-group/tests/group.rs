//! End-to-end scenarios needing real TCP loopback listeners (§8): peer
//! forwarding across a small cluster, and single-flighted concurrent
//! misses through the façade.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gkv_group::{Group, LoaderFn, LoaderFuture, NodeConfig};
use gkv_peer::HashRing;

fn never_called_loader(label: &'static str) -> LoaderFn {
    Arc::new(move |key: String| -> LoaderFuture {
        Box::pin(async move { Err(format!("{label} should not have been asked for {key}")) })
    })
}

fn counting_loader(counter: Arc<AtomicUsize>, value: Vec<u8>) -> LoaderFn {
    Arc::new(move |_key: String| -> LoaderFuture {
        let counter = counter.clone();
        let value = value.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        })
    })
}

async fn start_node(loader: LoaderFn) -> Arc<Group> {
    let mut cfg = NodeConfig::default();
    cfg.max_cost = 4096;
    cfg.num_counters = 1024;
    cfg.peer_timeout_ms = 2_000;
    Group::new(cfg, loader).await.unwrap()
}

/// Finds a key whose ring owner (under the given membership) is exactly
/// `owner_addr`, so the test can assert the right node answered.
fn find_key_owned_by(members: &[String], owner_addr: &str) -> String {
    let ring = HashRing::init(members, gkv_peer::DEFAULT_REPLICAS);
    (0..10_000)
        .map(|i| format!("peer-forward-key-{i}"))
        .find(|k| ring.get(k) == Some(owner_addr))
        .expect("some key must land on the target owner among a 10k sample")
}

#[tokio::test]
async fn peer_forward_then_local_cache_serves_subsequent_lookups() {
    let b_hits = Arc::new(AtomicUsize::new(0));

    let node_a = start_node(never_called_loader("A")).await;
    let node_b = start_node(counting_loader(b_hits.clone(), b"b-owns-this".to_vec())).await;
    let node_c = start_node(never_called_loader("C")).await;

    let members = vec![
        node_a.local_addr().to_string(),
        node_b.local_addr().to_string(),
        node_c.local_addr().to_string(),
    ];
    node_a.register_peers(&members).unwrap();
    node_b.register_peers(&members).unwrap();
    node_c.register_peers(&members).unwrap();

    let key = find_key_owned_by(&members, &members[1]);

    // 100 concurrent callers on A for a key B owns: A's single-flight
    // collapses them into one peer call, so B's loader runs exactly once.
    let mut handles = Vec::new();
    for _ in 0..100 {
        let node_a = node_a.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move { node_a.get(&key).await.unwrap() }));
    }
    for h in handles {
        let value = h.await.unwrap();
        assert_eq!(value.as_slice(), b"b-owns-this");
    }
    assert_eq!(b_hits.load(Ordering::SeqCst), 1, "B's loader must run exactly once");

    // Give the ingest worker on A a chance to drain before asserting the
    // follow-up lookup is served locally.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let hits_before = b_hits.load(Ordering::SeqCst);
    let value = node_a.get(&key).await.unwrap();
    assert_eq!(value.as_slice(), b"b-owns-this");
    assert_eq!(
        b_hits.load(Ordering::SeqCst),
        hits_before,
        "a subsequent get on A must not contact B again"
    );
}

#[tokio::test]
async fn local_loader_serves_when_this_node_owns_the_key() {
    let hits = Arc::new(AtomicUsize::new(0));
    let node = start_node(counting_loader(hits.clone(), b"local-value".to_vec())).await;
    node.register_peers(&[node.local_addr().to_string()]).unwrap();

    let value = node.get("any-key").await.unwrap();
    assert_eq!(value.as_slice(), b"local-value");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
