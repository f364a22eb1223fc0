//! Composes the cache, the peer selector, single-flight, and the peer
//! transport into the lookup algorithm of §4.15. This is intentionally a
//! thin layer: each of the four core subsystems keeps its own lock and
//! its own error type, and `Group` just sequences calls between them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use gkv_cache::{Cache, CacheConfig};
use gkv_common::ByteView;
use gkv_peer::PeerSelector;
use gkv_singleflight::SingleFlight;
use gkv_transport::{ClientPool, GetValueFuture, PeerServer, ServerConfig};

use crate::config::NodeConfig;
use crate::error::GroupError;

pub type LoaderFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>, String>> + Send>>;
/// Host-supplied value loader (§6): called only on local cache miss with
/// no remote owner, or after a failed peer attempt.
pub type LoaderFn = Arc<dyn Fn(String) -> LoaderFuture + Send + Sync>;

pub struct Group {
    cache: Arc<Cache<ByteView>>,
    selector: Arc<PeerSelector>,
    pool: Arc<ClientPool>,
    sf: Arc<SingleFlight<String, ByteView, String>>,
    loader: LoaderFn,
    peer_timeout: Duration,
    _server: PeerServer,
}

impl Group {
    /// Builds the cache, peer selector, and transport client pool, starts
    /// the peer server task, and returns the composed façade. Peer
    /// membership is empty until [`Group::register_peers`] is called.
    pub async fn new(cfg: NodeConfig, loader: LoaderFn) -> Result<Arc<Self>, GroupError> {
        let cache = Cache::new(CacheConfig {
            max_cost: cfg.max_cost,
            num_counters: cfg.num_counters,
            ..CacheConfig::default()
        })?;
        let pool = ClientPool::new(cfg.codec_id);

        let server_cache = cache.clone();
        let server_loader = loader.clone();
        let get_value = Arc::new(move |key: String| -> GetValueFuture {
            let cache = server_cache.clone();
            let loader = server_loader.clone();
            Box::pin(async move { local_get_or_load(&cache, &loader, key).await })
        });

        let server = PeerServer::bind(ServerConfig::new(cfg.listen_addr.clone(), cfg.codec_id), get_value)
            .await?;

        // The selector's notion of "local" must be the address peers
        // will actually dial, not the pre-bind configured address — the
        // two differ whenever `listen_addr` uses the ephemeral port 0.
        let selector = Arc::new(PeerSelector::new(server.local_addr().to_string()));

        Ok(Arc::new(Group {
            cache,
            selector,
            pool,
            sf: Arc::new(SingleFlight::new()),
            loader,
            peer_timeout: cfg.peer_timeout(),
            _server: server,
        }))
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self._server.local_addr()
    }

    /// (Re)initializes the peer ring for the given cluster membership,
    /// which must include this node's own listen address (§4.10).
    pub fn register_peers(&self, members: &[String]) -> Result<(), gkv_peer::PeerError> {
        self.selector.register_peers(members)
    }

    /// The lookup algorithm of §4.15: local cache, then single-flighted
    /// peer-or-loader fetch, populating the local cache on every path
    /// that produces a value.
    pub async fn get(&self, key: &str) -> Result<ByteView, GroupError> {
        if key.is_empty() {
            return Err(GroupError::InvalidArgument("key must not be empty".to_string()));
        }
        if let Some(v) = self.cache.get(key) {
            trace!(key = %key, "local cache hit");
            return Ok(v);
        }

        let cache = self.cache.clone();
        let selector = self.selector.clone();
        let pool = self.pool.clone();
        let loader = self.loader.clone();
        let peer_timeout = self.peer_timeout;
        let key_owned = key.to_string();

        self.sf
            .do_call(key_owned.clone(), move || async move {
                fetch(&cache, &selector, &pool, &loader, peer_timeout, key_owned).await
            })
            .await
            .map_err(|message| {
                // "not found" is the sentinel a loader uses to signal a
                // missing key (§7); anything else is an opaque loader
                // failure propagated unchanged.
                if message.eq_ignore_ascii_case("not found") {
                    GroupError::NotFound
                } else {
                    GroupError::Loader(message)
                }
            })
    }

    pub fn add(&self, key: &str, value: impl Into<Vec<u8>>, cost: i64) -> bool {
        self.add_with_ttl(key, value, cost, Duration::ZERO)
    }

    /// Rejects an empty key or empty value outright; `ttl == Duration::ZERO`
    /// means never expires, not a rejection. A non-empty, well-formed write
    /// that is merely dropped for back-pressure is handled one layer down,
    /// in [`gkv_cache::Cache::add_with_ttl`].
    pub fn add_with_ttl(&self, key: &str, value: impl Into<Vec<u8>>, cost: i64, ttl: Duration) -> bool {
        let value = value.into();
        if key.is_empty() || value.is_empty() {
            return false;
        }
        self.cache.add_with_ttl(key, ByteView::new(value), cost, ttl)
    }
}

/// Step 2 of §4.15, run inside the single-flight critical section.
async fn fetch(
    cache: &Arc<Cache<ByteView>>,
    selector: &Arc<PeerSelector>,
    pool: &Arc<ClientPool>,
    loader: &LoaderFn,
    peer_timeout: Duration,
    key: String,
) -> Result<ByteView, String> {
    // A concurrent populate may have landed while we waited to enter the
    // single-flight section.
    if let Some(v) = cache.get(&key) {
        return Ok(v);
    }

    if let Some(addr) = selector.get_peer(&key) {
        match pool.get_or_dial(&addr).await {
            Ok(conn) => match conn.call(key.clone(), peer_timeout).await {
                Ok(bytes) => {
                    let cost = bytes.len().max(1) as i64;
                    let view = ByteView::new(bytes);
                    cache.add(&key, view.clone(), cost);
                    return Ok(view);
                }
                Err(e) => {
                    // Availability over strict ownership: fall through to
                    // the local loader rather than fail the caller (§4.15
                    // rationale).
                    warn!(key = %key, peer = %addr, error = %e, "peer call failed, falling back to local loader");
                }
            },
            Err(e) => {
                warn!(key = %key, peer = %addr, error = %e, "peer dial failed, falling back to local loader");
            }
        }
    }

    local_get_or_load(cache, loader, key)
        .await
        .map(ByteView::new)
}

/// Shared by both the façade's local-loader fallback and the peer
/// server's `getValue` callback: check the cache, and on miss call the
/// host loader and populate the cache with the result.
async fn local_get_or_load(cache: &Arc<Cache<ByteView>>, loader: &LoaderFn, key: String) -> Result<Vec<u8>, String> {
    if let Some(v) = cache.get(&key) {
        return Ok(v.to_vec());
    }
    let bytes = loader(key.clone()).await?;
    let cost = bytes.len().max(1) as i64;
    cache.add(&key, ByteView::new(bytes.clone()), cost);
    debug!(key = %key, "populated local cache from loader");
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    fn loader_counting(counter: Arc<AtomicUsize>, value: &'static str) -> LoaderFn {
        Arc::new(move |_key: String| -> LoaderFuture {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(StdDuration::from_millis(20)).await;
                Ok(value.as_bytes().to_vec())
            })
        })
    }

    async fn solo_group(loader: LoaderFn) -> Arc<Group> {
        let mut cfg = NodeConfig::default();
        cfg.max_cost = 1024;
        cfg.num_counters = 256;
        let group = Group::new(cfg.clone(), loader).await.unwrap();
        group.register_peers(&[group.local_addr().to_string()]).unwrap();
        group
    }

    #[tokio::test]
    async fn local_hit_after_add_drains_the_ingest_channel() {
        let group = solo_group(loader_counting(Arc::new(AtomicUsize::new(0)), "unused")).await;
        assert!(group.add("ayang", b"ayangValue".to_vec(), 10));
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        let value = group.get("ayang").await.unwrap();
        assert_eq!(value.as_slice(), b"ayangValue");
    }

    #[tokio::test]
    async fn concurrent_misses_single_flight_the_loader() {
        let counter = Arc::new(AtomicUsize::new(0));
        let group = solo_group(loader_counting(counter.clone(), "loaded")).await;

        let mut handles = Vec::new();
        for _ in 0..64 {
            let group = group.clone();
            handles.push(tokio::spawn(async move { group.get("k").await.unwrap() }));
        }
        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap());
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|v| v.as_slice() == b"loaded"));
    }

    #[tokio::test]
    async fn loader_not_found_maps_to_the_not_found_error_kind() {
        let failing: LoaderFn = Arc::new(|_key: String| -> LoaderFuture {
            Box::pin(async move { Err("not found".to_string()) })
        });
        let group = solo_group(failing).await;
        let err = group.get("missing").await.unwrap_err();
        assert!(matches!(err, GroupError::NotFound));
    }

    #[tokio::test]
    async fn other_loader_errors_propagate_unchanged() {
        let failing: LoaderFn = Arc::new(|_key: String| -> LoaderFuture {
            Box::pin(async move { Err("backend unreachable".to_string()) })
        });
        let group = solo_group(failing).await;
        let err = group.get("missing").await.unwrap_err();
        assert!(matches!(err, GroupError::Loader(message) if message == "backend unreachable"));
    }

    #[tokio::test]
    async fn empty_key_is_rejected_as_invalid_argument() {
        let group = solo_group(loader_counting(Arc::new(AtomicUsize::new(0)), "unused")).await;
        let err = group.get("").await.unwrap_err();
        assert!(matches!(err, GroupError::InvalidArgument(_)));
    }
}
