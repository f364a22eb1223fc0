//! Per-address connection cache with single-flighted dialing (§4.13).
//! Concurrent misses for the same address issue exactly one TCP connect;
//! the winning dial is the one inserted into the pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use gkv_common::CodecId;
use gkv_singleflight::SingleFlight;

use crate::connection::PeerConnection;
use crate::error::TransportError;

/// Caps per-call dial latency so a single unreachable peer cannot stall
/// the single-flighted dial group indefinitely.
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ClientPool {
    codec_id: CodecId,
    conns: Mutex<HashMap<String, Arc<PeerConnection>>>,
    dial_sf: SingleFlight<String, Arc<PeerConnection>, String>,
}

impl ClientPool {
    pub fn new(codec_id: CodecId) -> Arc<Self> {
        Arc::new(ClientPool {
            codec_id,
            conns: Mutex::new(HashMap::new()),
            dial_sf: SingleFlight::new(),
        })
    }

    /// Returns an existing connection for `addr`, or dials a fresh one.
    pub async fn get_or_dial(self: &Arc<Self>, addr: &str) -> Result<Arc<PeerConnection>, TransportError> {
        if let Some(conn) = self.conns.lock().get(addr).cloned() {
            if !conn.is_closed() {
                return Ok(conn);
            }
        }

        let pool = self.clone();
        let addr_owned = addr.to_string();
        self.dial_sf
            .do_call(addr_owned.clone(), move || {
                let pool = pool.clone();
                let addr_owned = addr_owned.clone();
                async move { pool.dial(addr_owned).await.map_err(|e| e.to_string()) }
            })
            .await
            .map_err(TransportError::Decode)
    }

    async fn dial(self: &Arc<Self>, addr: String) -> Result<Arc<PeerConnection>, TransportError> {
        // A connection removes itself from the pool on close; the pool
        // never needs a strong back-reference to itself, only the
        // address, to run that callback (§9).
        let pool = self.clone();
        let on_close: crate::connection::RemoveHook = Arc::new(move |addr: &str| {
            pool.conns.lock().remove(addr);
        });

        let conn = tokio::time::timeout(
            DIAL_TIMEOUT,
            PeerConnection::connect(addr.clone(), self.codec_id, on_close),
        )
        .await
        .map_err(|_| TransportError::Timeout)??;

        self.conns.lock().insert(addr, conn.clone());
        Ok(conn)
    }

    pub fn len(&self) -> usize {
        self.conns.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn concurrent_misses_dial_exactly_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let dials = Arc::new(AtomicUsize::new(0));
        let dials2 = dials.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                dials2.fetch_add(1, Ordering::SeqCst);
                // Keep the accepted stream alive for the test's duration.
                std::mem::forget(stream);
            }
        });

        let pool = ClientPool::new(CodecId::Binary);
        let mut handles = Vec::new();
        for _ in 0..32 {
            let pool = pool.clone();
            let addr = addr.clone();
            handles.push(tokio::spawn(async move { pool.get_or_dial(&addr).await.unwrap() }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(dials.load(Ordering::SeqCst), 1);
        assert_eq!(pool.len(), 1);
    }
}
