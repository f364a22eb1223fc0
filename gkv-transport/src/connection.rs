//! Multiplexed per-peer TCP connection (§4.12): one read loop and one
//! write loop per connection, correlated by sequence number through a
//! per-connection call table. Closing is idempotent and broadcasts
//! failure to every pending call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, warn};

use gkv_common::CodecId;

use crate::codec::{FramedCodec, RequestBody, ResponseBody};
use crate::error::TransportError;

/// Capacity of the per-connection outbound write channel (§4.12).
pub const WRITE_CHANNEL_CAPACITY: usize = 4096;

type CallResult = Result<Vec<u8>, TransportError>;

/// Invoked exactly once, on close, so the connection can remove itself
/// from whatever pool owns it (§9: "cyclic ownership between client pool
/// and per-peer connection" — modeled as a callback rather than a back
/// reference so the connection never has to own its owner).
pub type RemoveHook = Arc<dyn Fn(&str) + Send + Sync>;

struct CallTable {
    calls: Mutex<HashMap<u64, oneshot::Sender<CallResult>>>,
}

impl CallTable {
    fn new() -> Self {
        CallTable {
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn insert(&self, seq: u64, tx: oneshot::Sender<CallResult>) {
        self.calls.lock().insert(seq, tx);
    }

    fn remove(&self, seq: u64) -> Option<oneshot::Sender<CallResult>> {
        self.calls.lock().remove(&seq)
    }

    fn drain(&self) -> Vec<oneshot::Sender<CallResult>> {
        self.calls.lock().drain().map(|(_, tx)| tx).collect()
    }
}

pub struct PeerConnection {
    addr: String,
    next_seq: AtomicU64,
    calls: CallTable,
    write_tx: mpsc::Sender<RequestBody>,
    closed: AtomicBool,
    close_tx: Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
}

impl PeerConnection {
    /// Dials `addr`, spawns the read and write loops, and returns the
    /// connection handle. `on_close` is called at most once, from
    /// whichever loop first observes a fatal I/O or framing error (or
    /// from an explicit [`PeerConnection::close`]).
    pub async fn connect(
        addr: impl Into<String>,
        codec_id: CodecId,
        on_close: RemoveHook,
    ) -> Result<Arc<Self>, TransportError> {
        let addr = addr.into();
        let stream = TcpStream::connect(&addr).await?;
        stream.set_nodelay(true).ok();
        let (read_half, write_half) = stream.into_split();

        let (write_tx, write_rx) = mpsc::channel(WRITE_CHANNEL_CAPACITY);
        let (close_tx, close_rx) = oneshot::channel();

        let conn = Arc::new(PeerConnection {
            addr: addr.clone(),
            next_seq: AtomicU64::new(1),
            calls: CallTable::new(),
            write_tx,
            closed: AtomicBool::new(false),
            close_tx: Mutex::new(Some(close_tx)),
        });

        tokio::spawn(write_loop(write_half, write_rx, codec_id, conn.clone(), on_close.clone()));
        tokio::spawn(read_loop(read_half, close_rx, codec_id, conn.clone(), on_close));

        Ok(conn)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Issues one request and waits up to `deadline` for its response.
    /// Sequence numbers start at 1 (0 is reserved, §3). The write is a
    /// non-blocking send: an overloaded write channel drops the call
    /// rather than letting the caller block on internal bookkeeping (§5).
    pub async fn call(&self, key: String, deadline: Duration) -> CallResult {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.calls.insert(seq, tx);

        if self.write_tx.try_send(RequestBody { seq, key }).is_err() {
            self.calls.remove(seq);
            return Err(TransportError::Overloaded);
        }

        let result = match timeout(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::ConnectionClosed),
            Err(_) => Err(TransportError::Timeout),
        };
        // Idempotent: the read loop may already have removed this seq
        // when it delivered the result.
        self.calls.remove(seq);
        result
    }

    /// Idempotent close: fails every pending call, signals the close
    /// channel, and invokes the pool-removal hook exactly once.
    fn close(&self, reason: TransportError, on_close: &RemoveHook) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for tx in self.calls.drain() {
            let _ = tx.send(Err(clone_error(&reason)));
        }
        if let Some(close_tx) = self.close_tx.lock().take() {
            let _ = close_tx.send(());
        }
        on_close(&self.addr);
        debug!(addr = %self.addr, error = %reason, "peer connection closed");
    }
}

fn clone_error(e: &TransportError) -> TransportError {
    match e {
        TransportError::FrameTooLarge(n) => TransportError::FrameTooLarge(*n),
        TransportError::Decode(s) => TransportError::Decode(s.clone()),
        TransportError::Io(io) => TransportError::Io(std::io::Error::new(io.kind(), io.to_string())),
        TransportError::ConnectionClosed => TransportError::ConnectionClosed,
        TransportError::Timeout => TransportError::Timeout,
        TransportError::Overloaded => TransportError::Overloaded,
    }
}

async fn write_loop(
    mut write_half: tokio::net::tcp::OwnedWriteHalf,
    mut rx: mpsc::Receiver<RequestBody>,
    codec_id: CodecId,
    conn: Arc<PeerConnection>,
    on_close: RemoveHook,
) {
    let codec = FramedCodec::new(codec_id);
    while let Some(req) = rx.recv().await {
        if conn.is_closed() {
            break;
        }
        if let Err(e) = codec.write_request(&mut write_half, &req).await {
            warn!(addr = %conn.addr, error = %e, "peer write loop failed, closing connection");
            conn.close(e, &on_close);
            break;
        }
    }
}

async fn read_loop(
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    mut close_rx: oneshot::Receiver<()>,
    codec_id: CodecId,
    conn: Arc<PeerConnection>,
    on_close: RemoveHook,
) {
    let codec = FramedCodec::new(codec_id);
    loop {
        let resp = tokio::select! {
            biased;
            _ = &mut close_rx => break,
            resp = codec.read_response(&mut read_half) => resp,
        };
        match resp {
            Ok(ResponseBody { seq, value, err }) => {
                let Some(tx) = conn.calls.remove(seq) else {
                    // Caller already timed out and removed the entry;
                    // the late response is silently discarded (§5).
                    continue;
                };
                let result = if err.is_empty() { Ok(value) } else { Err(TransportError::Decode(err)) };
                let _ = tx.send(result);
            }
            Err(e) => {
                warn!(addr = %conn.addr, error = %e, "peer read loop failed, closing connection");
                conn.close(e, &on_close);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn echo_server(listener: TcpListener) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let codec = FramedCodec::new(CodecId::Binary);
        loop {
            match codec.read_request(&mut stream).await {
                Ok(req) => {
                    let resp = ResponseBody {
                        seq: req.seq,
                        value: req.key.into_bytes(),
                        err: String::new(),
                    };
                    if codec.write_response(&mut stream, &resp).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    }

    #[tokio::test]
    async fn call_round_trips_through_a_real_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(echo_server(listener));

        let removed = Arc::new(Mutex::new(Vec::new()));
        let removed2 = removed.clone();
        let conn = PeerConnection::connect(addr, CodecId::Binary, Arc::new(move |a: &str| {
            removed2.lock().push(a.to_string());
        }))
        .await
        .unwrap();

        let value = conn.call("ayang".to_string(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(value, b"ayang");
    }

    #[tokio::test]
    async fn timeout_fails_the_call_and_leaves_connection_usable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            // Accept but never respond, simulating a stalled peer.
            let _ = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let conn = PeerConnection::connect(addr, CodecId::Binary, Arc::new(|_: &str| {}))
            .await
            .unwrap();
        let result = conn.call("k".to_string(), Duration::from_millis(50)).await;
        assert!(matches!(result, Err(TransportError::Timeout)));
        assert!(!conn.is_closed(), "a timed-out call must not close the connection");
    }

    #[tokio::test]
    async fn closing_fails_all_pending_calls() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (accepted_tx, accepted_rx) = oneshot::channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ = accepted_tx.send(());
            drop(stream); // Drop immediately, forcing read/write errors.
        });

        let conn = PeerConnection::connect(addr, CodecId::Binary, Arc::new(|_: &str| {}))
            .await
            .unwrap();
        accepted_rx.await.unwrap();

        let result = conn.call("k".to_string(), Duration::from_secs(5)).await;
        assert!(result.is_err());
    }
}
