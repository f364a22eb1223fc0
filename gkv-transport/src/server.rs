//! Accept loop, per-connection read/write loops, and a worker pool shared
//! across every connection (§4.14). The worker computes the host-supplied
//! `getValue` callback and hands the response to the connection's write
//! loop; a response found stale against its processing deadline is
//! dropped rather than sent.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use gkv_common::CodecId;

use crate::codec::{FramedCodec, ResponseBody};
use crate::error::TransportError;

/// Bound on concurrently-running request handlers, shared across every
/// connection accepted by one server (§4.14).
pub const DEFAULT_WORKER_POOL_SIZE: usize = 4096;
/// Capacity of the per-connection outbound response channel.
const RESPONSE_CHANNEL_CAPACITY: usize = 4096;
/// A worker drops its response if it completes this long after the
/// request was read off the wire, rather than writing a stale reply.
const DEFAULT_PROCESSING_DEADLINE: Duration = Duration::from_secs(10);

pub type GetValueFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>, String>> + Send>>;
/// Host-supplied value loader, typically the node's own cache-or-load
/// path (§6: "Value-loader callback").
pub type GetValueFn = Arc<dyn Fn(String) -> GetValueFuture + Send + Sync>;

pub struct ServerConfig {
    pub addr: String,
    pub codec_id: CodecId,
    pub worker_pool_size: usize,
    pub processing_deadline: Duration,
}

impl ServerConfig {
    pub fn new(addr: impl Into<String>, codec_id: CodecId) -> Self {
        ServerConfig {
            addr: addr.into(),
            codec_id,
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            processing_deadline: DEFAULT_PROCESSING_DEADLINE,
        }
    }
}

pub struct PeerServer {
    local_addr: std::net::SocketAddr,
}

impl PeerServer {
    /// Binds the listener and spawns the accept loop as a background
    /// task. The returned handle exposes the bound local address (useful
    /// when `addr` used an ephemeral port, e.g. in tests).
    pub async fn bind(cfg: ServerConfig, get_value: GetValueFn) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(&cfg.addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "peer server listening");

        let workers = Arc::new(Semaphore::new(cfg.worker_pool_size.max(1)));
        let codec_id = cfg.codec_id;
        let processing_deadline = cfg.processing_deadline;

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        debug!(peer = %peer_addr, "accepted peer connection");
                        tokio::spawn(handle_connection(
                            stream,
                            codec_id,
                            workers.clone(),
                            get_value.clone(),
                            processing_deadline,
                        ));
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                }
            }
        });

        Ok(PeerServer { local_addr })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }
}

async fn handle_connection(
    stream: TcpStream,
    codec_id: CodecId,
    workers: Arc<Semaphore>,
    get_value: GetValueFn,
    processing_deadline: Duration,
) {
    stream.set_nodelay(true).ok();
    let (mut read_half, mut write_half) = stream.into_split();
    let codec = Arc::new(FramedCodec::new(codec_id));
    let (resp_tx, mut resp_rx) = mpsc::channel::<ResponseBody>(RESPONSE_CHANNEL_CAPACITY);

    let write_codec = codec.clone();
    let write_task = tokio::spawn(async move {
        while let Some(resp) = resp_rx.recv().await {
            if let Err(e) = write_codec.write_response(&mut write_half, &resp).await {
                warn!(error = %e, "server write loop failed, closing connection");
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    loop {
        let req = match codec.read_request(&mut read_half).await {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, "server read loop closing connection");
                break;
            }
        };

        let permit = match workers.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let resp_tx = resp_tx.clone();
        let get_value = get_value.clone();
        let enqueued_at = Instant::now();

        tokio::spawn(async move {
            let _permit = permit;
            let resp = match get_value(req.key).await {
                Ok(value) => ResponseBody {
                    seq: req.seq,
                    value,
                    err: String::new(),
                },
                Err(message) => ResponseBody {
                    seq: req.seq,
                    value: Vec::new(),
                    err: message,
                },
            };
            if enqueued_at.elapsed() > processing_deadline {
                debug!(seq = req.seq, "response past processing deadline, dropping");
                return;
            }
            // A closed write channel means the connection already
            // tore down; dropping the response here is correct, not
            // an error to surface.
            let _ = resp_tx.send(resp).await;
        });
    }

    drop(resp_tx);
    let _ = write_task.await;
}
