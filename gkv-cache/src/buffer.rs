//! Get-side batching (§4.5): every cache read pushes its primary hash into
//! a small fixed-capacity buffer; once full, the buffer is handed to the
//! policy as a batch over a bounded channel. Hit-side accounting is
//! deliberately best-effort — if the channel is full the batch is dropped
//! rather than blocking the reader, keeping reads contention-free.

use parking_lot::Mutex;
use tokio::sync::mpsc;

const BUFFER_CAPACITY: usize = 64;
const BATCH_CHANNEL_CAPACITY: usize = 3;

pub struct RingBufferPool {
    current: Mutex<Vec<u64>>,
    spares: Mutex<Vec<Vec<u64>>>,
    tx: mpsc::Sender<Vec<u64>>,
}

impl RingBufferPool {
    pub fn new() -> (Self, mpsc::Receiver<Vec<u64>>) {
        let (tx, rx) = mpsc::channel(BATCH_CHANNEL_CAPACITY);
        (
            RingBufferPool {
                current: Mutex::new(Vec::with_capacity(BUFFER_CAPACITY)),
                spares: Mutex::new(Vec::new()),
                tx,
            },
            rx,
        )
    }

    fn take_spare_or_new(&self) -> Vec<u64> {
        self.spares
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(BUFFER_CAPACITY))
    }

    /// Records that `primary` was read. Called on both hits and misses —
    /// the sketch must see misses too, so later admission decisions know
    /// a key's true demand.
    pub fn push(&self, primary: u64) {
        let full_batch = {
            let mut cur = self.current.lock();
            cur.push(primary);
            if cur.len() >= BUFFER_CAPACITY {
                Some(std::mem::replace(&mut *cur, self.take_spare_or_new()))
            } else {
                None
            }
        };

        let Some(batch) = full_batch else { return };
        if let Err(mpsc::error::TrySendError::Full(mut batch))
        | Err(mpsc::error::TrySendError::Closed(mut batch)) = self.tx.try_send(batch)
        {
            batch.clear();
            self.spares.lock().push(batch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_buffer_is_handed_off_as_a_batch() {
        let (pool, mut rx) = RingBufferPool::new();
        for i in 0..BUFFER_CAPACITY as u64 {
            pool.push(i);
        }
        let batch = rx.try_recv().expect("a full buffer should have been sent");
        assert_eq!(batch.len(), BUFFER_CAPACITY);
    }

    #[tokio::test]
    async fn partial_buffer_is_not_sent() {
        let (pool, mut rx) = RingBufferPool::new();
        pool.push(1);
        pool.push(2);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn overflowing_the_channel_drops_the_batch_without_blocking() {
        let (pool, rx) = RingBufferPool::new();
        // Fill the channel (capacity 3) and then push one more full batch,
        // which must be dropped, not block.
        for _ in 0..(BATCH_CHANNEL_CAPACITY + 1) {
            for i in 0..BUFFER_CAPACITY as u64 {
                pool.push(i);
            }
        }
        drop(rx);
    }
}
