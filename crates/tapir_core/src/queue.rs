//! Drop-Oldest Delivery Queue
//!
//! A bounded crossbeam channel with overflow handled producer-side:
//! on full, pop one (the oldest) and push again. Only the capture worker
//! pushes, so the evict-then-push pair cannot race another producer and
//! the queue always holds a contiguous suffix of the captured sequence.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::trace;

/// What travels through the delivery queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum QueueItem {
    /// One converted canonical buffer
    Chunk(Vec<u8>),
    /// Terminal sentinel: the worker has exited, nothing follows
    End,
}

/// Producer half held by the capture worker.
pub(crate) struct QueueProducer {
    tx: Sender<QueueItem>,
    /// Receiver clone used only to evict the oldest item on overflow
    rx: Receiver<QueueItem>,
}

impl QueueProducer {
    /// Enqueue a buffer, evicting the oldest on overflow. Never blocks.
    pub(crate) fn push_chunk(&self, data: Vec<u8>) {
        self.push(QueueItem::Chunk(data));
    }

    /// Enqueue the terminal sentinel; evicts until it fits.
    pub(crate) fn push_end(&self) {
        self.push(QueueItem::End);
    }

    fn push(&self, mut item: QueueItem) {
        loop {
            match self.tx.try_send(item) {
                Ok(()) => return,
                Err(TrySendError::Full(returned)) => {
                    trace!("delivery queue full; dropping oldest buffer");
                    let _ = self.rx.try_recv();
                    item = returned;
                }
                // All consumers gone; nothing left to deliver to
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

/// Build a queue of the given capacity.
pub(crate) fn delivery_queue(capacity: usize) -> (QueueProducer, Receiver<QueueItem>) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        QueueProducer {
            tx,
            rx: rx.clone(),
        },
        rx,
    )
}
