//! Async Chunk Iterator
//!
//! Wraps the delivery queue for async consumers. Each `next().await`
//! parks the blocking pop on the runtime's blocking pool so the event
//! loop never stalls; the stream ends when the worker's terminal
//! sentinel is observed.

use crossbeam_channel::Receiver;

use crate::queue::QueueItem;

/// Async iterator over canonical PCM buffers.
///
/// ```no_run
/// # async fn demo(capture: &tapir_core::ProcessCapture) -> Result<(), tapir_core::CaptureError> {
/// let mut chunks = capture.chunks()?;
/// while let Some(pcm) = chunks.next().await {
///     // 48 kHz stereo f32le bytes
///     let _ = pcm.len();
/// }
/// # Ok(())
/// # }
/// ```
pub struct ChunkStream {
    rx: Receiver<QueueItem>,
    done: bool,
}

impl ChunkStream {
    pub(crate) fn new(rx: Receiver<QueueItem>) -> Self {
        Self { rx, done: false }
    }

    /// Await the next buffer; `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<Vec<u8>> {
        if self.done {
            return None;
        }

        let rx = self.rx.clone();
        let item = tokio::task::spawn_blocking(move || rx.recv()).await.ok()?;

        match item {
            Ok(QueueItem::Chunk(data)) => Some(data),
            Ok(QueueItem::End) | Err(_) => {
                self.done = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::delivery_queue;

    #[tokio::test]
    async fn test_yields_until_sentinel() {
        let (producer, rx) = delivery_queue(8);
        producer.push_chunk(vec![1]);
        producer.push_chunk(vec![2]);
        producer.push_end();

        let mut stream = ChunkStream::new(rx);
        assert_eq!(stream.next().await, Some(vec![1]));
        assert_eq!(stream.next().await, Some(vec![2]));
        assert_eq!(stream.next().await, None);
        // Terminal state is sticky
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_ends_when_producer_vanishes() {
        let (producer, rx) = delivery_queue(8);
        producer.push_chunk(vec![7]);
        drop(producer);

        let mut stream = ChunkStream::new(rx);
        assert_eq!(stream.next().await, Some(vec![7]));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_unblocks_when_sentinel_arrives_late() {
        let (producer, rx) = delivery_queue(8);
        let mut stream = ChunkStream::new(rx);

        let pusher = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            producer.push_chunk(vec![3]);
            producer.push_end();
        });

        assert_eq!(stream.next().await, Some(vec![3]));
        assert_eq!(stream.next().await, None);
        pusher.join().unwrap();
    }
}
