use crate::collector::Batch;
use tokio::sync::mpsc;

/// Items carried by the batch queue.
#[derive(Debug)]
pub enum QueueItem {
    Batch(Batch),
    /// Tells the writer to drain whatever is still queued and exit.
    Shutdown,
}

pub type BatchSender = mpsc::Sender<QueueItem>;
pub type BatchReceiver = mpsc::Receiver<QueueItem>;

/// Create the bounded queue between collectors and the writer.
///
/// A full queue blocks `send`, which is how collectors feel backpressure.
pub fn batch_queue(capacity: usize) -> (BatchSender, BatchReceiver) {
    mpsc::channel(capacity.max(1))
}
