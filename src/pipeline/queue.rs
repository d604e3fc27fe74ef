//! Bounded stage queues
//!
//! A thin wrapper over `tokio::sync::mpsc` that carries `StageItem`s.
//! Sending into a full queue waits for space, which is the only flow
//! control between stages.

use tokio::sync::mpsc;

use crate::error::{PipelineError, Result};
use crate::model::StageItem;

/// Create a bounded queue
///
/// # Errors
/// A capacity of zero is a configuration error.
pub fn bounded<T>(capacity: usize) -> Result<(QueueSender<T>, QueueReceiver<T>)> {
    if capacity == 0 {
        return Err(PipelineError::Config(
            "queue capacity must be at least 1".to_string(),
        ));
    }
    let (tx, rx) = mpsc::channel(capacity);
    Ok((QueueSender { tx }, QueueReceiver { rx }))
}

/// Writing end of a stage queue
#[derive(Debug)]
pub struct QueueSender<T> {
    tx: mpsc::Sender<StageItem<T>>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> QueueSender<T> {
    /// Enqueue one item, waiting while the queue is full
    pub async fn send(&self, item: T) -> Result<()> {
        self.tx
            .send(StageItem::Item(item))
            .await
            .map_err(|_| PipelineError::ChannelClosed("receiver dropped".to_string()))
    }

    /// Enqueue the end-of-stream marker
    pub async fn send_end(&self) -> Result<()> {
        self.tx
            .send(StageItem::EndOfStream)
            .await
            .map_err(|_| PipelineError::ChannelClosed("receiver dropped".to_string()))
    }

    /// Free slots right now
    #[must_use]
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }

    /// Configured capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Reading end of a stage queue
#[derive(Debug)]
pub struct QueueReceiver<T> {
    rx: mpsc::Receiver<StageItem<T>>,
}

impl<T> QueueReceiver<T> {
    /// Take the next item
    ///
    /// `None` means every sender is gone; a well-behaved producer sends
    /// `EndOfStream` before that happens.
    pub async fn recv(&mut self) -> Option<StageItem<T>> {
        self.rx.recv().await
    }

    /// Drain the queue until the end-of-stream marker
    ///
    /// # Errors
    /// Fails if the queue closes without an end-of-stream marker.
    pub async fn collect_until_end(&mut self) -> Result<Vec<T>> {
        let mut items = Vec::new();
        loop {
            match self.recv().await {
                Some(StageItem::Item(item)) => items.push(item),
                Some(StageItem::EndOfStream) => return Ok(items),
                None => {
                    return Err(PipelineError::ChannelClosed(
                        "queue closed before end of stream".to_string(),
                    ));
                }
            }
        }
    }
}
