//! Per-task batcher: drains one task queue into size/time-bounded batches.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::debug;

use crate::core::error::SchedulerError;
use crate::core::model::Payload;
use crate::metrics::Metrics;

/// One submitted item travelling through the queues with its completion
/// handle. The handle is resolved exactly once: value, error, or dropped
/// (observed by the submitter as a cancellation).
pub(crate) struct TaskItem {
    pub(crate) data: Payload,
    pub(crate) completion: oneshot::Sender<Result<Payload, SchedulerError>>,
}

/// An ordered group of items for one task, awaiting execution.
pub(crate) struct TaskBatch {
    pub(crate) task_name: String,
    pub(crate) items: Vec<TaskItem>,
}

/// Hold a partially filled buffer back while the dispatch queue is already
/// saturated: latency is then bounded by queue depth, so trading a few more
/// milliseconds for fuller batches is a throughput win.
pub(crate) fn hold_for_fuller_batch(
    buffered: usize,
    max_batch_size: usize,
    queue_depth: usize,
    fill_queue_threshold: usize,
) -> bool {
    queue_depth > fill_queue_threshold && buffered < max_batch_size
}

/// The cooperative task accumulating one task's items into batches.
pub(crate) struct Batcher {
    pub(crate) task_name: String,
    pub(crate) queue: flume::Receiver<TaskItem>,
    pub(crate) dispatch_tx: flume::Sender<TaskBatch>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) max_batch_size: usize,
    pub(crate) max_batch_wait: Duration,
    pub(crate) fill_queue_threshold: usize,
}

impl Batcher {
    /// Fill/emit loop. Exits when the task queue closes.
    ///
    /// The `max_batch_wait` window opens when the first item of a buffer
    /// arrives and is never restarted for that buffer, so the added latency
    /// of a partial batch is bounded even when fill pressure holds it back.
    pub(crate) async fn run(self) {
        let mut buffer: Vec<TaskItem> = Vec::with_capacity(self.max_batch_size);
        loop {
            // Idle: no timer runs while the buffer is empty.
            match self.queue.recv_async().await {
                Ok(item) => buffer.push(item),
                Err(_) => break,
            }

            let deadline = Instant::now() + self.max_batch_wait;
            let mut closed = false;
            while buffer.len() < self.max_batch_size {
                match timeout_at(deadline, self.queue.recv_async()).await {
                    Ok(Ok(item)) => buffer.push(item),
                    Ok(Err(_)) => {
                        closed = true;
                        break;
                    }
                    // Window expired with a partial buffer.
                    Err(_) => break,
                }
            }

            while !closed
                && hold_for_fuller_batch(
                    buffer.len(),
                    self.max_batch_size,
                    self.dispatch_tx.len(),
                    self.fill_queue_threshold,
                )
            {
                match timeout(self.max_batch_wait, self.queue.recv_async()).await {
                    Ok(Ok(item)) => buffer.push(item),
                    Ok(Err(_)) => closed = true,
                    // Recheck the dispatch queue depth.
                    Err(_) => {}
                }
            }

            if closed {
                // Scheduler is stopping; dropping the buffer resolves the
                // pending handles as cancelled.
                break;
            }
            self.emit(&mut buffer);
        }
        debug!(task = %self.task_name, "batcher exiting");
    }

    fn emit(&self, buffer: &mut Vec<TaskItem>) {
        if buffer.is_empty() {
            return;
        }
        let items = std::mem::replace(buffer, Vec::with_capacity(self.max_batch_size));
        let batch = TaskBatch {
            task_name: self.task_name.clone(),
            items,
        };
        if self.dispatch_tx.send(batch).is_err() {
            debug!(task = %self.task_name, "dispatch queue closed; dropping batch");
        }
        self.metrics
            .task_queue_size
            .with_label_values(&[&self.task_name])
            .set(self.queue.len() as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::DEFAULT_TIMING_BUCKETS;

    fn item(value: i64) -> (TaskItem, oneshot::Receiver<Result<Payload, SchedulerError>>) {
        let (tx, rx) = oneshot::channel();
        (
            TaskItem {
                data: serde_json::json!(value),
                completion: tx,
            },
            rx,
        )
    }

    fn batcher(
        max_batch_size: usize,
        max_batch_wait: Duration,
        fill_queue_threshold: usize,
    ) -> (
        flume::Sender<TaskItem>,
        flume::Receiver<TaskBatch>,
        Batcher,
    ) {
        let (queue_tx, queue_rx) = flume::unbounded();
        let (dispatch_tx, dispatch_rx) = flume::unbounded();
        let metrics = Arc::new(Metrics::new(DEFAULT_TIMING_BUCKETS.to_vec()).unwrap());
        let batcher = Batcher {
            task_name: "bench".into(),
            queue: queue_rx,
            dispatch_tx,
            metrics,
            max_batch_size,
            max_batch_wait,
            fill_queue_threshold,
        };
        (queue_tx, dispatch_rx, batcher)
    }

    #[test]
    fn hold_only_under_pressure_with_room_left() {
        assert!(hold_for_fuller_batch(4, 32, 5, 3));
        assert!(!hold_for_fuller_batch(32, 32, 5, 3), "full buffer never held");
        assert!(!hold_for_fuller_batch(4, 32, 3, 3), "depth at threshold emits");
        assert!(hold_for_fuller_batch(1, 32, 1, 0));
    }

    #[tokio::test]
    async fn partial_batch_emits_after_window() {
        let (queue_tx, dispatch_rx, batcher) = batcher(8, Duration::from_millis(30), 3);
        tokio::spawn(batcher.run());

        let (a, _ra) = item(1);
        let (b, _rb) = item(2);
        queue_tx.send(a).unwrap();
        queue_tx.send(b).unwrap();

        let batch = timeout(Duration::from_secs(2), dispatch_rx.recv_async())
            .await
            .expect("batch within window")
            .unwrap();
        assert_eq!(batch.task_name, "bench");
        assert_eq!(batch.items.len(), 2);
        assert_eq!(batch.items[0].data, serde_json::json!(1));
        assert_eq!(batch.items[1].data, serde_json::json!(2));
    }

    #[tokio::test]
    async fn full_batch_emits_without_timer_wait() {
        // A window far longer than the test: only a full buffer can emit.
        let (queue_tx, dispatch_rx, batcher) = batcher(4, Duration::from_secs(30), 3);
        tokio::spawn(batcher.run());

        let mut receivers = Vec::new();
        for value in 0..4 {
            let (task_item, rx) = item(value);
            receivers.push(rx);
            queue_tx.send(task_item).unwrap();
        }

        let batch = timeout(Duration::from_secs(2), dispatch_rx.recv_async())
            .await
            .expect("full batch emits immediately")
            .unwrap();
        assert_eq!(batch.items.len(), 4);
    }

    #[tokio::test]
    async fn oversized_burst_splits_at_the_cap() {
        let (queue_tx, dispatch_rx, batcher) = batcher(4, Duration::from_millis(20), 3);
        tokio::spawn(batcher.run());

        let mut receivers = Vec::new();
        for value in 0..10 {
            let (task_item, rx) = item(value);
            receivers.push(rx);
            queue_tx.send(task_item).unwrap();
        }

        let mut sizes = Vec::new();
        let mut total = 0;
        while total < 10 {
            let batch = timeout(Duration::from_secs(2), dispatch_rx.recv_async())
                .await
                .expect("batches keep coming")
                .unwrap();
            total += batch.items.len();
            sizes.push(batch.items.len());
        }
        assert!(sizes.iter().all(|&size| size <= 4), "sizes were {sizes:?}");
        assert!(sizes.len() >= 3);
    }
}
