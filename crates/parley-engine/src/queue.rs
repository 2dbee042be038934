use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tokio::sync::oneshot;
use tracing::debug;

use parley_core::{PlatformError, Result};

type HandlerFuture<R> = BoxFuture<'static, Result<R>>;
type Handler<T, R> = dyn Fn(T) -> HandlerFuture<R> + Send + Sync;

struct Cell<T, R> {
    queue: VecDeque<(T, oneshot::Sender<Result<R>>)>,
    running: bool,
}

impl<T, R> Default for Cell<T, R> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            running: false,
        }
    }
}

/// Keyed FIFO with single-runner-per-key semantics.
///
/// `enqueue` appends under the key's queue and starts a worker for that key
/// when none is active. The worker drains in insertion order, awaiting the
/// handler end-to-end before the next item, so handlers for one key run
/// strictly sequentially while distinct keys proceed concurrently. A key's
/// record is dropped once its worker drains an empty queue.
pub struct SerialQueue<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    handler: Arc<Handler<T, R>>,
    cells: Arc<DashMap<String, Cell<T, R>>>,
}

impl<T, R> SerialQueue<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(T) -> HandlerFuture<R> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            cells: Arc::new(DashMap::new()),
        }
    }

    /// Enqueue `item` under `key`. The returned receiver resolves with the
    /// handler's outcome once every earlier item for the key has finished.
    pub fn enqueue(&self, key: &str, item: T) -> oneshot::Receiver<Result<R>> {
        let (tx, rx) = oneshot::channel();

        let spawn_worker = {
            let mut cell = self.cells.entry(key.to_string()).or_default();
            cell.queue.push_back((item, tx));
            if cell.running {
                false
            } else {
                cell.running = true;
                true
            }
        };

        if spawn_worker {
            let cells = Arc::clone(&self.cells);
            let handler = Arc::clone(&self.handler);
            let key = key.to_string();
            tokio::spawn(async move {
                run_worker(cells, handler, key).await;
            });
        }

        rx
    }

    /// Number of keys with live queue records (for diagnostics).
    pub fn active_keys(&self) -> usize {
        self.cells.len()
    }
}

async fn run_worker<T, R>(
    cells: Arc<DashMap<String, Cell<T, R>>>,
    handler: Arc<Handler<T, R>>,
    key: String,
) where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    loop {
        let next = {
            let Some(mut cell) = cells.get_mut(&key) else {
                return;
            };
            match cell.queue.pop_front() {
                Some(entry) => Some(entry),
                None => {
                    cell.running = false;
                    None
                }
            }
        };

        let Some((item, tx)) = next else {
            // Drained: drop the record unless an enqueue raced in and took
            // the runner slot back.
            cells.remove_if(&key, |_, cell| !cell.running && cell.queue.is_empty());
            debug!(key = %key, "queue worker drained");
            return;
        };

        let result = handler(item).await;
        // Receiver may have been dropped (caller gave up) — the item was
        // still processed in order, which is what the contract requires.
        let _ = tx.send(result);
    }
}

impl<T, R> SerialQueue<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    /// Convenience for awaiting an enqueue: flattens the channel error into
    /// the platform error space.
    pub async fn process(&self, key: &str, item: T) -> Result<R> {
        self.enqueue(key, item)
            .await
            .map_err(|_| PlatformError::Cancelled)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[tokio::test]
    async fn one_key_runs_in_enqueue_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let order2 = Arc::clone(&order);

        let queue: SerialQueue<&'static str, ()> = SerialQueue::new(move |item| {
            let order = Arc::clone(&order2);
            Box::pin(async move {
                // Later items finishing faster must still wait their turn.
                let delay = match item {
                    "A" => 30,
                    "B" => 10,
                    _ => 1,
                };
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                order.lock().unwrap().push(item);
                Ok(())
            })
        });

        let a = queue.enqueue("conv-1", "A");
        let b = queue.enqueue("conv-1", "B");
        let c = queue.enqueue("conv-1", "C");
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        c.await.unwrap().unwrap();

        assert_eq!(order.lock().unwrap().as_slice(), &["A", "B", "C"]);
    }

    #[tokio::test]
    async fn distinct_keys_run_concurrently() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let (in2, max2) = (Arc::clone(&in_flight), Arc::clone(&max_in_flight));

        let queue: SerialQueue<(), ()> = SerialQueue::new(move |_| {
            let in_flight = Arc::clone(&in2);
            let max_in_flight = Arc::clone(&max2);
            Box::pin(async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        });

        let futures: Vec<_> = (0..4)
            .map(|i| queue.enqueue(&format!("conv-{i}"), ()))
            .collect();
        for f in futures {
            f.await.unwrap().unwrap();
        }

        assert!(max_in_flight.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn handler_failure_reaches_only_its_caller() {
        let queue: SerialQueue<bool, &'static str> = SerialQueue::new(|should_fail| {
            Box::pin(async move {
                if should_fail {
                    Err(PlatformError::Internal("boom".to_string()))
                } else {
                    Ok("fine")
                }
            })
        });

        let bad = queue.process("k", true).await;
        let good = queue.process("k", false).await;

        assert!(bad.is_err());
        assert_eq!(good.unwrap(), "fine");
    }

    #[tokio::test]
    async fn drained_records_are_dropped() {
        let queue: SerialQueue<(), ()> = SerialQueue::new(|_| Box::pin(async { Ok(()) }));
        queue.process("conv-1", ()).await.unwrap();

        // Give the worker a beat to run its cleanup after replying.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(queue.active_keys(), 0);
    }
}
