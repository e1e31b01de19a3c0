use crate::error::{ProxyError, ProxyResult};
use crate::models::ShaperConfig;
use rand::Rng;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};

type ShaperTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ShaperStatus {
    pub processing: bool,
    pub queued: usize,
}

/// Single-worker FIFO queue that spaces outbound tasks apart. The gap is
/// measured from the previous task's completion, so a slow task never lets
/// the next one start early.
pub struct TrafficShaper {
    tx: mpsc::UnboundedSender<ShaperTask>,
    queued: Arc<AtomicUsize>,
    processing: Arc<AtomicBool>,
}

impl TrafficShaper {
    pub fn new(config: ShaperConfig) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ShaperTask>();
        let queued = Arc::new(AtomicUsize::new(0));
        let processing = Arc::new(AtomicBool::new(false));

        let worker_queued = Arc::clone(&queued);
        let worker_processing = Arc::clone(&processing);
        tokio::spawn(async move {
            let mut last_done: Option<Instant> = None;
            while let Some(task) = rx.recv().await {
                worker_queued.fetch_sub(1, Ordering::SeqCst);

                if let Some(done) = last_done {
                    let jitter = if config.jitter_ms > 0 {
                        rand::thread_rng().gen_range(0..=config.jitter_ms)
                    } else {
                        0
                    };
                    let required = Duration::from_millis(config.min_delay_ms + jitter);
                    let elapsed = done.elapsed();
                    if elapsed < required {
                        tokio::time::sleep(required - elapsed).await;
                    }
                }

                worker_processing.store(true, Ordering::SeqCst);
                task.await;
                last_done = Some(Instant::now());
                worker_processing.store(false, Ordering::SeqCst);
            }
        });

        Self {
            tx,
            queued,
            processing,
        }
    }

    /// Queue a task and wait for its result. Results and errors propagate to
    /// the caller unchanged; a failing task does not poison the queue.
    pub async fn enqueue<T, F>(&self, task: F) -> ProxyResult<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let wrapped: ShaperTask = Box::pin(async move {
            let _ = done_tx.send(task.await);
        });

        self.queued.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(wrapped).is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(ProxyError::Internal(
                "traffic shaper worker is gone".to_string(),
            ));
        }

        done_rx
            .await
            .map_err(|_| ProxyError::Internal("traffic shaper dropped the task".to_string()))
    }

    pub fn status(&self) -> ShaperStatus {
        ShaperStatus {
            processing: self.processing.load(Ordering::SeqCst),
            queued: self.queued.load(Ordering::SeqCst),
        }
    }
}
