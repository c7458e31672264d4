use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::chunker::Chunk;
use crate::embeddings::{with_retry, EmbeddingClient};
use crate::error::Result;

const EMBED_RETRY_ATTEMPTS: u32 = 4;
const EMBED_RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// One chunk awaiting an embedding, tagged with the metadata the orchestrator
/// needs to reassemble per-file groups once results return out of order.
pub struct EmbedTask {
    pub file_path: String,
    pub chunk: Chunk,
}

pub struct EmbedResult {
    pub file_path: String,
    pub chunk: Chunk,
    pub vector: Result<Vec<f32>>,
}

/// Shared cancellation flag checked by every worker before starting a new
/// embedding call and before publishing a result.
#[derive(Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn request_cancellation(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Parallel embedding worker pool. Workers pull tasks from a bounded channel
/// and publish results through a completion channel; cancellation is a
/// shared flag, not a per-task abort, so in-flight calls run to completion
/// but their results are discarded if cancellation was requested meanwhile.
pub struct VectorWorkerPool {
    task_tx: mpsc::Sender<EmbedTask>,
    result_rx: mpsc::Receiver<EmbedResult>,
    cancellation: CancellationToken,
}

impl VectorWorkerPool {
    /// `cancellation` is owned by the caller (typically the orchestrator run
    /// that spawned this pool) so a single cancel request reaches every
    /// worker, not just the ones started after it fired.
    pub fn spawn(client: Arc<dyn EmbeddingClient>, worker_count: usize, queue_depth: usize, cancellation: CancellationToken) -> Self {
        let (task_tx, task_rx) = mpsc::channel::<EmbedTask>(queue_depth);
        let (result_tx, result_rx) = mpsc::channel::<EmbedResult>(queue_depth);
        let task_rx = Arc::new(tokio::sync::Mutex::new(task_rx));

        for worker_id in 0..worker_count.max(1) {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let client = client.clone();
            let cancellation = cancellation.clone();

            tokio::spawn(async move {
                loop {
                    if cancellation.is_cancelled() {
                        break;
                    }
                    let task = {
                        let mut rx = task_rx.lock().await;
                        rx.recv().await
                    };
                    let Some(task) = task else { break };

                    if cancellation.is_cancelled() {
                        continue;
                    }

                    let vector = with_retry(EMBED_RETRY_ATTEMPTS, EMBED_RETRY_BASE_DELAY, || {
                        client.embed_batch(&[task.chunk.content.clone()])
                    })
                    .await
                    .map(|mut vs| vs.pop().unwrap_or_default());

                    if cancellation.is_cancelled() {
                        tracing::debug!(worker_id, "discarding result after cancellation");
                        continue;
                    }

                    let result = EmbedResult { file_path: task.file_path, chunk: task.chunk, vector };
                    if result_tx.send(result).await.is_err() {
                        break;
                    }
                }
            });
        }

        VectorWorkerPool { task_tx, result_rx, cancellation }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub async fn submit(&self, task: EmbedTask) -> std::result::Result<(), EmbedTask> {
        self.task_tx.send(task).await.map_err(|e| e.0)
    }

    pub async fn recv(&mut self) -> Option<EmbedResult> {
        self.result_rx.recv().await
    }

    pub fn request_cancellation(&self) {
        self.cancellation.request_cancellation();
    }
}
