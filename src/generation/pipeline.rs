use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::common::errors::GenerationError;
use crate::generation::backend::{FragmentStream, GenerationBackend};
use crate::generation::cache::ResponseCache;

/// Pause after a served request before the next queued one starts.
pub const INTER_REQUEST_DELAY: Duration = Duration::from_secs(2);

/// Longer pause after a failed request.
pub const ERROR_COOLDOWN: Duration = Duration::from_secs(5);

/// Pacing between replayed words on a cache hit, so cached answers still
/// arrive incrementally.
const REPLAY_DELAY: Duration = Duration::from_millis(40);

struct QueuedRequest {
    prompt: String,
    respond: oneshot::Sender<Result<FragmentStream, GenerationError>>,
}

/// Serializes generation requests into a single-worker FIFO and caches
/// completed responses.
///
/// Exactly one request is in flight against the backend at a time no matter
/// how many callers ask concurrently; the rest wait in arrival order.
pub struct GenerationPipeline {
    backend: Arc<dyn GenerationBackend>,
    cache: Arc<ResponseCache>,
    queue_tx: flume::Sender<QueuedRequest>,
    queue_rx: flume::Receiver<QueuedRequest>,
    processing: Arc<AtomicBool>,
}

impl GenerationPipeline {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self::with_cache(backend, ResponseCache::new())
    }

    pub fn with_cache(backend: Arc<dyn GenerationBackend>, cache: ResponseCache) -> Self {
        let (queue_tx, queue_rx) = flume::unbounded();
        Self {
            backend,
            cache: Arc::new(cache),
            queue_tx,
            queue_rx,
            processing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Streamed answer for a prompt. Cache hits replay word-by-word without
    /// touching the backend; misses are queued behind earlier callers.
    pub async fn ask_stream(&self, prompt: &str) -> Result<FragmentStream, GenerationError> {
        if let Some(text) = self.cache.lookup(self.backend.model(), prompt) {
            debug!("Serving prompt from cache ({} chars)", text.len());
            return Ok(replay_stream(text));
        }

        let (respond, receive) = oneshot::channel();
        let _ = self.queue_tx.send(QueuedRequest {
            prompt: prompt.to_string(),
            respond,
        });
        self.kick_drainer();

        let stream = receive.await.map_err(|_| GenerationError::WorkerGone)??;
        Ok(self.capture(prompt, stream))
    }

    /// Full answer, collected from the stream.
    pub async fn ask(&self, prompt: &str) -> Result<String, GenerationError> {
        let mut stream = self.ask_stream(prompt).await?;
        let mut full = String::new();
        while let Some(fragment) = stream.next().await {
            full.push_str(&fragment);
        }
        Ok(full)
    }

    /// Start the queue drainer. A no-op when one is already running; the
    /// single active-request invariant rests on this flag, not a lock.
    fn kick_drainer(&self) {
        if self.processing.swap(true, Ordering::SeqCst) {
            return;
        }

        let backend = self.backend.clone();
        let queue_rx = self.queue_rx.clone();
        let processing = self.processing.clone();

        tokio::spawn(async move {
            loop {
                while let Ok(request) = queue_rx.try_recv() {
                    debug!("Processing generation request from queue");
                    match backend.generate(&request.prompt).await {
                        Ok(stream) => {
                            let _ = request.respond.send(Ok(stream));
                            if !queue_rx.is_empty() {
                                info!(
                                    "Waiting {:?} before next generation request",
                                    INTER_REQUEST_DELAY
                                );
                                tokio::time::sleep(INTER_REQUEST_DELAY).await;
                            }
                        }
                        Err(e) => {
                            error!("Generation request failed: {}", e);
                            let _ = request.respond.send(Err(e));
                            if !queue_rx.is_empty() {
                                info!("Waiting {:?} after failed request", ERROR_COOLDOWN);
                                tokio::time::sleep(ERROR_COOLDOWN).await;
                            }
                        }
                    }
                }

                processing.store(false, Ordering::SeqCst);
                // A request may have slipped in between the empty poll and
                // the flag reset; reclaim the flag and keep draining if so.
                if queue_rx.is_empty() || processing.swap(true, Ordering::SeqCst) {
                    break;
                }
            }
        });
    }

    /// Forward a live stream to the caller while accumulating it, and write
    /// the full text to the cache once the stream completes.
    fn capture(&self, prompt: &str, mut stream: FragmentStream) -> FragmentStream {
        let cache = self.cache.clone();
        let model = self.backend.model().to_string();
        let prompt = prompt.to_string();
        let (tx, rx) = flume::unbounded();

        tokio::spawn(async move {
            let mut full = String::new();
            while let Some(fragment) = stream.next().await {
                full.push_str(&fragment);
                if tx.send(fragment).is_err() {
                    // Caller hung up; a half-consumed answer is not cached.
                    return;
                }
            }
            if !full.is_empty() {
                cache.insert(&model, &prompt, full);
            }
        });

        Box::pin(rx.into_stream())
    }
}

/// Replay cached text as a lazy word-by-word sequence.
fn replay_stream(text: String) -> FragmentStream {
    let (tx, rx) = flume::unbounded();
    tokio::spawn(async move {
        for chunk in word_chunks(&text) {
            if tx.send(chunk.to_string()).is_err() {
                return;
            }
            tokio::time::sleep(REPLAY_DELAY).await;
        }
    });
    Box::pin(rx.into_stream())
}

/// Word-sized chunks whose concatenation reproduces the input exactly: each
/// chunk is a run of non-whitespace plus its trailing whitespace.
fn word_chunks(text: &str) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut in_whitespace = false;

    for (i, c) in text.char_indices() {
        let ws = c.is_whitespace();
        if in_whitespace && !ws {
            chunks.push(&text[start..i]);
            start = i;
        }
        in_whitespace = ws;
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}
