//! **Transcription Dispatcher** — bounded concurrent fan-out of chunks to a
//! recognizer, with per-chunk failure isolation.
//!
//! One task per chunk, admission-controlled by a semaphore so a large upload
//! cannot exhaust the process with unbounded concurrent remote calls. Each
//! attempt runs under a per-chunk timeout and transient failures are retried
//! with exponential backoff; a chunk that still fails degrades to an empty
//! transcript and never aborts the batch. `dispatch` is a full barrier: it
//! returns only after every chunk task has settled.
//!
//! When a staging store is configured, each chunk is uploaded once and
//! recognized by URI; all staged artifacts are deleted after the whole batch
//! joins (never mid-flight, since a retry may still reference the object).

use crate::error::ScribeResult;
use crate::recognizer::{AudioSource, RecognizeRequest, Recognizer};
use crate::segmenter::Chunk;
use crate::staging::{StagedArtifact, StagingStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Worker-pool and retry tuning for one Dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum chunks in flight at once.
    pub max_concurrency: usize,
    /// Deadline for a single attempt (staging put + recognition).
    pub chunk_timeout: Duration,
    /// Retries after the first attempt, 0 disables retry.
    pub retry_attempts: u32,
    /// Initial backoff before the first retry; doubles per retry.
    pub retry_backoff: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            chunk_timeout: Duration::from_secs(30),
            retry_attempts: 2,
            retry_backoff: Duration::from_millis(250),
        }
    }
}

/// Fan-out engine: owns the recognizer backend, an optional staging store,
/// and the pool/retry configuration. Construct once at startup and share.
pub struct Dispatcher {
    recognizer: Arc<dyn Recognizer>,
    staging: Option<Arc<dyn StagingStore>>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(recognizer: Arc<dyn Recognizer>, config: DispatchConfig) -> Self {
        Self {
            recognizer,
            staging: None,
            config,
        }
    }

    /// Switch to the staged variant: chunks are uploaded to `store` and
    /// recognized by URI instead of inline bytes.
    pub fn with_staging(mut self, store: Arc<dyn StagingStore>) -> Self {
        self.staging = Some(store);
        self
    }

    /// Transcribe every chunk concurrently and return one transcript per
    /// index. Failed chunks map to an empty string; the returned map always
    /// covers exactly the input indices.
    pub async fn dispatch(
        &self,
        chunks: Vec<Chunk>,
        request: &RecognizeRequest,
    ) -> HashMap<usize, String> {
        let chunk_count = chunks.len();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));

        let mut handles = Vec::with_capacity(chunk_count);
        for chunk in chunks {
            let index = chunk.index;
            let semaphore = Arc::clone(&semaphore);
            let recognizer = Arc::clone(&self.recognizer);
            let staging = self.staging.clone();
            let request = request.clone();
            let config = self.config.clone();
            let handle = tokio::spawn(async move {
                // Closing the semaphore is not part of this design; acquire
                // can only fail if it were, so treat that as a failed chunk.
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (String::new(), None);
                };
                run_chunk(recognizer.as_ref(), staging.as_deref(), chunk, &request, &config).await
            });
            handles.push((index, handle));
        }

        // Barrier join: collect every chunk's outcome in its own slot.
        let mut results = HashMap::with_capacity(chunk_count);
        let mut artifacts = Vec::new();
        for (index, handle) in handles {
            match handle.await {
                Ok((transcript, artifact)) => {
                    results.insert(index, transcript);
                    if let Some(artifact) = artifact {
                        artifacts.push(artifact);
                    }
                }
                Err(e) => {
                    warn!("chunk {} task panicked: {} (empty transcript)", index, e);
                    results.insert(index, String::new());
                }
            }
        }

        // Unconditional cleanup of every staged artifact. Runs only after
        // the whole batch joins: a retry may still reference its object.
        if let Some(store) = &self.staging {
            for artifact in &artifacts {
                if let Err(e) = store.delete(&artifact.remote_name).await {
                    warn!(
                        "cleanup failed for staged chunk {} ({}): {}",
                        artifact.chunk_index, artifact.remote_name, e
                    );
                }
            }
        }

        results
    }
}

/// One chunk's full lifecycle: retries with backoff around a per-attempt
/// timeout, degrading to an empty transcript when everything failed. Returns
/// the staged artifact (if any) so the caller can clean up after the batch.
async fn run_chunk(
    recognizer: &dyn Recognizer,
    staging: Option<&dyn StagingStore>,
    chunk: Chunk,
    request: &RecognizeRequest,
    config: &DispatchConfig,
) -> (String, Option<StagedArtifact>) {
    let index = chunk.index;
    let mut artifact: Option<StagedArtifact> = None;
    let mut backoff = config.retry_backoff;

    for attempt in 0..=config.retry_attempts {
        let outcome = tokio::time::timeout(
            config.chunk_timeout,
            attempt_chunk(recognizer, staging, &mut artifact, &chunk, request),
        )
        .await;

        let error = match outcome {
            Ok(Ok(transcript)) => {
                debug!("chunk {} transcribed ({} chars)", index, transcript.len());
                return (transcript, artifact);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("attempt timed out after {:?}", config.chunk_timeout),
        };

        if attempt < config.retry_attempts {
            warn!(
                "chunk {} attempt {} failed: {} (retrying in {:?})",
                index,
                attempt + 1,
                error,
                backoff
            );
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        } else {
            warn!(
                "chunk {} failed after {} attempts: {} (empty transcript)",
                index,
                attempt + 1,
                error
            );
        }
    }

    (String::new(), artifact)
}

/// One attempt: stage the chunk if a store is configured (reusing the
/// artifact from an earlier attempt), then recognize.
///
/// The artifact record (with its remote name) is created before the upload
/// is awaited: a timeout can drop this future mid-`put` after the object was
/// created server-side, and cleanup can only delete what it has a name for.
/// An empty `remote_uri` marks an unconfirmed upload; the next attempt
/// re-puts under the same name.
async fn attempt_chunk(
    recognizer: &dyn Recognizer,
    staging: Option<&dyn StagingStore>,
    artifact: &mut Option<StagedArtifact>,
    chunk: &Chunk,
    request: &RecognizeRequest,
) -> ScribeResult<String> {
    let source = match staging {
        Some(store) => {
            let staged = match artifact {
                Some(staged) if !staged.remote_uri.is_empty() => staged,
                _ => {
                    let staged = artifact.get_or_insert_with(|| StagedArtifact {
                        chunk_index: chunk.index,
                        remote_name: format!("chunk-{}-{}", chunk.index, uuid::Uuid::new_v4()),
                        remote_uri: String::new(),
                    });
                    staged.remote_uri = store.put(&staged.remote_name, &chunk.bytes).await?;
                    staged
                }
            };
            AudioSource::Uri(staged.remote_uri.clone())
        }
        None => AudioSource::Inline(chunk.bytes.clone()),
    };
    recognizer.recognize(source, request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::assemble;
    use crate::error::ScribeError;
    use crate::segmenter::{segment, SegmentPolicy};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Test backend keyed on the chunk's first byte (tests build buffers
    /// where every byte of chunk k equals k). Supports per-chunk delays,
    /// per-chunk failures, and failing the first N calls overall.
    #[derive(Default)]
    struct ScriptedRecognizer {
        delays_ms: HashMap<usize, u64>,
        fail_indices: Vec<usize>,
        fail_first_calls: u32,
        calls: AtomicU32,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedRecognizer {
        fn chunk_index(audio: &AudioSource) -> usize {
            match audio {
                AudioSource::Inline(bytes) => bytes[0] as usize,
                AudioSource::Uri(uri) => uri
                    .rsplit('/')
                    .next()
                    .and_then(|n| n.strip_prefix("chunk-"))
                    .and_then(|n| n.split('-').next())
                    .and_then(|n| n.parse().ok())
                    .unwrap_or(usize::MAX),
            }
        }
    }

    #[async_trait]
    impl Recognizer for ScriptedRecognizer {
        async fn recognize(
            &self,
            audio: AudioSource,
            _request: &RecognizeRequest,
        ) -> ScribeResult<String> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);

            let index = Self::chunk_index(&audio);
            if let Some(&ms) = self.delays_ms.get(&index) {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first_calls || self.fail_indices.contains(&index) {
                return Err(ScribeError::Recognition(format!("scripted failure {}", index)));
            }
            Ok(format!("seg{}", index))
        }
    }

    /// In-memory staging store that records every put and delete.
    #[derive(Default)]
    struct MemoryStore {
        puts: Mutex<Vec<String>>,
        deletes: Mutex<Vec<String>>,
        fail_put_for_chunk: Option<usize>,
        hang_put_for_chunk: Option<usize>,
        fail_deletes: bool,
    }

    #[async_trait]
    impl StagingStore for MemoryStore {
        async fn put(&self, name: &str, _bytes: &[u8]) -> ScribeResult<String> {
            if let Some(index) = self.fail_put_for_chunk {
                if name.starts_with(&format!("chunk-{}-", index)) {
                    return Err(ScribeError::Staging("scripted put failure".to_string()));
                }
            }
            if let Some(index) = self.hang_put_for_chunk {
                if name.starts_with(&format!("chunk-{}-", index)) {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
            }
            self.puts.lock().unwrap().push(name.to_string());
            Ok(format!("gs://test-bucket/{}", name))
        }

        async fn delete(&self, name: &str) -> ScribeResult<()> {
            if self.fail_deletes {
                return Err(ScribeError::Staging("scripted delete failure".to_string()));
            }
            self.deletes.lock().unwrap().push(name.to_string());
            Ok(())
        }
    }

    /// Buffer where every byte of chunk k equals k, for `chunk_count` chunks
    /// of `chunk_size` bytes each.
    fn indexed_buffer(chunk_count: usize, chunk_size: usize) -> Vec<u8> {
        (0..chunk_count)
            .flat_map(|k| std::iter::repeat(k as u8).take(chunk_size))
            .collect()
    }

    fn fast_config() -> DispatchConfig {
        DispatchConfig {
            max_concurrency: 4,
            chunk_timeout: Duration::from_secs(5),
            retry_attempts: 0,
            retry_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn results_arrive_in_index_order_despite_variable_delays() {
        let buffer = indexed_buffer(4, 100);
        let chunks = segment(&buffer, SegmentPolicy::new(100, 0)).unwrap();

        // Early chunks finish last.
        let recognizer = ScriptedRecognizer {
            delays_ms: HashMap::from([(0, 80), (1, 40), (2, 10), (3, 1)]),
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(Arc::new(recognizer), fast_config());
        let results = dispatcher.dispatch(chunks, &RecognizeRequest::default()).await;

        let transcript = assemble(&results, 4).unwrap();
        assert_eq!(transcript, "seg0\nseg1\nseg2\nseg3");
    }

    #[tokio::test]
    async fn end_to_end_hundred_k_scenario() {
        let buffer = indexed_buffer(1, 100_000);
        let chunks = segment(&buffer, SegmentPolicy::new(30_000, 0)).unwrap();
        assert_eq!(chunks.len(), 4);

        // All chunk bytes are zero here, so key responses on position instead.
        struct PositionalRecognizer;
        #[async_trait]
        impl Recognizer for PositionalRecognizer {
            async fn recognize(
                &self,
                audio: AudioSource,
                _request: &RecognizeRequest,
            ) -> ScribeResult<String> {
                let AudioSource::Inline(bytes) = audio else {
                    return Err(ScribeError::Recognition("expected inline".to_string()));
                };
                let index = match bytes.len() {
                    10_000 => 3,
                    _ => return Ok("full".to_string()),
                };
                Ok(format!("seg{}", index))
            }
        }

        let dispatcher = Dispatcher::new(Arc::new(PositionalRecognizer), fast_config());
        let results = dispatcher.dispatch(chunks, &RecognizeRequest::default()).await;
        assert_eq!(assemble(&results, 4).unwrap(), "full\nfull\nfull\nseg3");
    }

    #[tokio::test]
    async fn failing_chunk_degrades_to_empty_string_only() {
        let buffer = indexed_buffer(4, 50);
        let chunks = segment(&buffer, SegmentPolicy::new(50, 0)).unwrap();

        let recognizer = ScriptedRecognizer {
            fail_indices: vec![2],
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(Arc::new(recognizer), fast_config());
        let results = dispatcher.dispatch(chunks, &RecognizeRequest::default()).await;

        assert_eq!(results[&0], "seg0");
        assert_eq!(results[&1], "seg1");
        assert_eq!(results[&2], "");
        assert_eq!(results[&3], "seg3");
        assert_eq!(assemble(&results, 4).unwrap(), "seg0\nseg1\n\nseg3");
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let buffer = indexed_buffer(1, 10);
        let chunks = segment(&buffer, SegmentPolicy::new(10, 0)).unwrap();

        let recognizer = ScriptedRecognizer {
            fail_first_calls: 1,
            ..Default::default()
        };
        let config = DispatchConfig {
            retry_attempts: 2,
            ..fast_config()
        };
        let dispatcher = Dispatcher::new(Arc::new(recognizer), config);
        let results = dispatcher.dispatch(chunks, &RecognizeRequest::default()).await;
        assert_eq!(results[&0], "seg0");
    }

    #[tokio::test]
    async fn hung_call_times_out_to_empty_transcript() {
        let buffer = indexed_buffer(2, 10);
        let chunks = segment(&buffer, SegmentPolicy::new(10, 0)).unwrap();

        let recognizer = ScriptedRecognizer {
            delays_ms: HashMap::from([(1, 5_000)]),
            ..Default::default()
        };
        let config = DispatchConfig {
            chunk_timeout: Duration::from_millis(50),
            ..fast_config()
        };
        let dispatcher = Dispatcher::new(Arc::new(recognizer), config);
        let results = dispatcher.dispatch(chunks, &RecognizeRequest::default()).await;
        assert_eq!(results[&0], "seg0");
        assert_eq!(results[&1], "");
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_pool_width() {
        let buffer = indexed_buffer(8, 10);
        let chunks = segment(&buffer, SegmentPolicy::new(10, 0)).unwrap();

        let recognizer = Arc::new(ScriptedRecognizer {
            delays_ms: (0..8usize).map(|k| (k, 20u64)).collect(),
            ..Default::default()
        });
        let config = DispatchConfig {
            max_concurrency: 2,
            ..fast_config()
        };
        let dispatcher = Dispatcher::new(recognizer.clone(), config);
        let results = dispatcher.dispatch(chunks, &RecognizeRequest::default()).await;

        assert_eq!(results.len(), 8);
        assert!(recognizer.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn staged_variant_deletes_every_artifact_after_batch() {
        let buffer = indexed_buffer(3, 10);
        let chunks = segment(&buffer, SegmentPolicy::new(10, 0)).unwrap();

        let store = Arc::new(MemoryStore::default());
        let recognizer = ScriptedRecognizer {
            fail_indices: vec![1], // recognition fails, artifact must still be cleaned up
            ..Default::default()
        };
        let dispatcher =
            Dispatcher::new(Arc::new(recognizer), fast_config()).with_staging(store.clone());
        let results = dispatcher.dispatch(chunks, &RecognizeRequest::default()).await;

        assert_eq!(results[&0], "seg0");
        assert_eq!(results[&1], "");
        assert_eq!(results[&2], "seg2");

        let puts = store.puts.lock().unwrap().clone();
        let deletes = store.deletes.lock().unwrap().clone();
        assert_eq!(puts.len(), 3);
        let mut sorted_puts = puts.clone();
        sorted_puts.sort();
        let mut sorted_deletes = deletes.clone();
        sorted_deletes.sort();
        assert_eq!(sorted_puts, sorted_deletes);
    }

    #[tokio::test]
    async fn staging_put_failure_is_isolated_to_its_chunk() {
        let buffer = indexed_buffer(3, 10);
        let chunks = segment(&buffer, SegmentPolicy::new(10, 0)).unwrap();

        let store = Arc::new(MemoryStore {
            fail_put_for_chunk: Some(0),
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(Arc::new(ScriptedRecognizer::default()), fast_config())
            .with_staging(store.clone());
        let results = dispatcher.dispatch(chunks, &RecognizeRequest::default()).await;

        assert_eq!(results[&0], "");
        assert_eq!(results[&1], "seg1");
        assert_eq!(results[&2], "seg2");
        // The failed put's name was recorded too, so cleanup best-effort
        // deletes all three names.
        assert_eq!(store.puts.lock().unwrap().len(), 2);
        assert_eq!(store.deletes.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn timed_out_staging_put_still_gets_cleanup() {
        let buffer = indexed_buffer(2, 10);
        let chunks = segment(&buffer, SegmentPolicy::new(10, 0)).unwrap();

        let store = Arc::new(MemoryStore {
            hang_put_for_chunk: Some(0),
            ..Default::default()
        });
        let config = DispatchConfig {
            chunk_timeout: Duration::from_millis(50),
            ..fast_config()
        };
        let dispatcher = Dispatcher::new(Arc::new(ScriptedRecognizer::default()), config)
            .with_staging(store.clone());
        let results = dispatcher.dispatch(chunks, &RecognizeRequest::default()).await;

        assert_eq!(results[&0], "");
        assert_eq!(results[&1], "seg1");

        // The hung upload may have created the object server-side; its name
        // must still reach the post-batch delete.
        let deletes = store.deletes.lock().unwrap().clone();
        assert_eq!(deletes.len(), 2);
        assert!(deletes.iter().any(|n| n.starts_with("chunk-0-")));
        assert!(deletes.iter().any(|n| n.starts_with("chunk-1-")));
    }

    #[tokio::test]
    async fn delete_failures_are_swallowed() {
        let buffer = indexed_buffer(2, 10);
        let chunks = segment(&buffer, SegmentPolicy::new(10, 0)).unwrap();

        let store = Arc::new(MemoryStore {
            fail_deletes: true,
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(Arc::new(ScriptedRecognizer::default()), fast_config())
            .with_staging(store);
        let results = dispatcher.dispatch(chunks, &RecognizeRequest::default()).await;
        assert_eq!(assemble(&results, 2).unwrap(), "seg0\nseg1");
    }

    #[tokio::test]
    async fn empty_chunk_list_yields_empty_results() {
        let dispatcher =
            Dispatcher::new(Arc::new(ScriptedRecognizer::default()), fast_config());
        let results = dispatcher.dispatch(Vec::new(), &RecognizeRequest::default()).await;
        assert!(results.is_empty());
        assert_eq!(assemble(&results, 0).unwrap(), "");
    }
}
