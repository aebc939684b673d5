//! Background variant queue.
//!
//! [`VariantQueue`] accepts [`VariantJob`]s and generates renditions in a
//! spawned worker, off the caller's request path. Generation runs on the
//! blocking pool because decoding images and writing SQLite both block.
//!
//! Jobs are retried with a fixed delay until `max_attempts` is reached. Only
//! presets that failed with a retryable error are attempted again; the upsert
//! in [`VariantGenerator::ensure_variant`] makes a repeated attempt harmless.
//!
//! # Example
//!
//! ```rust,ignore
//! let queue = VariantQueue::new(generator, &config.queue);
//! queue.schedule(blob_id);
//! queue.shutdown().await;
//! ```

use std::sync::Arc;

use flowshelf_common::{BlobId, Error, Result};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::config::QueueConfig;

use super::variants::{GenerationReport, VariantGenerator};

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 64;

/// A request to generate renditions for one blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantJob {
    pub blob_id: BlobId,
    /// Preset names to build. Empty means every configured preset.
    pub variant_types: Vec<String>,
}

impl VariantJob {
    /// Build every configured preset.
    pub fn all(blob_id: BlobId) -> Self {
        Self {
            blob_id,
            variant_types: Vec::new(),
        }
    }
}

/// Outcome notifications published by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariantEvent {
    /// These presets were stored during one attempt.
    Generated {
        blob_id: BlobId,
        variant_types: Vec<String>,
    },
    /// A preset was given up on. A job that fails as a whole reports each
    /// of its presets separately.
    Failed {
        blob_id: BlobId,
        variant_type: String,
        error: String,
    },
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

/// Handle to the background generation worker.
///
/// The worker runs until [`shutdown`](Self::shutdown) is called or the handle
/// is dropped, after which it finishes the jobs already queued and exits.
pub struct VariantQueue {
    sender: mpsc::Sender<VariantJob>,
    events: broadcast::Sender<VariantEvent>,
    worker: JoinHandle<()>,
}

impl VariantQueue {
    /// Create the queue and spawn its worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(generator: Arc<VariantGenerator>, config: &QueueConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let policy = RetryPolicy {
            max_attempts: config.max_attempts.max(1),
            delay: Duration::from_millis(config.retry_delay_ms),
        };

        let worker = tokio::spawn(process_jobs(receiver, generator, events.clone(), policy));

        Self {
            sender,
            events,
            worker,
        }
    }

    /// Queue generation of every preset without waiting.
    ///
    /// Returns `false` if the job was dropped because the queue is full or
    /// closed. Dropped renditions are generated on first request instead.
    pub fn schedule(&self, blob_id: BlobId) -> bool {
        match self.sender.try_send(VariantJob::all(blob_id)) {
            Ok(()) => {
                debug!(blob_id = %blob_id, "Scheduled variant generation");
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(blob_id = %blob_id, "Variant queue is full; dropping job");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(blob_id = %blob_id, "Variant queue is closed; dropping job");
                false
            }
        }
    }

    /// Submit a job, waiting for queue space.
    ///
    /// Returns an error if the worker has stopped.
    pub async fn submit(&self, job: VariantJob) -> Result<()> {
        debug!(
            blob_id = %job.blob_id,
            variant_types = ?job.variant_types,
            "Submitting variant job"
        );

        self.sender
            .send(job)
            .await
            .map_err(|_| Error::internal("Variant queue is closed"))
    }

    /// Receive worker events from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<VariantEvent> {
        self.events.subscribe()
    }

    /// Close the queue and wait for the jobs already queued to finish.
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(e) = self.worker.await {
            warn!(error = %e, "Variant queue worker panicked");
        }
    }
}

async fn process_jobs(
    mut receiver: mpsc::Receiver<VariantJob>,
    generator: Arc<VariantGenerator>,
    events: broadcast::Sender<VariantEvent>,
    policy: RetryPolicy,
) {
    info!("Variant queue worker started");

    while let Some(job) = receiver.recv().await {
        run_job(&generator, &events, policy, job).await;
    }

    info!("Variant queue worker stopped (channel closed)");
}

async fn run_job(
    generator: &Arc<VariantGenerator>,
    events: &broadcast::Sender<VariantEvent>,
    policy: RetryPolicy,
    job: VariantJob,
) {
    let blob_id = job.blob_id;
    let mut pending = if job.variant_types.is_empty() {
        generator.presets().keys().cloned().collect()
    } else {
        job.variant_types
    };
    let mut attempt = 0;

    loop {
        attempt += 1;
        let last_attempt = attempt >= policy.max_attempts;

        let report = match generate(generator, blob_id, pending.clone()).await {
            Ok(report) => report,
            Err(Error::NotFound(_)) => {
                // Discarded before the worker got to it.
                debug!(blob_id = %blob_id, "Blob no longer exists; dropping variant job");
                return;
            }
            Err(e) if e.is_retryable() && !last_attempt => {
                warn!(blob_id = %blob_id, attempt, error = %e, "Variant job failed; retrying");
                sleep(policy.delay).await;
                continue;
            }
            Err(e) => {
                warn!(blob_id = %blob_id, attempt, error = %e, "Variant job failed; giving up");
                for variant_type in pending {
                    let _ = events.send(VariantEvent::Failed {
                        blob_id,
                        variant_type,
                        error: e.to_string(),
                    });
                }
                return;
            }
        };

        if !report.built.is_empty() {
            let _ = events.send(VariantEvent::Generated {
                blob_id,
                variant_types: report.built,
            });
        }

        let mut retry = Vec::new();
        for (variant_type, e) in report.failed {
            if e.is_retryable() && !last_attempt {
                retry.push(variant_type);
            } else {
                let _ = events.send(VariantEvent::Failed {
                    blob_id,
                    variant_type,
                    error: e.to_string(),
                });
            }
        }

        if retry.is_empty() {
            return;
        }

        info!(blob_id = %blob_id, attempt, variants = ?retry, "Retrying failed variants");
        pending = retry;
        sleep(policy.delay).await;
    }
}

async fn generate(
    generator: &Arc<VariantGenerator>,
    blob_id: BlobId,
    only: Vec<String>,
) -> Result<GenerationReport> {
    let generator = Arc::clone(generator);
    tokio::task::spawn_blocking(move || generator.ensure_presets(blob_id, &only))
        .await
        .map_err(|e| Error::internal(format!("Variant task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VariantPreset;
    use crate::images::repository::{BlobRepository, UploadMeta};
    use flowshelf_db::pool::{init_memory_pool, DbPool};
    use image::{ImageFormat, RgbImage};
    use std::collections::BTreeMap;
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let img = RgbImage::from_pixel(64, 32, image::Rgb([1, 2, 3]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn setup(payload: &[u8]) -> (Arc<VariantGenerator>, BlobId) {
        setup_in(init_memory_pool().unwrap(), payload)
    }

    fn setup_in(pool: DbPool, payload: &[u8]) -> (Arc<VariantGenerator>, BlobId) {
        let stored = BlobRepository::new(pool.clone())
            .store(payload, &UploadMeta::new("q.png", "image/png"))
            .unwrap();
        let presets = BTreeMap::from([
            ("small".to_string(), VariantPreset::new(16, 16, 70)),
            ("wide".to_string(), VariantPreset::new(48, 48, 70)),
        ]);
        (Arc::new(VariantGenerator::new(pool, presets)), stored.id)
    }

    fn config() -> QueueConfig {
        QueueConfig {
            capacity: 8,
            max_attempts: 2,
            retry_delay_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_schedule_then_shutdown_drains() {
        let (generator, blob_id) = setup(&png_bytes());
        let queue = VariantQueue::new(generator.clone(), &config());

        assert!(queue.schedule(blob_id));
        queue.shutdown().await;

        let variants = generator.list_variants(blob_id).unwrap();
        let types: Vec<_> = variants.iter().map(|v| v.variant_type.as_str()).collect();
        assert_eq!(types, vec!["small", "wide"]);
    }

    #[tokio::test]
    async fn test_generated_event() {
        let (generator, blob_id) = setup(&png_bytes());
        let queue = VariantQueue::new(generator, &config());
        let mut events = queue.subscribe();

        queue
            .submit(VariantJob {
                blob_id,
                variant_types: vec!["small".to_string()],
            })
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            VariantEvent::Generated {
                blob_id,
                variant_types: vec!["small".to_string()],
            }
        );
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_undecodable_blob_fails_without_retry() {
        let (generator, blob_id) = setup(b"not an image");
        let queue = VariantQueue::new(generator.clone(), &config());
        let mut events = queue.subscribe();

        queue.schedule(blob_id);
        queue.shutdown().await;

        let mut failed = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event {
                VariantEvent::Failed { variant_type, .. } => failed.push(variant_type),
                VariantEvent::Generated { .. } => panic!("nothing should be generated"),
            }
        }
        assert_eq!(failed, vec!["small", "wide"]);
        assert!(generator.list_variants(blob_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_store_fails_each_preset() {
        let pool = init_memory_pool().unwrap();
        let (generator, blob_id) = setup_in(pool.clone(), &png_bytes());
        pool.get()
            .unwrap()
            .execute_batch("ALTER TABLE blobs RENAME TO blobs_moved;")
            .unwrap();

        let queue = VariantQueue::new(generator, &config());
        let mut events = queue.subscribe();

        queue.schedule(blob_id);
        queue.shutdown().await;

        let mut failed = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event {
                VariantEvent::Failed {
                    variant_type,
                    error,
                    ..
                } => {
                    assert!(error.starts_with("Storage error"), "{}", error);
                    failed.push(variant_type);
                }
                VariantEvent::Generated { .. } => panic!("nothing should be generated"),
            }
        }
        assert_eq!(failed, vec!["small", "wide"]);
    }

    #[tokio::test]
    async fn test_missing_blob_is_dropped() {
        let (generator, _) = setup(&png_bytes());
        let queue = VariantQueue::new(generator, &config());
        let mut events = queue.subscribe();

        queue.schedule(BlobId::new());
        queue.shutdown().await;

        assert!(events.try_recv().is_err());
    }
}
