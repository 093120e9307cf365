//! Bounded worker pool that extracts many files with per-file isolation.
//!
//! Each file runs on its own helper thread so a decode that hangs can be
//! abandoned once its budget expires. The worker moves on; the straggler is
//! detached and its late result is discarded.
//!
//! Every helper holds a slot from a pool shared by all workers until it
//! actually returns, so stragglers still count against the limit. A worker
//! that cannot get a slot within the file budget records the file as timed
//! out without starting it.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::analysis::features::{ExtractError, FeatureExtractor, FeatureRecord};

/// Work performed for one file.
pub type ExtractJob = Arc<dyn Fn(&Path) -> Result<FeatureRecord, ExtractError> + Send + Sync>;

/// Concurrency and budget for one batch run.
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub worker_count: usize,
    pub file_timeout: Duration,
    /// Abandoned extractions allowed to keep running beside the workers.
    pub max_stragglers: usize,
}

impl BatchOptions {
    /// Options derived from the pipeline configuration of `extractor`.
    pub fn for_extractor(extractor: &FeatureExtractor) -> Self {
        let config = extractor.config();
        let worker_count = config.resolved_worker_count();
        Self {
            worker_count,
            file_timeout: config.file_timeout(),
            max_stragglers: worker_count,
        }
    }
}

/// A file that produced no record, with the reason.
#[derive(Debug)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: ExtractError,
}

/// Outcome of a batch run. Records arrive in completion order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub records: Vec<FeatureRecord>,
    pub failures: Vec<FileFailure>,
}

/// Extract every file in `files` with `extractor`.
pub fn extract_batch(extractor: Arc<FeatureExtractor>, files: Vec<PathBuf>) -> BatchReport {
    let options = BatchOptions::for_extractor(&extractor);
    let job: ExtractJob = Arc::new(move |path: &Path| extractor.extract_file(path));
    run_batch(files, job, options)
}

/// Run `job` over `files` on at most `options.worker_count` threads.
///
/// At most `worker_count + max_stragglers` extractions are alive at once.
/// A failing, panicking or expired file is recorded in
/// [`BatchReport::failures`] and never aborts the rest of the batch.
pub fn run_batch(files: Vec<PathBuf>, job: ExtractJob, options: BatchOptions) -> BatchReport {
    let total = files.len();
    if total == 0 {
        return BatchReport::default();
    }
    let worker_count = options.worker_count.clamp(1, total);
    info!("Extracting {total} files with {worker_count} workers");
    let queue = Arc::new(Mutex::new(VecDeque::from(files)));
    let slots = Arc::new(ExtractionSlots::new(worker_count + options.max_stragglers));
    let (tx, rx) = mpsc::channel();

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let job = Arc::clone(&job);
            let slots = Arc::clone(&slots);
            scope.spawn(move || {
                loop {
                    let next = {
                        let mut guard = match queue.lock() {
                            Ok(guard) => guard,
                            Err(_) => return,
                        };
                        guard.pop_front()
                    };
                    let Some(path) = next else {
                        break;
                    };
                    let outcome = match slots.acquire(options.file_timeout) {
                        Some(permit) => {
                            run_with_timeout(&job, &path, options.file_timeout, permit)
                        }
                        None => Err(ExtractError::Timeout {
                            path: path.clone(),
                            seconds: options.file_timeout.as_secs_f32(),
                        }),
                    };
                    if tx.send((path, outcome)).is_err() {
                        return;
                    }
                }
            });
        }
    });
    drop(tx);

    let mut report = BatchReport::default();
    for (path, outcome) in rx {
        match outcome {
            Ok(record) => {
                debug!("Extracted {}", path.display());
                report.records.push(record);
            }
            Err(error) => {
                warn!("Skipping {}: {error}", path.display());
                report.failures.push(FileFailure { path, error });
            }
        }
    }
    info!(
        "Batch finished: {} extracted, {} failed",
        report.records.len(),
        report.failures.len()
    );
    report
}

/// Counts live extractions across all workers of one batch.
#[derive(Debug)]
struct ExtractionSlots {
    live: Mutex<usize>,
    freed: Condvar,
    capacity: usize,
}

impl ExtractionSlots {
    fn new(capacity: usize) -> Self {
        Self {
            live: Mutex::new(0),
            freed: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Wait up to `wait` for a free slot.
    fn acquire(self: &Arc<Self>, wait: Duration) -> Option<SlotPermit> {
        let guard = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut live, _) = self
            .freed
            .wait_timeout_while(guard, wait, |live| *live >= self.capacity)
            .unwrap_or_else(PoisonError::into_inner);
        if *live >= self.capacity {
            return None;
        }
        *live += 1;
        Some(SlotPermit {
            slots: Arc::clone(self),
        })
    }
}

/// Releases its slot when dropped, including during a panic unwind.
#[derive(Debug)]
struct SlotPermit {
    slots: Arc<ExtractionSlots>,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        let mut live = self.slots.live.lock().unwrap_or_else(PoisonError::into_inner);
        *live = live.saturating_sub(1);
        self.slots.freed.notify_one();
    }
}

fn run_with_timeout(
    job: &ExtractJob,
    path: &Path,
    timeout: Duration,
    permit: SlotPermit,
) -> Result<FeatureRecord, ExtractError> {
    let (tx, rx) = mpsc::sync_channel(1);
    let helper_job = Arc::clone(job);
    let owned = path.to_path_buf();
    let spawned = std::thread::Builder::new()
        .name("sampledex-extract".into())
        .spawn(move || {
            let _permit = permit;
            let _ = tx.send(helper_job(&owned));
        });
    if spawned.is_err() {
        // No helper thread available; run inline without a budget.
        return job(path);
    }
    match rx.recv_timeout(timeout) {
        Ok(outcome) => outcome,
        Err(RecvTimeoutError::Timeout) => Err(ExtractError::Timeout {
            path: path.to_path_buf(),
            seconds: timeout.as_secs_f32(),
        }),
        Err(RecvTimeoutError::Disconnected) => Err(ExtractError::Panicked {
            path: path.to_path_buf(),
        }),
    }
}
