//! Dedicated rayon pool for HTML parsing and text extraction.

use once_cell::sync::Lazy;
use rayon::ThreadPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

const SLOW_TASK: Duration = Duration::from_millis(500);

static WORKERS: Lazy<usize> = Lazy::new(|| {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(4)
        .clamp(2, 8)
});

/// `None` when the pool could not be built; jobs then use tokio's blocking pool.
static POOL: Lazy<Option<ThreadPool>> = Lazy::new(|| {
    match rayon::ThreadPoolBuilder::new()
        .num_threads(*WORKERS)
        .thread_name(|idx| format!("delve-extract-{idx}"))
        .build()
    {
        Ok(pool) => Some(pool),
        Err(err) => {
            warn!(target: "delve.cpu_pool", error = %err, "falling back to blocking threads");
            None
        }
    }
});

static IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, thiserror::Error)]
pub enum CpuTaskError {
    #[error("CPU task panicked: {0}")]
    Panicked(String),

    #[error("CPU task was dropped before finishing")]
    Dropped,
}

/// Decrements the in-flight count and reports latency when the job ends.
struct InFlight {
    started: Instant,
}

impl InFlight {
    fn enter() -> Self {
        let queued = IN_FLIGHT.fetch_add(1, Ordering::Relaxed) + 1;
        if queued > *WORKERS * 2 {
            info!(
                target: "delve.cpu_pool",
                queued,
                workers = *WORKERS,
                "extraction backlog growing"
            );
        }
        Self {
            started: Instant::now(),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let remaining = IN_FLIGHT.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        let elapsed = self.started.elapsed();
        if elapsed > SLOW_TASK {
            info!(
                target: "delve.cpu_pool",
                remaining,
                latency_ms = elapsed.as_millis() as u64,
                "slow CPU task"
            );
        } else {
            debug!(
                target: "delve.cpu_pool",
                remaining,
                latency_ms = elapsed.as_millis() as u64,
                "CPU task done"
            );
        }
    }
}

fn panic_reason(payload: Box<dyn std::any::Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Run `job` off the async runtime and await its result.
pub async fn spawn_cpu<F, R>(job: F) -> Result<R, CpuTaskError>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let guard = InFlight::enter();
    let task = move || {
        let _guard = guard;
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job))
            .map_err(|payload| CpuTaskError::Panicked(panic_reason(payload)));
        let _ = tx.send(result);
    };

    match POOL.as_ref() {
        Some(pool) => pool.spawn(task),
        None => {
            tokio::task::spawn_blocking(task);
        }
    }

    rx.await.map_err(|_| CpuTaskError::Dropped)?
}

pub fn worker_count() -> usize {
    *WORKERS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_job_off_the_runtime() {
        let value = spawn_cpu(|| (1..=10).sum::<u32>()).await.unwrap();
        assert_eq!(value, 55);
        assert!(worker_count() >= 2);
    }

    #[tokio::test]
    async fn panics_become_errors() {
        let err = spawn_cpu(|| -> u32 { panic!("boom") }).await.unwrap_err();
        assert!(matches!(err, CpuTaskError::Panicked(msg) if msg.contains("boom")));
    }

    #[tokio::test]
    async fn concurrent_jobs_all_complete() {
        let jobs: Vec<_> = (0..6u64).map(|i| spawn_cpu(move || i * 2)).collect();
        let results = futures::future::join_all(jobs).await;
        assert_eq!(results.into_iter().map(|r| r.unwrap()).sum::<u64>(), 30);
    }
}
