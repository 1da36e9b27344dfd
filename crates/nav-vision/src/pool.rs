use futures::future::join_all;
use nav_state::MatchResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Runs one blocking correlation per scale, at most `workers` at a time.
///
/// Each scale gets its own deadline; a scale that times out or panics simply
/// contributes no result.
#[derive(Clone)]
pub struct ScalePool {
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl ScalePool {
    pub fn new(workers: usize, timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// One entry per scale, in input order.
    pub async fn run_all<F>(&self, scales: &[f64], job: F) -> Vec<Option<MatchResult>>
    where
        F: Fn(f64) -> Option<MatchResult> + Send + Sync + 'static,
    {
        let job = Arc::new(job);
        let tasks = scales.iter().map(|&scale| {
            let job = Arc::clone(&job);
            let permits = Arc::clone(&self.permits);
            let timeout = self.timeout;
            async move {
                let permit = permits.acquire_owned().await.ok()?;
                // The permit moves into the blocking task so an abandoned
                // (timed out) scale still counts against the cap until it ends.
                let handle = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    job(scale)
                });
                match tokio::time::timeout(timeout, handle).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => {
                        warn!("Scale {:.2} task failed: {}", scale, e);
                        None
                    }
                    Err(_) => {
                        debug!("Scale {:.2} timed out after {:?}", scale, timeout);
                        None
                    }
                }
            }
        });
        join_all(tasks).await
    }

    /// Highest-confidence result over all scales.
    pub async fn best_of<F>(&self, scales: &[f64], job: F) -> Option<MatchResult>
    where
        F: Fn(f64) -> Option<MatchResult> + Send + Sync + 'static,
    {
        self.run_all(scales, job)
            .await
            .into_iter()
            .flatten()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn result(confidence: f64, scale: f64) -> MatchResult {
        MatchResult {
            confidence,
            x: 0.0,
            y: 0.0,
            w: 10.0,
            h: 10.0,
            scale,
        }
    }

    #[tokio::test]
    async fn test_best_of_picks_highest_confidence() {
        let pool = ScalePool::new(2, Duration::from_secs(1));
        let best = pool
            .best_of(&[1.0, 1.1, 1.2], |s| Some(result(1.0 - (s - 1.1).abs(), s)))
            .await
            .unwrap();
        assert!((best.scale - 1.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_timeout_and_panic_yield_none() {
        let pool = ScalePool::new(4, Duration::from_millis(50));
        let results = pool
            .run_all(&[1.0, 2.0, 3.0], |s| {
                if s == 1.0 {
                    std::thread::sleep(Duration::from_millis(400));
                    Some(result(0.9, s))
                } else if s == 2.0 {
                    panic!("bad scale");
                } else {
                    Some(result(0.5, s))
                }
            })
            .await;
        assert!(results[0].is_none());
        assert!(results[1].is_none());
        assert_eq!(results[2].map(|r| r.scale), Some(3.0));
    }

    #[tokio::test]
    async fn test_concurrency_is_capped() {
        let pool = ScalePool::new(2, Duration::from_secs(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
        pool.run_all(&[1.0; 6], move |s| {
            let now = r.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(30));
            r.fetch_sub(1, Ordering::SeqCst);
            Some(result(0.5, s))
        })
        .await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
