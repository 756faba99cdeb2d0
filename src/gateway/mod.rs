// Rate-limited request gateway for every exchange call
pub mod quota;

pub use quota::QuotaTracker;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// One queued unit of work.
///
/// `is_abandoned` lets a worker skip calls whose caller already gave up
/// before anything was sent.
struct Job {
    run: Box<dyn FnOnce() -> BoxFuture + Send>,
    is_abandoned: Box<dyn Fn() -> bool + Send>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("request cancelled by caller")]
    Cancelled,
    #[error("request deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
    #[error("request gateway is closed")]
    Closed,
    #[error("gateway worker dropped the request")]
    WorkerLost,
}

/// Bounded worker pool in front of the exchange API
///
/// Every submitted call first clears the shared [`QuotaTracker`], then runs
/// on one of `workers` tasks. Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct RequestGateway {
    sender: mpsc::Sender<Job>,
    quota: Arc<QuotaTracker>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl RequestGateway {
    pub fn start(config: &GatewayConfig) -> Self {
        let quota = Arc::new(QuotaTracker::new(
            config.window(),
            config.max_requests,
            config.cooldown(),
        ));
        Self::with_quota(config.workers, config.queue_capacity, quota)
    }

    /// Start the pool around an existing tracker (e.g. one on a manual clock)
    pub fn with_quota(workers: usize, queue_capacity: usize, quota: Arc<QuotaTracker>) -> Self {
        let workers = workers.max(1);
        let (sender, receiver) = mpsc::channel::<Job>(queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers)
            .map(|id| tokio::spawn(worker_loop(id, receiver.clone(), quota.clone())))
            .collect();

        tracing::info!(
            workers,
            window_ms = quota.window().as_millis() as u64,
            max_requests = quota.max_requests(),
            "Request gateway started"
        );

        Self {
            sender,
            quota,
            workers: Arc::new(Mutex::new(handles)),
        }
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    /// Submit one call and wait for its result.
    ///
    /// The wait ends early when `cancel` fires or `deadline` passes; the call
    /// itself keeps running if a worker already started it, and a failure
    /// it reports afterwards is only logged.
    pub async fn submit<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        deadline: Option<Duration>,
        work: F,
    ) -> Result<Result<T, E>, GatewayError>
    where
        T: Send + 'static,
        E: std::fmt::Display + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<Result<T, E>>();
        let probe = Arc::new(());
        let job = Job::new(work, tx, probe.clone());

        let deadline_sleep = async {
            match deadline {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline_sleep);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            _ = &mut deadline_sleep => {
                return Err(GatewayError::DeadlineExceeded(deadline.unwrap_or_default()));
            }
            sent = self.sender.send(job) => {
                if sent.is_err() {
                    return Err(GatewayError::Closed);
                }
            }
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GatewayError::Cancelled),
            _ = &mut deadline_sleep => {
                Err(GatewayError::DeadlineExceeded(deadline.unwrap_or_default()))
            }
            result = rx => result.map_err(|_| GatewayError::WorkerLost),
        };
        drop(probe);
        outcome
    }

    /// Stop accepting work and wait for the workers of this pool.
    ///
    /// Workers drain once every clone of the gateway has been dropped.
    pub async fn shutdown(self) {
        let Self { sender, workers, .. } = self;
        drop(sender);

        let handles = std::mem::take(&mut *workers.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Gateway worker ended abnormally: {}", e);
            }
        }
        tracing::info!("Request gateway stopped");
    }
}

impl Job {
    fn new<T, E, F, Fut>(
        work: F,
        tx: oneshot::Sender<Result<T, E>>,
        probe: Arc<()>,
    ) -> Self
    where
        T: Send + 'static,
        E: std::fmt::Display + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        // The caller holds the only strong reference while it is waiting.
        let weak = Arc::downgrade(&probe);
        drop(probe);

        let run = Box::new(move || -> BoxFuture {
            Box::pin(async move {
                let result = work().await;
                if let Err(Err(e)) = tx.send(result) {
                    tracing::warn!("Request failed after its caller stopped waiting: {}", e);
                }
            })
        });

        Self {
            run,
            is_abandoned: Box::new(move || weak.strong_count() == 0),
        }
    }
}

async fn worker_loop(
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    quota: Arc<QuotaTracker>,
) {
    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(job) = job else {
            tracing::debug!(worker = id, "Gateway queue closed, worker exiting");
            return;
        };

        if (job.is_abandoned)() {
            tracing::debug!(worker = id, "Skipping request abandoned while queued");
            continue;
        }

        loop {
            let wait = quota.admit();
            if wait.is_zero() {
                break;
            }
            tracing::warn!(worker = id, wait_ms = wait.as_millis() as u64, "Quota exhausted, backing off");
            tokio::time::sleep(wait).await;
        }

        if (job.is_abandoned)() {
            tracing::debug!(worker = id, "Skipping request abandoned during quota backoff");
            continue;
        }

        tracing::debug!(worker = id, "Dispatching request");

        // Run in its own task so a panicking call cannot take the worker down.
        if let Err(e) = tokio::spawn((job.run)()).await {
            tracing::error!(worker = id, "Gateway request task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    fn gateway(workers: usize, max_requests: usize) -> RequestGateway {
        let quota = Arc::new(QuotaTracker::new(
            Duration::from_secs(10),
            max_requests,
            Duration::from_millis(10),
        ));
        RequestGateway::with_quota(workers, 16, quota)
    }

    #[tokio::test]
    async fn test_returns_result_to_caller() {
        let gateway = gateway(2, 100);
        let cancel = CancellationToken::new();

        let value = gateway
            .submit(&cancel, None, || async { Ok::<_, String>(42) })
            .await;
        assert_eq!(value, Ok(Ok(42)));

        let failed = gateway
            .submit(&cancel, None, || async { Err::<u32, _>("boom".to_string()) })
            .await;
        assert_eq!(failed, Ok(Err("boom".to_string())));
    }

    #[tokio::test]
    async fn test_bounded_concurrency() {
        let gateway = gateway(2, 100);
        let cancel = CancellationToken::new();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut calls = tokio::task::JoinSet::new();
        for _ in 0..6 {
            let gateway = gateway.clone();
            let cancel = cancel.clone();
            let running = running.clone();
            let peak = peak.clone();
            calls.spawn(async move {
                gateway
                    .submit(&cancel, None, move || async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, String>(())
                    })
                    .await
            });
        }
        while let Some(done) = calls.join_next().await {
            assert_ok!(done.unwrap());
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_deadline_discards_result_but_call_completes() {
        let gateway = gateway(1, 100);
        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicUsize::new(0));

        let flag = finished.clone();
        let result = gateway
            .submit(&cancel, Some(Duration::from_millis(10)), move || async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                flag.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            })
            .await;
        assert_eq!(result, Err(GatewayError::DeadlineExceeded(Duration::from_millis(10))));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_caller_gets_cancelled() {
        let gateway = gateway(1, 100);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = gateway
            .submit(&cancel, None, || async { Ok::<_, String>(1) })
            .await;
        assert_err!(result);
    }

    #[tokio::test]
    async fn test_panicking_call_does_not_kill_pool() {
        let gateway = gateway(1, 100);
        let cancel = CancellationToken::new();

        let lost = gateway
            .submit(&cancel, None, || async {
                if true {
                    panic!("exchange call exploded");
                }
                Ok::<u32, String>(0)
            })
            .await;
        assert_eq!(lost, Err(GatewayError::WorkerLost));

        let fine = gateway
            .submit(&cancel, None, || async { Ok::<_, String>(7) })
            .await;
        assert_eq!(fine, Ok(Ok(7)));
    }

    #[tokio::test]
    async fn test_quota_exhaustion_waits_instead_of_failing() {
        let quota = Arc::new(QuotaTracker::new(
            Duration::from_millis(50),
            2,
            Duration::from_millis(5),
        ));
        let gateway = RequestGateway::with_quota(1, 16, quota);
        let cancel = CancellationToken::new();
        let started = std::time::Instant::now();

        for i in 0..4 {
            let result = gateway
                .submit(&cancel, None, move || async move { Ok::<_, String>(i) })
                .await;
            assert_eq!(result, Ok(Ok(i)));
        }

        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_call_abandoned_during_backoff_is_not_sent() {
        let quota = Arc::new(QuotaTracker::new(
            Duration::from_millis(300),
            1,
            Duration::from_millis(300),
        ));
        let gateway = RequestGateway::with_quota(1, 16, quota);
        let cancel = CancellationToken::new();
        let dispatched = Arc::new(AtomicUsize::new(0));

        let first = gateway
            .submit(&cancel, None, || async { Ok::<_, String>(1) })
            .await;
        assert_eq!(first, Ok(Ok(1)));

        let counter = dispatched.clone();
        let late = gateway
            .submit(&cancel, Some(Duration::from_millis(30)), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(2)
            })
            .await;
        assert_eq!(late, Err(GatewayError::DeadlineExceeded(Duration::from_millis(30))));

        // well past the end of the backoff
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(dispatched.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_gateway() {
        let gateway = gateway(2, 100);
        let handle = gateway.clone();
        drop(handle);
        gateway.shutdown().await;
    }
}
