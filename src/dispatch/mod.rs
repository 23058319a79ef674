//! Rate-limited priority dispatcher.
//!
//! Every outbound call in the process goes through one [`Dispatcher`]. It
//! keeps three priority queues, lets exactly one call be in flight at a time,
//! paces calls against a two-tier [`RateWindow`], and retries calls the
//! remote throttles.
//!
//! Submitters drive the dispatcher themselves: after queueing, a caller
//! either receives its result or waits on the in-flight lock, and whoever
//! acquires that lock issues the head of the highest non-empty queue, which
//! is not necessarily its own request. The issue step runs on a spawned task
//! that owns the lock, so a cancelled submitter never strands another
//! caller's call. Waiting on the lock parks the task, so there is no busy
//! polling.

pub mod metrics;
mod queue;
pub mod window;

use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

pub use metrics::{CallStats, DispatchMetrics};
pub use queue::Priority;
pub use window::RateWindow;

use queue::{PendingRequest, PriorityQueues};

use crate::config::DispatchConfig;
use crate::remote::{ApiRequest, RawResponse, RemoteService, TransportError};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The task issuing this request ended before it answered.
    #[error("request {0} was abandoned before completion")]
    Abandoned(Uuid),
}

pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    remote: Arc<dyn RemoteService>,
    queues: Mutex<PriorityQueues>,
    /// Held for the whole duration of an outbound call. The rate window
    /// lives inside it because only the in-flight call touches it.
    in_flight: Arc<tokio::sync::Mutex<RateWindow>>,
    metrics: DispatchMetrics,
    max_attempts: u32,
}

impl Dispatcher {
    pub fn new(remote: Arc<dyn RemoteService>, config: &DispatchConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                remote,
                queues: Mutex::new(PriorityQueues::default()),
                in_flight: Arc::new(tokio::sync::Mutex::new(RateWindow::new(config))),
                metrics: DispatchMetrics::default(),
                max_attempts: config.max_attempts.max(1),
            }),
        }
    }

    /// Queue a call and wait for its response.
    ///
    /// A response the remote kept throttling past the attempt bound is
    /// returned as-is; only transport failures surface as errors.
    ///
    /// # Cancellation
    ///
    /// Dropping the returned future withdraws only the caller's interest in
    /// the result. A submitted request is still issued, and a call this
    /// future was issuing on behalf of another caller runs to completion on
    /// its own task and answers that caller.
    pub async fn submit(
        &self,
        request: ApiRequest,
        priority: Priority,
    ) -> Result<RawResponse, DispatchError> {
        let (reply, mut rx) = oneshot::channel();
        let id = Uuid::new_v4();

        debug!(%id, %priority, request = %request, "queueing request");
        self.inner.queues().push(PendingRequest {
            id,
            request,
            priority,
            submitted_at: Instant::now(),
            reply,
        });

        loop {
            tokio::select! {
                biased;
                result = &mut rx => {
                    return result.unwrap_or(Err(DispatchError::Abandoned(id)));
                }
                window = self.inner.in_flight.clone().lock_owned() => {
                    let inner = Arc::clone(&self.inner);
                    let issuing = tokio::spawn(async move {
                        let mut window = window;
                        inner.fulfill_next(&mut window).await;
                    });
                    if let Err(e) = issuing.await {
                        warn!(error = %e, "issuing task failed");
                    }
                }
            }
        }
    }

    /// Number of requests waiting to be issued.
    pub fn queue_len(&self) -> usize {
        self.inner.queues().len()
    }

    pub fn metrics(&self) -> &DispatchMetrics {
        &self.inner.metrics
    }
}

impl Inner {
    fn queues(&self) -> MutexGuard<'_, PriorityQueues> {
        self.queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Issue the head of the highest non-empty queue. Caller holds the
    /// in-flight lock.
    async fn fulfill_next(&self, window: &mut RateWindow) {
        let Some(pending) = self.queues().pop() else {
            return;
        };

        debug!(
            id = %pending.id,
            priority = %pending.priority,
            request = %pending.request,
            queued_ms = pending.submitted_at.elapsed().as_millis() as u64,
            remaining = self.queues().len(),
            "issuing request"
        );

        let result = self.issue(window, &pending.request).await;
        // The submitter may have gone away; the call was still made.
        let _ = pending.reply.send(result);
    }

    async fn issue(
        &self,
        window: &mut RateWindow,
        request: &ApiRequest,
    ) -> Result<RawResponse, DispatchError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.metrics.record_attempt();

            pace(window).await;
            let result = self.remote.execute(request).await;
            window.record(Instant::now());
            let response = result?;

            if !response.is_throttled() {
                self.metrics.record_success();
                return Ok(response);
            }
            if attempt >= self.max_attempts {
                warn!(request = %request, attempts = attempt, "still throttled, giving up");
                return Ok(response);
            }
            debug!(request = %request, attempt, "throttled, retrying");
        }
    }
}

/// Block until the rate window admits another call.
async fn pace(window: &mut RateWindow) {
    loop {
        let wait = window.time_until_admitted(Instant::now());
        if wait.is_zero() {
            return;
        }
        debug!(wait_ms = wait.as_millis() as u64, "rate window saturated, pacing");
        tokio::time::sleep(wait).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::TOO_MANY_REQUESTS;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Records call order and the peak number of concurrent calls.
    #[derive(Default)]
    struct RecordingRemote {
        calls: Mutex<Vec<String>>,
        active: AtomicUsize,
        peak: AtomicUsize,
        /// Responses with this status before answering 200, per endpoint.
        throttle_first: Mutex<std::collections::HashMap<String, usize>>,
        /// When set, the first call blocks until notified.
        gate: Option<tokio::sync::Notify>,
        call_delay: Duration,
    }

    impl RecordingRemote {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl RemoteService for RecordingRemote {
        async fn execute(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);

            let first = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(request.endpoint.clone());
                calls.len() == 1
            };
            if first {
                if let Some(gate) = &self.gate {
                    gate.notified().await;
                }
            }
            if !self.call_delay.is_zero() {
                tokio::time::sleep(self.call_delay).await;
            }

            let throttled = {
                let mut throttle = self.throttle_first.lock().unwrap();
                match throttle.get_mut(&request.endpoint) {
                    Some(left) if *left > 0 => {
                        *left -= 1;
                        true
                    }
                    _ => false,
                }
            };

            self.active.fetch_sub(1, Ordering::SeqCst);
            if throttled {
                Ok(RawResponse::new(
                    TOO_MANY_REQUESTS,
                    json!({"error": {"code": 429, "message": "slow down"}}),
                ))
            } else {
                Ok(RawResponse::new(200, json!({"data": {"endpoint": request.endpoint}})))
            }
        }
    }

    fn generous() -> DispatchConfig {
        DispatchConfig {
            rate_limit: 1_000,
            burst_limit: 1_000,
            ..DispatchConfig::default()
        }
    }

    async fn wait_for_queue(dispatcher: &Dispatcher, len: usize) {
        while dispatcher.queue_len() < len {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_submit_returns_response() {
        let remote = Arc::new(RecordingRemote::default());
        let dispatcher = Dispatcher::new(remote.clone(), &generous());

        let response = dispatcher
            .submit(ApiRequest::get("status"), Priority::Normal)
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body["data"]["endpoint"], "status");
        assert_eq!(dispatcher.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_priority_major_fifo_minor_across_submitters() {
        let remote = Arc::new(RecordingRemote {
            gate: Some(tokio::sync::Notify::new()),
            ..RecordingRemote::default()
        });
        let dispatcher = Arc::new(Dispatcher::new(remote.clone(), &generous()));

        // Occupy the in-flight slot.
        let blocker = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .submit(ApiRequest::get("blocker"), Priority::Low)
                    .await
            })
        };
        while remote.calls().is_empty() {
            tokio::task::yield_now().await;
        }

        let submissions = [
            ("low-1", Priority::Low),
            ("normal-1", Priority::Normal),
            ("high-1", Priority::High),
            ("low-2", Priority::Low),
            ("high-2", Priority::High),
            ("normal-2", Priority::Normal),
        ];
        let mut handles = Vec::new();
        for (i, (endpoint, priority)) in submissions.into_iter().enumerate() {
            let task_dispatcher = dispatcher.clone();
            handles.push(tokio::spawn(async move {
                task_dispatcher.submit(ApiRequest::get(endpoint), priority).await
            }));
            wait_for_queue(&dispatcher, i + 1).await;
        }

        remote.gate.as_ref().unwrap().notify_one();
        blocker.await.unwrap().unwrap();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(
            remote.calls(),
            vec!["blocker", "high-1", "high-2", "normal-1", "normal-2", "low-1", "low-2"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_submitter_does_not_strand_other_callers() {
        let remote = Arc::new(RecordingRemote {
            call_delay: Duration::from_secs(10),
            ..RecordingRemote::default()
        });
        let dispatcher = Arc::new(Dispatcher::new(remote.clone(), &generous()));
        let submit = |endpoint: &'static str, priority: Priority| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.submit(ApiRequest::get(endpoint), priority).await })
        };

        let blocker = submit("blocker", Priority::Low);
        while remote.calls().is_empty() {
            tokio::task::yield_now().await;
        }

        // `low` waits on the in-flight lock first, so it is the one that
        // ends up issuing `high` once the blocker finishes.
        let low = submit("low", Priority::Low);
        wait_for_queue(&dispatcher, 1).await;
        let high = submit("high", Priority::High);
        wait_for_queue(&dispatcher, 2).await;

        while remote.calls().len() < 2 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(remote.calls(), vec!["blocker", "high"]);
        blocker.await.unwrap().unwrap();

        low.abort();
        assert!(low.await.unwrap_err().is_cancelled());

        let response = high.await.unwrap().unwrap();
        assert_eq!(response.body["data"]["endpoint"], "high");
        // The cancelled caller's own request is still queued.
        assert_eq!(dispatcher.queue_len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_at_most_one_call_in_flight() {
        let remote = Arc::new(RecordingRemote {
            call_delay: Duration::from_millis(2),
            ..RecordingRemote::default()
        });
        let dispatcher = Arc::new(Dispatcher::new(remote.clone(), &generous()));

        let mut handles = Vec::new();
        for i in 0..32 {
            let dispatcher = dispatcher.clone();
            let priority = match i % 3 {
                0 => Priority::High,
                1 => Priority::Normal,
                _ => Priority::Low,
            };
            handles.push(tokio::spawn(async move {
                dispatcher
                    .submit(ApiRequest::get(format!("call-{}", i)), priority)
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().status, 200);
        }

        assert_eq!(remote.calls().len(), 32);
        assert_eq!(remote.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_plus_burst_then_pacing() {
        let remote = Arc::new(RecordingRemote::default());
        let dispatcher = Dispatcher::new(remote.clone(), &DispatchConfig::default());

        let start = Instant::now();
        for i in 0..12 {
            dispatcher
                .submit(ApiRequest::get(format!("call-{}", i)), Priority::Normal)
                .await
                .unwrap();
        }
        // Twelve calls fit in sustained (2) plus burst (10) without sleeping.
        assert_eq!(start.elapsed(), Duration::ZERO);

        dispatcher
            .submit(ApiRequest::get("call-12"), Priority::Normal)
            .await
            .unwrap();
        // The thirteenth waits for the first sustained slot to free.
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(1), "waited {:?}", waited);
        assert!(waited < Duration::from_millis(1_010), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_calls_are_retried() {
        let remote = Arc::new(RecordingRemote::default());
        remote
            .throttle_first
            .lock()
            .unwrap()
            .insert("busy".to_string(), 3);
        let dispatcher = Dispatcher::new(remote.clone(), &DispatchConfig::default());

        let response = dispatcher
            .submit(ApiRequest::get("busy"), Priority::High)
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(remote.calls().len(), 4);

        let stats = dispatcher.metrics().lifetime();
        assert_eq!((stats.attempted, stats.succeeded), (4, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_return_last_response() {
        let remote = Arc::new(RecordingRemote::default());
        remote
            .throttle_first
            .lock()
            .unwrap()
            .insert("busy".to_string(), 100);
        let config = DispatchConfig {
            max_attempts: 3,
            ..DispatchConfig::default()
        };
        let dispatcher = Dispatcher::new(remote.clone(), &config);

        let response = dispatcher
            .submit(ApiRequest::get("busy"), Priority::Normal)
            .await
            .unwrap();
        assert_eq!(response.status, TOO_MANY_REQUESTS);
        assert_eq!(remote.calls().len(), 3);
        assert_eq!(dispatcher.metrics().lifetime().succeeded, 0);
    }

    #[tokio::test]
    async fn test_pacing_reset_scopes_counts() {
        let remote = Arc::new(RecordingRemote::default());
        let dispatcher = Dispatcher::new(remote.clone(), &generous());

        for _ in 0..3 {
            dispatcher
                .submit(ApiRequest::get(""), Priority::Low)
                .await
                .unwrap();
        }
        dispatcher.metrics().reset_pacing();
        dispatcher
            .submit(ApiRequest::get(""), Priority::Low)
            .await
            .unwrap();

        assert_eq!(dispatcher.metrics().lifetime().attempted, 4);
        assert_eq!(dispatcher.metrics().since_pacing_reset().attempted, 1);
    }
}
