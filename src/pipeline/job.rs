//! Jobs: handles to long-running device operations.
//!
//! An action that starts something the device finishes later (a sweep, a slow
//! ramp, a self test) returns a [`Job`] instead of blocking. The job knows how to
//! ask the device whether it is done and how to fetch the result. It does not hold
//! the driver session between polls, so other features stay usable meanwhile.
//!
//! A job is consumed by [`Job::wait`], [`Job::poll`] returning `Ready`, or
//! [`Job::cancel`], so its result is extracted at most once.

use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{DriverError, DriverResult};
use crate::node::Node;
use crate::pipeline::scope::StepScope;
use crate::pipeline::steps::StepChain;
use crate::value::Value;

/// Completion predicate of a job.
pub type JobCondition =
    dyn for<'a> Fn(StepScope<'a>) -> BoxFuture<'a, DriverResult<bool>> + Send + Sync;

/// Result extractor of a job.
pub type JobResult = dyn for<'a> Fn(StepScope<'a>) -> BoxFuture<'a, DriverResult<Value>> + Send + Sync;

/// Cancellation routine of a job.
pub type JobCancel = dyn for<'a> Fn(StepScope<'a>) -> BoxFuture<'a, DriverResult<()>> + Send + Sync;

/// Predicate checked between polls that aborts a wait when it returns true.
pub type BreakCondition = Arc<dyn Fn() -> bool + Send + Sync>;

/// How long and how often [`Job::wait`] polls.
///
/// Unset fields fall back to the driver's job settings.
#[derive(Clone, Default)]
pub struct WaitOptions {
    pub timeout: Option<Duration>,
    pub refresh: Option<Duration>,
    pub break_condition: Option<BreakCondition>,
}

impl WaitOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn refresh(mut self, refresh: Duration) -> Self {
        self.refresh = Some(refresh);
        self
    }

    pub fn break_when<F>(mut self, condition: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.break_condition = Some(Arc::new(condition));
        self
    }
}

/// Outcome of a single [`Job::poll`].
#[derive(Debug)]
pub enum JobPoll {
    Ready(Value),
    Pending(Job),
}

/// An in-flight device operation.
pub struct Job {
    node: Node,
    action: String,
    expected: Duration,
    started: Instant,
    condition: Arc<JobCondition>,
    result: Option<Arc<JobResult>>,
    cancel: Option<Arc<JobCancel>>,
    post_call: StepChain<Value>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("node", &self.node.path())
            .field("action", &self.action)
            .field("expected", &self.expected)
            .field("elapsed", &self.started.elapsed())
            .finish()
    }
}

impl Job {
    /// A job on `node` expected to last about `expected`, done once `condition` holds.
    pub fn new<F>(node: &Node, action: &str, expected: Duration, condition: F) -> Self
    where
        F: for<'a> Fn(StepScope<'a>) -> BoxFuture<'a, DriverResult<bool>> + Send + Sync + 'static,
    {
        Self {
            node: node.clone(),
            action: action.to_string(),
            expected,
            started: Instant::now(),
            condition: Arc::new(condition),
            result: None,
            cancel: None,
            post_call: StepChain::new(),
        }
    }

    pub fn with_result<F>(mut self, extractor: F) -> Self
    where
        F: for<'a> Fn(StepScope<'a>) -> BoxFuture<'a, DriverResult<Value>> + Send + Sync + 'static,
    {
        self.result = Some(Arc::new(extractor));
        self
    }

    pub fn with_cancel<F>(mut self, cancel: F) -> Self
    where
        F: for<'a> Fn(StepScope<'a>) -> BoxFuture<'a, DriverResult<()>> + Send + Sync + 'static,
    {
        self.cancel = Some(Arc::new(cancel));
        self
    }

    pub(crate) fn with_post_call(mut self, chain: StepChain<Value>) -> Self {
        self.post_call = chain;
        self
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn expected_duration(&self) -> Duration {
        self.expected
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Ask the device whether the operation finished.
    pub async fn is_complete(&self) -> DriverResult<bool> {
        let mut session = self.node.session().await;
        let scope = StepScope::new(&self.node, &mut session);
        (self.condition)(scope).await
    }

    /// One completion check; extracts the result if the job is done.
    pub async fn poll(self) -> DriverResult<JobPoll> {
        if self.is_complete().await? {
            Ok(JobPoll::Ready(self.finish().await?))
        } else {
            Ok(JobPoll::Pending(self))
        }
    }

    async fn finish(self) -> DriverResult<Value> {
        let mut session = self.node.session().await;
        let mut scope = StepScope::new(&self.node, &mut session);
        let raw = match &self.result {
            Some(extract) => extract(scope.reborrow()).await?,
            None => Value::Null,
        };
        let value = self.post_call.run(&mut scope, raw).await?;
        info!(node = %self.node.path(), action = %self.action, elapsed = ?self.elapsed(), "job completed");
        Ok(value)
    }

    /// Wait for completion, then extract the result.
    ///
    /// Sleeps through the expected duration first, then polls every `refresh`.
    /// A break condition that fires cancels the job.
    pub async fn wait(self, options: WaitOptions) -> DriverResult<Value> {
        let settings = self.node.settings().clone();
        let timeout = options.timeout.unwrap_or_else(|| settings.job_timeout());
        let refresh = options
            .refresh
            .unwrap_or_else(|| settings.job_poll_interval())
            .max(Duration::from_millis(1));
        let deadline = self.started + timeout;
        let broken = || options.break_condition.as_ref().is_some_and(|stop| stop());

        let settle = self.started + self.expected.min(timeout);
        while Instant::now() < settle {
            if broken() {
                return self.abort().await;
            }
            tokio::time::sleep(refresh.min(settle.saturating_duration_since(Instant::now()))).await;
        }

        loop {
            if broken() {
                return self.abort().await;
            }
            if self.is_complete().await? {
                return self.finish().await;
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(action = %self.action, "job timed out");
                return Err(DriverError::JobTimeout {
                    action: self.action,
                    timeout,
                });
            }
            tokio::time::sleep(refresh.min(deadline.saturating_duration_since(now))).await;
        }
    }

    /// Stop the operation on the device.
    pub async fn cancel(self) -> DriverResult<()> {
        if let Some(cancel) = &self.cancel {
            let mut session = self.node.session().await;
            cancel(StepScope::new(&self.node, &mut session)).await?;
        }
        info!(node = %self.node.path(), action = %self.action, "job cancelled");
        Ok(())
    }

    async fn abort(self) -> DriverResult<Value> {
        let action = self.action.clone();
        self.cancel().await?;
        Err(DriverError::JobCancelled(action))
    }
}
