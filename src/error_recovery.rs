//! Retry-and-reconnect recovery.
//!
//! When a pipeline stage fails with a transport-classified error the whole staged
//! sequence is retried after the link has been recovered. [`RetryState`] keeps the
//! bookkeeping for one pipeline invocation: how many attempts are left and the
//! chain of causes collected so far.

use async_trait::async_trait;
use tracing::warn;

use crate::error::{DriverError, DriverResult};

/// Defines a policy for retrying an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub retries: u32,
    /// Whether device-reported operation failures are retried like link failures.
    pub retry_operation_failures: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 0,
            retry_operation_failures: true,
        }
    }
}

/// Something whose link can be re-established between attempts.
#[async_trait]
pub trait Recoverable {
    async fn recover(&mut self) -> DriverResult<()>;
}

/// Attempt bookkeeping for one feature or action invocation.
#[derive(Debug)]
pub struct RetryState<'a> {
    attribute: &'a str,
    policy: RetryPolicy,
    causes: Vec<DriverError>,
}

impl<'a> RetryState<'a> {
    pub fn new(attribute: &'a str, policy: RetryPolicy) -> Self {
        Self {
            attribute,
            policy,
            causes: Vec::new(),
        }
    }

    /// Number of failed attempts so far.
    pub fn failures(&self) -> usize {
        self.causes.len()
    }

    /// Decide what happens after a failed attempt.
    ///
    /// Returns `Ok(())` when the caller should run the sequence again, after the
    /// link was recovered. Errors that are not transport-classified are returned
    /// untouched; an exhausted budget or a failed recovery ends in
    /// `CommunicationFailed` carrying every cause.
    pub async fn on_failure<R>(&mut self, link: &mut R, err: DriverError) -> DriverResult<()>
    where
        R: Recoverable + Send + ?Sized,
    {
        if !err.is_transport_class(self.policy.retry_operation_failures) {
            return Err(err);
        }
        self.causes.push(err);
        if self.causes.len() > self.policy.retries as usize {
            return Err(self.exhausted());
        }
        warn!(
            attribute = self.attribute,
            attempt = self.causes.len(),
            retries = self.policy.retries,
            "transport failure, recovering before retry"
        );
        if let Err(recover_err) = link.recover().await {
            self.causes.push(recover_err);
            return Err(self.exhausted());
        }
        Ok(())
    }

    fn exhausted(&mut self) -> DriverError {
        DriverError::CommunicationFailed {
            attribute: self.attribute.to_string(),
            causes: std::mem::take(&mut self.causes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct MockRecoverable {
        recoveries: u32,
        fail_recovery: bool,
    }

    #[async_trait]
    impl Recoverable for MockRecoverable {
        async fn recover(&mut self) -> DriverResult<()> {
            self.recoveries += 1;
            if self.fail_recovery {
                Err(TransportError::NotConnected.into())
            } else {
                Ok(())
            }
        }
    }

    fn link_error() -> DriverError {
        TransportError::Link("cable unplugged".into()).into()
    }

    #[tokio::test]
    async fn test_retry_logic_succeeds() {
        let mut link = MockRecoverable::default();
        let policy = RetryPolicy {
            retries: 2,
            ..Default::default()
        };
        let mut state = RetryState::new("voltage", policy);
        assert!(state.on_failure(&mut link, link_error()).await.is_ok());
        assert!(state.on_failure(&mut link, link_error()).await.is_ok());
        assert_eq!(link.recoveries, 2);
        assert_eq!(state.failures(), 2);
    }

    #[tokio::test]
    async fn test_retry_logic_fails() {
        let mut link = MockRecoverable::default();
        let policy = RetryPolicy {
            retries: 1,
            ..Default::default()
        };
        let mut state = RetryState::new("voltage", policy);
        state.on_failure(&mut link, link_error()).await.unwrap();
        let err = state.on_failure(&mut link, link_error()).await.unwrap_err();
        assert!(matches!(err, DriverError::CommunicationFailed { .. }));
        assert_eq!(err.causes().len(), 2);
        assert_eq!(link.recoveries, 1);
    }

    #[tokio::test]
    async fn test_validation_errors_pass_through() {
        let mut link = MockRecoverable::default();
        let mut state = RetryState::new("mode", RetryPolicy::default());
        let err = state
            .on_failure(&mut link, DriverError::invalid_argument("mode", "bad"))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::InvalidArgument { .. }));
        assert_eq!(link.recoveries, 0);
    }

    #[tokio::test]
    async fn test_failed_recovery_is_terminal() {
        let mut link = MockRecoverable {
            fail_recovery: true,
            ..Default::default()
        };
        let policy = RetryPolicy {
            retries: 5,
            ..Default::default()
        };
        let mut state = RetryState::new("voltage", policy);
        let err = state.on_failure(&mut link, link_error()).await.unwrap_err();
        let causes = err.causes();
        assert_eq!(causes.len(), 2);
        assert!(matches!(
            causes[1],
            DriverError::Transport(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_operation_failures_can_opt_out() {
        let mut link = MockRecoverable::default();
        let policy = RetryPolicy {
            retries: 3,
            retry_operation_failures: false,
        };
        let mut state = RetryState::new("voltage", policy);
        let err = DriverError::OperationFailed {
            attribute: "voltage".into(),
            details: "-222".into(),
        };
        assert!(matches!(
            state.on_failure(&mut link, err).await,
            Err(DriverError::OperationFailed { .. })
        ));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_recovery_is_logged() {
        let mut link = MockRecoverable::default();
        let policy = RetryPolicy {
            retries: 1,
            ..Default::default()
        };
        let mut state = RetryState::new("current", policy);
        state.on_failure(&mut link, link_error()).await.unwrap();
        assert!(logs_contain("recovering before retry"));
        assert!(logs_contain("current"));
    }
}
