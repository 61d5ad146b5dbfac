//! Pipeline watcher
//!
//! Waiting on a pipeline is split into a pure state machine ([`WatchState`]) that
//! classifies each observation and does attempt accounting, and an async driver
//! ([`PipelineWatcher`]) that polls the platform and sleeps between polls.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::HandoverConfig;
use crate::platform::{PipelineStatus, PlatformError, Project, RepositoryClient};

/// How often and how many times to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_attempts: 30,
        }
    }
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Enough attempts to cover `timeout` at `interval` spacing, rounding up.
    pub fn from_timeout(timeout: Duration, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            Duration::from_secs(1)
        } else {
            interval
        };
        let attempts = timeout.as_millis().div_ceil(interval.as_millis());
        Self::new(interval, u32::try_from(attempts).unwrap_or(u32::MAX))
    }
}

impl From<&HandoverConfig> for PollPolicy {
    fn from(config: &HandoverConfig) -> Self {
        Self::new(Duration::from_secs(config.poll_interval_seconds), config.max_attempts)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Success,
    Failed(PipelineStatus),
    TimedOut,
}

/// What a single observation means for the wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Success,
    Failed(PipelineStatus),
}

/// Classify one poll result. Errors mean "status unknown" and never end the wait.
pub fn classify(observation: &Result<PipelineStatus, PlatformError>) -> Verdict {
    match observation {
        Ok(PipelineStatus::Success) => Verdict::Success,
        Ok(status @ (PipelineStatus::Failed | PipelineStatus::Canceled)) => Verdict::Failed(status.clone()),
        Ok(_) | Err(_) => Verdict::Continue,
    }
}

/// Attempt accounting for one wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchState {
    Polling { attempt: u32 },
    Done(PipelineOutcome),
}

/// Next step after an observation has been recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Sleep, then poll again as `attempt`.
    PollAgain { attempt: u32 },
    Finished(PipelineOutcome),
}

impl WatchState {
    pub fn start() -> Self {
        WatchState::Polling { attempt: 1 }
    }

    /// Fold one observation into the state.
    pub fn observe(&self, verdict: Verdict, policy: &PollPolicy) -> (WatchState, Step) {
        let attempt = match self {
            WatchState::Polling { attempt } => *attempt,
            WatchState::Done(outcome) => {
                return (self.clone(), Step::Finished(outcome.clone()));
            }
        };

        let finished = |outcome: PipelineOutcome| (WatchState::Done(outcome.clone()), Step::Finished(outcome));

        match verdict {
            Verdict::Success => finished(PipelineOutcome::Success),
            Verdict::Failed(status) => finished(PipelineOutcome::Failed(status)),
            Verdict::Continue if attempt >= policy.max_attempts => finished(PipelineOutcome::TimedOut),
            Verdict::Continue => {
                let next = attempt + 1;
                (WatchState::Polling { attempt: next }, Step::PollAgain { attempt: next })
            }
        }
    }
}

/// Blocks on pipeline completion by polling the platform.
#[derive(Clone)]
pub struct PipelineWatcher {
    client: Arc<dyn RepositoryClient>,
}

impl PipelineWatcher {
    pub fn new(client: Arc<dyn RepositoryClient>) -> Self {
        Self { client }
    }

    pub async fn await_success(&self, project: &Project, pipeline_id: u64, policy: &PollPolicy) -> PipelineOutcome {
        info!(
            project = %project,
            pipeline_id,
            interval_secs = policy.interval.as_secs(),
            max_attempts = policy.max_attempts,
            "Waiting for pipeline"
        );

        let mut state = WatchState::start();
        loop {
            let attempt = match &state {
                WatchState::Polling { attempt } => *attempt,
                WatchState::Done(outcome) => return outcome.clone(),
            };

            let observation = self
                .client
                .get_pipeline(project, pipeline_id)
                .await
                .map(|pipeline| pipeline.status);

            match &observation {
                Ok(status) => debug!(pipeline_id, attempt, %status, "pipeline polled"),
                Err(err) => warn!(pipeline_id, attempt, error = %err, "pipeline status unknown"),
            }

            let (next, step) = state.observe(classify(&observation), policy);
            state = next;

            match step {
                Step::PollAgain { attempt: next } => {
                    debug!(pipeline_id, next_attempt = next, "sleeping before next poll");
                    tokio::time::sleep(policy.interval).await;
                }
                Step::Finished(outcome) => {
                    match &outcome {
                        PipelineOutcome::Success => info!(pipeline_id, attempt, "Pipeline succeeded"),
                        PipelineOutcome::Failed(status) => {
                            error!(pipeline_id, attempt, %status, "Pipeline finished unsuccessfully")
                        }
                        PipelineOutcome::TimedOut => {
                            warn!(pipeline_id, attempts = attempt, "Timed out waiting for pipeline")
                        }
                    }
                    return outcome;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mocks::{InMemoryPlatform, PlatformCommand};
    use crate::platform::{MockRepositoryClient, Pipeline};
    use mockall::predicate::eq;

    fn policy(attempts: u32) -> PollPolicy {
        PollPolicy::new(Duration::from_secs(30), attempts)
    }

    fn project() -> Project {
        Project::new("101")
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify(&Ok(PipelineStatus::Success)), Verdict::Success);
        assert_eq!(
            classify(&Ok(PipelineStatus::Canceled)),
            Verdict::Failed(PipelineStatus::Canceled)
        );
        assert_eq!(classify(&Ok(PipelineStatus::Manual)), Verdict::Continue);
        assert_eq!(classify(&Ok(PipelineStatus::Unknown("blocked".into()))), Verdict::Continue);
        assert_eq!(classify(&Err(PlatformError::transport("get pipeline", "reset"))), Verdict::Continue);
    }

    #[test]
    fn test_state_machine_times_out_on_last_attempt_without_extra_poll() {
        let policy = policy(2);
        let (state, step) = WatchState::start().observe(Verdict::Continue, &policy);
        assert_eq!(step, Step::PollAgain { attempt: 2 });

        let (state, step) = state.observe(Verdict::Continue, &policy);
        assert_eq!(step, Step::Finished(PipelineOutcome::TimedOut));
        assert_eq!(state, WatchState::Done(PipelineOutcome::TimedOut));
    }

    #[test]
    fn test_done_state_is_absorbing() {
        let done = WatchState::Done(PipelineOutcome::Success);
        let (state, step) = done.observe(Verdict::Failed(PipelineStatus::Failed), &policy(3));
        assert_eq!(state, done);
        assert_eq!(step, Step::Finished(PipelineOutcome::Success));
    }

    #[test]
    fn test_policy_from_timeout_rounds_up() {
        let policy = PollPolicy::from_timeout(Duration::from_secs(95), Duration::from_secs(30));
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(PollPolicy::from_timeout(Duration::ZERO, Duration::from_secs(30)).max_attempts, 1);
        assert_eq!(PollPolicy::default().max_attempts, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_success_poll() {
        let platform = Arc::new(InMemoryPlatform::new().with_pipeline_statuses("101", 7, &["pending", "running", "success"]));
        let watcher = PipelineWatcher::new(platform.clone());

        let started = tokio::time::Instant::now();
        let outcome = watcher.await_success(&project(), 7, &policy(30)).await;

        assert_eq!(outcome, PipelineOutcome::Success);
        assert_eq!(started.elapsed(), Duration::from_secs(60));
        let polls = platform
            .executed_commands()
            .into_iter()
            .filter(|c| matches!(c, PlatformCommand::GetPipeline { .. }))
            .count();
        assert_eq!(polls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_ends_wait_immediately() {
        let mut client = MockRepositoryClient::new();
        client
            .expect_get_pipeline()
            .with(eq(project()), eq(9))
            .times(1)
            .returning(|_, id| {
                Ok(Pipeline {
                    id,
                    status: PipelineStatus::Failed,
                    git_ref: None,
                    web_url: None,
                    created_at: None,
                })
            });

        let outcome = PipelineWatcher::new(Arc::new(client))
            .await_success(&project(), 9, &policy(30))
            .await;
        assert_eq!(outcome, PipelineOutcome::Failed(PipelineStatus::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_consume_attempts_until_timeout() {
        let platform = Arc::new(InMemoryPlatform::new().with_pipeline_script(
            "101",
            3,
            vec![
                Err(PlatformError::transport("get pipeline", "reset")),
                Ok(PipelineStatus::Running),
            ],
        ));
        let watcher = PipelineWatcher::new(platform);

        let started = tokio::time::Instant::now();
        let outcome = watcher.await_success(&project(), 3, &policy(3)).await;

        assert_eq!(outcome, PipelineOutcome::TimedOut);
        // two sleeps between three polls, none after the last
        assert_eq!(started.elapsed(), Duration::from_secs(60));
    }
}
