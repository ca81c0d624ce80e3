use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::client::ComfyClient;
use crate::progress::ProgressSource;
use crate::types::{GenerationOutcome, ProgressUpdate};

/// Shared cancellation flag for an in-flight completion wait.
///
/// Clone it, hand a copy to the waiting task, and call
/// [`cancel`](Self::cancel) from anywhere else.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Internal wait state: Submitted until the first history miss confirms the
/// job is queued, Polling thereafter. Terminal states are the variants of
/// [`GenerationOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollPhase {
    Submitted,
    Polling,
}

/// Waits for a submitted prompt to complete.
///
/// The wait always terminates: presence of the prompt in `/history` is the
/// completion signal, and the caller's deadline and cancel flag bound the
/// loop. Transient network errors during a poll are logged and retried on
/// the next iteration; they never fail the wait.
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use comfy_conductor::{ComfyClient, CompletionPoller, ProgressSource};
///
/// # async fn example(client: &ComfyClient, prompt_id: &str) {
/// let poller = CompletionPoller::new(Duration::from_secs(300));
/// let mut progress = ProgressSource::socket(client, prompt_id).await;
/// let outcome = poller
///     .wait(client, prompt_id, &mut progress, |p| {
///         println!("step {}/{}", p.current_step, p.total_steps);
///     })
///     .await;
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CompletionPoller {
    poll_interval: Duration,
    deadline: Duration,
    cancel: CancelFlag,
}

impl CompletionPoller {
    /// Create a poller with the given completion deadline and a 2 s poll
    /// interval.
    pub fn new(deadline: Duration) -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            deadline,
            cancel: CancelFlag::new(),
        }
    }

    /// Override the interval between history polls.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Share an external cancel flag with this poller.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// A handle that cancels this poller's waits.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Poll `/history/{prompt_id}` until the prompt completes, the deadline
    /// elapses, or the cancel flag is raised. Progress samples between
    /// polls are advisory: their absence never blocks the wait.
    pub async fn wait<F>(
        &self,
        client: &ComfyClient,
        prompt_id: &str,
        progress: &mut ProgressSource,
        mut on_progress: F,
    ) -> GenerationOutcome
    where
        F: FnMut(ProgressUpdate),
    {
        let start = Instant::now();
        let mut phase = PollPhase::Submitted;

        loop {
            if self.cancel.is_cancelled() {
                // Best effort: stop the server-side work too.
                if let Err(e) = client.interrupt().await {
                    tracing::debug!("interrupt after cancellation failed: {e}");
                }
                return GenerationOutcome::Cancelled;
            }
            if start.elapsed() >= self.deadline {
                return GenerationOutcome::TimedOut;
            }

            match client.history(prompt_id).await {
                Ok(Some(record)) => {
                    if record.status == "error" && !record.completed {
                        return GenerationOutcome::Failed {
                            error: format!("ComfyUI reported a failed execution for {prompt_id}"),
                        };
                    }
                    return GenerationOutcome::Completed { record };
                }
                Ok(None) => {
                    if phase == PollPhase::Submitted {
                        phase = PollPhase::Polling;
                        tracing::debug!(prompt_id, "prompt queued, polling history");
                    }
                }
                Err(e) => {
                    tracing::debug!(prompt_id, "transient poll error, retrying: {e}");
                }
            }

            if let Some(update) = progress.sample().await {
                on_progress(update);
            }

            let remaining = self.deadline.saturating_sub(start.elapsed());
            tokio::time::sleep(self.poll_interval.min(remaining)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_client() -> ComfyClient {
        // Nothing listens on port 9; connections fail fast.
        ComfyClient::new("http://127.0.0.1:9")
    }

    #[test]
    fn test_cancel_flag_shared_across_clones() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn test_pre_cancelled_wait_returns_cancelled() {
        let poller = CompletionPoller::new(Duration::from_secs(60));
        poller.cancel_flag().cancel();
        let mut progress = ProgressSource::none();
        let outcome = poller
            .wait(&unreachable_client(), "abc", &mut progress, |_| {})
            .await;
        assert!(matches!(outcome, GenerationOutcome::Cancelled));
    }

    #[tokio::test]
    async fn test_zero_deadline_times_out() {
        let poller = CompletionPoller::new(Duration::ZERO);
        let mut progress = ProgressSource::none();
        let outcome = poller
            .wait(&unreachable_client(), "abc", &mut progress, |_| {})
            .await;
        assert!(matches!(outcome, GenerationOutcome::TimedOut));
    }

    #[tokio::test]
    async fn test_transient_errors_are_swallowed_until_deadline() {
        let poller = CompletionPoller::new(Duration::from_millis(300))
            .with_poll_interval(Duration::from_millis(50));
        let mut progress = ProgressSource::none();
        let outcome = poller
            .wait(&unreachable_client(), "abc", &mut progress, |_| {})
            .await;
        // The unreachable server produces errors every poll; the wait still
        // terminates at the deadline instead of surfacing them.
        assert!(matches!(outcome, GenerationOutcome::TimedOut));
    }

    #[tokio::test]
    async fn test_mid_wait_cancellation() {
        let poller = CompletionPoller::new(Duration::from_secs(30))
            .with_poll_interval(Duration::from_millis(20));
        let cancel = poller.cancel_flag();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            cancel.cancel();
        });
        let mut progress = ProgressSource::none();
        let outcome = poller
            .wait(&unreachable_client(), "abc", &mut progress, |_| {})
            .await;
        assert!(matches!(outcome, GenerationOutcome::Cancelled));
    }
}
