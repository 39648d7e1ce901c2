//! Converging local premium entitlement with the billing backend after a
//! payment event (checkout, cancel, reactivate).
//!
//! The backend learns about payments from an asynchronous webhook, so right
//! after checkout the session's roles and the remote subscription record may
//! both still say "free". [`Reconciler`] polls until either one reports
//! premium, or gives up after its attempt budget.

use async_trait::async_trait;
use chrono::Utc;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::error::ClientResult;
use crate::subscription::{is_active, SubscriptionOracle};

pub const FULL_POLL_ATTEMPTS: u32 = 6;
pub const MANUAL_POLL_ATTEMPTS: u32 = 3;
pub const FIRST_CHECK_DELAY: Duration = Duration::from_secs(2);
pub const RECHECK_DELAY: Duration = Duration::from_secs(5);

/// Session operations the loop drives. None of them may fail past their
/// own boundary; they report success as a boolean.
#[async_trait]
pub trait EntitlementSession: Send + Sync {
    fn is_premium(&self) -> bool;
    fn has_refresh_token(&self) -> bool;
    async fn refresh_profile(&self) -> bool;
    async fn refresh_access_token(&self) -> bool;
    async fn refresh_after_subscription_change(&self, poll_for_changes: bool, max_attempts: u32) -> bool;
}

/// Attempt budget and delay schedule for [`poll_until`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Wait before the first attempt
    pub first_delay: Duration,
    /// Wait before every later attempt
    pub delay: Duration,
    /// Keep going after an attempt that completed without confirming.
    /// Failed attempts are always retried while budget remains.
    pub retry_pending: bool,
}

impl RetryPolicy {
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 { self.first_delay } else { self.delay }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: FULL_POLL_ATTEMPTS,
            first_delay: FIRST_CHECK_DELAY,
            delay: RECHECK_DELAY,
            retry_pending: true,
        }
    }
}

/// How a single attempt went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome<T> {
    Confirmed(T),
    Pending,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Confirmed { value: T, attempts: u32, elapsed: Duration },
    /// A pending attempt under a policy that does not retry pending results
    Stopped { attempts: u32 },
    Exhausted { attempts: u32 },
}

/// Run `attempt` until it confirms or the policy's budget runs out,
/// sleeping per the policy's schedule before every attempt.
/// `before_attempt` fires ahead of each sleep.
pub async fn poll_until<T, B, F, Fut>(policy: &RetryPolicy, mut before_attempt: B, mut attempt: F) -> PollOutcome<T>
where
    B: FnMut(u32),
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AttemptOutcome<T>>,
{
    let started = Instant::now();
    for n in 1..=policy.max_attempts {
        before_attempt(n);
        sleep(policy.delay_before(n)).await;
        match attempt(n).await {
            AttemptOutcome::Confirmed(value) => {
                return PollOutcome::Confirmed {
                    value,
                    attempts: n,
                    elapsed: started.elapsed(),
                };
            }
            AttemptOutcome::Pending if !policy.retry_pending => return PollOutcome::Stopped { attempts: n },
            AttemptOutcome::Pending | AttemptOutcome::Failed => {}
        }
    }
    PollOutcome::Exhausted {
        attempts: policy.max_attempts,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub poll_for_changes: bool,
    pub max_attempts: u32,
}

impl ReconcileOptions {
    /// After checkout: poll up to six times.
    pub fn full() -> Self {
        Self {
            poll_for_changes: true,
            max_attempts: FULL_POLL_ATTEMPTS,
        }
    }

    /// One check, no polling.
    pub fn quick() -> Self {
        Self {
            poll_for_changes: false,
            max_attempts: 1,
        }
    }

    pub fn manual() -> Self {
        Self {
            poll_for_changes: true,
            max_attempts: MANUAL_POLL_ATTEMPTS,
        }
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            retry_pending: self.poll_for_changes,
            ..RetryPolicy::default()
        }
    }
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self::full()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Premium is active locally or remotely
    Confirmed { attempts: u32, elapsed: Duration },
    /// Single-shot run finished its check(s) without seeing premium
    Unconfirmed { attempts: u32 },
    /// Polling ran out of attempts
    Exhausted { attempts: u32 },
    /// Another run was in flight
    AlreadyRunning,
}

impl ReconcileOutcome {
    /// Whether the operation did what it promised. A single-shot run counts
    /// as a success even when premium was not seen; use
    /// [`premium_confirmed`](Self::premium_confirmed) for entitlement.
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Confirmed { .. } | Self::Unconfirmed { .. })
    }

    pub fn premium_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }
}

pub type ProgressFn<'a> = &'a (dyn Fn(u32, u32) + Send + Sync);

/// Polls subscription state after a payment event. One run at a time.
pub struct Reconciler {
    oracle: Arc<dyn SubscriptionOracle>,
    session: Arc<dyn EntitlementSession>,
    in_flight: AtomicBool,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Reconciler {
    pub fn new(oracle: Arc<dyn SubscriptionOracle>, session: Arc<dyn EntitlementSession>) -> Self {
        Self {
            oracle,
            session,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub async fn refresh_after_payment(&self, options: ReconcileOptions) -> bool {
        self.run(options, None).await.succeeded()
    }

    pub async fn quick_refresh(&self) -> bool {
        self.run(ReconcileOptions::quick(), None).await.succeeded()
    }

    /// Three polls with human-readable progress messages.
    pub async fn manual_refresh(&self, on_message: Option<&(dyn Fn(&str) + Send + Sync)>) -> bool {
        let say = |message: &str| {
            if let Some(f) = on_message {
                f(message)
            }
        };
        say("Checking subscription status...");

        let progress = |attempt: u32, max: u32| say(&format!("Checking subscription status... ({attempt}/{max})"));
        let success = self.run(ReconcileOptions::manual(), Some(&progress)).await.succeeded();

        say(if success {
            "Subscription status updated!"
        } else {
            "Unable to confirm subscription status"
        });
        success
    }

    pub async fn run(&self, options: ReconcileOptions, progress: Option<ProgressFn<'_>>) -> ReconcileOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("Refresh already in progress, skipping");
            return ReconcileOutcome::AlreadyRunning;
        }
        let _guard = InFlight(&self.in_flight);

        let max_attempts = options.max_attempts;
        let announce = |attempt: u32| {
            if let Some(report) = progress {
                report(attempt, max_attempts);
            }
            info!(attempt, max_attempts, "Subscription refresh attempt");
        };
        let outcome = poll_until(&options.policy(), announce, |attempt| async move {
            match self.check_premium().await {
                Ok(true) => AttemptOutcome::Confirmed(()),
                Ok(false) => {
                    if options.poll_for_changes {
                        info!("Premium status not yet active, retrying...");
                    }
                    AttemptOutcome::Pending
                }
                Err(e) => {
                    error!(attempt, error = %e, "Error during refresh attempt");
                    if !self.session.refresh_after_subscription_change(false, 1).await {
                        warn!("Fallback refresh also failed");
                    }
                    AttemptOutcome::Failed
                }
            }
        })
        .await;

        match outcome {
            PollOutcome::Confirmed { attempts, elapsed, .. } => {
                info!(attempts, elapsed_secs = elapsed.as_secs_f64(), "Premium status confirmed");
                ReconcileOutcome::Confirmed { attempts, elapsed }
            }
            PollOutcome::Stopped { attempts } => ReconcileOutcome::Unconfirmed { attempts },
            PollOutcome::Exhausted { attempts } if !options.poll_for_changes => {
                ReconcileOutcome::Unconfirmed { attempts }
            }
            PollOutcome::Exhausted { attempts } => {
                warn!(attempts, "Premium status not activated after {} attempts", attempts);
                ReconcileOutcome::Exhausted { attempts }
            }
        }
    }

    /// Remote resync, then local profile and token refresh; premium if
    /// either side says so.
    async fn check_premium(&self) -> ClientResult<bool> {
        let status = self.oracle.refresh_status().await?;

        self.session.refresh_profile().await;
        if self.session.has_refresh_token() {
            self.session.refresh_access_token().await;
        }

        Ok(self.session.is_premium() || is_active(&status, Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::models::{Subscription, SubscriptionState, SubscriptionStatus};
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    /// Scripted oracle: answers `refresh_status` from a queue and records
    /// when each call happened. An empty queue answers "inactive".
    #[derive(Default)]
    struct FakeOracle {
        script: Mutex<Vec<Result<bool, String>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl FakeOracle {
        fn scripted(script: Vec<Result<bool, String>>) -> Arc<Self> {
            let mut script = script;
            script.reverse();
            Arc::new(Self {
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn status(active: bool) -> SubscriptionStatus {
        let now = Utc::now();
        SubscriptionStatus {
            has_subscription: active,
            subscription: active.then(|| Subscription {
                id: "sub_1".to_string(),
                status: SubscriptionState::Active,
                current_period_start: now,
                current_period_end: now + ChronoDuration::days(30),
                cancel_at_period_end: false,
                canceled_at: None,
                ended_at: None,
            }),
            message: None,
        }
    }

    #[async_trait]
    impl SubscriptionOracle for FakeOracle {
        async fn fetch_status(&self) -> ClientResult<SubscriptionStatus> {
            Ok(status(false))
        }

        async fn refresh_status(&self) -> ClientResult<SubscriptionStatus> {
            self.calls.lock().unwrap().push(Instant::now());
            match self.script.lock().unwrap().pop() {
                Some(Ok(active)) => Ok(status(active)),
                Some(Err(message)) => Err(ClientError::RemoteUnavailable(message)),
                None => Ok(status(false)),
            }
        }
    }

    #[derive(Default)]
    struct FakeSession {
        premium: AtomicBool,
        refresh_token: bool,
        profile_refreshes: AtomicU32,
        token_refreshes: AtomicU32,
        fallbacks: AtomicU32,
    }

    #[async_trait]
    impl EntitlementSession for FakeSession {
        fn is_premium(&self) -> bool {
            self.premium.load(Ordering::SeqCst)
        }

        fn has_refresh_token(&self) -> bool {
            self.refresh_token
        }

        async fn refresh_profile(&self) -> bool {
            self.profile_refreshes.fetch_add(1, Ordering::SeqCst);
            true
        }

        async fn refresh_access_token(&self) -> bool {
            self.token_refreshes.fetch_add(1, Ordering::SeqCst);
            true
        }

        async fn refresh_after_subscription_change(&self, _poll: bool, _max_attempts: u32) -> bool {
            self.fallbacks.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    /// Whole seconds between consecutive calls. The timer wheel may round a
    /// deadline up to the next millisecond.
    fn gaps(start: Instant, calls: &[Instant]) -> Vec<u64> {
        let mut previous = start;
        calls
            .iter()
            .map(|t| {
                let gap = *t - previous;
                previous = *t;
                secs(gap)
            })
            .collect()
    }

    fn secs(d: Duration) -> u64 {
        d.as_secs_f64().round() as u64
    }

    #[tokio::test(start_paused = true)]
    async fn test_quick_refresh_reports_success_without_premium() {
        let oracle = FakeOracle::scripted(vec![]);
        let session = Arc::new(FakeSession::default());
        let reconciler = Reconciler::new(oracle.clone(), session.clone());

        let start = Instant::now();
        let outcome = reconciler.run(ReconcileOptions::quick(), None).await;

        assert_eq!(outcome, ReconcileOutcome::Unconfirmed { attempts: 1 });
        assert!(outcome.succeeded());
        assert!(!outcome.premium_confirmed());
        assert_eq!(gaps(start, &oracle.call_times()), vec![2]);
        assert!(!session.is_premium());
        assert!(!reconciler.is_running());

        assert!(reconciler.quick_refresh().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_poll_confirms_on_third_attempt() {
        let oracle = FakeOracle::scripted(vec![Ok(false), Ok(false), Ok(true)]);
        let session = Arc::new(FakeSession {
            refresh_token: true,
            ..Default::default()
        });
        let reconciler = Reconciler::new(oracle.clone(), session.clone());

        let start = Instant::now();
        let outcome = reconciler.run(ReconcileOptions::full(), None).await;

        let ReconcileOutcome::Confirmed { attempts, elapsed } = outcome else {
            panic!("expected confirmation, got {outcome:?}");
        };
        assert_eq!(attempts, 3);
        assert_eq!(secs(elapsed), 12);
        assert_eq!(gaps(start, &oracle.call_times()), vec![2, 5, 5]);
        assert_eq!(session.profile_refreshes.load(Ordering::SeqCst), 3);
        assert_eq!(session.token_refreshes.load(Ordering::SeqCst), 3);
        assert!(!reconciler.is_running());

        // flag cleared: a new run is accepted
        let again = reconciler.run(ReconcileOptions::quick(), None).await;
        assert_ne!(again, ReconcileOutcome::AlreadyRunning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_premium_confirms_even_if_remote_lags() {
        let oracle = FakeOracle::scripted(vec![]);
        let session = Arc::new(FakeSession::default());
        session.premium.store(true, Ordering::SeqCst);
        let reconciler = Reconciler::new(oracle, session.clone());

        let outcome = reconciler.run(ReconcileOptions::full(), None).await;
        assert!(matches!(outcome, ReconcileOutcome::Confirmed { attempts: 1, .. }));
        assert_eq!(session.token_refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_polling_fails() {
        let oracle = FakeOracle::scripted(vec![]);
        let session = Arc::new(FakeSession::default());
        let reconciler = Reconciler::new(oracle.clone(), session);

        let start = Instant::now();
        assert!(!reconciler.refresh_after_payment(ReconcileOptions::full()).await);
        assert_eq!(oracle.call_times().len(), 6);
        assert_eq!(secs(Instant::now() - start), 2 + 5 * 5);
        assert!(!reconciler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_run_is_rejected_without_network() {
        let oracle = FakeOracle::scripted(vec![Ok(true)]);
        let session = Arc::new(FakeSession::default());
        let reconciler = Arc::new(Reconciler::new(oracle.clone(), session));

        let first = {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.run(ReconcileOptions::full(), None).await })
        };
        while !reconciler.is_running() {
            tokio::task::yield_now().await;
        }

        let second = reconciler.run(ReconcileOptions::full(), None).await;
        assert_eq!(second, ReconcileOutcome::AlreadyRunning);
        assert!(!second.succeeded());
        assert!(oracle.call_times().is_empty());
        assert!(!reconciler.quick_refresh().await);

        let first = first.await.unwrap();
        assert!(first.premium_confirmed());
        assert_eq!(oracle.call_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_attempts_fall_back_and_continue() {
        let oracle = FakeOracle::scripted(vec![Err("Failed to refresh subscription status".to_string()), Ok(true)]);
        let session = Arc::new(FakeSession::default());
        let reconciler = Reconciler::new(oracle.clone(), session.clone());

        let outcome = reconciler.run(ReconcileOptions::manual(), None).await;

        assert!(matches!(outcome, ReconcileOutcome::Confirmed { attempts: 2, .. }));
        assert_eq!(session.fallbacks.load(Ordering::SeqCst), 1);
        // the failed attempt never reached the session refreshes
        assert_eq!(session.profile_refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_shot_with_only_failures_still_succeeds() {
        let oracle = FakeOracle::scripted(vec![Err("down".to_string()), Err("down".to_string())]);
        let session = Arc::new(FakeSession::default());
        let reconciler = Reconciler::new(oracle.clone(), session.clone());

        let options = ReconcileOptions {
            poll_for_changes: false,
            max_attempts: 2,
        };
        let outcome = reconciler.run(options, None).await;

        assert_eq!(outcome, ReconcileOutcome::Unconfirmed { attempts: 2 });
        assert!(outcome.succeeded());
        assert_eq!(session.fallbacks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_refresh_reports_progress() {
        let oracle = FakeOracle::scripted(vec![Ok(false), Ok(true)]);
        let reconciler = Reconciler::new(oracle, Arc::new(FakeSession::default()));
        let messages = Mutex::new(Vec::new());
        let start = Instant::now();
        let record = |m: &str| messages.lock().unwrap().push((secs(start.elapsed()), m.to_string()));

        assert!(reconciler.manual_refresh(Some(&record)).await);

        let messages = messages.lock().unwrap();
        let expected = [
            (0, "Checking subscription status..."),
            (0, "Checking subscription status... (1/3)"),
            (2, "Checking subscription status... (2/3)"),
            (7, "Subscription status updated!"),
        ];
        assert_eq!(messages.len(), expected.len());
        for ((at, message), (want_at, want)) in messages.iter().zip(expected) {
            assert_eq!((*at, message.as_str()), (want_at, want));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_stops_on_pending_when_not_retrying() {
        let policy = RetryPolicy {
            max_attempts: 4,
            retry_pending: false,
            ..RetryPolicy::default()
        };
        let mut seen = Vec::new();
        let outcome: PollOutcome<()> = poll_until(&policy, |_| {}, |n| {
            seen.push(n);
            async { AttemptOutcome::Pending }
        })
        .await;

        assert_eq!(outcome, PollOutcome::Stopped { attempts: 1 });
        assert_eq!(seen, vec![1]);
    }

    #[test]
    fn test_retry_policy_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 6);
        assert_eq!(policy.delay_before(1), Duration::from_secs(2));
        assert_eq!(policy.delay_before(2), Duration::from_secs(5));
        assert_eq!(policy.delay_before(6), Duration::from_secs(5));
        assert_eq!(ReconcileOptions::quick().policy().max_attempts, 1);
        assert!(!ReconcileOptions::quick().policy().retry_pending);
        assert_eq!(ReconcileOptions::manual().max_attempts, 3);
    }
}
