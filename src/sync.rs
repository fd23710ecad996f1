//! Round barrier: wait until every rostered client has published its inputs.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::AggError;

/// Where client inputs for an iteration are counted.
pub trait RoundStore: Send + Sync {
    /// Number of rostered clients whose inputs for `iteration` are present.
    fn count_ready(&self, iteration: u64, roster: &[String]) -> Result<usize, AggError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundStatus {
    Ready,
    TimedOut,
    /// The stop signal fired while waiting.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_attempts: 100,
        }
    }
}

/// Cloneable shutdown flag whose waits wake up as soon as it is raised.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock() = true;
        cvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleep up to `timeout`; returns `true` if stopped (before or during).
    pub fn wait(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut stopped = flag.lock();
        while !*stopped {
            if cvar.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

pub struct RoundSynchronizer<S> {
    store: S,
    roster: Vec<String>,
    policy: SyncPolicy,
    stop: StopSignal,
}

impl<S: RoundStore> RoundSynchronizer<S> {
    pub fn new(store: S, roster: Vec<String>, policy: SyncPolicy, stop: StopSignal) -> Self {
        Self {
            store,
            roster,
            policy,
            stop,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> SyncPolicy {
        self.policy
    }

    /// Poll at most `max_attempts` times, `poll_interval` apart.
    ///
    /// `Ready` as soon as the count equals `expected`; `TimedOut` right after
    /// the last unsuccessful poll. Storage errors count as an unsuccessful
    /// poll.
    pub fn wait_for_round(&self, iteration: u64, expected: usize) -> RoundStatus {
        for attempt in 1..=self.policy.max_attempts {
            if self.stop.is_stopped() {
                return RoundStatus::Cancelled;
            }
            match self.store.count_ready(iteration, &self.roster) {
                Ok(found) if found == expected => {
                    info!(iteration, found, expected, attempt, "all client inputs present");
                    return RoundStatus::Ready;
                }
                Ok(found) => {
                    if found > expected {
                        warn!(iteration, found, expected, "more inputs than expected clients");
                    }
                    debug!(iteration, found, expected, attempt, "waiting for clients");
                }
                Err(e) => warn!(iteration, attempt, error = %e, "cannot inspect round inputs"),
            }
            if attempt == self.policy.max_attempts {
                break;
            }
            if self.stop.wait(self.policy.poll_interval) {
                return RoundStatus::Cancelled;
            }
        }
        warn!(iteration, attempts = self.policy.max_attempts, "round timed out");
        RoundStatus::TimedOut
    }

    /// [`Self::wait_for_round`] expecting the whole roster.
    pub fn wait_for_roster(&self, iteration: u64) -> RoundStatus {
        self.wait_for_round(iteration, self.roster.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    /// Reports `counts[i]` on poll i (last value repeats) and counts polls.
    struct Scripted {
        counts: Vec<usize>,
        polls: AtomicUsize,
    }

    impl Scripted {
        fn new(counts: Vec<usize>) -> Self {
            Self {
                counts,
                polls: AtomicUsize::new(0),
            }
        }
    }

    impl RoundStore for &Scripted {
        fn count_ready(&self, _: u64, _: &[String]) -> Result<usize, AggError> {
            let i = self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(self.counts[i.min(self.counts.len() - 1)])
        }
    }

    fn policy(max_attempts: u32) -> SyncPolicy {
        SyncPolicy {
            poll_interval: Duration::from_millis(1),
            max_attempts,
        }
    }

    fn roster() -> Vec<String> {
        vec!["a".into(), "b".into(), "c".into()]
    }

    #[test]
    fn test_ready_as_soon_as_count_matches() {
        let store = Scripted::new(vec![0, 1, 3, 3]);
        let sync = RoundSynchronizer::new(&store, roster(), policy(10), StopSignal::new());
        assert_eq!(sync.wait_for_roster(0), RoundStatus::Ready);
        assert_eq!(store.polls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_times_out_after_exactly_max_attempts() {
        let store = Scripted::new(vec![2]);
        let sync = RoundSynchronizer::new(&store, roster(), policy(7), StopSignal::new());
        assert_eq!(sync.wait_for_roster(0), RoundStatus::TimedOut);
        assert_eq!(store.polls.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_ready_on_last_attempt_is_not_timeout() {
        let store = Scripted::new(vec![1, 1, 1, 3]);
        let sync = RoundSynchronizer::new(&store, roster(), policy(4), StopSignal::new());
        assert_eq!(sync.wait_for_roster(0), RoundStatus::Ready);
        assert_eq!(store.polls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_surplus_is_not_ready() {
        let store = Scripted::new(vec![4]);
        let sync = RoundSynchronizer::new(&store, roster(), policy(3), StopSignal::new());
        assert_eq!(sync.wait_for_round(0, 3), RoundStatus::TimedOut);
    }

    #[test]
    fn test_stop_interrupts_a_long_wait() {
        let store = Scripted::new(vec![0]);
        let stop = StopSignal::new();
        let sync = RoundSynchronizer::new(
            &store,
            roster(),
            SyncPolicy {
                poll_interval: Duration::from_secs(60),
                max_attempts: 100,
            },
            stop.clone(),
        );
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            stop.stop();
        });
        let started = Instant::now();
        assert_eq!(sync.wait_for_roster(0), RoundStatus::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
        stopper.join().unwrap();
    }

    #[test]
    fn test_stop_before_wait() {
        let store = Scripted::new(vec![3]);
        let stop = StopSignal::new();
        stop.stop();
        let sync = RoundSynchronizer::new(&store, roster(), policy(5), stop);
        assert_eq!(sync.wait_for_roster(0), RoundStatus::Cancelled);
        assert_eq!(store.polls.load(Ordering::SeqCst), 0);
    }
}
