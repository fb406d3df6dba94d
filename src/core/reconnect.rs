use std::time::Duration;

use serde::Serialize;

use super::types::duration_ms;

/// Backoff bookkeeping for one reconnect episode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ReconnectState {
    pub attempt: u32,
    pub current_delay_ms: u64,
    pub enabled: bool,
}

/// What to do after a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectDecision {
    Retry { attempt: u32, delay: Duration },
    Abandon,
}

/// Linear backoff policy: `initial`, `initial + step`, ... capped at `max`, at most `max_attempts`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub step: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(5_000),
            step: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    pub fn initial_state(&self, enabled: bool) -> ReconnectState {
        ReconnectState {
            attempt: 0,
            current_delay_ms: duration_ms(self.initial_delay.min(self.max_delay)),
            enabled,
        }
    }

    /// Pure transition: decide the next step and return the state that follows it.
    ///
    /// The returned state is unchanged on `Abandon` so the caller can report the final attempt.
    pub fn plan(&self, state: ReconnectState) -> (ReconnectDecision, ReconnectState) {
        if state.attempt >= self.max_attempts {
            return (ReconnectDecision::Abandon, state);
        }

        let max_ms = duration_ms(self.max_delay);
        let delay_ms = state.current_delay_ms.min(max_ms);
        let next_ms = delay_ms.saturating_add(duration_ms(self.step)).min(max_ms);
        let attempt = state.attempt + 1;

        (
            ReconnectDecision::Retry {
                attempt,
                delay: Duration::from_millis(delay_ms),
            },
            ReconnectState {
                attempt,
                current_delay_ms: next_ms,
                enabled: state.enabled,
            },
        )
    }
}

/// Stateful reconnect strategy driven by the session loop.
pub trait ReconnectStrategy: Send + Sync + 'static {
    fn next_attempt(&mut self) -> ReconnectDecision;
    fn reset(&mut self);
    fn set_enabled(&mut self, enabled: bool);
    fn state(&self) -> ReconnectState;
}

/// [`ReconnectPolicy`] plus the mutable episode state.
#[derive(Clone, Debug)]
pub struct LinearBackoffReconnect {
    policy: ReconnectPolicy,
    state: ReconnectState,
}

impl LinearBackoffReconnect {
    pub fn new(policy: ReconnectPolicy, enabled: bool) -> Self {
        Self {
            state: policy.initial_state(enabled),
            policy,
        }
    }
}

impl Default for LinearBackoffReconnect {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default(), true)
    }
}

impl ReconnectStrategy for LinearBackoffReconnect {
    fn next_attempt(&mut self) -> ReconnectDecision {
        let (decision, next) = self.policy.plan(self.state);
        self.state = next;
        decision
    }

    fn reset(&mut self) {
        self.state = self.policy.initial_state(self.state.enabled);
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.state.enabled = enabled;
    }

    fn state(&self) -> ReconnectState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delays(strategy: &mut LinearBackoffReconnect, n: usize) -> Vec<u64> {
        (0..n)
            .map(|_| match strategy.next_attempt() {
                ReconnectDecision::Retry { delay, .. } => duration_ms(delay),
                ReconnectDecision::Abandon => 0,
            })
            .collect()
    }

    #[test]
    fn delays_grow_linearly_from_five_seconds() {
        let mut strategy = LinearBackoffReconnect::default();
        assert_eq!(delays(&mut strategy, 3), vec![5_000, 6_000, 7_000]);
        assert_eq!(strategy.state().attempt, 3);
        assert_eq!(strategy.state().current_delay_ms, 8_000);
    }

    #[test]
    fn delay_is_capped() {
        let policy = ReconnectPolicy {
            max_attempts: 40,
            ..ReconnectPolicy::default()
        };
        let mut strategy = LinearBackoffReconnect::new(policy, true);
        let observed = delays(&mut strategy, 40);
        assert!(observed.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*observed.last().unwrap(), 30_000);
        assert_eq!(observed[25], 30_000);
        assert_eq!(observed[24], 29_000);
    }

    #[test]
    fn abandons_after_max_attempts_and_reset_restores_initial_state() {
        let mut strategy = LinearBackoffReconnect::default();
        for expected in 1..=10 {
            match strategy.next_attempt() {
                ReconnectDecision::Retry { attempt, .. } => assert_eq!(attempt, expected),
                ReconnectDecision::Abandon => panic!("abandoned early at {expected}"),
            }
        }
        assert_eq!(strategy.next_attempt(), ReconnectDecision::Abandon);
        assert_eq!(strategy.next_attempt(), ReconnectDecision::Abandon);
        assert_eq!(strategy.state().attempt, 10);

        strategy.reset();
        assert_eq!(strategy.state().attempt, 0);
        assert_eq!(strategy.state().current_delay_ms, 5_000);
        assert!(strategy.state().enabled);
    }

    #[test]
    fn plan_is_pure() {
        let policy = ReconnectPolicy::default();
        let state = policy.initial_state(false);
        let (first, next) = policy.plan(state);
        let (again, _) = policy.plan(state);
        assert_eq!(first, again);
        assert_eq!(next.attempt, 1);
        assert!(!next.enabled);
    }
}
