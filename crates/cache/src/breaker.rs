//! Circuit breaker guarding the distributed cache tier.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Breaker tuning.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing again.
    pub recovery_after: Duration,
    /// Trial calls allowed while half-open.
    pub half_open_budget: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_after: Duration::from_secs(30),
            half_open_budget: 3,
        }
    }
}

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation; all calls attempted.
    Closed,
    /// All calls skipped; the guarded tier is treated as unavailable.
    Open,
    /// A limited number of trial calls probe for recovery.
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failures: u32,
    opened_at: Option<Instant>,
    trials_remaining: u32,
}

/// Closed / Open / Half-Open state machine.
///
/// Recovery is checked lazily: the first [`allow_call`](Self::allow_call)
/// after the recovery interval has elapsed moves an open circuit to
/// half-open, rather than a timer task doing so.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Breaker starting closed.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: 0,
                opened_at: None,
                trials_remaining: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Whether the next call to the guarded tier may be attempted.
    ///
    /// Consumes one trial from the half-open budget when probing; an open
    /// circuit whose recovery interval has elapsed transitions to half-open
    /// here.
    pub fn allow_call(&self) -> bool {
        let mut inner = self.lock();

        if inner.state == BreakerState::Open {
            let recovered = inner
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.config.recovery_after);

            if recovered {
                inner.state = BreakerState::HalfOpen;
                inner.trials_remaining = self.config.half_open_budget;
                tracing::debug!("cache circuit half-open, probing for recovery");
            }
        }

        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => {
                if inner.trials_remaining > 0 {
                    inner.trials_remaining -= 1;
                    true
                } else {
                    // Budget exhausted without a success; back to open.
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    false
                }
            }
        }
    }

    /// Record a successful call to the guarded tier.
    pub fn record_success(&self) {
        let mut inner = self.lock();

        inner.failures = 0;

        if inner.state == BreakerState::HalfOpen {
            inner.state = BreakerState::Closed;
            inner.opened_at = None;
            tracing::info!("cache circuit closed after successful probe");
        }
    }

    /// Record a failed call to the guarded tier.
    pub fn record_failure(&self) {
        let mut inner = self.lock();

        match inner.state {
            BreakerState::Closed => {
                inner.failures += 1;

                if inner.failures >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    tracing::warn!(
                        failures = inner.failures,
                        "cache circuit opened, distributed tier disabled"
                    );
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                tracing::warn!("cache circuit re-opened after failed probe");
            }
            BreakerState::Open => {}
        }
    }

    /// Current state, without side effects.
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            recovery_after: Duration::from_millis(10),
            half_open_budget: 2,
        }
    }

    #[test]
    fn opens_after_reaching_failure_threshold() {
        let breaker = CircuitBreaker::new(fast_config());

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow_call());
    }

    #[test]
    fn success_resets_the_failure_counter() {
        let breaker = CircuitBreaker::new(fast_config());

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();

        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn open_circuit_half_opens_after_recovery_interval() {
        let breaker = CircuitBreaker::new(fast_config());

        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(!breaker.allow_call());

        std::thread::sleep(Duration::from_millis(15));

        assert!(breaker.allow_call());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn successful_probe_closes_the_circuit() {
        let breaker = CircuitBreaker::new(fast_config());

        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(15));

        assert!(breaker.allow_call());
        breaker.record_success();

        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.allow_call());
    }

    #[test]
    fn failed_probe_reopens_the_circuit() {
        let breaker = CircuitBreaker::new(fast_config());

        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(15));

        assert!(breaker.allow_call());
        breaker.record_failure();

        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow_call());
    }

    #[test]
    fn exhausting_the_half_open_budget_reopens() {
        let breaker = CircuitBreaker::new(fast_config());

        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(15));

        // Budget of two trials, neither reporting success.
        assert!(breaker.allow_call());
        assert!(breaker.allow_call());
        assert!(!breaker.allow_call());

        assert_eq!(breaker.state(), BreakerState::Open);
    }
}
