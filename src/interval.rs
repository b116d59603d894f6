//! Interval functions for computing retry and wait delays
//!
//! An [`IntervalFn`] is a total mapping from a 1-based attempt number to a
//! delay in milliseconds. Several families are provided: fixed, custom
//! backoff, exponential (optionally capped), and randomized variants of each.
//! [`IntervalBiFn`] is the outcome-aware superset that also receives the
//! result of the previous attempt, so policies can wait differently after a
//! rate-limit response than after a timeout.
//!
//! Constructors validate their arguments and return
//! [`CoreError::Validation`](crate::CoreError::Validation) for an interval or
//! cap below one millisecond, or a randomization factor outside `[0, 1]`.
//! `apply` rejects attempt numbers below one.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::error::{CoreError, CoreResult};

/// Default initial interval: 500 milliseconds
pub const DEFAULT_INITIAL_INTERVAL_MILLIS: u64 = 500;

/// Default exponential multiplier: 1.5
pub const DEFAULT_MULTIPLIER: f64 = 1.5;

/// Default randomization factor: +/- 50% of the base value
pub const DEFAULT_RANDOMIZATION_FACTOR: f64 = 0.5;

type DelayFn = dyn Fn(u64) -> u64 + Send + Sync;

/// A total function from attempt number (1-based) to a delay in milliseconds
///
/// Cheap to clone; the underlying computation is shared.
#[derive(Clone)]
pub struct IntervalFn {
    inner: Arc<DelayFn>,
}

impl std::fmt::Debug for IntervalFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalFn").finish_non_exhaustive()
    }
}

impl IntervalFn {
    /// Fixed interval using the default of 500 ms
    pub fn of_defaults() -> Self {
        Self::of_millis(DEFAULT_INITIAL_INTERVAL_MILLIS)
            .expect("default interval is a valid constant")
    }

    /// Fixed interval: every attempt waits `interval_millis`
    pub fn of_millis(interval_millis: u64) -> CoreResult<Self> {
        check_interval(interval_millis)?;
        Ok(Self { inner: Arc::new(move |_attempt| interval_millis) })
    }

    /// Fixed interval from a [`Duration`]
    pub fn of_duration(interval: Duration) -> CoreResult<Self> {
        Self::of_millis(interval.as_millis() as u64)
    }

    /// Custom backoff: the delay for attempt `n` is the user function applied
    /// to the previous delay, `n - 1` times, starting from `interval_millis`.
    ///
    /// The function is re-iterated on every call so that a user function with
    /// interior state observes the same sequence of inputs each time.
    pub fn of_backoff<F>(interval_millis: u64, backoff: F) -> CoreResult<Self>
    where
        F: Fn(u64) -> u64 + Send + Sync + 'static,
    {
        check_interval(interval_millis)?;
        Ok(Self {
            inner: Arc::new(move |attempt| {
                (1..attempt).fold(interval_millis, |delay, _| backoff(delay))
            }),
        })
    }

    /// Exponential backoff: `initial * multiplier^(n-1)`, truncated to whole
    /// milliseconds
    pub fn of_exponential_backoff(initial_millis: u64, multiplier: f64) -> CoreResult<Self> {
        check_interval(initial_millis)?;
        Ok(Self {
            inner: Arc::new(move |attempt| exponential_delay(initial_millis, multiplier, attempt)),
        })
    }

    /// Exponential backoff bounded above by `max_millis`
    pub fn of_exponential_backoff_capped(
        initial_millis: u64,
        multiplier: f64,
        max_millis: u64,
    ) -> CoreResult<Self> {
        check_interval(initial_millis)?;
        check_interval(max_millis)?;
        Ok(Self {
            inner: Arc::new(move |attempt| {
                exponential_delay(initial_millis, multiplier, attempt).min(max_millis)
            }),
        })
    }

    /// Randomized interval: uniformly sampled from
    /// `[interval * (1 - factor), interval * (1 + factor)]`, clamped to >= 1
    pub fn of_randomized(interval_millis: u64, randomization_factor: f64) -> CoreResult<Self> {
        check_interval(interval_millis)?;
        check_randomization_factor(randomization_factor)?;
        Ok(Self {
            inner: Arc::new(move |_attempt| {
                randomize(interval_millis as f64, randomization_factor)
            }),
        })
    }

    /// Exponential backoff with randomization applied to each computed delay
    pub fn of_exponential_random_backoff(
        initial_millis: u64,
        multiplier: f64,
        randomization_factor: f64,
    ) -> CoreResult<Self> {
        check_interval(initial_millis)?;
        check_randomization_factor(randomization_factor)?;
        Ok(Self {
            inner: Arc::new(move |attempt| {
                let delay = exponential_delay(initial_millis, multiplier, attempt);
                randomize(delay as f64, randomization_factor)
            }),
        })
    }

    /// Randomized exponential backoff bounded above by `max_millis`
    pub fn of_exponential_random_backoff_capped(
        initial_millis: u64,
        multiplier: f64,
        randomization_factor: f64,
        max_millis: u64,
    ) -> CoreResult<Self> {
        check_interval(initial_millis)?;
        check_interval(max_millis)?;
        check_randomization_factor(randomization_factor)?;
        Ok(Self {
            inner: Arc::new(move |attempt| {
                let delay = exponential_delay(initial_millis, multiplier, attempt);
                randomize(delay as f64, randomization_factor).min(max_millis)
            }),
        })
    }

    /// Compute the delay in milliseconds for the given 1-based attempt
    pub fn apply(&self, attempt: u64) -> CoreResult<u64> {
        check_attempt(attempt)?;
        Ok((self.inner)(attempt))
    }

    /// Lift this interval function into an outcome-aware [`IntervalBiFn`]
    /// that ignores the outcome parameter
    pub fn into_biased<T, E>(self) -> IntervalBiFn<T, E> {
        IntervalBiFn { inner: Arc::new(move |attempt, _result| (self.inner)(attempt)) }
    }
}

type BiasedDelayFn<T, E> = dyn Fn(u64, &Result<T, E>) -> u64 + Send + Sync;

/// An interval function that also observes the outcome of the previous
/// attempt
///
/// The plain [`IntervalFn`] lifts into this type via
/// [`IntervalFn::into_biased`].
#[derive(Clone)]
pub struct IntervalBiFn<T, E> {
    inner: Arc<BiasedDelayFn<T, E>>,
}

impl<T, E> std::fmt::Debug for IntervalBiFn<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalBiFn").finish_non_exhaustive()
    }
}

impl<T, E> IntervalBiFn<T, E> {
    /// Create an outcome-aware interval function from a closure
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(u64, &Result<T, E>) -> u64 + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// Compute the delay for the given attempt and previous outcome
    pub fn apply(&self, attempt: u64, result: &Result<T, E>) -> CoreResult<u64> {
        check_attempt(attempt)?;
        Ok((self.inner)(attempt, result))
    }
}

fn exponential_delay(initial_millis: u64, multiplier: f64, attempt: u64) -> u64 {
    let exponent = (attempt - 1).min(i32::MAX as u64) as i32;
    (initial_millis as f64 * multiplier.powi(exponent)) as u64
}

fn randomize(current: f64, randomization_factor: f64) -> u64 {
    let delta = randomization_factor * current;
    if delta == 0.0 {
        return current.max(1.0) as u64;
    }
    let min = current - delta;
    let max = current + delta;
    let sampled = rand::thread_rng().gen_range(min..=max);
    sampled.max(1.0) as u64
}

fn check_interval(interval_millis: u64) -> CoreResult<()> {
    if interval_millis < 1 {
        return Err(CoreError::validation(format!(
            "interval of {interval_millis} ms is less than 1 ms"
        )));
    }
    Ok(())
}

fn check_randomization_factor(factor: f64) -> CoreResult<()> {
    if !(0.0..=1.0).contains(&factor) {
        return Err(CoreError::validation(format!(
            "randomization factor {factor} must be between 0.0 and 1.0"
        )));
    }
    Ok(())
}

fn check_attempt(attempt: u64) -> CoreResult<()> {
    if attempt < 1 {
        return Err(CoreError::validation(format!("attempt {attempt} must be at least 1")));
    }
    Ok(())
}
