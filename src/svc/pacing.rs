//! # Pacing module
//!
//! This module provide the delays inserted between the steps of a rotation
//! and a polling helper which waits for the cluster to converge with an
//! exponential backoff and jitter.

use std::{future::Future, time::Duration};

use rand::Rng;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::svc::cfg::Pacing;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("condition '{0}' does not hold after {1} attempt(s) in {2:?}")]
    Timeout(String, u32, Duration),
}

// -----------------------------------------------------------------------------
// Backoff structure

/// Bounds of a [`poll_until`] call
#[derive(Clone, Debug, PartialEq)]
pub struct Backoff {
    /// delay always waited before the first evaluation
    pub floor: Duration,
    pub initial: Duration,
    pub max: Duration,
    /// budget for the evaluations, the floor excluded
    pub timeout: Duration,
    pub multiplier: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from(&Pacing::default())
    }
}

impl From<&Pacing> for Backoff {
    fn from(pacing: &Pacing) -> Self {
        Self {
            floor: Duration::from_millis(pacing.delay),
            initial: Duration::from_millis(pacing.interval),
            max: Duration::from_millis(pacing.max_interval),
            timeout: Duration::from_millis(pacing.timeout),
            multiplier: 2.0,
        }
    }
}

// -----------------------------------------------------------------------------
// helpers

/// pause the rotation to let the control plane propagate the previous changes
pub async fn wait(delay: Duration) {
    info!("waiting {}ms ...", delay.as_millis());
    sleep(delay).await;
}

/// waits the floor delay, then evaluates the condition until it holds or the
/// timeout elapses. Returns the number of evaluations.
#[cfg_attr(feature = "trace", tracing::instrument(skip(condition)))]
pub async fn poll_until<F, Fut>(backoff: &Backoff, name: &str, mut condition: F) -> Result<u32, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    wait(backoff.floor).await;

    let begin = Instant::now();
    let mut attempt = 0u32;
    let mut delay = backoff.initial;

    loop {
        attempt += 1;
        if condition().await {
            debug!(condition = name, attempt = attempt, "Condition holds");
            return Ok(attempt);
        }

        let elapsed = begin.elapsed();
        if elapsed >= backoff.timeout {
            return Err(Error::Timeout(name.to_string(), attempt, backoff.timeout));
        }

        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let jittered = Duration::from_secs_f64(delay.as_secs_f64() * jitter)
            .min(backoff.timeout - elapsed);

        debug!(
            condition = name,
            attempt = attempt,
            delay_ms = jittered.as_millis() as u64,
            "Condition does not hold yet, poll again later"
        );

        sleep(jittered).await;
        delay = Duration::from_secs_f64(
            (delay.as_secs_f64() * backoff.multiplier).min(backoff.max.as_secs_f64()),
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use super::*;

    fn backoff(timeout: u64) -> Backoff {
        Backoff {
            floor: Duration::from_millis(20),
            initial: Duration::from_millis(1),
            max: Duration::from_millis(5),
            timeout: Duration::from_millis(timeout),
            multiplier: 2.0,
        }
    }

    #[test]
    fn backoff_from_pacing() {
        let backoff = Backoff::default();

        assert_eq!(backoff.floor, Duration::from_secs(2));
        assert_eq!(backoff.timeout, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn wait_sleeps_at_least_the_delay() {
        let begin = Instant::now();
        wait(Duration::from_millis(15)).await;

        assert!(begin.elapsed() >= Duration::from_millis(15));
    }

    #[tokio::test]
    async fn poll_keeps_the_floor_when_condition_holds() {
        let begin = Instant::now();
        let attempts = poll_until(&backoff(100), "ready", || async { true })
            .await
            .unwrap();

        assert_eq!(attempts, 1);
        assert!(begin.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn poll_until_condition_holds() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let attempts = poll_until(&backoff(1_000), "third time", || {
            let c = c.clone();
            async move { c.fetch_add(1, Ordering::SeqCst) >= 2 }
        })
        .await
        .unwrap();

        assert_eq!(attempts, 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn poll_gives_up_after_timeout() {
        let result = poll_until(&backoff(30), "never", || async { false }).await;

        assert!(matches!(result, Err(Error::Timeout(name, attempts, _)) if name == "never" && attempts > 1));
    }
}
