//! Generic retry-with-exponential-backoff wrapper. Error-agnostic: every
//! failure takes the same backoff path; callers wanting selective retry
//! must inspect the error before propagating.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

/// Run `operation(attempt_index)` up to `max_attempts` times, sleeping
/// `base_delay * 2^(attempts - 1)` between failures. The last error is
/// returned once attempts are exhausted. `max_attempts` is clamped to at
/// least one call.
pub async fn run_with_backoff<T, E, F, Fut>(
    mut operation: F,
    max_attempts: u32,
    base_delay: Duration,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempts = 0u32;

    loop {
        match operation(attempts).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                attempts += 1;
                if attempts >= max_attempts {
                    return Err(error);
                }
                let delay = base_delay * 2u32.saturating_pow(attempts - 1);
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::time::Instant;

    use super::run_with_backoff;

    #[tokio::test(start_paused = true)]
    async fn always_failing_operation_is_attempted_exactly_max_times() {
        let calls = Arc::new(AtomicU32::new(0));
        let timestamps = Arc::new(Mutex::new(Vec::new()));

        let result: Result<(), &str> = run_with_backoff(
            |attempt| {
                let calls = Arc::clone(&calls);
                let timestamps = Arc::clone(&timestamps);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    timestamps.lock().expect("lock timestamps").push((attempt, Instant::now()));
                    Err("still broken")
                }
            },
            3,
            Duration::from_millis(500),
        )
        .await;

        assert_eq!(result, Err("still broken"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let timestamps = timestamps.lock().expect("lock timestamps");
        assert_eq!(
            timestamps.iter().map(|(attempt, _)| *attempt).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        // Second call waits the base delay, third waits twice that.
        assert!(timestamps[1].1 - timestamps[0].1 >= Duration::from_millis(500));
        assert!(timestamps[2].1 - timestamps[1].1 >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_failures_stops_retrying() {
        let calls = Arc::new(AtomicU32::new(0));

        let result = run_with_backoff(
            |attempt| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if attempt < 1 {
                        Err("first try fails")
                    } else {
                        Ok("recovered")
                    }
                }
            },
            5,
            Duration::from_millis(100),
        )
        .await;

        assert_eq!(result, Ok("recovered"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn immediate_success_never_sleeps() {
        let result: Result<u32, &str> =
            run_with_backoff(|_| async { Ok(7) }, 3, Duration::from_secs(3600)).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn zero_max_attempts_still_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), &str> = run_with_backoff(
            |_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("nope")
                }
            },
            0,
            Duration::from_millis(1),
        )
        .await;

        assert_eq!(result, Err("nope"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
