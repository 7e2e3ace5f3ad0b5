use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

/// Exponential backoff configuration shared by everything that retries
/// against the store or the API server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryOptions {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryOptions {
    /// The delay to use after a failure that was preceded by `current`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next = current.mul_f64(self.multiplier);
        if next > self.max_delay {
            self.max_delay
        } else {
            next
        }
    }
}

/// Runs `op` until it succeeds, sleeping with exponential backoff between
/// attempts. Returns `None` when the stop signal fires first.
pub async fn with_exponential_backoff<F, Fut, T, E>(
    opts: &RetryOptions,
    stop: &mut watch::Receiver<bool>,
    mut op: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delay = opts.initial_delay;
    loop {
        if let Ok(value) = op().await {
            return Some(value);
        }
        tokio::select! {
            _ = stop.changed() => return None,
            _ = sleep(delay) => {}
        }
        delay = opts.next_delay(delay);
    }
}

/// Runs `op` up to `attempts` times with a fixed delay between tries,
/// returning the last error if every attempt fails. Always makes at least
/// one attempt.
pub async fn with_retries<F, Fut, E>(
    attempts: u32,
    delay: Duration,
    mut op: F,
) -> Result<(), E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    let mut last = op().await;
    for _ in 1..attempts {
        if last.is_ok() {
            break;
        }
        sleep(delay).await;
        last = op().await;
    }
    last
}
