use std::future::Future;
use std::time::Duration;

use jobserver_common::config::SubmitConfig;
use log::warn;

#[derive(Debug, Clone)]
pub enum RetryStrategy {
    /// Run the operation once.
    None,
    /// Retry up to `max_count` times after the first attempt, waiting `delay` in between.
    Fixed { max_count: usize, delay: Duration },
}

impl RetryStrategy {
    pub async fn run<F, Fut, T, E>(&self, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let mut delay = self.delay();
        let mut attempt = 0;
        loop {
            match f().await {
                x @ Ok(_) => return x,
                Err(e) => {
                    if let Some(delay) = delay.next() {
                        warn!("retryable operation failed at attempt {attempt}: {e}");
                        tokio::time::sleep(delay).await;
                    } else {
                        return Err(e);
                    }
                }
            }
            attempt += 1;
        }
    }

    fn delay(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        match self {
            Self::None => Box::new(std::iter::empty()),
            Self::Fixed { max_count, delay } => Box::new(std::iter::repeat_n(*delay, *max_count)),
        }
    }
}

impl From<&SubmitConfig> for RetryStrategy {
    fn from(config: &SubmitConfig) -> Self {
        if config.dispatch_retry_count == 0 {
            Self::None
        } else {
            Self::Fixed {
                max_count: config.dispatch_retry_count,
                delay: Duration::from_millis(config.dispatch_retry_delay_millis),
            }
        }
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    async fn run_failing(strategy: &RetryStrategy, failures: usize) -> (Result<usize, String>, usize) {
        let attempts = Arc::new(AtomicUsize::new(0));
        let result = strategy
            .run(|| {
                let attempts = Arc::clone(&attempts);
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n < failures {
                        Err(format!("failure {n}"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        (result, attempts.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_fixed_retry_recovers() {
        let strategy = RetryStrategy::Fixed {
            max_count: 1,
            delay: Duration::from_millis(1),
        };
        let (result, attempts) = run_failing(&strategy, 1).await;
        assert_eq!(result, Ok(1));
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_fixed_retry_gives_up() {
        let strategy = RetryStrategy::Fixed {
            max_count: 1,
            delay: Duration::from_millis(1),
        };
        let (result, attempts) = run_failing(&strategy, 5).await;
        assert_eq!(result, Err("failure 1".to_string()));
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_no_retry() {
        let (result, attempts) = run_failing(&RetryStrategy::None, 1).await;
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }
}
