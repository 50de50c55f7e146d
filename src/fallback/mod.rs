//! Fallback-chain executor.
//!
//! A tool that can get its data from several places lists them as
//! [`Strategy`] values in preference order. [`FallbackChain::execute`] tries
//! them one by one and never fails: if nothing produces a value, the
//! caller's terminal fallback is returned tagged [`FALLBACK_SOURCE`].

pub mod metrics;

pub use metrics::{
    FallbackMetrics, FallbackOutcome, MetricsCollector, DEFAULT_METRICS_CAPACITY,
};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Tag used when every strategy came up empty.
pub const FALLBACK_SOURCE: &str = "FALLBACK";

/// One retrieval attempt. `Ok(None)` means "nothing here, try the next one".
#[async_trait]
pub trait Strategy<Q, T>: Send + Sync
where
    Q: Sync + ?Sized,
{
    fn name(&self) -> &str;

    async fn attempt(&self, query: &Q) -> Result<Option<T>>;
}

/// Where a tagged value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Strategy(String),
    Fallback,
}

impl Source {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Strategy(name) => name,
            Self::Fallback => FALLBACK_SOURCE,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value tagged with the strategy that produced it.
#[derive(Debug, Clone)]
pub struct Tagged<T> {
    pub value: T,
    pub source: Source,
    /// Strategies tried, including the winner.
    pub attempts: usize,
    pub elapsed: Duration,
}

/// Ordered strategies for one tool.
pub struct FallbackChain<Q: Sync + ?Sized, T> {
    tool_name: String,
    strategies: Vec<Box<dyn Strategy<Q, T>>>,
    attempt_timeout: Option<Duration>,
}

impl<Q, T> FallbackChain<Q, T>
where
    Q: Sync + ?Sized,
    T: Send,
{
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            strategies: Vec::new(),
            attempt_timeout: None,
        }
    }

    /// Append a strategy; strategies run in the order they were added.
    pub fn with(mut self, strategy: impl Strategy<Q, T> + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// Bound each individual attempt. A timed-out attempt counts as absent.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run the chain. Always records one outcome in `metrics`.
    pub async fn execute(&self, query: &Q, terminal: T, metrics: &MetricsCollector) -> Tagged<T> {
        execute_with_fallback(
            &self.tool_name,
            &self.strategies,
            query,
            terminal,
            self.attempt_timeout,
            metrics,
        )
        .await
    }
}

/// Try `strategies` in order and return the first present value.
///
/// Strategy errors and timeouts are logged and treated as absent values.
pub async fn execute_with_fallback<Q, T>(
    tool_name: &str,
    strategies: &[Box<dyn Strategy<Q, T>>],
    query: &Q,
    terminal: T,
    attempt_timeout: Option<Duration>,
    metrics: &MetricsCollector,
) -> Tagged<T>
where
    Q: Sync + ?Sized,
    T: Send,
{
    let started = Instant::now();
    let mut attempts = 0;

    for strategy in strategies {
        attempts += 1;
        let attempt = strategy.attempt(query);
        let outcome = match attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("timed out after {:?}", limit)),
            },
            None => attempt.await,
        };

        match outcome {
            Ok(Some(value)) => {
                let elapsed = started.elapsed();
                debug!(
                    "[{}] strategy '{}' succeeded after {} attempt(s) in {:?}",
                    tool_name,
                    strategy.name(),
                    attempts,
                    elapsed
                );
                record(metrics, tool_name, strategy.name(), elapsed);
                return Tagged {
                    value,
                    source: Source::Strategy(strategy.name().to_string()),
                    attempts,
                    elapsed,
                };
            }
            Ok(None) => {
                debug!("[{}] strategy '{}' had no result", tool_name, strategy.name());
            }
            Err(e) => {
                warn!("[{}] strategy '{}' failed: {}", tool_name, strategy.name(), e);
            }
        }
    }

    let elapsed = started.elapsed();
    warn!(
        "[{}] all {} strategies exhausted, using terminal fallback",
        tool_name, attempts
    );
    record(metrics, tool_name, FALLBACK_SOURCE, elapsed);

    Tagged {
        value: terminal,
        source: Source::Fallback,
        attempts,
        elapsed,
    }
}

fn record(metrics: &MetricsCollector, tool_name: &str, strategy: &str, duration: Duration) {
    metrics.record(FallbackOutcome {
        tool_name: tool_name.to_string(),
        strategy: strategy.to_string(),
        duration,
        recorded_at: Utc::now(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    enum Behaviour {
        Absent,
        Error,
        Value(&'static str),
        Hang,
    }

    struct Fixed {
        name: &'static str,
        behaviour: Behaviour,
        calls: Arc<AtomicUsize>,
    }

    impl Fixed {
        fn new(name: &'static str, behaviour: Behaviour, calls: &Arc<AtomicUsize>) -> Self {
            Self {
                name,
                behaviour,
                calls: calls.clone(),
            }
        }
    }

    #[async_trait]
    impl Strategy<str, String> for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn attempt(&self, query: &str) -> Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Absent => Ok(None),
                Behaviour::Error => bail!("source down for {}", query),
                Behaviour::Value(v) => Ok(Some(format!("{}:{}", v, query))),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Some("late".into()))
                }
            }
        }
    }

    #[tokio::test]
    async fn third_strategy_wins_after_two_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let metrics = MetricsCollector::default();
        let chain = FallbackChain::new("lookup")
            .with(Fixed::new("primary", Behaviour::Error, &calls))
            .with(Fixed::new("secondary", Behaviour::Absent, &calls))
            .with(Fixed::new("tertiary", Behaviour::Value("found"), &calls));

        let result = chain.execute("aspirin", "none".to_string(), &metrics).await;

        assert_eq!(result.value, "found:aspirin");
        assert_eq!(result.source, Source::Strategy("tertiary".into()));
        assert_eq!(result.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let summary = metrics.fallback_metrics(Some("lookup"));
        assert_eq!(summary.total, 1);
        assert_eq!(summary.by_strategy["tertiary"], 1);
    }

    #[tokio::test]
    async fn exhausted_chain_returns_terminal_fallback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let metrics = MetricsCollector::default();
        let chain = FallbackChain::new("lookup")
            .with(Fixed::new("a", Behaviour::Error, &calls))
            .with(Fixed::new("b", Behaviour::Error, &calls))
            .with(Fixed::new("c", Behaviour::Absent, &calls));

        let result = chain.execute("x", "terminal".to_string(), &metrics).await;

        assert_eq!(result.value, "terminal");
        assert!(result.source.is_fallback());
        assert_eq!(result.source.to_string(), FALLBACK_SOURCE);
        assert_eq!(result.attempts, 3);
        assert_eq!(metrics.fallback_metrics(None).by_strategy[FALLBACK_SOURCE], 1);
    }

    #[tokio::test]
    async fn first_success_stops_the_chain() {
        let calls = Arc::new(AtomicUsize::new(0));
        let metrics = MetricsCollector::default();
        let chain = FallbackChain::new("lookup")
            .with(Fixed::new("a", Behaviour::Value("one"), &calls))
            .with(Fixed::new("b", Behaviour::Value("two"), &calls));

        let result = chain.execute("q", String::new(), &metrics).await;
        assert_eq!(result.value, "one:q");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_chain_falls_back() {
        let metrics = MetricsCollector::default();
        let chain: FallbackChain<str, String> = FallbackChain::new("empty");
        let result = chain.execute("q", "default".into(), &metrics).await;
        assert_eq!(result.value, "default");
        assert_eq!(result.attempts, 0);
        assert_eq!(metrics.len(), 1);
    }

    #[tokio::test]
    async fn hanging_strategy_is_skipped_after_timeout() {
        let calls = Arc::new(AtomicUsize::new(0));
        let metrics = MetricsCollector::default();
        let chain = FallbackChain::new("lookup")
            .with(Fixed::new("slow", Behaviour::Hang, &calls))
            .with(Fixed::new("fast", Behaviour::Value("ok"), &calls))
            .with_attempt_timeout(Duration::from_millis(50));

        let result = chain.execute("q", String::new(), &metrics).await;
        assert_eq!(result.source.as_str(), "fast");
        assert_eq!(result.attempts, 2);
    }
}
