use anyhow::Result;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// One feed host; a pass only fetches once so a few failed passes are enough.
    pub fn feed_host() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 1,
            timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: RwLock<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: RwLock::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            }),
        }
    }

    pub async fn execute<F, T, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.admit().await?;

        let result = operation().await;
        match &result {
            Ok(_) => self.on_success().await,
            Err(_) => self.on_failure().await,
        }
        result
    }

    /// Reject while open; move to half-open once the cool-down has passed.
    async fn admit(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let cooled_down = inner
            .last_failure_time
            .map_or(false, |at| at.elapsed() > self.config.timeout);
        if !cooled_down {
            return Err(anyhow::anyhow!("Circuit breaker for {} is open", self.name));
        }

        inner.state = CircuitState::HalfOpen;
        inner.success_count = 0;
        info!("Circuit breaker for {} transitioning to half-open after timeout", self.name);
        Ok(())
    }

    async fn on_success(&self) {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    info!(
                        "Circuit breaker for {} closing after {} successful calls",
                        self.name, inner.success_count
                    );
                }
            }
            CircuitState::Closed | CircuitState::Open => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
            }
        }
    }

    async fn on_failure(&self) {
        let mut inner = self.inner.write().await;
        inner.failure_count += 1;
        inner.last_failure_time = Some(Instant::now());

        let trip = match inner.state {
            // a failed probe re-opens immediately
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.failure_count >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if trip {
            inner.state = CircuitState::Open;
            warn!(
                "Circuit breaker for {} opening after {} failures",
                self.name, inner.failure_count
            );
        }
    }

    pub async fn get_state(&self) -> CircuitState {
        self.inner.read().await.state
    }

    pub async fn get_stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.read().await;
        CircuitBreakerStats {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_time: inner.last_failure_time,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<Instant>,
}

/// Breakers keyed by feed host, shared by every source in the process.
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_breaker(&self, host: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().await.get(host) {
            return breaker.clone();
        }

        let mut breakers = self.breakers.write().await;
        breakers
            .entry(host.to_string())
            .or_insert_with(|| {
                info!("Created circuit breaker for feed host: {}", host);
                Arc::new(CircuitBreaker::new(host, CircuitBreakerConfig::feed_host()))
            })
            .clone()
    }

    pub async fn get_all_stats(&self) -> HashMap<String, CircuitBreakerStats> {
        let breakers = self.breakers.read().await;
        let mut stats = HashMap::new();
        for (host, breaker) in breakers.iter() {
            stats.insert(host.clone(), breaker.get_stats().await);
        }
        stats
    }
}

lazy_static::lazy_static! {
    pub static ref CIRCUIT_BREAKER_REGISTRY: CircuitBreakerRegistry = CircuitBreakerRegistry::new();
}

pub async fn get_circuit_breaker(host: &str) -> Arc<CircuitBreaker> {
    CIRCUIT_BREAKER_REGISTRY.get_breaker(host).await
}

pub async fn get_all_circuit_breaker_stats() -> HashMap<String, CircuitBreakerStats> {
    CIRCUIT_BREAKER_REGISTRY.get_all_stats().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn fast() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 1,
            timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_circuit_breaker_opens_on_failures() {
        let breaker = CircuitBreaker::new("feeds.example.com", fast());

        let result: Result<&str> = breaker.execute(|| async { Err(anyhow::anyhow!("Test failure")) }).await;
        assert!(result.is_err());
        assert_eq!(breaker.get_state().await, CircuitState::Closed);

        let result: Result<&str> = breaker.execute(|| async { Err(anyhow::anyhow!("Test failure")) }).await;
        assert!(result.is_err());
        assert_eq!(breaker.get_state().await, CircuitState::Open);

        // rejected without running the operation
        let result = breaker.execute(|| async { Ok("success") }).await;
        let message = result.unwrap_err().to_string();
        assert!(message.contains("feeds.example.com"));
        assert_eq!(breaker.get_stats().await.failure_count, 2);
    }

    #[tokio::test]
    async fn test_circuit_breaker_half_open_state() {
        let breaker = CircuitBreaker::new("feeds.example.com", fast());
        for _ in 0..2 {
            let _: Result<&str> = breaker.execute(|| async { Err(anyhow::anyhow!("Test failure")) }).await;
        }
        assert_eq!(breaker.get_state().await, CircuitState::Open);

        sleep(Duration::from_millis(60)).await;

        let result = breaker.execute(|| async { Ok("success") }).await;
        assert!(result.is_ok());
        assert_eq!(breaker.get_state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_failed_probe_reopens() {
        let breaker = CircuitBreaker::new("feeds.example.com", fast());
        for _ in 0..2 {
            let _: Result<&str> = breaker.execute(|| async { Err(anyhow::anyhow!("Test failure")) }).await;
        }
        sleep(Duration::from_millis(60)).await;

        let _: Result<&str> = breaker.execute(|| async { Err(anyhow::anyhow!("still down")) }).await;
        assert_eq!(breaker.get_state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_registry_reuses_breakers_per_host() {
        let registry = CircuitBreakerRegistry::new();
        let first = registry.get_breaker("a.example.com").await;
        let again = registry.get_breaker("a.example.com").await;
        let other = registry.get_breaker("b.example.com").await;

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(registry.get_all_stats().await.len(), 2);
    }
}
