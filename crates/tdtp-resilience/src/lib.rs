//! `tdtp-resilience` — the operational envelope wrapped around every
//! adapter/key-service call (§2 L4, §4.6, §5): circuit breaker, jittered
//! retry, and dead-letter queue.

pub mod circuit_breaker;
pub mod dlq;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, Counts, State};
pub use dlq::{DeadLetterQueue, DlqEntry};
pub use retry::{retry, RetryConfig, RetryPredicate};
