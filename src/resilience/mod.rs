pub mod cache;
pub mod circuit_breaker;
pub mod retry;

pub use cache::{Cache, CacheStats};
pub use circuit_breaker::{CircuitBreaker, CircuitPhase, CircuitStatus};
pub use retry::{RetryExecutor, RetryPolicy};
