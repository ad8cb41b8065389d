pub mod health;
pub mod latency;

pub use health::HealthState;
pub use latency::LatencyStats;
