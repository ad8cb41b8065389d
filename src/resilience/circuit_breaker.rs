use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CircuitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitPhase {
    Closed,
    Open,
    /// One trial call has been let through; everything else is rejected until it reports back
    /// or its lease runs out.
    HalfOpen,
}

impl std::fmt::Display for CircuitPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitPhase::Closed => "closed",
            CircuitPhase::Open => "open",
            CircuitPhase::HalfOpen => "half_open",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
struct Circuit {
    phase: CircuitPhase,
    failures: u32,
    opened_at: Option<Instant>,
    closes_at: Option<Instant>,
    /// Half-open only: when the outstanding trial is presumed lost.
    trial_expires_at: Option<Instant>,
}

impl Default for Circuit {
    fn default() -> Self {
        Self {
            phase: CircuitPhase::Closed,
            failures: 0,
            opened_at: None,
            closes_at: None,
            trial_expires_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitStatus {
    pub name: String,
    pub is_open: bool,
    pub phase: CircuitPhase,
    pub failures: u32,
    /// Time left until the trial is allowed; None unless open.
    pub closes_in_ms: Option<u64>,
    /// How long ago the current open period started; None while closed.
    pub open_for_ms: Option<u64>,
}

/// Per-dependency circuit breaker. Each name has its own counter and state;
/// one dependency tripping never affects another.
pub struct CircuitBreaker {
    /// dependency name → circuit
    circuits: DashMap<String, Circuit>,
    failure_threshold: u32,
    open_duration: Duration,
}

impl CircuitBreaker {
    pub fn new(cfg: &CircuitConfig) -> Self {
        Self {
            circuits: DashMap::new(),
            failure_threshold: cfg.failure_threshold.max(1),
            open_duration: cfg.open_duration,
        }
    }

    /// Whether calls to `name` must be rejected right now.
    ///
    /// Not a pure read: an open circuit whose cooldown has elapsed flips to half-open
    /// here and this call returns false, which is what grants the single trial. A trial
    /// holds its lease for one open duration; after that the next caller gets a fresh one.
    pub fn is_open(&self, name: &str) -> bool {
        let Some(mut circuit) = self.circuits.get_mut(name) else {
            return false;
        };
        let now = Instant::now();
        match circuit.phase {
            CircuitPhase::Closed => false,
            CircuitPhase::HalfOpen => {
                let lease_expired = circuit.trial_expires_at.map_or(true, |at| now >= at);
                if lease_expired {
                    circuit.trial_expires_at = Some(now + self.open_duration);
                    warn!(circuit = name, "Trial never reported back, granting another");
                    false
                } else {
                    true
                }
            }
            CircuitPhase::Open => {
                let cooled_down = circuit.closes_at.map_or(true, |at| now >= at);
                if cooled_down {
                    circuit.phase = CircuitPhase::HalfOpen;
                    circuit.trial_expires_at = Some(now + self.open_duration);
                    info!(circuit = name, "Circuit half-open: allowing one trial");
                    false
                } else {
                    true
                }
            }
        }
    }

    /// Hand back a trial that finished without saying anything about the dependency's
    /// health (e.g. the adapter does not support the operation). The circuit returns to
    /// open with its cooldown already served, so the next caller gets the trial.
    pub fn release_trial(&self, name: &str) {
        let Some(mut circuit) = self.circuits.get_mut(name) else {
            return;
        };
        if circuit.phase == CircuitPhase::HalfOpen {
            circuit.phase = CircuitPhase::Open;
            circuit.closes_at = Some(Instant::now());
            circuit.trial_expires_at = None;
            debug!(circuit = name, "Trial released without a verdict");
        }
    }

    pub fn record_success(&self, name: &str) {
        let mut circuit = self.circuits.entry(name.to_string()).or_default();
        if circuit.phase != CircuitPhase::Closed {
            info!(circuit = name, "Circuit closed after successful trial");
        }
        *circuit = Circuit::default();
    }

    /// Returns true when this failure opened the circuit (from closed or from a failed trial).
    pub fn record_failure(&self, name: &str) -> bool {
        let mut circuit = self.circuits.entry(name.to_string()).or_default();
        circuit.failures = circuit.failures.saturating_add(1);

        let should_open = match circuit.phase {
            CircuitPhase::HalfOpen => true,
            CircuitPhase::Closed => circuit.failures >= self.failure_threshold,
            // A straggler reporting after the circuit already opened.
            CircuitPhase::Open => false,
        };
        if !should_open {
            return false;
        }

        let now = Instant::now();
        let reopened = circuit.phase == CircuitPhase::HalfOpen;
        circuit.phase = CircuitPhase::Open;
        circuit.opened_at = Some(now);
        circuit.closes_at = Some(now + self.open_duration);
        circuit.trial_expires_at = None;
        warn!(
            circuit = name,
            failures = circuit.failures,
            open_secs = self.open_duration.as_secs(),
            "Circuit {}: rejecting calls for {}s",
            if reopened { "re-opened after failed trial" } else { "opened" },
            self.open_duration.as_secs(),
        );
        true
    }

    /// Snapshot of a circuit without the half-open side effect of `is_open`.
    pub fn status(&self, name: &str) -> CircuitStatus {
        let now = Instant::now();
        let circuit = self
            .circuits
            .get(name)
            .map(|c| c.clone())
            .unwrap_or_default();
        let closes_in_ms = match circuit.phase {
            CircuitPhase::Open => circuit
                .closes_at
                .map(|at| at.saturating_duration_since(now).as_millis() as u64),
            _ => None,
        };
        let open_for_ms = match circuit.phase {
            CircuitPhase::Closed => None,
            _ => circuit
                .opened_at
                .map(|at| now.saturating_duration_since(at).as_millis() as u64),
        };
        CircuitStatus {
            name: name.to_string(),
            is_open: circuit.phase == CircuitPhase::Open && closes_in_ms.is_some_and(|ms| ms > 0),
            phase: circuit.phase,
            failures: circuit.failures,
            closes_in_ms,
            open_for_ms,
        }
    }

    /// Status of every dependency that has reported at least once, sorted by name.
    pub fn statuses(&self) -> Vec<CircuitStatus> {
        let mut names: Vec<String> = self.circuits.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names.iter().map(|n| self.status(n)).collect()
    }

    /// Force a circuit closed, e.g. after an operator confirms the provider is back.
    pub fn reset(&self, name: &str) {
        if self.circuits.remove(name).is_some() {
            info!(circuit = name, "Circuit manually reset");
        }
    }
}
