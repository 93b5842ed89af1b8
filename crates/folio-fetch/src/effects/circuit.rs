//! Per-source circuit breaker.
//!
//! - Opens after `failure_threshold` consecutive failures
//! - While open, [`CircuitBreaker::check`] fails fast with [`CircuitOpenError`]
//! - After the cooldown, exactly one probe is admitted (half-open)
//! - Probe success closes the circuit; probe failure reopens it with a longer
//!   cooldown, capped at `max_cooldown`

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::data::{CircuitConfig, SourceName};
use crate::error::CircuitOpenError;

/// How long callers are told to wait while another caller holds the probe.
const PROBE_BUSY_WAIT: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Circuit {
    config:               CircuitConfig,
    state:                CircuitState,
    consecutive_failures: u32,
    opened_at:            Option<Instant>,
    cooldown:             Duration,
    probe_in_flight:      bool,
}

impl Circuit {
    fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            cooldown: config.cooldown,
            probe_in_flight: false,
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.probe_in_flight = false;
    }

    fn grow_cooldown(&mut self) {
        let grown = self.cooldown.mul_f64(self.config.backoff_factor.max(1.0));
        self.cooldown = grown.min(self.config.max_cooldown.max(self.config.cooldown));
    }
}

pub struct CircuitBreaker {
    default:   CircuitConfig,
    overrides: HashMap<SourceName, CircuitConfig>,
    circuits:  Mutex<HashMap<SourceName, Circuit>>,
}

impl CircuitBreaker {
    pub fn new(default: CircuitConfig) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
            circuits: Mutex::new(HashMap::new()),
        }
    }

    /// Per-source thresholds and cooldowns, independent of other sources.
    pub fn with_source(mut self, source: impl Into<SourceName>, config: CircuitConfig) -> Self {
        self.overrides.insert(source.into(), config);
        self
    }

    fn config_for(&self, source: &SourceName) -> CircuitConfig {
        self.overrides.get(source).copied().unwrap_or(self.default)
    }

    /// Admits a call to `source` or fails fast. The returned permit must be
    /// resolved with [`CircuitPermit::success`] or [`CircuitPermit::failure`];
    /// dropping it unresolved records nothing and frees a held probe slot.
    pub fn check(&self, source: &SourceName) -> Result<CircuitPermit<'_>, CircuitOpenError> {
        let mut circuits = self.circuits.lock();
        let circuit = circuits
            .entry(source.clone())
            .or_insert_with(|| Circuit::new(self.config_for(source)));
        let now = Instant::now();

        let probe = match circuit.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let elapsed = circuit
                    .opened_at
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(circuit.cooldown);
                if elapsed < circuit.cooldown {
                    return Err(CircuitOpenError {
                        source_name: source.clone(),
                        retry_after: circuit.cooldown - elapsed,
                    });
                }
                tracing::info!(source = %source, "circuit half-open, admitting probe");
                circuit.state = CircuitState::HalfOpen;
                circuit.probe_in_flight = true;
                true
            }
            CircuitState::HalfOpen => {
                if circuit.probe_in_flight {
                    return Err(CircuitOpenError {
                        source_name: source.clone(),
                        retry_after: PROBE_BUSY_WAIT.min(circuit.cooldown),
                    });
                }
                circuit.probe_in_flight = true;
                true
            }
        };

        Ok(CircuitPermit {
            breaker: self,
            source: source.clone(),
            probe,
            resolved: false,
        })
    }

    pub fn state(&self, source: &SourceName) -> CircuitState {
        self.circuits
            .lock()
            .get(source)
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn consecutive_failures(&self, source: &SourceName) -> u32 {
        self.circuits
            .lock()
            .get(source)
            .map(|c| c.consecutive_failures)
            .unwrap_or(0)
    }

    /// Open and still inside its cooldown.
    pub fn is_open(&self, source: &SourceName) -> bool {
        let circuits = self.circuits.lock();
        let Some(circuit) = circuits.get(source) else {
            return false;
        };
        match (circuit.state, circuit.opened_at) {
            (CircuitState::Open, Some(at)) => Instant::now().saturating_duration_since(at) < circuit.cooldown,
            (CircuitState::HalfOpen, _) => circuit.probe_in_flight,
            _ => false,
        }
    }

    fn record_success(&self, source: &SourceName, probe: bool) {
        let mut circuits = self.circuits.lock();
        let Some(circuit) = circuits.get_mut(source) else {
            return;
        };
        if probe {
            tracing::info!(source = %source, "probe succeeded, circuit closed");
        }
        if probe || circuit.state == CircuitState::Closed {
            circuit.state = CircuitState::Closed;
            circuit.consecutive_failures = 0;
            circuit.opened_at = None;
            circuit.cooldown = circuit.config.cooldown;
            circuit.probe_in_flight = false;
        }
    }

    fn record_failure(&self, source: &SourceName, probe: bool) {
        let mut circuits = self.circuits.lock();
        let Some(circuit) = circuits.get_mut(source) else {
            return;
        };
        let now = Instant::now();
        circuit.consecutive_failures = circuit.consecutive_failures.saturating_add(1);

        if probe {
            circuit.grow_cooldown();
            circuit.open(now);
            tracing::warn!(
                source = %source,
                cooldown = ?circuit.cooldown,
                "probe failed, circuit reopened"
            );
        } else if circuit.state == CircuitState::Closed
            && circuit.consecutive_failures >= circuit.config.failure_threshold
        {
            circuit.open(now);
            tracing::warn!(
                source = %source,
                failures = circuit.consecutive_failures,
                cooldown = ?circuit.cooldown,
                "circuit opened"
            );
        }
    }

    fn abandon_probe(&self, source: &SourceName) {
        if let Some(circuit) = self.circuits.lock().get_mut(source) {
            circuit.probe_in_flight = false;
        }
    }
}

/// Admission to call a source. Resolve it with the call's outcome.
#[must_use = "resolve the permit with success() or failure()"]
pub struct CircuitPermit<'a> {
    breaker:  &'a CircuitBreaker,
    source:   SourceName,
    probe:    bool,
    resolved: bool,
}

impl CircuitPermit<'_> {
    pub fn is_probe(&self) -> bool { self.probe }

    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.record_success(&self.source, self.probe);
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.record_failure(&self.source, self.probe);
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.probe {
            self.breaker.abandon_probe(&self.source);
        }
    }
}
