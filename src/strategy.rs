//! Adaptive transport strategy.
//!
//! Keeps rolling latency and timeout statistics per destination and decides
//! whether the persistent transport should be used for the next request.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::StrategyConfig;
use crate::lockfree::LockFreeHashMap;
use crate::request::{Request, TransportKind};
use crate::response::Response;

/// Answers whether a live persistent connection exists for a URL.
pub trait ConnectivityProbe: Send + Sync {
    fn is_connected(&self, url: &str) -> bool;
}

/// Fixed-size latency window. The average is only recomputed when the window
/// is exactly full, so a partially filled window never yields an average.
#[derive(Debug)]
struct RollingWindow {
    samples: VecDeque<u64>,
    size: usize,
    average: Option<f64>,
}

impl RollingWindow {
    fn new(size: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(size),
            size,
            average: None,
        }
    }

    fn push(&mut self, latency_ms: u64) {
        if self.samples.len() == self.size {
            self.samples.pop_front();
        }
        self.samples.push_back(latency_ms);
        if self.samples.len() == self.size {
            let total: u64 = self.samples.iter().sum();
            self.average = Some(total as f64 / self.size as f64);
        }
    }

    fn clear(&mut self) {
        self.samples.clear();
        self.average = None;
    }
}

/// Per-destination statistics.
#[derive(Debug)]
pub struct TransportStrategyState {
    persistent_window: Mutex<RollingWindow>,
    inconstant_window: Mutex<RollingWindow>,
    persistent_timeouts: AtomicU32,
    inconstant_timeouts: AtomicU32,
    persistent_errors: AtomicU32,
    inconstant_errors: AtomicU32,
    awaiting: AtomicU32,
    resetting: AtomicBool,
}

/// Point-in-time copy of a destination's statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategySnapshot {
    pub persistent_samples: usize,
    pub inconstant_samples: usize,
    pub persistent_average: Option<f64>,
    pub inconstant_average: Option<f64>,
    pub persistent_timeouts: u32,
    pub inconstant_timeouts: u32,
    pub persistent_errors: u32,
    pub inconstant_errors: u32,
    pub awaiting: u32,
}

impl TransportStrategyState {
    fn new(window_size: usize) -> Self {
        Self {
            persistent_window: Mutex::new(RollingWindow::new(window_size)),
            inconstant_window: Mutex::new(RollingWindow::new(window_size)),
            persistent_timeouts: AtomicU32::new(0),
            inconstant_timeouts: AtomicU32::new(0),
            persistent_errors: AtomicU32::new(0),
            inconstant_errors: AtomicU32::new(0),
            awaiting: AtomicU32::new(0),
            resetting: AtomicBool::new(false),
        }
    }

    fn window(&self, kind: TransportKind) -> &Mutex<RollingWindow> {
        match kind {
            TransportKind::Persistent => &self.persistent_window,
            _ => &self.inconstant_window,
        }
    }

    fn timeouts(&self, kind: TransportKind) -> &AtomicU32 {
        match kind {
            TransportKind::Persistent => &self.persistent_timeouts,
            _ => &self.inconstant_timeouts,
        }
    }

    fn errors(&self, kind: TransportKind) -> &AtomicU32 {
        match kind {
            TransportKind::Persistent => &self.persistent_errors,
            _ => &self.inconstant_errors,
        }
    }

    /// Clears windows and error counters. Returns false if another caller is
    /// already resetting.
    fn reset(&self) -> bool {
        if self
            .resetting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.persistent_window.lock().clear();
        self.inconstant_window.lock().clear();
        self.persistent_timeouts.store(0, Ordering::Release);
        self.inconstant_timeouts.store(0, Ordering::Release);
        self.persistent_errors.store(0, Ordering::Release);
        self.inconstant_errors.store(0, Ordering::Release);

        self.resetting.store(false, Ordering::Release);
        true
    }

    fn snapshot(&self) -> StrategySnapshot {
        let persistent = self.persistent_window.lock();
        let inconstant = self.inconstant_window.lock();
        StrategySnapshot {
            persistent_samples: persistent.samples.len(),
            inconstant_samples: inconstant.samples.len(),
            persistent_average: persistent.average,
            inconstant_average: inconstant.average,
            persistent_timeouts: self.persistent_timeouts.load(Ordering::Acquire),
            inconstant_timeouts: self.inconstant_timeouts.load(Ordering::Acquire),
            persistent_errors: self.persistent_errors.load(Ordering::Acquire),
            inconstant_errors: self.inconstant_errors.load(Ordering::Acquire),
            awaiting: self.awaiting.load(Ordering::Acquire),
        }
    }
}

/// Returned by [`AdaptiveTransportStrategy::before_process`] and consumed by
/// [`AdaptiveTransportStrategy::after_process`].
#[derive(Debug)]
pub struct ProcessTicket {
    destination: String,
    kind: TransportKind,
    started: Instant,
}

impl ProcessTicket {
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

pub struct AdaptiveTransportStrategy {
    config: StrategyConfig,
    probe: Arc<dyn ConnectivityProbe>,
    states: LockFreeHashMap<String, Arc<TransportStrategyState>>,
}

impl AdaptiveTransportStrategy {
    pub fn new(config: StrategyConfig, probe: Arc<dyn ConnectivityProbe>) -> Self {
        Self {
            config,
            probe,
            states: LockFreeHashMap::new(),
        }
    }

    fn state(&self, destination: &str) -> Arc<TransportStrategyState> {
        let window_size = self.config.window_size.max(1);
        self.states
            .get_or_insert_with(destination.to_string(), || Arc::new(TransportStrategyState::new(window_size)))
    }

    /// Whether the next request for this destination should go over the
    /// persistent transport. Checks run cheapest first.
    pub fn can_use_persistent(&self, request: &Request) -> bool {
        let Some(url) = request.persistent_url() else {
            return false;
        };
        if !self.probe.is_connected(url) {
            return false;
        }

        let destination = request.destination_key().unwrap_or(url);
        let state = self.state(destination);

        let timeouts = state.persistent_timeouts.load(Ordering::Acquire);
        if timeouts > self.config.timeout_threshold {
            // 只影响之后的判断，本次仍然拒绝
            if state.reset() {
                tracing::warn!(
                    "[STRATEGY] {} consecutive persistent timeouts on {}, statistics reset",
                    timeouts,
                    destination
                );
            }
            return false;
        }

        let awaiting = state.awaiting.load(Ordering::Acquire);
        if awaiting > self.config.awaiting_threshold {
            tracing::debug!("[STRATEGY] {} persistent requests awaiting on {}", awaiting, destination);
            return false;
        }

        let persistent_average = state.persistent_window.lock().average;
        let inconstant_average = state.inconstant_window.lock().average;
        if let (Some(persistent), Some(inconstant)) = (persistent_average, inconstant_average) {
            if persistent > inconstant * self.config.latency_ratio {
                tracing::debug!(
                    "[STRATEGY] persistent average {:.1}ms exceeds {:.1}x inconstant average {:.1}ms on {}",
                    persistent,
                    self.config.latency_ratio,
                    inconstant,
                    destination
                );
                return false;
            }
        }

        true
    }

    pub fn before_process(&self, destination: &str, kind: TransportKind) -> ProcessTicket {
        if kind == TransportKind::Persistent {
            self.state(destination).awaiting.fetch_add(1, Ordering::AcqRel);
        }
        ProcessTicket {
            destination: destination.to_string(),
            kind,
            started: Instant::now(),
        }
    }

    pub fn after_process(&self, ticket: ProcessTicket, response: &Response) {
        let latency = ticket.elapsed();
        let state = self.state(&ticket.destination);
        if ticket.kind == TransportKind::Persistent {
            let _ = state
                .awaiting
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)));
        }
        Self::observe(&state, ticket.kind, latency, response);
    }

    /// Closes a bracket without recording a sample, for cancelled calls.
    pub fn discard(&self, ticket: ProcessTicket) {
        if ticket.kind == TransportKind::Persistent {
            let _ = self
                .state(&ticket.destination)
                .awaiting
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)));
        }
    }

    /// Records one observation without the before/after bracket.
    pub fn record(&self, destination: &str, kind: TransportKind, latency: Duration, response: &Response) {
        let state = self.state(destination);
        Self::observe(&state, kind, latency, response);
    }

    fn observe(state: &TransportStrategyState, kind: TransportKind, latency: Duration, response: &Response) {
        state.window(kind).lock().push(latency.as_millis() as u64);

        if response.is_timeout() {
            state.timeouts(kind).fetch_add(1, Ordering::AcqRel);
        } else {
            state.timeouts(kind).store(0, Ordering::Release);
            if !response.is_success() {
                state.errors(kind).fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    pub fn snapshot(&self, destination: &str) -> Option<StrategySnapshot> {
        self.states.get(&destination.to_string()).map(|state| state.snapshot())
    }
}

impl std::fmt::Debug for AdaptiveTransportStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveTransportStrategy")
            .field("config", &self.config)
            .field("destinations", &self.states.len())
            .finish()
    }
}
