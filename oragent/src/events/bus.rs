//! Event Bus - central pub/sub system for oragent events
//!
//! The EventBus uses tokio broadcast channels to deliver events to all subscribers.
//! Repair loops and the batch orchestrator emit; the CLI progress printer subscribes.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::OrEvent;
use crate::domain::OutcomeKind;

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

/// Central event bus for solver activity
pub struct EventBus {
    tx: broadcast::Sender<OrEvent>,
}

impl EventBus {
    /// Create a new event bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Create a new event bus with default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers
    ///
    /// Fire-and-forget: with no subscribers the event is dropped; a lagging
    /// subscriber loses the oldest events.
    pub fn emit(&self, event: OrEvent) {
        debug!(event_type = event.event_type(), problem_id = ?event.problem_id(), "EventBus::emit");
        let _ = self.tx.send(event);
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<OrEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Create an emitter handle bound to one problem
    pub fn emitter_for(&self, problem_id: impl Into<String>) -> EventEmitter {
        let problem_id = problem_id.into();
        debug!(%problem_id, "EventBus::emitter_for: creating emitter");
        EventEmitter {
            tx: Some(self.tx.clone()),
            problem_id,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Handle for a repair loop to emit events without owning the bus
///
/// A detached emitter (no bus configured) silently drops everything.
#[derive(Clone)]
pub struct EventEmitter {
    tx: Option<broadcast::Sender<OrEvent>>,
    problem_id: String,
}

impl EventEmitter {
    /// Emitter that goes nowhere
    pub fn detached(problem_id: impl Into<String>) -> Self {
        Self {
            tx: None,
            problem_id: problem_id.into(),
        }
    }

    pub fn problem_id(&self) -> &str {
        &self.problem_id
    }

    /// Emit a raw event
    pub fn emit(&self, event: OrEvent) {
        if let Some(tx) = &self.tx {
            debug!(event_type = event.event_type(), "EventEmitter::emit");
            let _ = tx.send(event);
        }
    }

    // === Convenience methods ===

    pub fn problem_started(&self, max_attempts: u32) {
        self.emit(OrEvent::ProblemStarted {
            problem_id: self.problem_id.clone(),
            max_attempts,
        });
    }

    pub fn problem_finished(&self, solved: bool, attempts_used: u32) {
        self.emit(OrEvent::ProblemFinished {
            problem_id: self.problem_id.clone(),
            solved,
            attempts_used,
        });
    }

    pub fn formulation_started(&self) {
        self.emit(OrEvent::FormulationStarted {
            problem_id: self.problem_id.clone(),
        });
    }

    pub fn attempt_started(&self, attempt: u32) {
        self.emit(OrEvent::AttemptStarted {
            problem_id: self.problem_id.clone(),
            attempt,
        });
    }

    pub fn attempt_finished(&self, attempt: u32, outcome: OutcomeKind, duration_ms: u64) {
        self.emit(OrEvent::AttemptFinished {
            problem_id: self.problem_id.clone(),
            attempt,
            outcome,
            duration_ms,
        });
    }

    pub fn provider_retry(&self, retry: u32, backoff_ms: u64, error: &str) {
        self.emit(OrEvent::ProviderRetry {
            problem_id: self.problem_id.clone(),
            retry,
            backoff_ms,
            error: error.to_string(),
        });
    }
}

/// Create a shared event bus with default capacity
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::with_default_capacity())
}
