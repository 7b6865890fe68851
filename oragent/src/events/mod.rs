//! Event bus for live progress
//!
//! Every repair loop step and every finished batch item emits an event on a
//! `tokio::sync::broadcast` channel. Consumers (the CLI progress line, tests)
//! subscribe; emitting with no subscribers is a no-op.

mod bus;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter, create_event_bus};
pub use types::OrEvent;
