//! Repair loop: generate a program, run it, feed failures back until solved
//!
//! One `RepairEngine` is shared by every concurrent invocation; each call to
//! `solve` owns its own `RepairContext`.

mod context;
mod engine;
mod extract;

pub use context::RepairContext;
pub use engine::{RepairEngine, RepairOptions};
pub use extract::extract_program;
