//! Embedded prompts
//!
//! These are compiled into the binary from .pmt files at build time.

use tracing::debug;

/// System prompt shared by every request
pub const SYSTEM: &str = include_str!("../../prompts/system.pmt");

/// Mathematical model request (formulate mode)
pub const FORMULATE: &str = include_str!("../../prompts/formulate.pmt");

/// Audit of a draft model (formulate mode)
pub const REVIEW: &str = include_str!("../../prompts/review.pmt");

/// First program request
pub const GENERATE: &str = include_str!("../../prompts/generate.pmt");

/// Program request after a failed attempt
pub const REPAIR: &str = include_str!("../../prompts/repair.pmt");

/// Get the embedded prompt by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    debug!(%name, "get_embedded: called");
    match name {
        "system" => Some(SYSTEM),
        "formulate" => Some(FORMULATE),
        "review" => Some(REVIEW),
        "generate" => Some(GENERATE),
        "repair" => Some(REPAIR),
        _ => {
            debug!("get_embedded: no match found");
            None
        }
    }
}
