//! Program extraction from model replies

use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```([A-Za-z0-9_+.-]*)[ \t]*\r?\n(.*?)```").expect("valid regex"));

/// Pull the program out of a reply
///
/// Last ```python block, else the last fenced block of any language, else the
/// whole reply.
pub fn extract_program(reply: &str) -> String {
    debug!(reply_len = reply.len(), "extract_program: called");
    let blocks: Vec<(String, &str)> = FENCE_RE
        .captures_iter(reply)
        .filter_map(|caps| {
            let lang = caps.get(1).map(|m| m.as_str().to_ascii_lowercase()).unwrap_or_default();
            caps.get(2).map(|body| (lang, body.as_str()))
        })
        .collect();

    let python = blocks
        .iter()
        .rev()
        .find(|(lang, _)| lang == "python" || lang == "py" || lang == "python3");
    let chosen = python.or_else(|| blocks.last()).map(|(_, body)| *body);

    match chosen {
        Some(body) => {
            debug!(blocks = blocks.len(), "extract_program: fenced block found");
            body.trim_end().to_string()
        }
        None => {
            debug!("extract_program: no fenced block, using whole reply");
            reply.trim().to_string()
        }
    }
}
