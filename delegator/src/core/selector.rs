//! Deterministic mapping from model-chosen agent names to loop targets.

use crate::core::types::{END_SENTINEL, ExecutorKind, Target};

/// Prefix some models copy from tool-call naming (`call_connector_agent`).
const CALL_PREFIX: &str = "call_";

/// Strip whitespace, surrounding quotes and the `call_` prefix from an agent name.
pub fn normalize_agent_name(name: &str) -> String {
    let trimmed = name.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`');
    let lowered = trimmed.to_lowercase();
    match lowered.strip_prefix(CALL_PREFIX) {
        Some(rest) => rest.to_string(),
        None => lowered,
    }
}

/// Resolve an agent name to a target.
///
/// - `END` (any case) is the terminal sentinel.
/// - Executors match by keyword substring, checked in [`ExecutorKind::ALL`] order,
///   so `"connector_agent"` and `"gcs storage tool"` both route to storage.
/// - Names mentioning the resolver select it.
///
/// Returns `None` when nothing matches; the loop treats that as "ask again".
pub fn select_target(agent: &str) -> Option<Target> {
    let name = normalize_agent_name(agent);
    if name.eq_ignore_ascii_case(END_SENTINEL) {
        return Some(Target::End);
    }
    for kind in ExecutorKind::ALL {
        if kind.keywords().iter().any(|kw| name.contains(kw)) {
            return Some(Target::Executor(kind));
        }
    }
    if name.contains("resolver") {
        return Some(Target::Resolver);
    }
    None
}
