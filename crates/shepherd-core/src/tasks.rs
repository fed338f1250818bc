//! Task-Call Tracker.
//!
//! Correlates delegation requests observed in supervisor output with the
//! subagent files the mirror discovers. The supervisor records an invocation
//! when an assistant entry carries a `Task` tool-use block; the mirror
//! resolves it by prompt text and removes it from the unresolved set.

use std::collections::HashMap;
use std::sync::Mutex;

/// Prompt snippet length used for prefix matching.
pub const PROMPT_SNIPPET_CHARS: usize = 100;

#[derive(Debug, Clone)]
struct TaskCall {
    delegation_id: String,
    prompt: String,
}

/// In-memory map of unresolved delegations, partitioned by session id.
///
/// Insertion order is preserved so "first match wins" is deterministic.
#[derive(Debug, Default)]
pub struct TaskCallTracker {
    calls: Mutex<HashMap<String, Vec<TaskCall>>>,
}

impl TaskCallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a delegation observed in supervisor output.
    pub fn record(&self, session_id: &str, delegation_id: &str, prompt: &str) {
        let mut map = self.calls.lock().unwrap();
        let calls = map.entry(session_id.to_string()).or_default();
        if calls.iter().any(|c| c.delegation_id == delegation_id) {
            return;
        }
        calls.push(TaskCall {
            delegation_id: delegation_id.to_string(),
            prompt: prompt.to_string(),
        });
    }

    /// All still-unresolved `(delegation_id, prompt)` pairs for a session.
    pub fn unresolved(&self, session_id: &str) -> Vec<(String, String)> {
        let map = self.calls.lock().unwrap();
        map.get(session_id)
            .map(|calls| {
                calls
                    .iter()
                    .map(|c| (c.delegation_id.clone(), c.prompt.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Resolve a delegation by comparing `text` against unresolved prompts.
    ///
    /// Exact match wins first; otherwise the first prompt whose
    /// 100-character snippet prefixes `text` wins. The winner is removed
    /// from the unresolved set and its delegation id returned. The heuristic
    /// is approximate by nature and kept as-is for behavioral parity.
    pub fn resolve_by_prompt(&self, session_id: &str, text: &str) -> Option<String> {
        let mut map = self.calls.lock().unwrap();
        let calls = map.get_mut(session_id)?;

        let pos = calls
            .iter()
            .position(|c| c.prompt == text)
            .or_else(|| {
                calls.iter().position(|c| {
                    let snippet: String = c.prompt.chars().take(PROMPT_SNIPPET_CHARS).collect();
                    !snippet.is_empty() && text.starts_with(&snippet)
                })
            })?;

        let call = calls.remove(pos);
        Some(call.delegation_id)
    }

    /// Abandon every unresolved delegation for a session (session ended).
    pub fn abandon_session(&self, session_id: &str) {
        self.calls.lock().unwrap().remove(session_id);
    }
}
