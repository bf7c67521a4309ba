//! Oscillation observation: flags a turn that looks like it's spinning
//! without making progress, without ever intervening.
//!
//! The turn engine keeps feeding every tool call it makes through
//! [`OscillationObserver::observe`] and publishes the resulting
//! [`OscillationReport`] as an `oscillation_observe` event. Nothing here
//! stops the loop, rejects a call, or injects anything back into the
//! conversation — that's left entirely to whatever is watching the event
//! stream (a human, or a future intervention layer this agent doesn't
//! have yet).

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};

const WINDOW: usize = 6;
const REPEAT_RATIO_THRESHOLD: f64 = 0.5;
const NOVELTY_RATIO_THRESHOLD: f64 = 0.5;
const NO_MUTATION_THRESHOLD: u32 = 2;

/// Snapshot of the observer's state after a single tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct OscillationReport {
    /// Fraction of the call-signature window identical to the call just
    /// observed.
    pub repeat_ratio: f64,
    /// Fraction of the call-signature window that is distinct.
    pub novelty_ratio: f64,
    /// Consecutive tool calls, up to and including this one, that did not
    /// mutate the workspace.
    pub no_mutation_steps: u32,
    pub possible_oscillation: bool,
}

/// Ring buffers of the last [`WINDOW`] tool-call signatures and output
/// fingerprints for a single session.
pub struct OscillationObserver {
    call_signatures: VecDeque<String>,
    /// `None` when the normalized output for that step was empty.
    output_fingerprints: VecDeque<Option<u64>>,
    no_mutation_steps: u32,
}

impl OscillationObserver {
    pub fn new() -> Self {
        Self {
            call_signatures: VecDeque::with_capacity(WINDOW),
            output_fingerprints: VecDeque::with_capacity(WINDOW),
            no_mutation_steps: 0,
        }
    }

    /// Build the signature of a tool call from its name and arguments —
    /// callers pass the already-serialised arguments so argument key
    /// ordering stays deterministic across calls.
    pub fn signature(tool_name: &str, arguments_json: &str) -> String {
        format!("{tool_name}:{arguments_json}")
    }

    /// Whitespace-collapsed, truncated-to-220-chars normalization of a
    /// tool output, matching what the turn engine feeds the context
    /// summarizer. Returns `None` if nothing is left after collapsing.
    fn normalize(output: &str) -> Option<String> {
        let collapsed = output.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            return None;
        }
        Some(collapsed.chars().take(220).collect())
    }

    fn fingerprint(output: &str) -> Option<u64> {
        let normalized = Self::normalize(output)?;
        let mut hasher = DefaultHasher::new();
        normalized.hash(&mut hasher);
        Some(hasher.finish())
    }

    /// Record one tool call and its result, and return the updated
    /// oscillation report. `mutated` is whether this call changed
    /// workspace state (a write, a patch, or a shell command that did).
    pub fn observe(&mut self, call_signature: String, output: &str, mutated: bool) -> OscillationReport {
        push_bounded(&mut self.call_signatures, call_signature.clone(), WINDOW);
        push_bounded(&mut self.output_fingerprints, Self::fingerprint(output), WINDOW);

        if mutated {
            self.no_mutation_steps = 0;
        } else {
            self.no_mutation_steps += 1;
        }

        let len = self.call_signatures.len();
        let repeat_count = self
            .call_signatures
            .iter()
            .filter(|s| **s == call_signature)
            .count();

        let output_len = self.output_fingerprints.len();
        let distinct_nonempty = self
            .output_fingerprints
            .iter()
            .filter_map(|f| f.as_ref())
            .collect::<std::collections::HashSet<_>>()
            .len();

        let repeat_ratio = repeat_count as f64 / len as f64;
        let novelty_ratio = distinct_nonempty as f64 / output_len as f64;
        let possible_oscillation = repeat_ratio >= REPEAT_RATIO_THRESHOLD
            && novelty_ratio <= NOVELTY_RATIO_THRESHOLD
            && self.no_mutation_steps >= NO_MUTATION_THRESHOLD;

        OscillationReport {
            repeat_ratio,
            novelty_ratio,
            no_mutation_steps: self.no_mutation_steps,
            possible_oscillation,
        }
    }
}

impl Default for OscillationObserver {
    fn default() -> Self {
        Self::new()
    }
}

fn push_bounded<T>(buf: &mut VecDeque<T>, value: T, capacity: usize) {
    if buf.len() == capacity {
        buf.pop_front();
    }
    buf.push_back(value);
}
