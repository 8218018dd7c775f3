//! Trigger patterns electing detail windows for persistence.
//!
//! The agent evaluates every invocation considered for detail capture
//! against this policy; a match raises the lane's `marked_event_seen` flag,
//! which elects the current detail ring for submission instead of in-place
//! recycling. Literal patterns cost one precomputed hash probe; regex
//! patterns are compiled once and cached. An invalid regex degrades to a
//! literal match on its source text rather than failing policy construction.

use crate::symbols::{fnv1a_64, fnv1a_64_ci, SymbolHashSet};
use regex::Regex;

/// Case handling for literal trigger patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseMode {
    Sensitive,
    Insensitive,
}

/// One configured trigger.
#[derive(Debug, Clone)]
pub enum TriggerPattern {
    /// Exact symbol-name match.
    Literal { pattern: String, case: CaseMode },
    /// Regular-expression match over the symbol name.
    Regex { pattern: String },
}

impl TriggerPattern {
    /// Case-insensitive literal.
    pub fn literal(pattern: impl Into<String>) -> Self {
        Self::Literal {
            pattern: pattern.into(),
            case: CaseMode::Insensitive,
        }
    }

    /// Regex trigger.
    pub fn regex(pattern: impl Into<String>) -> Self {
        Self::Regex {
            pattern: pattern.into(),
        }
    }
}

/// Compiled marking policy.
#[derive(Debug)]
pub struct MarkingPolicy {
    exact: SymbolHashSet,
    folded: SymbolHashSet,
    regexes: Vec<Regex>,
    pattern_count: usize,
}

impl MarkingPolicy {
    /// Compiles the ordered pattern list. Regexes that fail to compile fall
    /// back to case-sensitive literal matching on the pattern text.
    pub fn new(patterns: &[TriggerPattern]) -> Self {
        let mut exact = SymbolHashSet::new();
        let mut folded = SymbolHashSet::new();
        let mut regexes = Vec::new();

        for pattern in patterns {
            match pattern {
                TriggerPattern::Literal { pattern, case } => match case {
                    CaseMode::Sensitive => exact.insert(fnv1a_64(pattern)),
                    CaseMode::Insensitive => folded.insert(fnv1a_64_ci(pattern)),
                },
                TriggerPattern::Regex { pattern } => match Regex::new(pattern) {
                    Ok(re) => regexes.push(re),
                    Err(err) => {
                        tracing::warn!(
                            pattern = %pattern,
                            error = %err,
                            "invalid trigger regex, matching it literally"
                        );
                        exact.insert(fnv1a_64(pattern));
                    }
                },
            }
        }

        Self {
            exact,
            folded,
            regexes,
            pattern_count: patterns.len(),
        }
    }

    /// Policy with no triggers: nothing is ever marked.
    pub fn disabled() -> Self {
        Self::new(&[])
    }

    /// Returns `true` if no trigger is configured.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pattern_count == 0
    }

    /// Evaluates a symbol. Literal probes first (hash lookups), regexes
    /// after, in configuration order.
    pub fn matches(&self, symbol: &str) -> bool {
        if self.pattern_count == 0 {
            return false;
        }
        if self.exact.contains(fnv1a_64(symbol)) || self.folded.contains(fnv1a_64_ci(symbol)) {
            return true;
        }
        self.regexes.iter().any(|re| re.is_match(symbol))
    }
}
