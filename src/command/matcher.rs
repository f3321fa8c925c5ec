//! Value matching for conditional writes
//!
//! Only the primary owner evaluates a matcher. Backups never do.

use serde::{Deserialize, Serialize};

use super::write::Value;

/// Condition a primary checks against the existing value before writing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueMatcher {
    /// Unconditional write
    Always,
    /// Existing value must equal the expected one (`None` = absent)
    Expected(Option<Value>),
    /// Existing value must equal the expected one or the new one
    ExpectedOrNew(Option<Value>),
    /// A value must be present
    NonNull,
}

impl ValueMatcher {
    /// Whether the write may proceed given the existing and new values.
    pub fn matches(&self, existing: Option<&Value>, new: Option<&Value>) -> bool {
        match self {
            ValueMatcher::Always => true,
            ValueMatcher::Expected(expected) => existing == expected.as_ref(),
            ValueMatcher::ExpectedOrNew(expected) => {
                existing == expected.as_ref() || existing == new
            }
            ValueMatcher::NonNull => existing.is_some(),
        }
    }

    /// Whether a match holds only because the new value is already in
    /// place, i.e. an earlier attempt of the same write already applied.
    pub fn matched_by_new_value(&self, existing: Option<&Value>, new: Option<&Value>) -> bool {
        match self {
            ValueMatcher::ExpectedOrNew(expected) => {
                existing != expected.as_ref() && existing == new
            }
            _ => false,
        }
    }

    /// The expected value, for matchers that carry one
    pub fn expected(&self) -> Option<&Value> {
        match self {
            ValueMatcher::Expected(expected) | ValueMatcher::ExpectedOrNew(expected) => {
                expected.as_ref()
            }
            _ => None,
        }
    }

    /// The relaxed matcher used when a command is retried.
    ///
    /// A retried write may find its own effect from the previous attempt,
    /// so `Expected` also accepts the new value and `NonNull` stops
    /// requiring presence.
    pub fn for_retry(&self) -> Self {
        match self {
            ValueMatcher::Expected(expected) => ValueMatcher::ExpectedOrNew(expected.clone()),
            ValueMatcher::NonNull => ValueMatcher::Always,
            other => other.clone(),
        }
    }
}
