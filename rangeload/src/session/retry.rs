//! Per-part retry budgets.

use std::collections::HashMap;

use crate::plan::PartId;

/// Remaining attempts per part across all attempts of one download.
///
/// A part gets the default budget the first time it is charged.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    default: u32,
    remaining: HashMap<PartId, u32>,
}

impl RetryBudget {
    /// Create budgets of `default` attempts per part.
    pub fn new(default: u32) -> Self {
        Self {
            default,
            remaining: HashMap::new(),
        }
    }

    /// Charge one failure to `part` and return what is left.
    ///
    /// The attempt may be retried only while the result is positive.
    pub fn consume(&mut self, part: PartId) -> u32 {
        let remaining = self.remaining.entry(part).or_insert(self.default);
        *remaining = remaining.saturating_sub(1);
        *remaining
    }

    /// Budget left for `part` without charging it.
    pub fn remaining(&self, part: PartId) -> u32 {
        self.remaining.get(&part).copied().unwrap_or(self.default)
    }
}
