//! Context window budget tracking
//!
//! A [`ContextBudget`] pairs a model's context window with the tokens the
//! current history occupies. The compactor uses it to decide when to
//! summarize and the overflow guard uses its tier to decide how aggressively
//! to shrink tool output.

use serde::{Deserialize, Serialize};

/// How much room is left in the context window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetTier {
    Normal,
    Low,
    Critical,
}

impl BudgetTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetTier::Normal => "normal",
            BudgetTier::Low => "low",
            BudgetTier::Critical => "critical",
        }
    }

    /// Tier for a remaining percentage (0-100).
    pub fn from_remaining_percent(remaining_percent: f64, critical_percent: f64, low_percent: f64) -> Self {
        if remaining_percent < critical_percent {
            BudgetTier::Critical
        } else if remaining_percent < low_percent {
            BudgetTier::Low
        } else {
            BudgetTier::Normal
        }
    }
}

/// Token usage against a model's context window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContextBudget {
    pub token_limit: usize,
    pub used_tokens: usize,
}

impl ContextBudget {
    pub fn new(token_limit: usize, used_tokens: usize) -> Self {
        Self {
            token_limit,
            used_tokens,
        }
    }

    pub fn remaining_tokens(&self) -> usize {
        self.token_limit.saturating_sub(self.used_tokens)
    }

    /// Share of the window still free, 0-100
    pub fn remaining_percent(&self) -> f64 {
        if self.token_limit == 0 {
            return 0.0;
        }
        self.remaining_tokens() as f64 * 100.0 / self.token_limit as f64
    }

    /// Share of the window in use, 0.0-1.0 (may exceed 1.0 when over budget)
    pub fn usage_fraction(&self) -> f64 {
        if self.token_limit == 0 {
            return 1.0;
        }
        self.used_tokens as f64 / self.token_limit as f64
    }

    /// True once usage has reached `threshold` of the window.
    pub fn exceeds(&self, threshold: f64) -> bool {
        self.usage_fraction() >= threshold
    }

    pub fn tier(&self, critical_percent: f64, low_percent: f64) -> BudgetTier {
        BudgetTier::from_remaining_percent(self.remaining_percent(), critical_percent, low_percent)
    }
}
