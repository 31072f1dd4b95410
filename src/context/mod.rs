//! Token accounting: local estimation and context window budgets

pub mod token_budget;
pub mod token_estimator;

pub use token_budget::{BudgetTier, ContextBudget};
pub use token_estimator::{local_estimator, ByteHeuristicEstimator, TiktokenEstimator, TokenEstimator};
