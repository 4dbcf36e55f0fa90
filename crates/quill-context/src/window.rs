//! Sliding-window trimming of conversation history to a token budget.

use quill_types::{ConversationTurn, TokenBudget};

use crate::token::TokenEstimator;

/// What a trim kept and dropped, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowReport {
    pub kept: usize,
    pub dropped: usize,
    pub estimated_tokens: usize,
    /// Estimated cost of the most recent turn on its own.
    pub last_turn_tokens: usize,
}

/// Keep the longest suffix of `turns` whose estimated cost fits `budget`.
///
/// The result is in chronological order. If the most recent turn alone does
/// not fit, the result is empty.
pub fn trim(
    turns: &[ConversationTurn],
    budget: TokenBudget,
    estimator: &dyn TokenEstimator,
) -> Vec<ConversationTurn> {
    trim_with_report(turns, budget, estimator).0
}

/// Same as [`trim`], also reporting what was kept.
pub fn trim_with_report(
    turns: &[ConversationTurn],
    budget: TokenBudget,
    estimator: &dyn TokenEstimator,
) -> (Vec<ConversationTurn>, WindowReport) {
    let budget = budget.get();
    let mut total = 0usize;
    let mut kept = Vec::new();
    let mut last_turn_tokens = 0usize;

    // Walk newest-first; the first turn that does not fit closes the window.
    for (i, turn) in turns.iter().rev().enumerate() {
        let cost = estimator.estimate(&turn.content);
        if i == 0 {
            last_turn_tokens = cost;
        }
        if total + cost > budget {
            break;
        }
        total += cost;
        kept.push(turn.clone());
    }
    kept.reverse();

    let report = WindowReport {
        kept: kept.len(),
        dropped: turns.len() - kept.len(),
        estimated_tokens: total,
        last_turn_tokens,
    };
    (kept, report)
}
