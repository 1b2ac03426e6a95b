//! Explicit fallback state machine shared by the source aggregators.
//!
//! Every aggregator degrades through the same three tiers. Errors,
//! timeouts and empty result sets are all a [`FetchOutcome::Miss`]; the
//! transition function is pure so the policy is testable on its own.

/// Quality tier currently being attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackTier {
    /// Exact-scope external query.
    Primary,
    /// Relaxed-scope external query.
    Secondary,
    /// Deterministic local default. Performs no network I/O, cannot fail.
    Default,
}

/// Result of one tier attempt, as seen by the fallback policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Hit,
    /// Error, timeout, non-2xx or empty result set.
    Miss,
}

/// Next tier to attempt, or `None` when the traversal is over (a hit, or
/// a miss on the final tier). There is no retry beyond this single
/// traversal.
pub fn advance(tier: FallbackTier, outcome: FetchOutcome) -> Option<FallbackTier> {
    match (tier, outcome) {
        (_, FetchOutcome::Hit) => None,
        (FallbackTier::Primary, FetchOutcome::Miss) => Some(FallbackTier::Secondary),
        (FallbackTier::Secondary, FetchOutcome::Miss) => Some(FallbackTier::Default),
        (FallbackTier::Default, FetchOutcome::Miss) => None,
    }
}
