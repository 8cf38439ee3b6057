//! Sub-request gating.
//!
//! [`decide`] is a pure function over the facts known when a request is
//! paused. The session feeds it the elapsed time, the number of requests
//! already allowed, and whether the document has been extracted.

use std::time::Duration;

use crate::blocklist::BlockList;
use crate::engine::ResourceClass;

/// Network volume a single render may spend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestBudget {
    pub max_requests: usize,
    /// Requests issued after this much session time are aborted.
    pub window: Duration,
}

impl Default for RequestBudget {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RequestFacts<'a> {
    pub url: &'a str,
    pub resource: ResourceClass,
    pub elapsed: Duration,
    pub allowed_so_far: usize,
    pub extracted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    WindowElapsed,
    BudgetExhausted,
    Extracted,
    Blocked,
    UnwantedResource,
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortReason::WindowElapsed => "window_elapsed",
            AbortReason::BudgetExhausted => "budget_exhausted",
            AbortReason::Extracted => "extracted",
            AbortReason::Blocked => "blocked",
            AbortReason::UnwantedResource => "unwanted_resource",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Continue without spending budget.
    Pass,
    /// Continue and count against the budget.
    Allow,
    Abort(AbortReason),
}

pub fn decide(facts: &RequestFacts<'_>, budget: &RequestBudget, blocklist: &BlockList) -> Verdict {
    if is_data_uri(facts.url) {
        return Verdict::Pass;
    }
    if facts.elapsed > budget.window {
        return Verdict::Abort(AbortReason::WindowElapsed);
    }
    if facts.allowed_so_far >= budget.max_requests {
        return Verdict::Abort(AbortReason::BudgetExhausted);
    }
    if facts.extracted {
        return Verdict::Abort(AbortReason::Extracted);
    }
    if blocklist.is_blocked(facts.url) {
        return Verdict::Abort(AbortReason::Blocked);
    }
    if matches!(
        facts.resource,
        ResourceClass::Manifest | ResourceClass::Other
    ) {
        return Verdict::Abort(AbortReason::UnwantedResource);
    }
    Verdict::Allow
}

fn is_data_uri(url: &str) -> bool {
    url.get(..5)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("data:"))
}
