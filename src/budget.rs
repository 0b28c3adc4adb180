use std::fmt;

/// Outcome of sizing a run against the remaining monthly quota.
#[derive(Debug, PartialEq, Eq)]
pub enum BudgetDecision {
    Skip(SkipReason),
    /// Fetch the earliest `days` of the missing dates.
    Proceed { days: usize },
}

#[derive(Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Remaining quota is below the safety buffer, or nothing is left after
    /// reserving it.
    BelowBuffer,
    /// Not enough quota for the whole gap and partial months are disallowed.
    PartialNotAllowed,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::BelowBuffer => write!(f, "remaining quota below safety buffer"),
            SkipReason::PartialNotAllowed => {
                write!(f, "insufficient quota and partial month not allowed")
            }
        }
    }
}

/// Decide how many missing days this run may attempt. The buffer is quota
/// deliberately left unspent; `allow_partial` gates fetching fewer days than
/// the whole gap.
pub fn plan(
    remaining: u64,
    safety_buffer: u64,
    missing: usize,
    allow_partial: bool,
) -> BudgetDecision {
    if remaining < safety_buffer {
        return BudgetDecision::Skip(SkipReason::BelowBuffer);
    }
    let available = (remaining - safety_buffer) as usize;
    if available == 0 {
        return BudgetDecision::Skip(SkipReason::BelowBuffer);
    }
    if available < missing {
        if !allow_partial {
            return BudgetDecision::Skip(SkipReason::PartialNotAllowed);
        }
        return BudgetDecision::Proceed { days: available };
    }
    BudgetDecision::Proceed { days: missing }
}
