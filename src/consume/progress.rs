//! Consumer-side bookkeeping for one evaluation.

use std::collections::HashMap;

use crate::error::CountMismatch;
use crate::message::GroupId;

/// Terminal or open state of one evaluation at one consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EvaluationOutcome {
    /// Still consuming.
    Open,
    /// Everything consumed and reported.
    Completed,
    /// Consumption failed terminally; reported upstream.
    Failed,
    /// The publisher stopped the evaluation, or this process shut down mid-consumption.
    Stopped,
    /// The evaluation was negotiated to other consumers.
    Declined,
}

impl EvaluationOutcome {
    /// True for every state except `Open`.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EvaluationOutcome::Open)
    }

    /// True for `Failed` and `Stopped`.
    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self, EvaluationOutcome::Failed | EvaluationOutcome::Stopped)
    }

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationOutcome::Open => "open",
            EvaluationOutcome::Completed => "completed",
            EvaluationOutcome::Failed => "failed",
            EvaluationOutcome::Stopped => "stopped",
            EvaluationOutcome::Declined => "declined",
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    expected: Option<u64>,
    actual: u64,
}

impl Tally {
    fn check(&self, scope: impl FnOnce() -> String) -> Result<(), CountMismatch> {
        match self.expected {
            Some(expected) if self.actual > expected => Err(CountMismatch {
                scope: scope(),
                expected,
                actual: self.actual,
            }),
            _ => Ok(()),
        }
    }

    fn is_done(&self) -> bool {
        self.expected == Some(self.actual)
    }
}

/// Expected versus actual statistics counts, evaluation-wide and per group.
///
/// Expected counts stay unknown until the publisher finalizes them; actual counts only grow.
/// Going past a finalized count is a [`CountMismatch`].
#[derive(Debug, Default)]
pub struct ExpectedCounts {
    total: Tally,
    groups: HashMap<GroupId, Tally>,
}

impl ExpectedCounts {
    /// Creates empty counts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one received statistics message.
    pub fn record(&mut self, group: Option<&GroupId>) -> Result<(), CountMismatch> {
        self.total.actual += 1;
        self.total.check(|| "evaluation".to_string())?;
        if let Some(group) = group {
            let tally = self.groups.entry(group.clone()).or_default();
            tally.actual += 1;
            tally.check(|| format!("group {group}"))?;
        }
        Ok(())
    }

    /// Finalizes the expected count of one group.
    pub fn finalize_group(&mut self, group: &GroupId, expected: u64) -> Result<(), CountMismatch> {
        let tally = self.groups.entry(group.clone()).or_default();
        tally.expected = Some(expected);
        tally.check(|| format!("group {group}"))
    }

    /// Finalizes the evaluation-wide expected count.
    pub fn finalize(&mut self, expected: u64) -> Result<(), CountMismatch> {
        self.total.expected = Some(expected);
        self.total.check(|| "evaluation".to_string())
    }

    /// True when the group is finalized and every one of its messages arrived.
    pub fn is_group_ready(&self, group: &GroupId) -> bool {
        self.groups.get(group).is_some_and(Tally::is_done)
    }

    /// True when the evaluation is finalized and every message arrived.
    pub fn is_complete(&self) -> bool {
        self.total.is_done()
    }

    /// Messages received so far.
    pub fn actual(&self) -> u64 {
        self.total.actual
    }

    /// Finalized evaluation-wide count.
    pub fn expected(&self) -> Option<u64> {
        self.total.expected
    }
}

/// Consumption progress of one evaluation at one consumer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConsumerProgress {
    /// Statistics successfully written (ungrouped plus aggregated groups).
    pub consumed: u64,
    /// Groups aggregated.
    pub groups: u64,
    /// Attempts that failed with a recoverable error and were retried.
    pub retries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completes_when_actual_meets_expected() {
        let mut counts = ExpectedCounts::new();
        counts.record(None).unwrap();
        assert!(!counts.is_complete(), "expected count not known yet");
        counts.finalize(2).unwrap();
        assert!(!counts.is_complete());
        counts.record(None).unwrap();
        assert!(counts.is_complete());
        assert_eq!(counts.expected(), Some(2));
    }

    #[test]
    fn test_overshoot_is_a_mismatch() {
        let mut counts = ExpectedCounts::new();
        counts.finalize(0).unwrap();
        let err = counts.record(None).unwrap_err();
        assert_eq!(err.scope, "evaluation");
        assert_eq!((err.expected, err.actual), (0, 1));

        let g = GroupId::new("g1");
        let mut counts = ExpectedCounts::new();
        counts.record(Some(&g)).unwrap();
        counts.record(Some(&g)).unwrap();
        let err = counts.finalize_group(&g, 1).unwrap_err();
        assert_eq!(err.scope, "group g1");
    }

    #[test]
    fn test_group_readiness_waits_for_late_statistics() {
        let g = GroupId::new("g1");
        let mut counts = ExpectedCounts::new();
        counts.finalize_group(&g, 2).unwrap();
        assert!(!counts.is_group_ready(&g));
        counts.record(Some(&g)).unwrap();
        counts.record(Some(&g)).unwrap();
        assert!(counts.is_group_ready(&g));
        assert!(!counts.is_group_ready(&GroupId::new("other")));
    }

    #[test]
    fn test_outcome_classes() {
        assert!(!EvaluationOutcome::Open.is_terminal());
        assert!(EvaluationOutcome::Declined.is_terminal());
        assert!(!EvaluationOutcome::Completed.is_failure());
        assert!(EvaluationOutcome::Stopped.is_failure());
    }
}
