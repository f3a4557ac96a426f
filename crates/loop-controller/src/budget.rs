use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

/// Default threshold for the "repeated denial aborts the run" rule
/// referenced in the agent loop's failure semantics.
pub const DEFAULT_DENIAL_ABORT_THRESHOLD: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetError {
    StepBudgetExceeded,
    WallTimeExceeded,
}

/// Step and wall-clock budget for one run, plus the per-`approval_key`
/// denial counter the agent loop consults to decide whether to abort.
///
/// `try_consume_tool_step` is the single seam that enforces the step
/// budget: a rejected call leaves the counter unchanged, it is never
/// incremented then rolled back.
pub struct Budget {
    max_steps: AtomicU32,
    steps_consumed: AtomicU32,
    max_wall_time_sec: AtomicU64,
    has_wall_time_limit: std::sync::atomic::AtomicBool,
    started_at: Instant,
    denial_counts: Mutex<HashMap<String, u32>>,
}

impl Budget {
    pub fn new(max_steps: u32, max_wall_time_sec: Option<u64>) -> Self {
        Self {
            max_steps: AtomicU32::new(max_steps),
            steps_consumed: AtomicU32::new(0),
            max_wall_time_sec: AtomicU64::new(max_wall_time_sec.unwrap_or(0)),
            has_wall_time_limit: std::sync::atomic::AtomicBool::new(max_wall_time_sec.is_some()),
            started_at: Instant::now(),
            denial_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn steps_consumed(&self) -> u32 {
        self.steps_consumed.load(Ordering::SeqCst)
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps.load(Ordering::SeqCst)
    }

    fn wall_time_exceeded(&self) -> bool {
        if !self.has_wall_time_limit.load(Ordering::SeqCst) {
            return false;
        }
        let limit = self.max_wall_time_sec.load(Ordering::SeqCst);
        self.started_at.elapsed().as_secs() >= limit
    }

    /// Turn-level check: wall time only. Step consumption happens per tool
    /// dispatch through `try_consume_tool_step`.
    pub fn check_wall_time(&self) -> Result<(), BudgetError> {
        if self.wall_time_exceeded() {
            Err(BudgetError::WallTimeExceeded)
        } else {
            Ok(())
        }
    }

    /// Attempt to consume one tool-dispatch step against the budget.
    pub fn try_consume_tool_step(&self) -> Result<(), BudgetError> {
        if self.wall_time_exceeded() {
            return Err(BudgetError::WallTimeExceeded);
        }
        let result = self.steps_consumed.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
            if current >= self.max_steps.load(Ordering::SeqCst) {
                None
            } else {
                Some(current + 1)
            }
        });
        match result {
            Ok(_) => Ok(()),
            Err(_) => Err(BudgetError::StepBudgetExceeded),
        }
    }

    /// Apply `increase_budget_continue` recovery: raise both ceilings.
    pub fn increase_budget(&self, extra_steps: u32, extra_wall_time_sec: u64) {
        self.max_steps.fetch_add(extra_steps, Ordering::SeqCst);
        if extra_wall_time_sec > 0 {
            self.max_wall_time_sec.fetch_add(extra_wall_time_sec, Ordering::SeqCst);
            self.has_wall_time_limit.store(true, Ordering::SeqCst);
        }
    }

    /// Record a denial against `approval_key`, returning the new count.
    pub fn record_denial(&self, approval_key: &str) -> u32 {
        let mut counts = self.denial_counts.lock();
        let entry = counts.entry(approval_key.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn denial_count(&self, approval_key: &str) -> u32 {
        self.denial_counts.lock().get(approval_key).copied().unwrap_or(0)
    }

    pub fn exceeds_denial_threshold(&self, approval_key: &str, threshold: u32) -> bool {
        self.denial_count(approval_key) >= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_max_steps_rejects_first_step() {
        let budget = Budget::new(0, None);
        assert_eq!(budget.try_consume_tool_step(), Err(BudgetError::StepBudgetExceeded));
        assert_eq!(budget.steps_consumed(), 0);
    }

    #[test]
    fn step_at_boundary_succeeds_next_is_rejected() {
        let budget = Budget::new(2, None);
        assert!(budget.try_consume_tool_step().is_ok());
        assert!(budget.try_consume_tool_step().is_ok());
        assert_eq!(budget.try_consume_tool_step(), Err(BudgetError::StepBudgetExceeded));
        assert_eq!(budget.steps_consumed(), 2);
    }

    #[test]
    fn rejection_does_not_increment_counter() {
        let budget = Budget::new(1, None);
        budget.try_consume_tool_step().unwrap();
        for _ in 0..5 {
            let _ = budget.try_consume_tool_step();
        }
        assert_eq!(budget.steps_consumed(), 1);
    }

    #[test]
    fn increase_budget_raises_step_ceiling() {
        let budget = Budget::new(1, None);
        budget.try_consume_tool_step().unwrap();
        assert!(budget.try_consume_tool_step().is_err());
        budget.increase_budget(1, 0);
        assert!(budget.try_consume_tool_step().is_ok());
    }

    #[test]
    fn wall_time_exceeded_rejects_regardless_of_steps_remaining() {
        let budget = Budget::new(100, Some(0));
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(budget.try_consume_tool_step(), Err(BudgetError::WallTimeExceeded));
    }

    #[test]
    fn denial_counter_reaches_default_threshold() {
        let budget = Budget::new(10, None);
        assert_eq!(budget.record_denial("k1"), 1);
        assert!(!budget.exceeds_denial_threshold("k1", DEFAULT_DENIAL_ABORT_THRESHOLD));
        assert_eq!(budget.record_denial("k1"), 2);
        assert!(budget.exceeds_denial_threshold("k1", DEFAULT_DENIAL_ABORT_THRESHOLD));
    }

    #[test]
    fn denial_counts_are_independent_per_key() {
        let budget = Budget::new(10, None);
        budget.record_denial("a");
        assert_eq!(budget.denial_count("a"), 1);
        assert_eq!(budget.denial_count("b"), 0);
    }
}
