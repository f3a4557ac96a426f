use std::sync::atomic::{AtomicU32, Ordering};

/// Monotonic `turn_<N>` / `step_<N>` id generation, starting at 1.
#[derive(Default)]
pub struct IdGenerator {
    next_turn: AtomicU32,
    next_step: AtomicU32,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self { next_turn: AtomicU32::new(1), next_step: AtomicU32::new(1) }
    }

    pub fn next_turn_id(&self) -> String {
        let n = self.next_turn.fetch_add(1, Ordering::SeqCst);
        format!("turn_{n}")
    }

    pub fn next_step_id(&self) -> String {
        let n = self.next_step.fetch_add(1, Ordering::SeqCst);
        format!("step_{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_ids_start_at_one_and_increment() {
        let ids = IdGenerator::new();
        assert_eq!(ids.next_turn_id(), "turn_1");
        assert_eq!(ids.next_turn_id(), "turn_2");
    }

    #[test]
    fn step_ids_are_independent_of_turn_ids() {
        let ids = IdGenerator::new();
        assert_eq!(ids.next_step_id(), "step_1");
        assert_eq!(ids.next_turn_id(), "turn_1");
        assert_eq!(ids.next_step_id(), "step_2");
    }
}
