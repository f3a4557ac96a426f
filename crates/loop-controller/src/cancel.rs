use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A cooperative cancellation flag for one run. Checked at every budget
/// check and at short intervals during executor runs.
#[derive(Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Cross-run cancellation with group cascade: cancelling a group cancels
/// every run currently registered to it (e.g. a parent run and its
/// `spawn_agent` children).
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
    groups: Mutex<HashMap<String, HashSet<String>>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, run_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(run_id.to_string(), token.clone());
        token
    }

    pub fn unregister(&self, run_id: &str) {
        self.tokens.lock().remove(run_id);
        for members in self.groups.lock().values_mut() {
            members.remove(run_id);
        }
    }

    pub fn add_to_group(&self, group: &str, run_id: &str) {
        self.groups.lock().entry(group.to_string()).or_default().insert(run_id.to_string());
    }

    pub fn remove_from_group(&self, group: &str, run_id: &str) {
        if let Some(members) = self.groups.lock().get_mut(group) {
            members.remove(run_id);
        }
    }

    pub fn cancel(&self, run_id: &str) -> bool {
        if let Some(token) = self.tokens.lock().get(run_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Cancel every run registered under `group`.
    pub fn cancel_group(&self, group: &str) -> usize {
        let members: Vec<String> = self.groups.lock().get(group).cloned().unwrap_or_default().into_iter().collect();
        let tokens = self.tokens.lock();
        let mut cancelled = 0;
        for member in &members {
            if let Some(token) = tokens.get(member) {
                token.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }
}

/// Fail-open check: an error from the caller-supplied checker is treated as
/// "not cancelled".
pub fn check_cancelled<E>(checker: &dyn Fn() -> Result<bool, E>) -> bool {
    checker().unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_sets_flag() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_map_cancels_registered_run() {
        let map = CancelMap::new();
        let token = map.register("r1");
        assert!(map.cancel("r1"));
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_unregistered_run_returns_false() {
        let map = CancelMap::new();
        assert!(!map.cancel("missing"));
    }

    #[test]
    fn cancel_group_cascades_to_members() {
        let map = CancelMap::new();
        let parent = map.register("parent");
        let child = map.register("child");
        map.add_to_group("family", "parent");
        map.add_to_group("family", "child");
        let count = map.cancel_group("family");
        assert_eq!(count, 2);
        assert!(parent.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[test]
    fn fail_open_checker_treats_error_as_not_cancelled() {
        let checker: Box<dyn Fn() -> Result<bool, String>> = Box::new(|| Err("boom".into()));
        assert!(!check_cancelled(&*checker));
    }

    #[test]
    fn unregister_removes_from_groups() {
        let map = CancelMap::new();
        map.register("r1");
        map.add_to_group("g", "r1");
        map.unregister("r1");
        assert_eq!(map.cancel_group("g"), 0);
    }
}
