use std::collections::HashMap;
use shared::types::Name;

/// Per-name fetch attempt counter.
///
/// An entry exists while a fetch for the name is outstanding. The caller
/// compares the count against its retransmission limit and calls
/// [`abandon`](Self::abandon) once it is exceeded, so a later notification for
/// the same name starts again from one.
#[derive(Debug, Default)]
pub struct RetransmissionTracker {
    attempts: HashMap<Name, u32>,
}

impl RetransmissionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more attempt and return the attempt number (first is 1).
    pub fn on_attempt(&mut self, name: &Name) -> u32 {
        let count = self.attempts.entry(name.clone()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn on_success(&mut self, name: &Name) {
        self.attempts.remove(name);
    }

    pub fn abandon(&mut self, name: &Name) {
        self.attempts.remove(name);
    }

    pub fn contains(&self, name: &Name) -> bool {
        self.attempts.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn clear(&mut self) {
        self.attempts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_from_one() {
        let mut tracker = RetransmissionTracker::new();
        let name = Name::parse("/node-A/printer1/NDNSD/service-info/1");
        assert_eq!(tracker.on_attempt(&name), 1);
        assert_eq!(tracker.on_attempt(&name), 2);
        assert_eq!(tracker.on_attempt(&name), 3);
        assert!(tracker.contains(&name));
    }

    #[test]
    fn test_success_clears() {
        let mut tracker = RetransmissionTracker::new();
        let name = Name::parse("/a/1");
        tracker.on_attempt(&name);
        tracker.on_success(&name);
        assert!(tracker.is_empty());
        assert_eq!(tracker.on_attempt(&name), 1);
    }

    #[test]
    fn test_abandon_restarts_from_one() {
        let mut tracker = RetransmissionTracker::new();
        let name = Name::parse("/a/1");
        for _ in 0..4 {
            tracker.on_attempt(&name);
        }
        tracker.abandon(&name);
        assert!(!tracker.contains(&name));
        assert_eq!(tracker.on_attempt(&name), 1);
    }

    #[test]
    fn test_names_are_independent() {
        let mut tracker = RetransmissionTracker::new();
        tracker.on_attempt(&Name::parse("/a/1"));
        tracker.on_attempt(&Name::parse("/a/1"));
        assert_eq!(tracker.on_attempt(&Name::parse("/b/1")), 1);
        assert_eq!(tracker.len(), 2);
        tracker.clear();
        assert!(tracker.is_empty());
    }
}
