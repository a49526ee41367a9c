//! Tree drift detection.
//!
//! Remembers the canonical serialization of the last rendered tree and
//! compares polled trees against it. Once a difference is seen the monitor
//! stays stale until the caller adopts a new tree with [`DriftMonitor::reset`].

use std::time::Duration;

use crate::tree::TreeNode;

#[derive(Debug, Clone)]
pub struct DriftMonitor {
    interval_ms: u64,
    fingerprint: String,
    next_poll_ms: u64,
    stale: bool,
}

impl DriftMonitor {
    pub fn new(rendered: &TreeNode, interval: Duration, now_ms: u64) -> Self {
        let interval_ms = interval.as_millis() as u64;
        Self {
            interval_ms,
            fingerprint: rendered.canonical_json(),
            next_poll_ms: now_ms.saturating_add(interval_ms),
            stale: false,
        }
    }

    pub fn poll_due(&self, now_ms: u64) -> bool {
        now_ms >= self.next_poll_ms
    }

    pub fn next_poll_ms(&self) -> u64 {
        self.next_poll_ms
    }

    /// Record that a poll happened without a usable result.
    pub fn skip(&mut self, now_ms: u64) {
        self.next_poll_ms = now_ms.saturating_add(self.interval_ms);
    }

    /// Compare a freshly fetched tree. Returns the stale flag.
    pub fn observe(&mut self, fresh: &TreeNode, now_ms: u64) -> bool {
        self.skip(now_ms);
        if fresh.canonical_json() != self.fingerprint {
            self.stale = true;
        }
        self.stale
    }

    /// Adopt `rendered` as the new baseline and clear the stale flag.
    pub fn reset(&mut self, rendered: &TreeNode, now_ms: u64) {
        self.fingerprint = rendered.canonical_json();
        self.stale = false;
        self.skip(now_ms);
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NodeKind;

    fn tree(names: &[&str]) -> TreeNode {
        let mut root = TreeNode::empty_dir("proj");
        root.kind = NodeKind::Dir {
            children: names
                .iter()
                .map(|n| TreeNode {
                    name: n.to_string(),
                    rel_path: n.to_string(),
                    kind: NodeKind::File,
                })
                .collect(),
        };
        root
    }

    #[test]
    fn test_poll_schedule() {
        let monitor = DriftMonitor::new(&tree(&["a"]), Duration::from_secs(30), 1_000);
        assert!(!monitor.poll_due(30_999));
        assert!(monitor.poll_due(31_000));
    }

    #[test]
    fn test_unchanged_tree_is_not_stale() {
        let mut monitor = DriftMonitor::new(&tree(&["a", "b"]), Duration::from_secs(30), 0);
        assert!(!monitor.observe(&tree(&["a", "b"]), 30_000));
        assert_eq!(monitor.next_poll_ms(), 60_000);
    }

    #[test]
    fn test_change_is_sticky_until_reset() {
        let mut monitor = DriftMonitor::new(&tree(&["a"]), Duration::from_secs(30), 0);
        assert!(monitor.observe(&tree(&["a", "new"]), 30_000));

        // Reverting on disk does not clear the indicator.
        assert!(monitor.observe(&tree(&["a"]), 60_000));

        monitor.reset(&tree(&["a", "new"]), 61_000);
        assert!(!monitor.is_stale());
        assert!(!monitor.poll_due(90_999));
        assert!(!monitor.observe(&tree(&["a", "new"]), 91_000));
    }
}
