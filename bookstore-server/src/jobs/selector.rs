//! Weighted round-robin over the priority queues

use super::Queue;

/// Smooth weighted round-robin: over any window of `sum(weights)` picks,
/// each queue is preferred exactly `weight` times, and picks of the same
/// queue are spread out rather than bunched.
#[derive(Debug, Clone)]
pub struct QueueSelector {
    queues: Vec<(Queue, i64)>,
    current: Vec<i64>,
    total: i64,
}

impl Default for QueueSelector {
    fn default() -> Self {
        Self::new(Queue::ALL.iter().map(|q| (*q, q.weight())).collect())
    }
}

impl QueueSelector {
    pub fn new(queues: Vec<(Queue, i64)>) -> Self {
        let total = queues.iter().map(|(_, w)| *w).sum();
        let current = vec![0; queues.len()];
        Self {
            queues,
            current,
            total,
        }
    }

    /// Queue to poll first on this round
    pub fn pick(&mut self) -> Option<Queue> {
        if self.queues.is_empty() {
            return None;
        }
        let mut best = 0;
        for (i, (_, weight)) in self.queues.iter().enumerate() {
            self.current[i] += weight;
            if self.current[i] > self.current[best] {
                best = i;
            }
        }
        self.current[best] -= self.total;
        Some(self.queues[best].0)
    }

    /// Poll order for this round: the weighted pick first, then the rest by
    /// descending weight so an idle preferred queue does not stall others.
    pub fn poll_order(&mut self) -> Vec<Queue> {
        let Some(first) = self.pick() else {
            return Vec::new();
        };
        let mut rest: Vec<(Queue, i64)> = self
            .queues
            .iter()
            .copied()
            .filter(|(q, _)| *q != first)
            .collect();
        rest.sort_by(|a, b| b.1.cmp(&a.1));
        std::iter::once(first)
            .chain(rest.into_iter().map(|(q, _)| q))
            .collect()
    }
}
