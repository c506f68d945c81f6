use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;

/// Pending timeout events, earliest deadline first.
///
/// Entries scheduled for the same deadline pop in the order they were
/// scheduled. Deadlines are block timestamps, not wall-clock time.
#[derive(Debug, Clone)]
pub struct Timeouts<E: Ord> {
    queue: BinaryHeap<Reverse<(Duration, u64, E)>>,
    next_seq: u64,
}

impl<E: Ord> Default for Timeouts<E> {
    fn default() -> Self {
        Self {
            queue: BinaryHeap::new(),
            next_seq: 0,
        }
    }
}

impl<E: Ord + Copy> Timeouts<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, deadline: Duration, event: E) {
        self.queue.push(Reverse((deadline, self.next_seq, event)));
        self.next_seq += 1;
    }

    pub fn cancel_all(&mut self) {
        self.queue.clear();
    }

    pub fn earliest(&self) -> Option<(Duration, E)> {
        self.queue
            .peek()
            .map(|Reverse((deadline, _, event))| (*deadline, *event))
    }

    /// Removes and returns the earliest event due at or before `now`.
    pub fn pop_expired(&mut self, now: Duration) -> Option<(Duration, E)> {
        match self.queue.peek() {
            Some(Reverse((deadline, _, _))) if *deadline <= now => self
                .queue
                .pop()
                .map(|Reverse((deadline, _, event))| (deadline, event)),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pops_in_deadline_order() {
        let mut timeouts = Timeouts::new();
        timeouts.schedule(Duration::from_secs(30), 'b');
        timeouts.schedule(Duration::from_secs(10), 'a');
        timeouts.schedule(Duration::from_secs(30), 'c');

        assert_eq!(timeouts.pop_expired(Duration::from_secs(5)), None);
        assert_eq!(
            timeouts.pop_expired(Duration::from_secs(40)),
            Some((Duration::from_secs(10), 'a'))
        );
        assert_eq!(
            timeouts.pop_expired(Duration::from_secs(40)),
            Some((Duration::from_secs(30), 'b'))
        );
        assert_eq!(timeouts.earliest(), Some((Duration::from_secs(30), 'c')));
        timeouts.cancel_all();
        assert!(timeouts.is_empty());
    }
}
