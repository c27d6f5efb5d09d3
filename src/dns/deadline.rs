//! ordered timeouts of in-flight queries

use std::collections::BTreeMap;
use std::time::Instant;

use crate::dns::query::QueryId;

/// Key of one scheduled timeout. Handles order by deadline first and by
/// insertion order among equal deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeadlineHandle {
    deadline: Instant,
    seq: u64,
}

impl DeadlineHandle {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

#[derive(Debug, Default)]
pub struct DeadlineQueue {
    entries: BTreeMap<DeadlineHandle, QueryId>,
    seq: u64,
}

impl DeadlineQueue {
    pub fn new() -> DeadlineQueue {
        DeadlineQueue::default()
    }

    pub fn insert(&mut self, deadline: Instant, id: QueryId) -> DeadlineHandle {
        let handle = DeadlineHandle {
            deadline,
            seq: self.seq,
        };
        self.seq += 1;
        self.entries.insert(handle, id);

        handle
    }

    pub fn remove(&mut self, handle: DeadlineHandle) -> Option<QueryId> {
        self.entries.remove(&handle)
    }

    pub fn peek_earliest(&self) -> Option<(Instant, QueryId)> {
        self.entries
            .iter()
            .next()
            .map(|(handle, id)| (handle.deadline, *id))
    }

    pub fn pop_earliest(&mut self) -> Option<(Instant, QueryId)> {
        let handle = *self.entries.keys().next()?;
        self.entries
            .remove(&handle)
            .map(|id| (handle.deadline, id))
    }

    /// Removes and returns every entry due at or before `now`, earliest
    /// first.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<QueryId> {
        let mut expired = Vec::new();
        while let Some((deadline, _)) = self.peek_earliest() {
            if deadline > now {
                break;
            }
            if let Some((_, id)) = self.pop_earliest() {
                expired.push(id);
            }
        }

        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {

    use std::time::Duration;

    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_earliest_first() {
        let base = Instant::now();
        let mut queue = DeadlineQueue::new();

        queue.insert(base + Duration::from_secs(3), QueryId(3));
        queue.insert(base + Duration::from_secs(1), QueryId(1));
        queue.insert(base + Duration::from_secs(2), QueryId(2));

        assert_eq!(Some((base + Duration::from_secs(1), QueryId(1))), queue.peek_earliest());
        assert_eq!(Some((base + Duration::from_secs(1), QueryId(1))), queue.pop_earliest());
        assert_eq!(Some((base + Duration::from_secs(2), QueryId(2))), queue.pop_earliest());
        assert_eq!(Some((base + Duration::from_secs(3), QueryId(3))), queue.pop_earliest());
        assert_eq!(None, queue.pop_earliest());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_equal_deadlines_are_fifo() {
        let deadline = Instant::now();
        let mut queue = DeadlineQueue::new();

        for i in 0..5 {
            queue.insert(deadline, QueryId(i));
        }

        let order: Vec<QueryId> = queue.pop_expired(deadline);
        assert_eq!((0..5).map(QueryId).collect::<Vec<_>>(), order);
    }

    #[test]
    fn test_remove_non_front_entry() {
        let base = Instant::now();
        let mut queue = DeadlineQueue::new();

        let _first = queue.insert(base + Duration::from_millis(10), QueryId(1));
        let middle = queue.insert(base + Duration::from_millis(20), QueryId(2));
        let _last = queue.insert(base + Duration::from_millis(30), QueryId(3));

        assert_eq!(Some(QueryId(2)), queue.remove(middle));
        assert_eq!(None, queue.remove(middle));
        assert_eq!(2, queue.len());

        assert_eq!(
            vec![QueryId(1), QueryId(3)],
            queue.pop_expired(base + Duration::from_millis(30))
        );
    }

    #[test]
    fn test_pop_expired_stops_at_future() {
        let base = Instant::now();
        let mut queue = DeadlineQueue::new();

        queue.insert(base, QueryId(1));
        let later = queue.insert(base + Duration::from_secs(5), QueryId(2));

        assert_eq!(vec![QueryId(1)], queue.pop_expired(base + Duration::from_secs(1)));
        assert_eq!(1, queue.len());
        assert_eq!(base + Duration::from_secs(5), later.deadline());
    }

    proptest! {
        #[test]
        fn prop_peek_is_minimum(
            offsets in proptest::collection::vec(0u64..1000, 1..64),
            removals in proptest::collection::vec(any::<prop::sample::Index>(), 0..32),
        ) {
            let base = Instant::now();
            let mut queue = DeadlineQueue::new();
            let mut live = Vec::new();

            for (i, offset) in offsets.iter().enumerate() {
                let deadline = base + Duration::from_millis(*offset);
                let handle = queue.insert(deadline, QueryId(i as u64));
                live.push((deadline, i as u64, handle));
            }

            for index in removals {
                if live.is_empty() {
                    break;
                }
                let (_, _, handle) = live.remove(index.index(live.len()));
                prop_assert!(queue.remove(handle).is_some());
            }

            live.sort();
            let expected: Vec<_> = live.iter().map(|(d, i, _)| (*d, QueryId(*i))).collect();

            let mut drained = Vec::new();
            while let Some(peeked) = queue.peek_earliest() {
                prop_assert_eq!(Some(peeked), queue.pop_earliest());
                drained.push(peeked);
            }

            prop_assert_eq!(expected, drained);
        }
    }
}
