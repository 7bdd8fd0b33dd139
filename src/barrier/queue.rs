//! Deferred parcel queue.
//!
//! Parcels submitted while the barrier is closed (to any destination other
//! than the bootstrap address) land here. Each entry is stamped with a
//! sequence number from a per-barrier counter so that the flush can replay
//! them in submission order per destination. The queue is a plain
//! inspectable structure; all locking belongs to the owning barrier.

use crate::barrier::Parcel;
use crate::locality::LocalityAddress;

/// One deferred parcel with its submission sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedParcel {
    /// Position in the per-barrier submission order.
    pub seq: u64,
    /// The deferred parcel.
    pub parcel: Parcel,
}

/// Ordered buffer of parcels awaiting the barrier flip.
#[derive(Debug, Default)]
pub struct PendingActionQueue {
    entries: Vec<QueuedParcel>,
    next_seq: u64,
}

impl PendingActionQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parcel, assigning the next sequence number.
    pub fn push(&mut self, parcel: Parcel) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(QueuedParcel { seq, parcel });
        seq
    }

    /// Number of deferred parcels.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is deferred.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take every deferred parcel, leaving the queue permanently empty.
    ///
    /// Entries come out in ascending sequence order.
    pub fn drain(&mut self) -> Vec<QueuedParcel> {
        std::mem::take(&mut self.entries)
    }
}

/// Group drained entries by destination, preserving ascending sequence
/// order inside each group. Group order follows first submission per
/// destination.
pub fn group_by_destination(
    entries: Vec<QueuedParcel>,
) -> Vec<(LocalityAddress, Vec<QueuedParcel>)> {
    let mut groups: Vec<(LocalityAddress, Vec<QueuedParcel>)> = Vec::new();
    for entry in entries {
        match groups
            .iter()
            .position(|(dest, _)| *dest == entry.parcel.dest)
        {
            Some(index) => groups[index].1.push(entry),
            None => groups.push((entry.parcel.dest.clone(), vec![entry])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parcel(dest: &LocalityAddress, byte: u8) -> Parcel {
        Parcel::new(dest.clone(), vec![byte])
    }

    #[test]
    fn sequence_numbers_are_dense_and_monotonic() {
        let dest = LocalityAddress::new("a", 1);
        let mut queue = PendingActionQueue::new();
        for expected in 0..5 {
            assert_eq!(queue.push(parcel(&dest, expected as u8)), expected);
        }
        assert_eq!(queue.len(), 5);
    }

    #[test]
    fn drain_empties_permanently_but_keeps_counting() {
        let dest = LocalityAddress::new("a", 1);
        let mut queue = PendingActionQueue::new();
        queue.push(parcel(&dest, 0));
        queue.push(parcel(&dest, 1));

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty());

        // A post-drain push keeps the global sequence, it never reuses one.
        assert_eq!(queue.push(parcel(&dest, 2)), 2);
    }

    #[test]
    fn grouping_preserves_per_destination_order() {
        let a = LocalityAddress::new("a", 1);
        let b = LocalityAddress::new("b", 1);
        let mut queue = PendingActionQueue::new();
        queue.push(parcel(&a, 0));
        queue.push(parcel(&b, 1));
        queue.push(parcel(&a, 2));
        queue.push(parcel(&b, 3));
        queue.push(parcel(&a, 4));

        let groups = group_by_destination(queue.drain());
        assert_eq!(groups.len(), 2);

        let (first_dest, first_group) = &groups[0];
        assert_eq!(first_dest, &a);
        assert_eq!(
            first_group.iter().map(|q| q.seq).collect::<Vec<_>>(),
            vec![0, 2, 4]
        );

        let (second_dest, second_group) = &groups[1];
        assert_eq!(second_dest, &b);
        assert_eq!(
            second_group.iter().map(|q| q.seq).collect::<Vec<_>>(),
            vec![1, 3]
        );
    }
}
