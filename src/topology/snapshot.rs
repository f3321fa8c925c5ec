//! Versioned ownership snapshots
//!
//! A topology maps every key to a segment (`crc32(key) % num_segments`) and
//! every segment to an ordered owner list, primary first. Snapshots are
//! immutable; a change of membership or ownership is a new snapshot with a
//! larger id.

use std::collections::HashSet;

use super::address::Address;

/// Partition of the key space
pub type Segment = u32;

/// Immutable ownership snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    id: u64,
    members: Vec<Address>,
    segment_owners: Vec<Vec<Address>>,
}

impl Topology {
    /// Build a topology with an explicit segment assignment.
    pub fn with_assignment(
        id: u64,
        members: Vec<Address>,
        segment_owners: Vec<Vec<Address>>,
    ) -> Self {
        Self {
            id,
            members,
            segment_owners,
        }
    }

    /// Build a topology spreading primaries round-robin over `members`.
    ///
    /// Segment `s` is owned by `members[s % n], members[(s + 1) % n], ...`
    /// up to `num_owners` distinct nodes.
    pub fn balanced(id: u64, members: Vec<Address>, num_segments: u32, num_owners: usize) -> Self {
        let n = members.len();
        let owners_per_segment = num_owners.min(n);
        let segment_owners = (0..num_segments as usize)
            .map(|s| {
                (0..owners_per_segment)
                    .map(|i| members[(s + i) % n].clone())
                    .collect()
            })
            .collect();

        Self {
            id,
            members,
            segment_owners,
        }
    }

    /// Empty topology, the state before any view is installed
    pub fn initial() -> Self {
        Self {
            id: 0,
            members: Vec::new(),
            segment_owners: Vec::new(),
        }
    }

    /// Monotonic topology id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Live members of this topology
    pub fn members(&self) -> &[Address] {
        &self.members
    }

    /// Whether `address` is a live member
    pub fn is_member(&self, address: &Address) -> bool {
        self.members.contains(address)
    }

    /// Number of segments
    pub fn num_segments(&self) -> u32 {
        self.segment_owners.len() as u32
    }

    /// Segment a key hashes to
    pub fn segment_of(&self, key: &[u8]) -> Segment {
        match self.num_segments() {
            0 => 0,
            n => crc32fast::hash(key) % n,
        }
    }

    /// Ordered owners of a segment, primary first
    pub fn segment_owners(&self, segment: Segment) -> &[Address] {
        self.segment_owners
            .get(segment as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Ordered owners of a key, primary first
    pub fn owners(&self, key: &[u8]) -> &[Address] {
        self.segment_owners(self.segment_of(key))
    }

    /// Primary owner of a key
    pub fn primary(&self, key: &[u8]) -> Option<&Address> {
        self.owners(key).first()
    }

    /// Next topology with `address` removed from membership and every
    /// owner list. Remaining owners keep their relative order, so a
    /// departed primary is replaced by its first backup.
    pub fn without_member(&self, address: &Address) -> Self {
        let members = self
            .members
            .iter()
            .filter(|m| *m != address)
            .cloned()
            .collect();
        let segment_owners = self
            .segment_owners
            .iter()
            .map(|owners| owners.iter().filter(|o| *o != address).cloned().collect())
            .collect();

        Self {
            id: self.id + 1,
            members,
            segment_owners,
        }
    }

    /// Next topology with the same membership and assignment.
    pub fn bumped(&self) -> Self {
        Self {
            id: self.id + 1,
            ..self.clone()
        }
    }

    /// Whether membership differs from `other` (ignoring order)
    pub fn members_differ(&self, other: &Topology) -> bool {
        let mine: HashSet<&Address> = self.members.iter().collect();
        let theirs: HashSet<&Address> = other.members.iter().collect();
        mine != theirs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(names: &[&str]) -> Vec<Address> {
        names.iter().map(|n| Address::named(*n)).collect()
    }

    #[test]
    fn test_balanced_assignment() {
        let topology = Topology::balanced(1, nodes(&["a", "b", "c"]), 6, 2);

        assert_eq!(topology.num_segments(), 6);
        assert_eq!(topology.segment_owners(0), nodes(&["a", "b"]).as_slice());
        assert_eq!(topology.segment_owners(1), nodes(&["b", "c"]).as_slice());
        assert_eq!(topology.segment_owners(2), nodes(&["c", "a"]).as_slice());
    }

    #[test]
    fn test_owner_count_capped_by_members() {
        let topology = Topology::balanced(1, nodes(&["a", "b"]), 4, 3);
        assert_eq!(topology.owners(b"key").len(), 2);
    }

    #[test]
    fn test_segment_is_stable() {
        let topology = Topology::balanced(1, nodes(&["a", "b", "c"]), 16, 2);
        let segment = topology.segment_of(b"user:42");
        assert_eq!(segment, crc32fast::hash(b"user:42") % 16);
        assert_eq!(topology.segment_of(b"user:42"), segment);
    }

    #[test]
    fn test_without_member_promotes_backup() {
        let topology = Topology::with_assignment(3, nodes(&["a", "b", "c"]), vec![nodes(&["a", "b", "c"])]);
        let next = topology.without_member(&Address::named("a"));

        assert_eq!(next.id(), 4);
        assert!(!next.is_member(&Address::named("a")));
        assert_eq!(next.owners(b"anything"), nodes(&["b", "c"]).as_slice());
        assert!(next.members_differ(&topology));
        assert!(!topology.bumped().members_differ(&topology));
    }

    #[test]
    fn test_initial_has_no_owners() {
        let topology = Topology::initial();
        assert!(topology.owners(b"k").is_empty());
        assert!(topology.primary(b"k").is_none());
    }
}
