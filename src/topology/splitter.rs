//! Ownership splitter
//!
//! Pure functions over a topology snapshot. Single-key writes need the
//! ordered owner list; batch writes need the entries grouped by primary
//! owner together with the segments each primary and each backup must
//! acknowledge.

use std::collections::{BTreeMap, BTreeSet};

use super::address::Address;
use super::snapshot::{Segment, Topology};

/// Entries of a batch owned by one primary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryShare<T> {
    /// Entries this node decides
    pub entries: Vec<T>,
    /// Segments those entries hash to
    pub segments: BTreeSet<Segment>,
}

impl<T> Default for PrimaryShare<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            segments: BTreeSet::new(),
        }
    }
}

/// A batch partitioned by ownership
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSplit<T> {
    /// Primary owner → entries and segments it decides
    pub primaries: BTreeMap<Address, PrimaryShare<T>>,
    /// Backup owner → segments it must acknowledge
    pub backups: BTreeMap<Address, BTreeSet<Segment>>,
    /// Entries whose segment has no owner in this topology
    pub unowned: Vec<T>,
}

impl<T> BatchSplit<T> {
    /// Segments per primary, the shape the batch collector tracks
    pub fn primary_segments(&self) -> BTreeMap<Address, BTreeSet<Segment>> {
        self.primaries
            .iter()
            .map(|(address, share)| (address.clone(), share.segments.clone()))
            .collect()
    }
}

/// Ordered owners of `key`, primary first.
pub fn owners_of(topology: &Topology, key: &[u8]) -> Vec<Address> {
    topology.owners(key).to_vec()
}

/// Partition a batch by primary owner and by backup segment.
///
/// A node that is primary for some entries and backup for others is
/// tracked independently in both maps.
pub fn split_batch<T, F>(topology: &Topology, entries: Vec<T>, key_of: F) -> BatchSplit<T>
where
    F: Fn(&T) -> &[u8],
{
    let mut primaries: BTreeMap<Address, PrimaryShare<T>> = BTreeMap::new();
    let mut backups: BTreeMap<Address, BTreeSet<Segment>> = BTreeMap::new();
    let mut unowned = Vec::new();

    for entry in entries {
        let segment = topology.segment_of(key_of(&entry));
        let owners = topology.segment_owners(segment);

        let Some((primary, backup_owners)) = owners.split_first() else {
            unowned.push(entry);
            continue;
        };

        for backup in backup_owners {
            backups.entry(backup.clone()).or_default().insert(segment);
        }

        let share = primaries.entry(primary.clone()).or_default();
        share.segments.insert(segment);
        share.entries.push(entry);
    }

    BatchSplit {
        primaries,
        backups,
        unowned,
    }
}

/// Backup owners of each entry, grouped by backup address.
///
/// Used by a primary to build one forward per backup from the entries it
/// just applied.
pub fn group_by_backup<T, F>(
    topology: &Topology,
    entries: &[T],
    key_of: F,
) -> BTreeMap<Address, (Vec<T>, BTreeSet<Segment>)>
where
    T: Clone,
    F: Fn(&T) -> &[u8],
{
    let mut grouped: BTreeMap<Address, (Vec<T>, BTreeSet<Segment>)> = BTreeMap::new();
    for entry in entries {
        let segment = topology.segment_of(key_of(entry));
        for backup in topology.segment_owners(segment).iter().skip(1) {
            let (items, segments) = grouped.entry(backup.clone()).or_default();
            items.push(entry.clone());
            segments.insert(segment);
        }
    }
    grouped
}
