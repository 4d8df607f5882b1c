//! Defender to foe assignment index
//!
//! Keeps `against[foe] -> defenders` and `to[defender] -> foe` in lockstep.
//! Every mutation goes through this type, so the two sides cannot drift.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::types::EntityId;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssignmentIndex {
    against: BTreeMap<EntityId, Vec<EntityId>>,
    to: BTreeMap<EntityId, Option<EntityId>>,
}

impl AssignmentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an (empty) bucket for a new foe
    pub fn add_foe(&mut self, foe: EntityId) {
        self.against.entry(foe).or_default();
    }

    /// Drop a foe; its defenders become unassigned and are returned
    pub fn remove_foe(&mut self, foe: EntityId) -> Vec<EntityId> {
        let defenders = self.against.remove(&foe).unwrap_or_default();
        for own in &defenders {
            if let Some(slot) = self.to.get_mut(own) {
                *slot = None;
            }
        }
        defenders
    }

    /// Register a defender, unassigned
    pub fn add_own(&mut self, own: EntityId) {
        self.to.entry(own).or_insert(None);
    }

    pub fn remove_own(&mut self, own: EntityId) {
        if let Some(Some(foe)) = self.to.remove(&own) {
            self.detach(own, foe);
        }
    }

    fn detach(&mut self, own: EntityId, foe: EntityId) {
        if let Some(bucket) = self.against.get_mut(&foe) {
            bucket.retain(|id| *id != own);
        }
    }

    /// Assign `own` against `foe`, replacing any previous target.
    ///
    /// Fails if either side is unknown.
    pub fn assign(&mut self, own: EntityId, foe: EntityId) -> bool {
        if !self.against.contains_key(&foe) {
            return false;
        }
        let previous = match self.to.get(&own) {
            Some(previous) => *previous,
            None => return false,
        };
        if previous == Some(foe) {
            return true;
        }
        if let Some(old) = previous {
            self.detach(own, old);
        }
        self.to.insert(own, Some(foe));
        if let Some(bucket) = self.against.get_mut(&foe) {
            bucket.push(own);
        }
        true
    }

    pub fn unassign(&mut self, own: EntityId) {
        if let Some(Some(foe)) = self.to.get(&own).copied() {
            self.detach(own, foe);
            self.to.insert(own, None);
        }
    }

    pub fn target_of(&self, own: EntityId) -> Option<EntityId> {
        self.to.get(&own).copied().flatten()
    }

    pub fn assigned_against(&self, foe: EntityId) -> &[EntityId] {
        self.against.get(&foe).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn assigned_count(&self, foe: EntityId) -> usize {
        self.assigned_against(foe).len()
    }

    pub fn has_foe(&self, foe: EntityId) -> bool {
        self.against.contains_key(&foe)
    }

    pub fn has_own(&self, own: EntityId) -> bool {
        self.to.contains_key(&own)
    }

    /// Follow a promoted or packed foe
    pub fn rename_foe(&mut self, old: EntityId, new: EntityId) {
        let Some(bucket) = self.against.remove(&old) else {
            return;
        };
        for own in &bucket {
            if let Some(slot) = self.to.get_mut(own) {
                *slot = Some(new);
            }
        }
        self.against.insert(new, bucket);
    }

    /// Follow a promoted or packed defender
    pub fn rename_own(&mut self, old: EntityId, new: EntityId) {
        let Some(target) = self.to.remove(&old) else {
            return;
        };
        if let Some(foe) = target {
            if let Some(bucket) = self.against.get_mut(&foe) {
                for id in bucket.iter_mut() {
                    if *id == old {
                        *id = new;
                    }
                }
            }
        }
        self.to.insert(new, target);
    }

    /// Take over every entry of `other`
    pub fn merge(&mut self, other: AssignmentIndex) {
        for (foe, bucket) in other.against {
            let mine = self.against.entry(foe).or_default();
            for own in bucket {
                if !mine.contains(&own) {
                    mine.push(own);
                }
            }
        }
        for (own, target) in other.to {
            // A defender known to both sides keeps a single target
            if let Some(Some(old)) = self.to.get(&own).copied() {
                if target.is_some() && target != Some(old) {
                    self.detach(own, old);
                }
            }
            let keep = target.or_else(|| self.target_of(own));
            self.to.insert(own, keep);
        }
    }

    pub fn clear(&mut self) {
        self.against.clear();
        self.to.clear();
    }

    /// Both sides agree: every assigned defender is in its foe's bucket,
    /// every bucket entry points back, no bucket holds duplicates
    pub fn is_symmetric(&self) -> bool {
        for (own, target) in &self.to {
            if let Some(foe) = target {
                match self.against.get(foe) {
                    Some(bucket) if bucket.contains(own) => {}
                    _ => return false,
                }
            }
        }
        for (foe, bucket) in &self.against {
            for (i, own) in bucket.iter().enumerate() {
                if self.to.get(own) != Some(&Some(*foe)) || bucket[..i].contains(own) {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(foes: &[u32], owns: &[u32]) -> AssignmentIndex {
        let mut index = AssignmentIndex::new();
        for f in foes {
            index.add_foe(EntityId(*f));
        }
        for o in owns {
            index.add_own(EntityId(*o));
        }
        index
    }

    #[test]
    fn test_assign_and_reassign() {
        let mut index = index_with(&[100, 101], &[1]);
        assert!(index.assign(EntityId(1), EntityId(100)));
        assert_eq!(index.assigned_count(EntityId(100)), 1);

        assert!(index.assign(EntityId(1), EntityId(101)));
        assert_eq!(index.assigned_count(EntityId(100)), 0);
        assert_eq!(index.target_of(EntityId(1)), Some(EntityId(101)));
        assert!(index.is_symmetric());
    }

    #[test]
    fn test_assign_unknown_sides_fails() {
        let mut index = index_with(&[100], &[1]);
        assert!(!index.assign(EntityId(2), EntityId(100)));
        assert!(!index.assign(EntityId(1), EntityId(200)));
        assert!(index.is_symmetric());
    }

    #[test]
    fn test_remove_foe_unassigns_defenders() {
        let mut index = index_with(&[100], &[1, 2]);
        index.assign(EntityId(1), EntityId(100));
        index.assign(EntityId(2), EntityId(100));
        let freed = index.remove_foe(EntityId(100));
        assert_eq!(freed, vec![EntityId(1), EntityId(2)]);
        assert!(index.has_own(EntityId(1)));
        assert_eq!(index.target_of(EntityId(1)), None);
        assert!(index.is_symmetric());
    }

    #[test]
    fn test_remove_own_leaves_bucket() {
        let mut index = index_with(&[100], &[1, 2]);
        index.assign(EntityId(1), EntityId(100));
        index.assign(EntityId(2), EntityId(100));
        index.remove_own(EntityId(1));
        assert_eq!(index.assigned_against(EntityId(100)), &[EntityId(2)]);
        assert!(!index.has_own(EntityId(1)));
        assert!(index.is_symmetric());
    }

    #[test]
    fn test_renames_follow_both_sides() {
        let mut index = index_with(&[100], &[1]);
        index.assign(EntityId(1), EntityId(100));
        index.rename_foe(EntityId(100), EntityId(150));
        assert_eq!(index.target_of(EntityId(1)), Some(EntityId(150)));
        index.rename_own(EntityId(1), EntityId(10));
        assert_eq!(index.assigned_against(EntityId(150)), &[EntityId(10)]);
        assert!(index.is_symmetric());
    }

    #[test]
    fn test_merge_unions() {
        let mut a = index_with(&[100], &[1]);
        a.assign(EntityId(1), EntityId(100));
        let mut b = index_with(&[200], &[2, 3]);
        b.assign(EntityId(2), EntityId(200));

        a.merge(b);
        assert!(a.has_foe(EntityId(200)));
        assert!(a.has_own(EntityId(3)));
        assert_eq!(a.target_of(EntityId(2)), Some(EntityId(200)));
        assert_eq!(a.target_of(EntityId(1)), Some(EntityId(100)));
        assert!(a.is_symmetric());
    }
}
