use std::{collections::HashSet, sync::Arc};

use super::{CowTable, Table};
use crate::{models::ChangeNumber, Result};

/// Membership lookup for standard segments.
pub trait SegmentMembership {
    fn is_member(&self, segment_name: &str, key: &str) -> bool;
}

/// An explicitly enumerated set of keys.
#[derive(Debug, Clone, Default)]
pub struct Segment {
    pub name: String,
    pub keys: HashSet<String>,
    pub change_number: ChangeNumber,
}

impl SegmentMembership for Table<Segment> {
    fn is_member(&self, segment_name: &str, key: &str) -> bool {
        self.get(segment_name)
            .is_some_and(|segment| segment.keys.contains(key))
    }
}

/// Standard segments table. Each segment carries its own change number.
#[derive(Default)]
pub struct SegmentStorage {
    table: CowTable<Segment>,
}

impl SegmentStorage {
    pub fn snapshot(&self) -> Result<Arc<Table<Segment>>> {
        self.table.snapshot()
    }

    pub fn is_member(&self, segment_name: &str, key: &str) -> Result<bool> {
        Ok(self.snapshot()?.is_member(segment_name, key))
    }

    /// Change number of `segment_name`, `-1` if it was never fetched.
    pub fn get_change_number(&self, segment_name: &str) -> Result<ChangeNumber> {
        Ok(self
            .snapshot()?
            .get(segment_name)
            .map_or(-1, |segment| segment.change_number))
    }

    pub fn get_segment_names(&self) -> Result<Vec<String>> {
        Ok(self.snapshot()?.names().map(str::to_owned).collect())
    }

    /// Apply a membership delta to `segment_name` and advance its change number.
    ///
    /// Stale deltas (`change_number` not newer than the segment's) are ignored.
    pub fn update(
        &self,
        segment_name: &str,
        added: Vec<String>,
        removed: Vec<String>,
        change_number: ChangeNumber,
    ) -> Result<bool> {
        let applied = self.table.modify(|table| {
            let mut segment = match table.entries.get(segment_name) {
                Some(segment) if change_number <= segment.change_number => return None,
                Some(segment) => Segment::clone(segment),
                None => Segment {
                    name: segment_name.to_owned(),
                    ..Segment::default()
                },
            };

            segment.keys.extend(added);
            for key in &removed {
                segment.keys.remove(key);
            }
            segment.change_number = change_number;

            table
                .entries
                .insert(segment_name.to_owned(), Arc::new(segment));
            Some(())
        })?;
        Ok(applied.is_some())
    }

    pub fn remove(&self, segment_name: &str) -> Result<()> {
        self.table
            .modify(|table| table.entries.remove(segment_name).map(|_| ()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::SegmentStorage;

    #[test]
    fn applies_deltas_in_order() {
        let storage = SegmentStorage::default();
        assert_eq!(storage.get_change_number("employees").unwrap(), -1);

        assert!(storage
            .update("employees", vec!["a".into(), "b".into()], vec![], 10)
            .unwrap());
        assert!(storage
            .update("employees", vec!["c".into()], vec!["a".into()], 20)
            .unwrap());
        // Stale.
        assert!(!storage
            .update("employees", vec!["a".into()], vec![], 15)
            .unwrap());

        assert!(!storage.is_member("employees", "a").unwrap());
        assert!(storage.is_member("employees", "b").unwrap());
        assert!(storage.is_member("employees", "c").unwrap());
        assert!(!storage.is_member("other", "b").unwrap());
        assert_eq!(storage.get_change_number("employees").unwrap(), 20);
    }

    #[test]
    fn remove_segment() {
        let storage = SegmentStorage::default();
        storage.update("s", vec!["a".into()], vec![], 1).unwrap();
        storage.remove("s").unwrap();
        assert!(storage.get_segment_names().unwrap().is_empty());
    }
}
