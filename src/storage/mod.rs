//! Thread-safe in-memory storage for flags, rule-based segments and standard segments.
//!
//! Every table is copy-on-write: readers grab an `Arc` snapshot and never block writers for longer
//! than a pointer clone, while writers build the next version of the table off to the side and
//! swap it in atomically. Writers of the same table are serialized, so a reader sees either the
//! state before a batch update or the state after it, never anything in between.
mod flag_sets;
mod rule_based_segments;
mod segments;
mod splits;

pub use flag_sets::FlagSetsFilter;
pub use rule_based_segments::RuleBasedSegmentStorage;
pub use segments::{Segment, SegmentMembership, SegmentStorage};
pub use splits::SplitStorage;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
};

use crate::{
    models::{ChangeNumber, RuleBasedSegment, Split},
    Error, Result,
};

/// One immutable version of a table.
#[derive(Debug)]
pub struct Table<T> {
    entries: HashMap<String, Arc<T>>,
    change_number: ChangeNumber,
}

impl<T> Clone for Table<T> {
    fn clone(&self) -> Self {
        Table {
            entries: self.entries.clone(),
            change_number: self.change_number,
        }
    }
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Table {
            entries: HashMap::new(),
            change_number: -1,
        }
    }
}

impl<T> Table<T> {
    pub fn get(&self, name: &str) -> Option<&Arc<T>> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn change_number(&self) -> ChangeNumber {
        self.change_number
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &Arc<T>> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Copy-on-write holder for a [`Table`].
pub(crate) struct CowTable<T> {
    current: RwLock<Arc<Table<T>>>,
    /// Serializes writers. Held for the whole read-modify-swap cycle.
    write_lock: Mutex<()>,
}

impl<T> Default for CowTable<T> {
    fn default() -> Self {
        CowTable {
            current: RwLock::new(Arc::new(Table::default())),
            write_lock: Mutex::new(()),
        }
    }
}

impl<T> CowTable<T> {
    pub(crate) fn snapshot(&self) -> Result<Arc<Table<T>>> {
        // Err() is possible only if the lock is poisoned (writer panicked while holding the
        // lock). Surface it instead of crashing the app.
        let current = self.current.read().map_err(|_| Error::StorageUnavailable)?;
        Ok(Arc::clone(&current))
    }

    /// Apply `f` to a private copy of the table and publish the copy.
    ///
    /// If `f` returns `None`, nothing is published.
    pub(crate) fn modify<R>(&self, f: impl FnOnce(&mut Table<T>) -> Option<R>) -> Result<Option<R>> {
        let _guard = self.write_lock.lock().map_err(|_| Error::StorageUnavailable)?;

        let current = self.snapshot()?;
        let mut next = Table::clone(&current);
        let Some(result) = f(&mut next) else {
            return Ok(None);
        };

        // Constructing new value before requesting the lock to minimize lock span.
        let next = Arc::new(next);
        let mut slot = self.current.write().map_err(|_| Error::StorageUnavailable)?;
        *slot = next;
        Ok(Some(result))
    }

    /// Insert `to_add`, then remove `to_remove`, then advance the change number to
    /// `change_number`.
    ///
    /// Pages older than (or equal to) the stored change number are ignored. Returns `true` if
    /// the update was applied.
    pub(crate) fn update(
        &self,
        to_add: Vec<T>,
        to_remove: Vec<String>,
        change_number: ChangeNumber,
        name_of: impl Fn(&T) -> &str,
    ) -> Result<bool> {
        let applied = self.modify(|table| {
            if change_number <= table.change_number {
                return None;
            }
            for entity in to_add {
                table.entries.insert(name_of(&entity).to_owned(), Arc::new(entity));
            }
            for name in &to_remove {
                table.entries.remove(name);
            }
            table.change_number = change_number;
            Some(())
        })?;
        Ok(applied.is_some())
    }

    pub(crate) fn clear(&self) -> Result<()> {
        self.modify(|table| {
            *table = Table::default();
            Some(())
        })?;
        Ok(())
    }
}

/// Consistent view over all tables, taken at the start of an evaluation.
#[derive(Clone)]
pub struct Snapshot {
    pub splits: Arc<Table<Split>>,
    pub rule_based_segments: Arc<Table<RuleBasedSegment>>,
    pub segments: Arc<Table<Segment>>,
}

/// All the tables an SDK instance evaluates against.
#[derive(Default)]
pub struct Storage {
    pub splits: SplitStorage,
    pub rule_based_segments: RuleBasedSegmentStorage,
    pub segments: SegmentStorage,
}

impl Storage {
    pub fn new(flag_sets: FlagSetsFilter) -> Storage {
        Storage {
            splits: SplitStorage::new(flag_sets),
            rule_based_segments: RuleBasedSegmentStorage::default(),
            segments: SegmentStorage::default(),
        }
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot {
            splits: self.splits.snapshot()?,
            rule_based_segments: self.rule_based_segments.snapshot()?,
            segments: self.segments.snapshot()?,
        })
    }
}
