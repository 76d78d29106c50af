use std::sync::Arc;

use super::{CowTable, FlagSetsFilter, Table};
use crate::{
    models::{ChangeNumber, Split},
    Result,
};

/// Flags table.
#[derive(Default)]
pub struct SplitStorage {
    table: CowTable<Split>,
    flag_sets: FlagSetsFilter,
}

impl SplitStorage {
    pub fn new(flag_sets: FlagSetsFilter) -> SplitStorage {
        SplitStorage {
            table: CowTable::default(),
            flag_sets,
        }
    }

    /// Flag sets this storage is restricted to. Flags outside of them are never retained.
    pub fn flag_sets(&self) -> &FlagSetsFilter {
        &self.flag_sets
    }

    pub fn snapshot(&self) -> Result<Arc<Table<Split>>> {
        self.table.snapshot()
    }

    pub fn get_split(&self, name: &str) -> Result<Option<Arc<Split>>> {
        Ok(self.snapshot()?.get(name).cloned())
    }

    pub fn get_all_names(&self) -> Result<Vec<String>> {
        Ok(self.snapshot()?.names().map(str::to_owned).collect())
    }

    pub fn get_all_splits(&self) -> Result<Vec<Arc<Split>>> {
        Ok(self.snapshot()?.values().cloned().collect())
    }

    pub fn get_change_number(&self) -> Result<ChangeNumber> {
        Ok(self.snapshot()?.change_number())
    }

    /// Apply a batch of changes. See [`CowTable::update`].
    pub fn update(
        &self,
        to_add: Vec<Split>,
        to_remove: Vec<String>,
        change_number: ChangeNumber,
    ) -> Result<bool> {
        self.table
            .update(to_add, to_remove, change_number, |split| split.name.as_str())
    }

    /// Kill a flag in place after a kill notification, without waiting for the next fetch.
    ///
    /// Ignored unless `change_number` is newer than the flag's own.
    pub fn kill_locally(
        &self,
        name: &str,
        default_treatment: &str,
        change_number: ChangeNumber,
    ) -> Result<bool> {
        let killed = self.table.modify(|table| {
            let split = table.entries.get(name)?;
            if change_number <= split.change_number {
                return None;
            }
            let killed = split.killed_with(default_treatment, change_number);
            table.entries.insert(name.to_owned(), Arc::new(killed));
            Some(())
        })?;

        if killed.is_some() {
            log::debug!(target: "splitio", flag_name = name, change_number; "flag killed locally");
        }
        Ok(killed.is_some())
    }

    pub fn clear(&self) -> Result<()> {
        self.table.clear()
    }
}
