use std::sync::Arc;

use super::{CowTable, Table};
use crate::{
    models::{ChangeNumber, RuleBasedSegment},
    Result,
};

/// Rule-based segments table.
#[derive(Default)]
pub struct RuleBasedSegmentStorage {
    table: CowTable<RuleBasedSegment>,
}

impl RuleBasedSegmentStorage {
    pub fn snapshot(&self) -> Result<Arc<Table<RuleBasedSegment>>> {
        self.table.snapshot()
    }

    pub fn get(&self, name: &str) -> Result<Option<Arc<RuleBasedSegment>>> {
        Ok(self.snapshot()?.get(name).cloned())
    }

    pub fn get_all_names(&self) -> Result<Vec<String>> {
        Ok(self.snapshot()?.names().map(str::to_owned).collect())
    }

    pub fn get_change_number(&self) -> Result<ChangeNumber> {
        Ok(self.snapshot()?.change_number())
    }

    pub fn update(
        &self,
        to_add: Vec<RuleBasedSegment>,
        to_remove: Vec<String>,
        change_number: ChangeNumber,
    ) -> Result<bool> {
        self.table
            .update(to_add, to_remove, change_number, |segment| segment.name.as_str())
    }

    pub fn clear(&self) -> Result<()> {
        self.table.clear()
    }
}
