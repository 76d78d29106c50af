use std::sync::Arc;

use crate::{models::SplitView, storage::Storage, Result};

/// Read-only access to flag definitions, for introspection and debugging.
pub struct Manager {
    storage: Arc<Storage>,
}

impl Manager {
    pub(crate) fn new(storage: Arc<Storage>) -> Manager {
        Manager { storage }
    }

    /// Names of all known flags, sorted.
    pub fn split_names(&self) -> Result<Vec<String>> {
        let mut names = self.storage.splits.get_all_names()?;
        names.sort_unstable();
        Ok(names)
    }

    pub fn split(&self, name: &str) -> Result<Option<SplitView>> {
        Ok(self
            .storage
            .splits
            .get_split(name)?
            .map(|split| split.to_split_view()))
    }

    /// Views of all known flags, sorted by name.
    pub fn splits(&self) -> Result<Vec<SplitView>> {
        let mut views: Vec<SplitView> = self
            .storage
            .splits
            .get_all_splits()?
            .iter()
            .map(|split| split.to_split_view())
            .collect();
        views.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        Ok(views)
    }
}
