use std::sync::Arc;

use crate::{
    fetcher::{AsyncChangeFetcher, ChangeFetcher, SegmentChanges},
    models::ChangeNumber,
    storage::Storage,
    Result,
};

/// Synchronizes standard segment membership.
pub struct SegmentSynchronizer {
    storage: Arc<Storage>,
}

impl SegmentSynchronizer {
    pub fn new(storage: Arc<Storage>) -> SegmentSynchronizer {
        SegmentSynchronizer { storage }
    }

    /// Fetch and apply membership deltas for `segment_name` until `since == till`.
    pub fn synchronize_segment(
        &self,
        fetcher: &mut impl ChangeFetcher,
        segment_name: &str,
        till: Option<ChangeNumber>,
    ) -> Result<()> {
        loop {
            let since = self.storage.segments.get_change_number(segment_name)?;
            let changes = fetcher.fetch_segment_changes(segment_name, since, till)?;
            if self.apply(segment_name, since, changes)? {
                return Ok(());
            }
        }
    }

    /// Async flavor of [`SegmentSynchronizer::synchronize_segment`].
    pub async fn synchronize_segment_async(
        &self,
        fetcher: &mut impl AsyncChangeFetcher,
        segment_name: &str,
        till: Option<ChangeNumber>,
    ) -> Result<()> {
        loop {
            let since = self.storage.segments.get_change_number(segment_name)?;
            let changes = fetcher
                .fetch_segment_changes(segment_name, since, till)
                .await?;
            if self.apply(segment_name, since, changes)? {
                return Ok(());
            }
        }
    }

    /// Synchronize every segment in `segment_names`.
    ///
    /// A failing segment does not prevent the others from being synchronized. Unrecoverable
    /// errors abort immediately. Otherwise the first error is returned once all segments were
    /// attempted.
    pub fn synchronize_segments(
        &self,
        fetcher: &mut impl ChangeFetcher,
        segment_names: impl IntoIterator<Item = String>,
    ) -> Result<()> {
        let mut first_error = None;
        for segment_name in segment_names {
            if let Err(err) = self.synchronize_segment(fetcher, &segment_name, None) {
                if let Some(err) = note_failure(&segment_name, err, &mut first_error) {
                    return Err(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Async flavor of [`SegmentSynchronizer::synchronize_segments`].
    pub async fn synchronize_segments_async(
        &self,
        fetcher: &mut impl AsyncChangeFetcher,
        segment_names: impl IntoIterator<Item = String>,
    ) -> Result<()> {
        let mut first_error = None;
        for segment_name in segment_names {
            if let Err(err) = self
                .synchronize_segment_async(fetcher, &segment_name, None)
                .await
            {
                if let Some(err) = note_failure(&segment_name, err, &mut first_error) {
                    return Err(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Apply one page. Returns `true` when the segment is up to date.
    fn apply(&self, segment_name: &str, since: ChangeNumber, changes: SegmentChanges) -> Result<bool> {
        let SegmentChanges {
            added,
            removed,
            since: page_since,
            till,
            ..
        } = changes;
        let (added_count, removed_count) = (added.len(), removed.len());

        if self
            .storage
            .segments
            .update(segment_name, added, removed, till)?
        {
            log::debug!(target: "splitio",
                        segment_name,
                        change_number = till,
                        added = added_count,
                        removed = removed_count;
                        "applied segment changes");
        }

        let advanced = self.storage.segments.get_change_number(segment_name)? != since;
        Ok(page_since == till || !advanced)
    }
}

/// Record `err` for `segment_name`. Returns the error back if synchronization must stop.
fn note_failure(
    segment_name: &str,
    err: crate::Error,
    first_error: &mut Option<crate::Error>,
) -> Option<crate::Error> {
    log::warn!(target: "splitio",
               segment_name;
               "failed to synchronize segment: {err}");
    if err.is_unrecoverable() {
        return Some(err);
    }
    first_error.get_or_insert(err);
    None
}
