//! Keeping storage in sync with the server.
//!
//! Fetching is delegated to a [`ChangeFetcher`] or an [`AsyncChangeFetcher`]. Both flavors share
//! the merge step that turns a change page into a storage update, so blocking and async
//! synchronization behave identically.
mod segments;
mod splits;
mod task;

pub use segments::SegmentSynchronizer;
pub use splits::{Backoff, SplitSynchronizer};
pub use task::SyncTask;

use std::{
    collections::HashSet,
    sync::{Arc, Condvar, Mutex},
    time::Duration,
};

use tokio::sync::Notify;

use crate::{
    fetcher::{AsyncChangeFetcher, ChangeFetcher, ChangePage},
    models::{RuleBasedSegment, Split, TryParse},
    storage::{RuleBasedSegmentStorage, SplitStorage, Storage},
    Error, Result,
};

/// Lifecycle of a synchronization job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    /// Not running. Either not started yet, stopped, or stopped after an unrecoverable error.
    #[default]
    Disabled,
    /// Running, storage has not been fully synchronized yet.
    Syncing,
    /// Storage has been synchronized at least once.
    Ready,
}

#[derive(Default)]
struct StatusInner {
    state: SyncState,
    /// Set once the first synchronization succeeds. Survives stopping the job.
    synced: bool,
    error: Option<Error>,
}

/// Shared view of a synchronization job's state. Can be waited on from blocking and async code.
#[derive(Default)]
pub struct SyncStatus {
    inner: Mutex<StatusInner>,
    condvar: Condvar,
    notify: Notify,
}

impl SyncStatus {
    pub fn state(&self) -> SyncState {
        self.inner
            .lock()
            .map(|inner| inner.state)
            .unwrap_or(SyncState::Disabled)
    }

    /// `true` once storage has been synchronized at least once, even if the job was stopped
    /// since.
    pub fn is_ready(&self) -> bool {
        self.inner.lock().map(|inner| inner.synced).unwrap_or(false)
    }

    /// Error that moved the job to [`SyncState::Disabled`], if any.
    pub fn error(&self) -> Option<Error> {
        self.inner.lock().ok()?.error.clone()
    }

    pub(crate) fn set_state(&self, state: SyncState) {
        self.update(state, None);
    }

    pub(crate) fn fail(&self, error: Error) {
        self.update(SyncState::Disabled, Some(error));
    }

    fn update(&self, state: SyncState, error: Option<Error>) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.state != state {
                log::debug!(target: "splitio",
                            from:? = inner.state,
                            to:? = state;
                            "synchronization state changed");
            }
            inner.state = state;
            inner.synced |= state == SyncState::Ready;
            if error.is_some() {
                inner.error = error;
            }
        }
        self.condvar.notify_all();
        self.notify.notify_waiters();
    }

    fn settled(inner: &StatusInner) -> Option<Result<()>> {
        match (inner.state, &inner.error) {
            _ if inner.synced => Some(Ok(())),
            (SyncState::Disabled, Some(err)) => Some(Err(err.clone())),
            _ => None,
        }
    }

    /// Block until the first synchronization succeeds or the job fails for good.
    pub fn wait_until_ready(&self) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| Error::PollerThreadPanicked)?;
        loop {
            if let Some(result) = SyncStatus::settled(&inner) {
                return result;
            }
            inner = self
                .condvar
                .wait(inner)
                .map_err(|_| Error::PollerThreadPanicked)?;
        }
    }

    /// Like [`SyncStatus::wait_until_ready`], giving up after `timeout`. Returns `Ok(false)` on
    /// timeout.
    pub fn wait_until_ready_timeout(&self, timeout: Duration) -> Result<bool> {
        let inner = self.inner.lock().map_err(|_| Error::PollerThreadPanicked)?;
        let (inner, _) = self
            .condvar
            .wait_timeout_while(inner, timeout, |inner| {
                SyncStatus::settled(inner).is_none()
            })
            .map_err(|_| Error::PollerThreadPanicked)?;
        match SyncStatus::settled(&inner) {
            Some(result) => result.map(|()| true),
            None => Ok(false),
        }
    }

    /// Async flavor of [`SyncStatus::wait_until_ready`].
    pub async fn ready(&self) -> Result<()> {
        loop {
            // Registering interest before checking the state so a concurrent update is not lost.
            let notified = self.notify.notified();
            {
                let inner = self.inner.lock().map_err(|_| Error::PollerThreadPanicked)?;
                if let Some(result) = SyncStatus::settled(&inner) {
                    return result;
                }
            }
            notified.await;
        }
    }
}

/// Merge a flags page into storage.
///
/// Active flags that pass the flag-set filter are added. Archived flags, flags filtered out and
/// flags that failed to parse are removed. The whole page is applied as one batch. Returns the
/// standard segments referenced by the added flags.
pub fn update_feature_flag_storage(
    storage: &SplitStorage,
    page: ChangePage<Split>,
) -> Result<HashSet<String>> {
    let Some(till) = page.till else {
        return Ok(HashSet::new());
    };

    let mut to_add = Vec::new();
    let mut to_remove = Vec::new();
    for entity in page.entities {
        match entity {
            TryParse::Parsed(split) => {
                if split.is_active() && storage.flag_sets().intersects(&split.sets) {
                    to_add.push(split);
                } else {
                    to_remove.push(split.name);
                }
            }
            failed @ TryParse::ParseFailed(_) => {
                let name = failed.raw_name().map(str::to_owned);
                log::warn!(target: "splitio",
                           flag_name:? = name;
                           "failed to parse a flag, removing it");
                to_remove.extend(name);
            }
        }
    }

    let segments = to_add.iter().flat_map(Split::segment_names).collect();
    let (added, removed) = (to_add.len(), to_remove.len());
    if storage.update(to_add, to_remove, till)? {
        log::debug!(target: "splitio",
                    change_number = till,
                    added,
                    removed;
                    "applied flag changes");
    }
    Ok(segments)
}

/// Merge a rule-based segments page into storage, same rules as
/// [`update_feature_flag_storage`] minus flag sets. Returns the standard segments referenced by
/// the added rule-based segments, conditions and exclusions alike.
pub fn update_rule_based_segment_storage(
    storage: &RuleBasedSegmentStorage,
    page: ChangePage<RuleBasedSegment>,
) -> Result<HashSet<String>> {
    let Some(till) = page.till else {
        return Ok(HashSet::new());
    };

    let mut to_add = Vec::new();
    let mut to_remove = Vec::new();
    for entity in page.entities {
        match entity {
            TryParse::Parsed(segment) if segment.is_active() => to_add.push(segment),
            TryParse::Parsed(segment) => to_remove.push(segment.name),
            failed @ TryParse::ParseFailed(_) => {
                let name = failed.raw_name().map(str::to_owned);
                log::warn!(target: "splitio",
                           segment_name:? = name;
                           "failed to parse a rule-based segment, removing it");
                to_remove.extend(name);
            }
        }
    }

    let segments = to_add
        .iter()
        .flat_map(RuleBasedSegment::segment_names)
        .collect();
    let (added, removed) = (to_add.len(), to_remove.len());
    if storage.update(to_add, to_remove, till)? {
        log::debug!(target: "splitio",
                    change_number = till,
                    added,
                    removed;
                    "applied rule-based segment changes");
    }
    Ok(segments)
}

/// Every standard segment referenced by stored flags and rule-based segments.
pub fn referenced_segment_names(storage: &Storage) -> Result<HashSet<String>> {
    let snapshot = storage.snapshot()?;
    let from_flags = snapshot.splits.values().flat_map(|split| split.segment_names());
    let from_rule_based = snapshot
        .rule_based_segments
        .values()
        .flat_map(|segment| segment.segment_names());
    Ok(from_flags.chain(from_rule_based).collect())
}

/// Flags, rule-based segments and standard segments synchronized together.
pub struct Synchronizer {
    storage: Arc<Storage>,
    splits: SplitSynchronizer,
    segments: SegmentSynchronizer,
}

impl Synchronizer {
    pub fn new(storage: Arc<Storage>) -> Synchronizer {
        Synchronizer {
            splits: SplitSynchronizer::new(Arc::clone(&storage)),
            segments: SegmentSynchronizer::new(Arc::clone(&storage)),
            storage,
        }
    }

    pub fn splits(&self) -> &SplitSynchronizer {
        &self.splits
    }

    pub fn segments(&self) -> &SegmentSynchronizer {
        &self.segments
    }

    /// Synchronize flags and rule-based segments, then standard segments.
    ///
    /// Newly referenced segments are always fetched. With `all_segments`, every referenced
    /// segment is refreshed too.
    pub fn sync_all(&self, fetcher: &mut impl ChangeFetcher, all_segments: bool) -> Result<()> {
        let new_segments = self.splits.synchronize_splits(fetcher, None)?;
        let names = self.segments_to_sync(new_segments, all_segments)?;
        self.segments.synchronize_segments(fetcher, names)
    }

    /// Async flavor of [`Synchronizer::sync_all`].
    pub async fn sync_all_async(
        &self,
        fetcher: &mut impl AsyncChangeFetcher,
        all_segments: bool,
    ) -> Result<()> {
        let new_segments = self.splits.synchronize_splits_async(fetcher, None).await?;
        let names = self.segments_to_sync(new_segments, all_segments)?;
        self.segments.synchronize_segments_async(fetcher, names).await
    }

    fn segments_to_sync(
        &self,
        new_segments: HashSet<String>,
        all_segments: bool,
    ) -> Result<HashSet<String>> {
        if !all_segments {
            let known = self.storage.segments.get_segment_names()?;
            return Ok(new_segments
                .into_iter()
                .filter(|name| !known.contains(name))
                .collect());
        }
        let mut names = referenced_segment_names(&self.storage)?;
        names.extend(new_segments);
        Ok(names)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::{HashMap, VecDeque},
        sync::Arc,
    };

    use serde_json::json;

    use super::{update_feature_flag_storage, SyncState, SyncStatus, Synchronizer};
    use crate::{
        fetcher::{AsyncChangeFetcher, ChangeFetcher, ChangePage, SegmentChanges, SplitChanges},
        models::ChangeNumber,
        storage::{FlagSetsFilter, SplitStorage, Storage},
        Error, Result,
    };

    pub(crate) fn flag(name: &str, status: &str, change_number: ChangeNumber) -> serde_json::Value {
        json!({
            "name": name,
            "status": status,
            "changeNumber": change_number,
            "defaultTreatment": "off",
            "conditions": [{
                "matcherGroup": {"combiner": "AND", "matchers": [{
                    "matcherType": "IN_SEGMENT",
                    "userDefinedSegmentMatcherData": {"segmentName": format!("{name}_segment")}
                }]},
                "partitions": [{"treatment": "on", "size": 100}]
            }]
        })
    }

    pub(crate) fn page<T: serde::de::DeserializeOwned>(
        entities: Vec<serde_json::Value>,
        since: ChangeNumber,
        till: ChangeNumber,
    ) -> ChangePage<T> {
        serde_json::from_value(json!({"d": entities, "s": since, "t": till})).unwrap()
    }

    /// Serves pages keyed by `since`. Unknown `since` values get an empty, up-to-date page.
    #[derive(Default)]
    pub(crate) struct FakeFetcher {
        pub flags: HashMap<ChangeNumber, (Vec<serde_json::Value>, ChangeNumber)>,
        pub segments: HashMap<(String, ChangeNumber), SegmentChanges>,
        pub errors: VecDeque<Error>,
        pub split_requests: Vec<(ChangeNumber, ChangeNumber, Option<ChangeNumber>)>,
        pub segment_requests: Vec<(String, ChangeNumber)>,
    }

    impl ChangeFetcher for FakeFetcher {
        fn fetch_flag_changes(
            &mut self,
            since: ChangeNumber,
            rb_since: ChangeNumber,
            till: Option<ChangeNumber>,
        ) -> Result<SplitChanges> {
            self.split_requests.push((since, rb_since, till));
            if let Some(err) = self.errors.pop_front() {
                return Err(err);
            }
            let (entities, page_till) = self.flags.get(&since).cloned().unwrap_or((vec![], since));
            Ok(SplitChanges {
                feature_flags: page(entities, since, page_till),
                rule_based_segments: page(vec![], rb_since, rb_since),
            })
        }

        fn fetch_segment_changes(
            &mut self,
            segment_name: &str,
            since: ChangeNumber,
            _till: Option<ChangeNumber>,
        ) -> Result<SegmentChanges> {
            self.segment_requests.push((segment_name.to_owned(), since));
            Ok(self
                .segments
                .get(&(segment_name.to_owned(), since))
                .cloned()
                .unwrap_or(SegmentChanges {
                    name: segment_name.to_owned(),
                    since,
                    till: since,
                    ..SegmentChanges::default()
                }))
        }
    }

    impl AsyncChangeFetcher for FakeFetcher {
        async fn fetch_flag_changes(
            &mut self,
            since: ChangeNumber,
            rb_since: ChangeNumber,
            till: Option<ChangeNumber>,
        ) -> Result<SplitChanges> {
            ChangeFetcher::fetch_flag_changes(self, since, rb_since, till)
        }

        async fn fetch_segment_changes(
            &mut self,
            segment_name: &str,
            since: ChangeNumber,
            till: Option<ChangeNumber>,
        ) -> Result<SegmentChanges> {
            ChangeFetcher::fetch_segment_changes(self, segment_name, since, till)
        }
    }

    #[test]
    fn same_page_twice_is_a_no_op() {
        let storage = SplitStorage::default();
        let first = update_feature_flag_storage(
            &storage,
            page(vec![flag("a", "ACTIVE", 10)], -1, 123),
        )
        .unwrap();
        assert_eq!(first, ["a_segment".to_owned()].into());

        // Same `till` again, now trying to archive the flag.
        update_feature_flag_storage(&storage, page(vec![flag("a", "ARCHIVED", 10)], -1, 123))
            .unwrap();
        assert!(storage.get_split("a").unwrap().is_some());
        assert_eq!(storage.get_change_number().unwrap(), 123);
    }

    #[test]
    fn archived_wins_within_a_page() {
        let storage = SplitStorage::default();
        update_feature_flag_storage(&storage, page(vec![flag("a", "ACTIVE", 1)], -1, 1)).unwrap();

        update_feature_flag_storage(
            &storage,
            page(vec![flag("a", "ACTIVE", 100), flag("a", "ARCHIVED", 123)], 1, 123),
        )
        .unwrap();
        assert!(storage.get_split("a").unwrap().is_none());
        assert_eq!(storage.get_change_number().unwrap(), 123);
    }

    #[test]
    fn unparsable_and_filtered_flags_are_removed() {
        let storage = SplitStorage::new(FlagSetsFilter::new(["backend"]));
        let mut tagged = flag("tagged", "ACTIVE", 1);
        tagged["sets"] = json!(["backend"]);
        let mut other = flag("other", "ACTIVE", 1);
        other["sets"] = json!(["web"]);
        update_feature_flag_storage(&storage, page(vec![tagged, other], -1, 1)).unwrap();
        assert_eq!(storage.get_all_names().unwrap(), vec!["tagged"]);

        let broken = json!({"name": "tagged", "seed": "nope"});
        update_feature_flag_storage(&storage, page(vec![broken], 1, 2)).unwrap();
        assert!(storage.get_all_names().unwrap().is_empty());
    }

    #[test]
    fn page_without_till_is_ignored() {
        let storage = SplitStorage::default();
        let page: ChangePage<crate::models::Split> =
            serde_json::from_value(json!({"d": [flag("a", "ACTIVE", 1)], "s": -1})).unwrap();
        assert!(update_feature_flag_storage(&storage, page).unwrap().is_empty());
        assert!(storage.get_split("a").unwrap().is_none());
        assert_eq!(storage.get_change_number().unwrap(), -1);
    }

    #[test]
    fn sync_all_fetches_new_segments() {
        let _ = env_logger::builder().is_test(true).try_init();
        let storage = Arc::new(Storage::default());
        let synchronizer = Synchronizer::new(Arc::clone(&storage));

        let mut fetcher = FakeFetcher::default();
        fetcher
            .flags
            .insert(-1, (vec![flag("a", "ACTIVE", 10)], 10));
        fetcher.segments.insert(
            ("a_segment".to_owned(), -1),
            SegmentChanges {
                name: "a_segment".to_owned(),
                added: vec!["k".to_owned()],
                removed: vec![],
                since: -1,
                till: 50,
            },
        );

        synchronizer.sync_all(&mut fetcher, false).unwrap();
        assert!(storage.segments.is_member("a_segment", "k").unwrap());
        assert_eq!(fetcher.split_requests, vec![(-1, -1, None), (10, -1, None)]);
        assert_eq!(
            fetcher.segment_requests,
            vec![("a_segment".to_owned(), -1), ("a_segment".to_owned(), 50)]
        );

        // Known segments are only refreshed on request.
        fetcher.segment_requests.clear();
        synchronizer.sync_all(&mut fetcher, false).unwrap();
        assert!(fetcher.segment_requests.is_empty());
        synchronizer.sync_all(&mut fetcher, true).unwrap();
        assert_eq!(fetcher.segment_requests, vec![("a_segment".to_owned(), 50)]);
    }

    #[tokio::test]
    async fn sync_all_async_matches_blocking() {
        let storage = Arc::new(Storage::default());
        let synchronizer = Synchronizer::new(Arc::clone(&storage));
        let mut fetcher = FakeFetcher::default();
        fetcher
            .flags
            .insert(-1, (vec![flag("a", "ACTIVE", 10), flag("b", "ACTIVE", 10)], 10));

        synchronizer.sync_all_async(&mut fetcher, false).await.unwrap();
        let mut names = storage.splits.get_all_names().unwrap();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(storage.splits.get_change_number().unwrap(), 10);
    }

    #[test]
    fn status_reports_failures() {
        let status = SyncStatus::default();
        assert_eq!(status.state(), SyncState::Disabled);
        assert!(!status.wait_until_ready_timeout(std::time::Duration::ZERO).unwrap());

        status.set_state(SyncState::Syncing);
        status.fail(Error::Unauthorized);
        assert!(matches!(status.wait_until_ready(), Err(Error::Unauthorized)));
        assert!(!status.is_ready());

        status.set_state(SyncState::Ready);
        assert!(status.wait_until_ready().is_ok());
        status.set_state(SyncState::Disabled);
        assert!(status.is_ready());
    }
}
