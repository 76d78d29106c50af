use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    eval::{labels, Evaluation, Evaluator},
    fetcher::{HttpFetcher, HttpFetcherConfig},
    impressions::Impression,
    manager::Manager,
    poller_thread::PollerThread,
    storage::Storage,
    sync::{SyncStatus, SyncTask},
    Attributes, ClientConfig, Result,
};

/// A client for the Split API.
///
/// In order to create a client instance, first create [`ClientConfig`].
///
/// # Examples
/// ```
/// # use splitio::{Client, ClientConfig};
/// Client::new(ClientConfig::from_api_key("sdk-key"));
/// ```
pub struct Client<'a> {
    storage: Arc<Storage>,
    evaluator: Evaluator,
    /// Status of the job keeping `storage` up to date. `None` until one is started.
    status: Option<Arc<SyncStatus>>,
    config: ClientConfig<'a>,
}

/// Treatment along with the configuration attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentWithConfig {
    pub treatment: String,
    pub config: Option<String>,
}

impl From<Evaluation> for TreatmentWithConfig {
    fn from(evaluation: Evaluation) -> Self {
        TreatmentWithConfig {
            treatment: evaluation.treatment,
            config: evaluation.config,
        }
    }
}

impl<'a> Client<'a> {
    /// Create a new `Client` using the specified configuration.
    ///
    /// ```
    /// # use splitio::{ClientConfig, Client};
    /// let client = Client::new(ClientConfig::from_api_key("sdk-key"));
    /// ```
    pub fn new(config: ClientConfig<'a>) -> Self {
        let storage = Arc::new(Storage::new(config.flag_sets.clone()));
        Client {
            evaluator: Evaluator::new(Arc::clone(&storage)),
            storage,
            status: None,
            config,
        }
    }

    #[cfg(test)]
    fn new_with_storage(config: ClientConfig<'a>, storage: Arc<Storage>) -> Self {
        let status = Arc::new(SyncStatus::default());
        status.set_state(crate::sync::SyncState::Ready);
        Client {
            evaluator: Evaluator::new(Arc::clone(&storage)),
            storage,
            status: Some(status),
            config,
        }
    }

    /// `true` once storage has been synchronized with the server.
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|status| status.is_ready())
    }

    /// Get the treatment of `flag_name` for `key`.
    ///
    /// `bucketing_key`, when given, is hashed instead of `key` to pick the treatment. Returns
    /// `"control"` if the flag cannot be evaluated.
    pub fn get_treatment(
        &self,
        key: &str,
        bucketing_key: Option<&str>,
        flag_name: &str,
        attributes: &Attributes,
    ) -> String {
        self.get_treatment_with_config(key, bucketing_key, flag_name, attributes)
            .treatment
    }

    /// Like [`Client::get_treatment`], also returning the configuration attached to the treatment.
    pub fn get_treatment_with_config(
        &self,
        key: &str,
        bucketing_key: Option<&str>,
        flag_name: &str,
        attributes: &Attributes,
    ) -> TreatmentWithConfig {
        let evaluation = if self.is_ready() {
            self.evaluator
                .evaluate(key, bucketing_key, flag_name, attributes)
        } else {
            not_ready(flag_name, key)
        };
        self.record(key, bucketing_key, flag_name, &evaluation);
        evaluation.into()
    }

    /// Get treatments of several flags for `key`, all evaluated against the same version of
    /// the flags.
    pub fn get_treatments(
        &self,
        key: &str,
        bucketing_key: Option<&str>,
        flag_names: &[&str],
        attributes: &Attributes,
    ) -> HashMap<String, String> {
        self.get_treatments_with_config(key, bucketing_key, flag_names, attributes)
            .into_iter()
            .map(|(flag_name, result)| (flag_name, result.treatment))
            .collect()
    }

    /// Like [`Client::get_treatments`], also returning configurations.
    pub fn get_treatments_with_config(
        &self,
        key: &str,
        bucketing_key: Option<&str>,
        flag_names: &[&str],
        attributes: &Attributes,
    ) -> HashMap<String, TreatmentWithConfig> {
        let evaluations = if self.is_ready() {
            self.evaluator
                .evaluate_many(key, bucketing_key, flag_names, attributes)
        } else {
            flag_names
                .iter()
                .map(|flag_name| (flag_name.to_string(), not_ready(flag_name, key)))
                .collect()
        };

        evaluations
            .into_iter()
            .map(|(flag_name, evaluation)| {
                self.record(key, bucketing_key, &flag_name, &evaluation);
                (flag_name, evaluation.into())
            })
            .collect()
    }

    /// Read-only view of the flags known to this client.
    pub fn manager(&self) -> Manager {
        Manager::new(Arc::clone(&self.storage))
    }

    /// Start a poller thread to fetch flags and segments from the server.
    pub fn start_poller_thread(&mut self) -> Result<PollerThread> {
        let poller = PollerThread::start_with_config(
            HttpFetcher::new(self.fetcher_config()),
            Arc::clone(&self.storage),
            self.config.poller_config(),
        )?;
        self.status = Some(Arc::clone(poller.status()));
        Ok(poller)
    }

    /// Start synchronizing on the current tokio runtime instead of a dedicated thread.
    pub fn start_sync_task(&mut self) -> SyncTask {
        let task = SyncTask::start(
            HttpFetcher::new(self.fetcher_config()),
            Arc::clone(&self.storage),
            self.config.poller_config(),
        );
        self.status = Some(Arc::clone(task.status()));
        task
    }

    fn fetcher_config(&self) -> HttpFetcherConfig {
        HttpFetcherConfig {
            sdk_url: self.config.sdk_url.clone(),
            api_key: self.config.api_key.clone(),
            flag_sets: self.config.flag_sets.clone(),
        }
    }

    fn record(
        &self,
        key: &str,
        bucketing_key: Option<&str>,
        flag_name: &str,
        evaluation: &Evaluation,
    ) {
        if evaluation.impressions_disabled {
            return;
        }

        let impression = Impression {
            key: key.to_owned(),
            bucketing_key: bucketing_key.map(str::to_owned),
            feature: flag_name.to_owned(),
            treatment: evaluation.treatment.clone(),
            label: if self.config.labels_enabled {
                evaluation.label.clone()
            } else {
                String::new()
            },
            change_number: evaluation.change_number,
            time: chrono::Utc::now().timestamp_millis(),
        };
        log::trace!(target: "splitio",
                    impression:serde;
                    "logging impression");
        self.config.impression_listener.log_impression(impression);
    }
}

fn not_ready(flag_name: &str, key: &str) -> Evaluation {
    log::warn!(target: "splitio", flag_name, key; "evaluating a flag before storage has been synchronized");
    Evaluation::control(labels::NOT_READY)
}
