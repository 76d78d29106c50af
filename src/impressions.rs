use serde::{Deserialize, Serialize};

use crate::models::ChangeNumber;

/// Record of a treatment served to a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Impression {
    pub key: String,
    pub bucketing_key: Option<String>,
    /// Flag name.
    pub feature: String,
    pub treatment: String,
    /// Empty when labels are disabled in [`ClientConfig`](crate::ClientConfig).
    pub label: String,
    pub change_number: Option<ChangeNumber>,
    /// Milliseconds since Unix epoch.
    pub time: i64,
}

/// Receives impressions as they are produced, e.g. to forward them to your data warehouse.
pub trait ImpressionListener {
    fn log_impression(&self, impression: Impression);
}

pub(crate) struct NoopImpressionListener;
impl ImpressionListener for NoopImpressionListener {
    fn log_impression(&self, _impression: Impression) {}
}

impl<T: Fn(Impression)> ImpressionListener for T {
    fn log_impression(&self, impression: Impression) {
        self(impression);
    }
}
