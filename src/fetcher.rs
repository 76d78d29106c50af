//! Change-fetch API: response shapes, fetcher traits and an HTTP client implementing them.
use std::future::Future;

use reqwest::{StatusCode, Url};
use serde::Deserialize;

use crate::{
    models::{ChangeNumber, RuleBasedSegment, Split, TryParse},
    storage::FlagSetsFilter,
    Error, Result,
};

pub const DEFAULT_SDK_URL: &str = "https://sdk.split.io/api";

const SPLIT_CHANGES_ENDPOINT: &str = "/splitChanges";
const SEGMENT_CHANGES_ENDPOINT: &str = "/segmentChanges";
/// Version of the flags payload requested from the server. `1.3` adds rule-based segments.
const FLAGS_SPEC_VERSION: &str = "1.3";

/// Response of `splitChanges`: one page for flags and one for rule-based segments.
#[derive(Debug, Deserialize)]
pub struct SplitChanges {
    #[serde(rename = "ff")]
    pub feature_flags: ChangePage<Split>,
    #[serde(rename = "rbs", default)]
    pub rule_based_segments: ChangePage<RuleBasedSegment>,
}

/// A batch of changes between two change numbers.
///
/// Entities that fail to parse are kept as [`TryParse::ParseFailed`] so the rest of the page
/// can still be applied.
#[derive(Debug, Deserialize)]
pub struct ChangePage<T> {
    #[serde(rename = "d", default = "Vec::new")]
    pub entities: Vec<TryParse<T>>,
    #[serde(rename = "s", default = "unknown_change_number")]
    pub since: ChangeNumber,
    /// `None` when the server had nothing to report.
    #[serde(rename = "t", default)]
    pub till: Option<ChangeNumber>,
}

impl<T> Default for ChangePage<T> {
    fn default() -> Self {
        ChangePage {
            entities: Vec::new(),
            since: -1,
            till: None,
        }
    }
}

impl<T> ChangePage<T> {
    /// `true` when this page brings the table up to date.
    pub fn is_last(&self) -> bool {
        self.till.map_or(true, |till| till == self.since)
    }
}

fn unknown_change_number() -> ChangeNumber {
    -1
}

/// Response of `segmentChanges/{name}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentChanges {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
    #[serde(default = "unknown_change_number")]
    pub since: ChangeNumber,
    #[serde(default = "unknown_change_number")]
    pub till: ChangeNumber,
}

/// Blocking source of change pages.
pub trait ChangeFetcher {
    /// Fetch changes to flags newer than `since` and to rule-based segments newer than
    /// `rb_since`. `till` asks the server for a specific target change number.
    fn fetch_flag_changes(
        &mut self,
        since: ChangeNumber,
        rb_since: ChangeNumber,
        till: Option<ChangeNumber>,
    ) -> Result<SplitChanges>;

    fn fetch_segment_changes(
        &mut self,
        segment_name: &str,
        since: ChangeNumber,
        till: Option<ChangeNumber>,
    ) -> Result<SegmentChanges>;
}

/// Non-blocking source of change pages. Same contract as [`ChangeFetcher`].
pub trait AsyncChangeFetcher {
    fn fetch_flag_changes(
        &mut self,
        since: ChangeNumber,
        rb_since: ChangeNumber,
        till: Option<ChangeNumber>,
    ) -> impl Future<Output = Result<SplitChanges>> + Send;

    fn fetch_segment_changes(
        &mut self,
        segment_name: &str,
        since: ChangeNumber,
        till: Option<ChangeNumber>,
    ) -> impl Future<Output = Result<SegmentChanges>> + Send;
}

pub struct HttpFetcherConfig {
    pub sdk_url: String,
    pub api_key: String,
    /// Flag sets to request. Empty means all flags.
    pub flag_sets: FlagSetsFilter,
}

/// A client that fetches change pages from the server.
pub struct HttpFetcher {
    config: HttpFetcherConfig,
    // Clients hold a connection pool internally, so they are reused between requests. They are
    // created on first use: a blocking client must not be created from within an async runtime.
    blocking_client: Option<reqwest::blocking::Client>,
    async_client: Option<reqwest::Client>,
    /// If we receive a 401 Unauthorized error during a request, it means the API key is not
    /// valid. We cache this error so we don't issue additional requests to the server.
    unauthorized: bool,
}

impl HttpFetcher {
    pub fn new(config: HttpFetcherConfig) -> HttpFetcher {
        HttpFetcher {
            config,
            blocking_client: None,
            async_client: None,
            unauthorized: false,
        }
    }

    fn split_changes_url(
        &self,
        since: ChangeNumber,
        rb_since: ChangeNumber,
        till: Option<ChangeNumber>,
    ) -> Result<Url> {
        let mut params = vec![
            ("s", FLAGS_SPEC_VERSION.to_owned()),
            ("since", since.to_string()),
            ("rbSince", rb_since.to_string()),
        ];
        if !self.config.flag_sets.is_empty() {
            let sets: Vec<&str> = self.config.flag_sets.sets().collect();
            params.push(("sets", sets.join(",")));
        }
        if let Some(till) = till {
            params.push(("till", till.to_string()));
        }

        Url::parse_with_params(
            &format!("{}{}", self.config.sdk_url, SPLIT_CHANGES_ENDPOINT),
            &params,
        )
        .map_err(Error::InvalidBaseUrl)
    }

    fn segment_changes_url(
        &self,
        segment_name: &str,
        since: ChangeNumber,
        till: Option<ChangeNumber>,
    ) -> Result<Url> {
        let mut params = vec![("since", since.to_string())];
        if let Some(till) = till {
            params.push(("till", till.to_string()));
        }

        Url::parse_with_params(
            &format!(
                "{}{}/{}",
                self.config.sdk_url, SEGMENT_CHANGES_ENDPOINT, segment_name
            ),
            &params,
        )
        .map_err(Error::InvalidBaseUrl)
    }

    fn check_authorized(&self) -> Result<()> {
        if self.unauthorized {
            return Err(Error::Unauthorized);
        }
        Ok(())
    }

    fn check_status(&mut self, status: StatusCode) -> Result<()> {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            log::warn!(target: "splitio", "client is not authorized. Check your API key");
            self.unauthorized = true;
            return Err(Error::Unauthorized);
        }
        if !status.is_success() {
            log::warn!(target: "splitio",
                       status = status.as_u16();
                       "received non-200 response while fetching changes");
            return Err(Error::UnexpectedResponse(format!("status {status}")));
        }
        Ok(())
    }

    fn get_blocking<T: serde::de::DeserializeOwned>(&mut self, url: Url) -> Result<T> {
        self.check_authorized()?;

        let client = self
            .blocking_client
            .get_or_insert_with(reqwest::blocking::Client::new);
        let response = client
            .get(url)
            .bearer_auth(&self.config.api_key)
            .header("SplitSDKVersion", sdk_version())
            .send()?;

        self.check_status(response.status())?;
        decode(&response.text()?)
    }

    async fn get_async<T: serde::de::DeserializeOwned>(&mut self, url: Url) -> Result<T> {
        self.check_authorized()?;

        let client = self.async_client.get_or_insert_with(reqwest::Client::new);
        let response = client
            .get(url)
            .bearer_auth(&self.config.api_key)
            .header("SplitSDKVersion", sdk_version())
            .send()
            .await?;

        self.check_status(response.status())?;
        decode(&response.text().await?)
    }
}

fn sdk_version() -> String {
    format!("rust-{}", env!("CARGO_PKG_VERSION"))
}

fn decode<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|err| {
        log::warn!(target: "splitio", "failed to parse change response body: {err}");
        Error::UnexpectedResponse(err.to_string())
    })
}

impl ChangeFetcher for HttpFetcher {
    fn fetch_flag_changes(
        &mut self,
        since: ChangeNumber,
        rb_since: ChangeNumber,
        till: Option<ChangeNumber>,
    ) -> Result<SplitChanges> {
        let url = self.split_changes_url(since, rb_since, till)?;
        log::debug!(target: "splitio", since, rb_since; "fetching flag changes");
        self.get_blocking(url)
    }

    fn fetch_segment_changes(
        &mut self,
        segment_name: &str,
        since: ChangeNumber,
        till: Option<ChangeNumber>,
    ) -> Result<SegmentChanges> {
        let url = self.segment_changes_url(segment_name, since, till)?;
        log::debug!(target: "splitio", segment_name, since; "fetching segment changes");
        self.get_blocking(url)
    }
}

impl AsyncChangeFetcher for HttpFetcher {
    async fn fetch_flag_changes(
        &mut self,
        since: ChangeNumber,
        rb_since: ChangeNumber,
        till: Option<ChangeNumber>,
    ) -> Result<SplitChanges> {
        let url = self.split_changes_url(since, rb_since, till)?;
        log::debug!(target: "splitio", since, rb_since; "fetching flag changes");
        self.get_async(url).await
    }

    async fn fetch_segment_changes(
        &mut self,
        segment_name: &str,
        since: ChangeNumber,
        till: Option<ChangeNumber>,
    ) -> Result<SegmentChanges> {
        let url = self.segment_changes_url(segment_name, since, till)?;
        log::debug!(target: "splitio", segment_name, since; "fetching segment changes");
        self.get_async(url).await
    }
}
