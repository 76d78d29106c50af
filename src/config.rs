use std::time::Duration;

use crate::{
    fetcher::DEFAULT_SDK_URL,
    impressions::NoopImpressionListener,
    poller_thread::PollerThreadConfig,
    storage::FlagSetsFilter,
    Client, ImpressionListener,
};

/// Configuration for [`Client`].
pub struct ClientConfig<'a> {
    pub(crate) api_key: String,
    pub(crate) sdk_url: String,
    pub(crate) features_refresh_rate: Duration,
    pub(crate) segments_refresh_rate: Duration,
    pub(crate) flag_sets: FlagSetsFilter,
    pub(crate) impression_listener: Box<dyn ImpressionListener + Send + Sync + 'a>,
    pub(crate) labels_enabled: bool,
}

impl<'a> ClientConfig<'a> {
    /// Create a default configuration using the specified SDK key.
    ///
    /// ```
    /// # use splitio::ClientConfig;
    /// ClientConfig::from_api_key("sdk-key");
    /// ```
    pub fn from_api_key(api_key: impl Into<String>) -> Self {
        ClientConfig {
            api_key: api_key.into(),
            sdk_url: ClientConfig::DEFAULT_SDK_URL.to_owned(),
            features_refresh_rate: PollerThreadConfig::DEFAULT_POLL_INTERVAL,
            segments_refresh_rate: PollerThreadConfig::DEFAULT_SEGMENTS_INTERVAL,
            flag_sets: FlagSetsFilter::default(),
            impression_listener: Box::new(NoopImpressionListener),
            labels_enabled: true,
        }
    }

    /// Default base URL for API calls.
    pub const DEFAULT_SDK_URL: &'static str = DEFAULT_SDK_URL;

    /// Override base URL for API calls. Clients should use the default setting in most cases.
    pub fn sdk_url(&mut self, sdk_url: impl Into<String>) -> &mut Self {
        self.sdk_url = sdk_url.into();
        self
    }

    /// How often flags and rule-based segments are polled.
    pub fn features_refresh_rate(&mut self, rate: Duration) -> &mut Self {
        self.features_refresh_rate = rate;
        self
    }

    /// How often already known segments are refreshed.
    pub fn segments_refresh_rate(&mut self, rate: Duration) -> &mut Self {
        self.segments_refresh_rate = rate;
        self
    }

    /// Only synchronize flags belonging to at least one of these flag sets. Invalid names are
    /// dropped with a warning.
    ///
    /// ```
    /// # use splitio::ClientConfig;
    /// ClientConfig::from_api_key("sdk-key").flag_sets(["backend", " Mobile "]);
    /// ```
    pub fn flag_sets<I>(&mut self, flag_sets: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.flag_sets = FlagSetsFilter::new(flag_sets);
        self
    }

    /// Set impression listener to pass served treatments to your data warehouse.
    ///
    /// ```
    /// # use splitio::{ClientConfig, Impression};
    /// let mut config = ClientConfig::from_api_key("sdk-key");
    /// config.impression_listener(|impression: Impression| {
    ///   println!("{:?}", impression);
    /// });
    /// ```
    pub fn impression_listener(
        &mut self,
        impression_listener: impl ImpressionListener + Send + Sync + 'a,
    ) -> &mut Self {
        self.impression_listener = Box::new(impression_listener);
        self
    }

    /// Whether impressions carry the label explaining the treatment. Defaults to `true`.
    pub fn labels_enabled(&mut self, labels_enabled: bool) -> &mut Self {
        self.labels_enabled = labels_enabled;
        self
    }

    pub(crate) fn poller_config(&self) -> PollerThreadConfig {
        PollerThreadConfig::new()
            .with_interval(self.features_refresh_rate)
            .with_segments_interval(self.segments_refresh_rate)
    }

    /// Create a new [`Client`] using the specified configuration.
    ///
    /// ```
    /// # use splitio::{ClientConfig, Client};
    /// let client: Client = ClientConfig::from_api_key("sdk-key").to_client();
    /// ```
    pub fn to_client(self) -> Client<'a> {
        Client::new(self)
    }
}
