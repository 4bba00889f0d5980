//! Session configuration.

use core::time::Duration;
use std::sync::Arc;

use url::Url;

use crate::{
    DEFAULT_HOLD, DEFAULT_LANG, DEFAULT_MAX_RETRIES, DEFAULT_POLL_DELAY_MILLIS,
    DEFAULT_TIMEOUT_MARGIN_SECS, DEFAULT_WAIT_SECS, backoff::Backoff, connector::Connector,
    error::BoshError,
};

/// How responses are handed to the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResponseOrder {
    /// Responses are processed strictly in request-id order. A response that
    /// overtakes its predecessor is parked until the predecessor has been
    /// processed (or has failed).
    #[default]
    Ordered,

    /// Responses are processed as they arrive.
    Unordered,
}

/// Configuration for a [`BoshClient`](crate::BoshClient).
///
/// Only the endpoint and target domain are required; everything else has a
/// default.
#[derive(Debug, Clone)]
pub struct BoshConfig {
    endpoint: Url,
    to: String,
    from: Option<String>,
    route: Option<String>,
    lang: String,
    connector: Option<Arc<dyn Connector>>,
    wait: Duration,
    hold: u32,
    exchange_timeout: Option<Duration>,
    poll_delay: Duration,
    max_retries: u32,
    backoff: Backoff,
    response_order: ResponseOrder,
    initial_rid: Option<u64>,
}

impl BoshConfig {
    /// Configuration for a session with the CM at `endpoint`, targeting
    /// the domain `to`.
    #[must_use]
    pub fn new(endpoint: Url, to: impl Into<String>) -> Self {
        Self {
            endpoint,
            to: to.into(),
            from: None,
            route: None,
            lang: DEFAULT_LANG.to_owned(),
            connector: None,
            wait: Duration::from_secs(DEFAULT_WAIT_SECS),
            hold: DEFAULT_HOLD,
            exchange_timeout: None,
            poll_delay: Duration::from_millis(DEFAULT_POLL_DELAY_MILLIS),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Backoff::default(),
            response_order: ResponseOrder::default(),
            initial_rid: None,
        }
    }

    /// Set the client identity sent as `from`.
    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Set the `route` the CM should connect to.
    #[must_use]
    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    /// Set the `xml:lang` of the session.
    #[must_use]
    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    /// Use a custom connector to attach secure channels for `https`
    /// endpoints.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Request a `wait` value.
    #[must_use]
    pub const fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Request a `hold` value.
    #[must_use]
    pub const fn with_hold(mut self, hold: u32) -> Self {
        self.hold = hold;
        self
    }

    /// Fix the per-exchange network timeout instead of deriving it from `wait`.
    #[must_use]
    pub const fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = Some(timeout);
        self
    }

    /// Set the delay before an idle session sends an empty poll.
    #[must_use]
    pub const fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    /// Set how many consecutive failed exchanges are tolerated.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the backoff between retransmissions.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Choose how responses are ordered before processing.
    #[must_use]
    pub const fn with_response_order(mut self, order: ResponseOrder) -> Self {
        self.response_order = order;
        self
    }

    /// Start the request-id sequence at `rid` instead of a random value.
    #[must_use]
    pub const fn with_initial_rid(mut self, rid: u64) -> Self {
        self.initial_rid = Some(rid);
        self
    }

    /// The CM endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// The target domain.
    #[must_use]
    pub fn to(&self) -> &str {
        &self.to
    }

    /// The client identity, if configured.
    #[must_use]
    pub fn from(&self) -> Option<&str> {
        self.from.as_deref()
    }

    /// The route, if configured.
    #[must_use]
    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    /// The session language.
    #[must_use]
    pub fn lang(&self) -> &str {
        &self.lang
    }

    /// The custom connector, if configured.
    #[must_use]
    pub fn connector(&self) -> Option<&Arc<dyn Connector>> {
        self.connector.as_ref()
    }

    /// The requested `wait`.
    #[must_use]
    pub const fn wait(&self) -> Duration {
        self.wait
    }

    /// The requested `hold`.
    #[must_use]
    pub const fn hold(&self) -> u32 {
        self.hold
    }

    /// The fixed per-exchange timeout, if any.
    #[must_use]
    pub const fn exchange_timeout(&self) -> Option<Duration> {
        self.exchange_timeout
    }

    /// Per-exchange timeout for a session whose effective `wait` is `wait`.
    #[must_use]
    pub fn exchange_timeout_for(&self, wait: Duration) -> Duration {
        self.exchange_timeout
            .unwrap_or_else(|| wait + Duration::from_secs(DEFAULT_TIMEOUT_MARGIN_SECS))
    }

    /// The idle poll delay.
    #[must_use]
    pub const fn poll_delay(&self) -> Duration {
        self.poll_delay
    }

    /// The retry budget.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// The retransmission backoff.
    #[must_use]
    pub const fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// The response ordering mode.
    #[must_use]
    pub const fn response_order(&self) -> ResponseOrder {
        self.response_order
    }

    /// The configured first request id, if any.
    #[must_use]
    pub const fn initial_rid(&self) -> Option<u64> {
        self.initial_rid
    }

    /// Whether the endpoint requires a secure channel.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.endpoint.scheme() == "https"
    }

    /// Check that the configuration describes a reachable endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`BoshError::InvalidConfig`] if the scheme is neither `http`
    /// nor `https`, the endpoint has no host, or `to` is empty.
    pub fn validate(&self) -> Result<(), BoshError> {
        match self.endpoint.scheme() {
            "http" | "https" => {}
            other => {
                return Err(BoshError::InvalidConfig(format!(
                    "unsupported endpoint scheme: {other}"
                )));
            }
        }

        if self.endpoint.host_str().is_none() {
            return Err(BoshError::InvalidConfig("endpoint has no host".into()));
        }

        if self.to.is_empty() {
            return Err(BoshError::InvalidConfig("target domain is empty".into()));
        }

        let factor = self.backoff.factor();
        if !factor.is_finite() || factor < 0.0 {
            return Err(BoshError::InvalidConfig(format!(
                "backoff factor must be finite and non-negative, got {factor}"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testresult::TestResult;

    #[test]
    fn defaults() -> TestResult {
        let cfg = BoshConfig::new(Url::parse("http://localhost:5280/http-bind")?, "test@domain");
        assert_eq!(cfg.wait(), Duration::from_secs(DEFAULT_WAIT_SECS));
        assert_eq!(cfg.hold(), DEFAULT_HOLD);
        assert_eq!(cfg.lang(), DEFAULT_LANG);
        assert_eq!(cfg.max_retries(), DEFAULT_MAX_RETRIES);
        assert_eq!(cfg.response_order(), ResponseOrder::Ordered);
        assert!(cfg.connector().is_none());
        assert!(!cfg.is_secure());
        cfg.validate()?;
        Ok(())
    }

    #[test]
    fn exchange_timeout_derives_from_wait() -> TestResult {
        let cfg = BoshConfig::new(Url::parse("http://localhost/")?, "example.com");
        assert_eq!(
            cfg.exchange_timeout_for(Duration::from_secs(30)),
            Duration::from_secs(30 + DEFAULT_TIMEOUT_MARGIN_SECS)
        );

        let cfg = cfg.with_exchange_timeout(Duration::from_secs(5));
        assert_eq!(
            cfg.exchange_timeout_for(Duration::from_secs(30)),
            Duration::from_secs(5)
        );
        Ok(())
    }

    #[test]
    fn https_is_secure() -> TestResult {
        let cfg = BoshConfig::new(Url::parse("https://localhost/")?, "example.com");
        assert!(cfg.is_secure());
        Ok(())
    }

    #[test]
    fn rejects_other_schemes() -> TestResult {
        let cfg = BoshConfig::new(Url::parse("ftp://localhost/")?, "example.com");
        assert!(matches!(cfg.validate(), Err(BoshError::InvalidConfig(_))));
        Ok(())
    }

    #[test]
    fn rejects_empty_target() -> TestResult {
        let cfg = BoshConfig::new(Url::parse("http://localhost/")?, "");
        assert!(matches!(cfg.validate(), Err(BoshError::InvalidConfig(_))));
        Ok(())
    }

    #[test]
    fn rejects_non_finite_backoff_factor() -> TestResult {
        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_secs(1), f64::NAN, 0.0);
        let cfg = BoshConfig::new(Url::parse("http://localhost/")?, "example.com")
            .with_backoff(backoff);
        assert!(matches!(cfg.validate(), Err(BoshError::InvalidConfig(_))));

        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_secs(1), -2.0, 0.0);
        let cfg = cfg.with_backoff(backoff);
        assert!(matches!(cfg.validate(), Err(BoshError::InvalidConfig(_))));
        Ok(())
    }
}
