use crate::{error::ConfigError, sink::Sink};
use std::{str::FromStr, time::Duration};
use url::{Host, Url};

/// URL scheme accepted by [`Configuration::from_url`].
pub const SCHEME: &str = "statsite";

/// Shortest flush interval or backoff the worker will wait for.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// A configuration builder for `Sink`.
#[derive(Clone, Debug)]
pub struct Configuration {
    pub(crate) capacity: usize,
    pub(crate) flush_interval: Duration,
    pub(crate) backoff: Duration,
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) write_timeout: Option<Duration>,
}

impl Default for Configuration {
    fn default() -> Configuration {
        Configuration {
            capacity: 4096,
            flush_interval: Duration::from_millis(100),
            backoff: Duration::from_secs(5),
            connect_timeout: Some(Duration::from_secs(5)),
            write_timeout: Some(Duration::from_secs(5)),
        }
    }
}

impl Configuration {
    /// Creates a new `Configuration` with default values.
    pub fn new() -> Configuration { Default::default() }

    /// Sets the queue capacity.
    ///
    /// Defaults to `4096`.
    ///
    /// This is the maximum number of formatted lines waiting to be written.  Once the queue is full,
    /// new metrics are dropped rather than blocking the caller, so this is the knob that trades
    /// memory for tolerance of bursts.  A capacity of zero is treated as one.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the flush interval.
    ///
    /// Defaults to `100ms`.
    ///
    /// Lines are written into a buffer and pushed to the socket on this cadence, so this is also
    /// roughly the longest a metric sits in the sink before the server sees it.  Anything below
    /// `1ms` is treated as `1ms`.
    pub fn flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval.max(MIN_INTERVAL);
        self
    }

    /// Sets the backoff duration.
    ///
    /// Defaults to `5s`.
    ///
    /// After any connect, write or flush failure, the sink waits this long before reconnecting.
    /// Metrics sent in the meantime are discarded.  Anything below `1ms` is treated as `1ms`.
    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff.max(MIN_INTERVAL);
        self
    }

    /// Sets the connect timeout.
    ///
    /// Defaults to `5s`.  `None` leaves it up to the operating system.
    pub fn connect_timeout(mut self, connect_timeout: Option<Duration>) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Sets the socket write timeout.
    ///
    /// Defaults to `5s`.  `None` means a server that stops reading can hold the worker thread for
    /// as long as the kernel allows.  Callers never wait on it, but `Sink::shutdown_timeout` may
    /// give up.
    pub fn write_timeout(mut self, write_timeout: Option<Duration>) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    /// Parses a `statsite://host:port` URL into a configuration and destination address.
    ///
    /// Tuning knobs can be given as query parameters: `capacity`, `flush_interval_ms`,
    /// `backoff_ms`, `connect_timeout_ms` and `write_timeout_ms`.  A timeout of `0` disables it.
    pub fn from_url(url: &str) -> Result<(Configuration, String), ConfigError> {
        let url = Url::parse(url)?;
        if url.scheme() != SCHEME {
            return Err(ConfigError::UnsupportedScheme(url.scheme().to_owned()));
        }

        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_owned(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => format!("[{}]", ip),
            _ => return Err(ConfigError::MissingHost),
        };
        let port = url.port().ok_or(ConfigError::MissingPort)?;

        let mut config = Configuration::default();
        for (name, value) in url.query_pairs() {
            config = match &*name {
                "capacity" => config.capacity(parse_param(&name, &value)?),
                "flush_interval_ms" => config.flush_interval(Duration::from_millis(parse_param(&name, &value)?)),
                "backoff_ms" => config.backoff(Duration::from_millis(parse_param(&name, &value)?)),
                "connect_timeout_ms" => config.connect_timeout(parse_timeout(&name, &value)?),
                "write_timeout_ms" => config.write_timeout(parse_timeout(&name, &value)?),
                _ => return Err(ConfigError::UnknownParameter(name.to_string())),
            };
        }

        Ok((config, format!("{}:{}", host, port)))
    }

    /// Create a `Sink` sending to `addr` based on this configuration.
    pub fn build<A: Into<String>>(self, addr: A) -> Sink { Sink::from_config(addr.into(), self) }
}

fn parse_param<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidParameter {
        name: name.to_owned(),
        value: value.to_owned(),
    })
}

fn parse_timeout(name: &str, value: &str) -> Result<Option<Duration>, ConfigError> {
    let ms: u64 = parse_param(name, value)?;
    Ok(if ms == 0 { None } else { Some(Duration::from_millis(ms)) })
}
