//! Socket configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use flare_protocol::{PhoenixSerializer, Serializer};
use flare_timer::{Backoff, Scheduler, TokioScheduler};
use flare_transport::{TransportFactory, WebSocketFactory};
use url::Url;

use crate::error::FlareError;

/// Default timeout for joins, leaves, and pushes.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Protocol version sent as the `vsn` query parameter.
pub const DEFAULT_VSN: &str = "2.0.0";

/// Everything a [`Socket`](crate::Socket) needs to know up front.
///
/// Build one with [`SocketBuilder`](crate::SocketBuilder) or
/// [`SocketConfig::new`] and override the fields you care about.
#[derive(Clone)]
pub struct SocketConfig {
    /// The endpoint, e.g. `ws://localhost:4000/socket`. `/websocket` is
    /// appended when missing.
    pub endpoint: String,

    /// Extra query parameters, e.g. an auth token.
    pub params: Vec<(String, String)>,

    /// Protocol version, sent as `vsn`.
    pub vsn: String,

    /// Default timeout for joins, leaves, and pushes.
    pub timeout: Duration,

    /// Time between heartbeats. A heartbeat still unanswered when the
    /// next one is due closes the connection.
    pub heartbeat_interval: Duration,

    /// Disables heartbeats entirely.
    pub skip_heartbeat: bool,

    /// Delay before each reconnect attempt, by attempt number.
    pub reconnect_after: Backoff,

    /// Delay before each channel rejoin attempt, by attempt number.
    pub rejoin_after: Backoff,

    pub serializer: Arc<dyn Serializer>,
    pub transport: Arc<dyn TransportFactory>,
    pub scheduler: Arc<dyn Scheduler>,
}

impl SocketConfig {
    /// A config with every default filled in.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            params: Vec::new(),
            vsn: DEFAULT_VSN.to_owned(),
            timeout: DEFAULT_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            skip_heartbeat: false,
            reconnect_after: Backoff::reconnect_default(),
            rejoin_after: Backoff::rejoin_default(),
            serializer: Arc::new(PhoenixSerializer),
            transport: Arc::new(WebSocketFactory),
            scheduler: Arc::new(TokioScheduler),
        }
    }

    /// The URL the transport connects to:
    /// `<endpoint>/websocket?<existing query>&vsn=<vsn>&<params>`.
    ///
    /// `http` and `https` endpoints map to `ws` and `wss`.
    ///
    /// # Errors
    /// [`FlareError::InvalidEndpoint`] if the endpoint doesn't parse or
    /// isn't a `ws`, `wss`, `http` or `https` URL.
    pub fn endpoint_url(&self) -> Result<Url, FlareError> {
        let invalid = |reason: String| FlareError::InvalidEndpoint {
            endpoint: self.endpoint.clone(),
            reason,
        };

        let mut url = Url::parse(self.endpoint.trim()).map_err(|e| invalid(e.to_string()))?;
        let scheme = match url.scheme() {
            "ws" | "http" => "ws",
            "wss" | "https" => "wss",
            other => return Err(invalid(format!("unsupported scheme {other:?}"))),
        };
        url.set_scheme(scheme)
            .map_err(|()| invalid(format!("cannot switch to {scheme}")))?;
        url.set_fragment(None);

        let has_suffix = url
            .path_segments()
            .and_then(|mut segments| segments.rfind(|segment| !segment.is_empty()))
            == Some("websocket");
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| invalid("URL has no path".to_owned()))?;
            segments.pop_if_empty();
            if !has_suffix {
                segments.push("websocket");
            }
        }

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("vsn", &self.vsn);
            for (key, value) in &self.params {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

impl fmt::Debug for SocketConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketConfig")
            .field("endpoint", &self.endpoint)
            .field("params", &self.params.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .field("vsn", &self.vsn)
            .field("timeout", &self.timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("skip_heartbeat", &self.skip_heartbeat)
            .finish_non_exhaustive()
    }
}
