use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use url::Url;

use crate::client::services::retry::{RetryPolicy, DEFAULT_RECONNECT_DELAY};

/// Path of the group-chat socket on the portal origin.
pub const WEBSOCKET_PATH: &str = "/ws";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Origin the portal is served from, e.g. `https://hub.hau.edu`.
    pub origin: Url,
    /// `host:port` of the request/response API.
    pub api_addr: String,
    pub user_id: String,
    pub group_id: Option<String>,
    pub retry: RetryPolicy,
    pub max_message_length: usize,
    pub max_upload_bytes: u64,
    pub request_timeout: Duration,
}

fn parsed<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

impl ClientConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source; unset or
    /// unparsable numeric values fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secs = |key: &str| parsed::<u64>(lookup(key)).map(Duration::from_secs);

        let origin_raw =
            lookup("HAUHUB_ORIGIN").unwrap_or_else(|| "http://127.0.0.1:8080".to_string());
        let origin = Url::parse(&origin_raw)
            .with_context(|| format!("invalid HAUHUB_ORIGIN '{}'", origin_raw))?;

        let delay = secs("RECONNECT_DELAY_SECS").unwrap_or(DEFAULT_RECONNECT_DELAY);
        let retry = match lookup("RECONNECT_POLICY").as_deref() {
            Some("fixed") => RetryPolicy::fixed(delay),
            Some("backoff") | None => RetryPolicy::Backoff {
                initial: delay,
                max: secs("RECONNECT_MAX_DELAY_SECS").unwrap_or(Duration::from_secs(60)),
                multiplier: 2.0,
                jitter: 0.2,
                max_attempts: parsed(lookup("RECONNECT_MAX_ATTEMPTS")).unwrap_or(10),
            },
            Some(other) => return Err(anyhow!("unknown RECONNECT_POLICY '{}'", other)),
        };

        Ok(Self {
            origin,
            api_addr: lookup("HAUHUB_API_ADDR").unwrap_or_else(|| "127.0.0.1:5000".to_string()),
            user_id: lookup("HAUHUB_USER_ID").unwrap_or_else(|| "guest".to_string()),
            group_id: lookup("HAUHUB_GROUP_ID").filter(|g| !g.trim().is_empty()),
            retry,
            max_message_length: parsed(lookup("MAX_MESSAGE_LENGTH")).unwrap_or(2048),
            max_upload_bytes: parsed(lookup("MAX_UPLOAD_BYTES")).unwrap_or(10 * 1024 * 1024),
            request_timeout: secs("REQUEST_TIMEOUT_SECS").unwrap_or(Duration::from_secs(10)),
        })
    }

    pub fn websocket_url(&self) -> anyhow::Result<Url> {
        websocket_url_for(&self.origin)
    }
}

/// Maps the page origin to the streaming endpoint: `http` becomes `ws`,
/// `https` becomes `wss`, and the path is fixed.
pub fn websocket_url_for(origin: &Url) -> anyhow::Result<Url> {
    let scheme = match origin.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(anyhow!("unsupported origin scheme '{}'", other)),
    };
    let mut url = origin.clone();
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("cannot switch {} to {}", origin, scheme))?;
    url.set_path(WEBSOCKET_PATH);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}
