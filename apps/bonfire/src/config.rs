use thiserror::Error;
use url::Url;

/// Where the chat service lives and which channel to join. One base URL
/// covers all three endpoints: token issuance, the message relay and the
/// realtime socket.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    base_url: Url,
    channel: String,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid service configuration: {0}")]
    Invalid(String),
}

impl ServiceConfig {
    pub fn new(
        service_base: impl AsRef<str>,
        channel: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        // Allow a centralized override so callers and env stay consistent.
        let mut base = std::env::var("BONFIRE_SERVICE_BASE")
            .ok()
            .and_then(|s| {
                let trimmed = s.trim().to_string();
                if trimmed.is_empty() { None } else { Some(trimmed) }
            })
            .unwrap_or_else(|| service_base.as_ref().trim().to_string());
        if base.is_empty() {
            return Err(ConfigError::Invalid("service base url cannot be empty".into()));
        }
        if !base.contains("://") {
            let inferred_scheme = infer_scheme(&base);
            base = format!("{inferred_scheme}{base}");
        }
        let parsed = Url::parse(&base)
            .map_err(|err| ConfigError::Invalid(format!("invalid service base url: {err}")))?;

        let channel = channel.into();
        if channel.trim().is_empty() {
            return Err(ConfigError::Invalid("channel name cannot be empty".into()));
        }

        Ok(Self {
            base_url: parsed,
            channel,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// The token issuance endpoint handed to the realtime provider. Its
    /// contract is owned by the service; we only pass the URL along.
    pub fn token_request_url(&self) -> Result<Url, ConfigError> {
        self.join("api/realtime-token-request")
    }

    /// The HTTP endpoint outgoing commands are relayed through.
    pub fn relay_url(&self) -> Result<Url, ConfigError> {
        self.join("api/send-message")
    }

    /// The realtime socket endpoint, with the scheme flipped to ws/wss.
    pub fn realtime_url(&self) -> Result<Url, ConfigError> {
        let mut url = self.join("api/realtime")?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| ConfigError::Invalid(format!("cannot derive a websocket url from {}", self.base_url)))?;
        Ok(url)
    }

    fn join(&self, path: &str) -> Result<Url, ConfigError> {
        self.base_url.join(path).map_err(|err| {
            ConfigError::Invalid(format!("unable to construct endpoint {path}: {err}"))
        })
    }
}

fn infer_scheme(base: &str) -> &'static str {
    let host_part = base
        .split('/')
        .next()
        .unwrap_or(base)
        .trim_start_matches('[')
        .split(']')
        .next()
        .unwrap_or(base);
    let host_lower = host_part.to_ascii_lowercase();
    if host_lower.starts_with("localhost")
        || host_lower == "0.0.0.0"
        || host_lower.starts_with("127.")
        || host_lower == "::1"
        || host_lower.starts_with("10.")
        || host_lower.starts_with("192.168.")
        || host_lower
            .strip_prefix("172.")
            .and_then(|rest| rest.split('.').next())
            .and_then(|octet| octet.parse::<u8>().ok())
            .map(|octet| (16..32).contains(&octet))
            .unwrap_or(false)
    {
        "http://"
    } else {
        "https://"
    }
}
