use std::time::Duration;

use async_trait::async_trait;

use super::types::SubscriptionId;

/// GENA and callback-server failures
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("SUBSCRIBE rejected: {0}")]
    SubscriptionFailed(String),

    /// The device answered a renewal with 412
    #[error("Device no longer knows the subscription")]
    SubscriptionExpired,

    #[error("Malformed NOTIFY body: {0}")]
    EventParseError(String),

    #[error("Callback server: {0}")]
    CallbackServerError(String),

    #[error("GENA request failed: {0}")]
    NetworkError(String),

    #[error("Device {udn} has no evented {service} service")]
    ServiceNotSupported { udn: String, service: String },

    #[error("Bad subscription settings: {0}")]
    InvalidConfiguration(String),

    #[error("No active subscription {subscription_id}")]
    SubscriptionNotFound { subscription_id: SubscriptionId },

    #[error("Event XML: {0}")]
    XmlParseError(String),

    #[error("GENA request timed out: {0}")]
    Timeout(String),
}

impl From<reqwest::Error> for SubscriptionError {
    fn from(err: reqwest::Error) -> Self {
        match err.is_timeout() {
            true => SubscriptionError::Timeout(err.to_string()),
            false => SubscriptionError::NetworkError(err.to_string()),
        }
    }
}

impl From<quick_xml::Error> for SubscriptionError {
    fn from(err: quick_xml::Error) -> Self {
        SubscriptionError::XmlParseError(err.to_string())
    }
}

pub type SubscriptionResult<T> = Result<T, SubscriptionError>;

/// What the device granted in answer to SUBSCRIBE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub sid: SubscriptionId,
    /// `None` when the device granted `Second-infinite`
    pub timeout: Option<Duration>,
}

/// GENA requests against a service's event subscription URL
#[async_trait]
pub trait GenaTransport: Send + Sync {
    async fn subscribe(&self, event_url: &str, callback_url: &str, timeout_seconds: u32) -> SubscriptionResult<Grant>;

    async fn renew(&self, event_url: &str, sid: &SubscriptionId, timeout_seconds: u32) -> SubscriptionResult<Grant>;

    async fn unsubscribe(&self, event_url: &str, sid: &SubscriptionId) -> SubscriptionResult<()>;
}

/// GENA over HTTP using reqwest's extension methods
#[derive(Clone)]
pub struct GenaClient {
    http_client: reqwest::Client,
}

impl GenaClient {
    pub fn new(timeout: Duration) -> SubscriptionResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SubscriptionError::NetworkError(e.to_string()))?;
        Ok(Self { http_client })
    }

    fn method(name: &'static [u8]) -> SubscriptionResult<reqwest::Method> {
        reqwest::Method::from_bytes(name).map_err(|e| SubscriptionError::NetworkError(e.to_string()))
    }

    fn require_success(request: &str, response: &reqwest::Response) -> SubscriptionResult<()> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SubscriptionError::SubscriptionFailed(format!("{} answered {}", request, status)))
        }
    }

    fn grant_from(response: &reqwest::Response, fallback_sid: Option<&SubscriptionId>) -> SubscriptionResult<Grant> {
        let sid = response
            .headers()
            .get("SID")
            .and_then(|sid| sid.to_str().ok())
            .map(SubscriptionId::new)
            .or_else(|| fallback_sid.cloned())
            .ok_or_else(|| SubscriptionError::SubscriptionFailed("response carried no SID".to_string()))?;

        let timeout = response
            .headers()
            .get("TIMEOUT")
            .and_then(|granted| granted.to_str().ok())
            .and_then(parse_timeout_header);

        Ok(Grant { sid, timeout })
    }
}

#[async_trait]
impl GenaTransport for GenaClient {
    async fn subscribe(&self, event_url: &str, callback_url: &str, timeout_seconds: u32) -> SubscriptionResult<Grant> {
        log::debug!("SUBSCRIBE {} (callback {})", event_url, callback_url);

        let response = self
            .http_client
            .request(Self::method(b"SUBSCRIBE")?, event_url)
            .header("CALLBACK", format!("<{}>", callback_url))
            .header("NT", "upnp:event")
            .header("TIMEOUT", format!("Second-{}", timeout_seconds))
            .send()
            .await?;

        Self::require_success("SUBSCRIBE", &response)?;
        Self::grant_from(&response, None)
    }

    async fn renew(&self, event_url: &str, sid: &SubscriptionId, timeout_seconds: u32) -> SubscriptionResult<Grant> {
        let response = self
            .http_client
            .request(Self::method(b"SUBSCRIBE")?, event_url)
            .header("SID", sid.as_str())
            .header("TIMEOUT", format!("Second-{}", timeout_seconds))
            .send()
            .await?;

        // 412 Precondition Failed: the device no longer knows this SID
        if response.status().as_u16() == 412 {
            return Err(SubscriptionError::SubscriptionExpired);
        }
        Self::require_success("renewal", &response)?;
        Self::grant_from(&response, Some(sid))
    }

    async fn unsubscribe(&self, event_url: &str, sid: &SubscriptionId) -> SubscriptionResult<()> {
        let response = self
            .http_client
            .request(Self::method(b"UNSUBSCRIBE")?, event_url)
            .header("SID", sid.as_str())
            .send()
            .await?;

        Self::require_success("UNSUBSCRIBE", &response)
    }
}

/// Parses a GENA `TIMEOUT` header (`Second-1800`, `Second-infinite`)
pub fn parse_timeout_header(value: &str) -> Option<Duration> {
    let value = value.trim();
    let seconds = value
        .get(..7)
        .filter(|prefix| prefix.eq_ignore_ascii_case("Second-"))
        .map(|_| &value[7..])?;
    seconds.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timeout_header() {
        assert_eq!(parse_timeout_header("Second-1800"), Some(Duration::from_secs(1800)));
        assert_eq!(parse_timeout_header("second-300"), Some(Duration::from_secs(300)));
        assert_eq!(parse_timeout_header("Second-infinite"), None);
        assert_eq!(parse_timeout_header("1800"), None);
        assert_eq!(parse_timeout_header(""), None);
    }

    #[test]
    fn test_error_messages() {
        let missing = SubscriptionError::SubscriptionNotFound {
            subscription_id: SubscriptionId::new("uuid:gone"),
        };
        assert_eq!(missing.to_string(), "No active subscription uuid:gone");

        let unsupported = SubscriptionError::ServiceNotSupported {
            udn: "uuid:tv".to_string(),
            service: "RenderingControl".to_string(),
        };
        assert_eq!(unsupported.to_string(), "Device uuid:tv has no evented RenderingControl service");
    }

    #[test]
    fn test_gena_client_creation() {
        assert!(GenaClient::new(Duration::from_secs(5)).is_ok());
    }
}
