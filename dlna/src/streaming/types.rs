use std::net::IpAddr;
use std::time::Duration;

use crate::model::{ServiceKind, Udn};

/// Subscription identifier (`SID`) issued by the device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn new(sid: impl Into<String>) -> Self {
        Self(sid.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// GENA subscription and callback server settings
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Duration requested in the TIMEOUT header, in seconds
    pub timeout_seconds: u32,
    /// Renew this long before the granted duration runs out
    pub renewal_threshold: Duration,
    /// Inclusive range of ports tried when binding the callback listener
    pub callback_port_range: (u16, u16),
    /// Address advertised in CALLBACK headers; detected when unset
    pub callback_host: Option<IpAddr>,
    /// Deadline for SUBSCRIBE/UNSUBSCRIBE requests
    pub request_timeout: Duration,
}

const MIN_TIMEOUT_SECS: u32 = 60;
const MAX_TIMEOUT_SECS: u32 = 24 * 60 * 60;
const MIN_CALLBACK_PORT: u16 = 1024;

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 1800,
            renewal_threshold: Duration::from_secs(300),
            callback_port_range: (8080, 8090),
            callback_host: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

fn check_timeout(seconds: u32) -> Result<(), String> {
    if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&seconds) {
        return Err(format!(
            "subscription duration {}s is outside {}..={}s",
            seconds, MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS
        ));
    }
    Ok(())
}

fn check_threshold(threshold: Duration, timeout_seconds: u32) -> Result<(), String> {
    if threshold.as_secs() >= u64::from(timeout_seconds) {
        return Err(format!(
            "renewal threshold {}s leaves no time before the {}s subscription lapses",
            threshold.as_secs(),
            timeout_seconds
        ));
    }
    Ok(())
}

fn check_ports((start, end): (u16, u16)) -> Result<(), String> {
    if start > end {
        return Err(format!("callback ports {}..{} are reversed", start, end));
    }
    if start < MIN_CALLBACK_PORT {
        return Err(format!("callback port {} is privileged", start));
    }
    Ok(())
}

impl SubscriptionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout_seconds(mut self, seconds: u32) -> Result<Self, String> {
        check_timeout(seconds)?;
        self.timeout_seconds = seconds;
        Ok(self)
    }

    pub fn with_renewal_threshold(mut self, threshold: Duration) -> Result<Self, String> {
        check_threshold(threshold, self.timeout_seconds)?;
        self.renewal_threshold = threshold;
        Ok(self)
    }

    pub fn with_callback_port_range(mut self, start: u16, end: u16) -> Result<Self, String> {
        check_ports((start, end))?;
        self.callback_port_range = (start, end);
        Ok(self)
    }

    pub fn with_callback_host(mut self, host: IpAddr) -> Self {
        self.callback_host = Some(host);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Re-checks every field, for configs assembled by hand
    pub fn validate(&self) -> Result<(), String> {
        check_timeout(self.timeout_seconds)?;
        check_threshold(self.renewal_threshold, self.timeout_seconds)?;
        check_ports(self.callback_port_range)?;
        if self.request_timeout.is_zero() {
            return Err("request timeout is zero".to_string());
        }
        Ok(())
    }
}

/// Where a callback path delivers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackTarget {
    pub udn: Udn,
    pub service: ServiceKind,
}

/// A NOTIFY request as received by the callback server
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub target: CallbackTarget,
    /// `SID` header
    pub sid: Option<SubscriptionId>,
    /// `SEQ` header
    pub seq: Option<u32>,
    pub event_xml: String,
}

impl RawEvent {
    pub fn new(target: CallbackTarget, sid: Option<SubscriptionId>, seq: Option<u32>, event_xml: String) -> Self {
        Self {
            target,
            sid,
            seq,
            event_xml,
        }
    }
}
