use std::time::Duration;

const MAX_TIMEOUT: Duration = Duration::from_secs(300);

/// How `cast` waits between `SetAVTransportURI` and `Play`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessStrategy {
    /// Sleep for a fixed settle delay
    FixedDelay(Duration),
    /// Poll `GetTransportInfo` until the device leaves
    /// `TRANSITIONING`/`NO_MEDIA_PRESENT` or `max_wait` elapses
    PollTransportState { interval: Duration, max_wait: Duration },
}

/// One step of the "is this device online" check, tried in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnlineProbe {
    /// `GetTransportInfo` on AVTransport
    TransportInfo,
    /// `GetVolume` on RenderingControl
    Volume,
    /// `GetProtocolInfo` on ConnectionManager
    ProtocolInfo,
    /// Presence in the device registry, no network traffic
    RegistryPresence,
}

/// Configuration for the control point
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Deadline for mutating actions (SetAVTransportURI, Play, SetVolume, ...)
    pub action_timeout: Duration,
    /// Deadline for state queries (GetTransportInfo, GetVolume, ...)
    pub query_timeout: Duration,
    /// Deadline for the GetPositionInfo half of a status poll
    pub position_timeout: Duration,
    /// Overall timeout of the SOAP HTTP client and description fetches
    pub http_timeout: Duration,
    pub readiness: ReadinessStrategy,
    /// Re-query the transport state after every successful mutating action
    pub refresh_after_action: bool,
    pub online_probes: Vec<OnlineProbe>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            action_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(5),
            position_timeout: Duration::from_secs(3),
            http_timeout: Duration::from_secs(30),
            readiness: ReadinessStrategy::FixedDelay(Duration::from_millis(500)),
            refresh_after_action: true,
            online_probes: vec![
                OnlineProbe::TransportInfo,
                OnlineProbe::Volume,
                OnlineProbe::RegistryPresence,
            ],
        }
    }
}

impl ControlConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Short deadlines and no settle delay, for tests and local simulators
    pub fn fast() -> Self {
        Self {
            action_timeout: Duration::from_secs(2),
            query_timeout: Duration::from_secs(1),
            position_timeout: Duration::from_secs(1),
            http_timeout: Duration::from_secs(5),
            readiness: ReadinessStrategy::FixedDelay(Duration::ZERO),
            refresh_after_action: false,
            online_probes: vec![OnlineProbe::TransportInfo, OnlineProbe::RegistryPresence],
        }
    }

    /// Set the action timeout with validation
    pub fn with_action_timeout(mut self, timeout: Duration) -> Result<Self, String> {
        check_timeout("Action timeout", timeout)?;
        self.action_timeout = timeout;
        Ok(self)
    }

    /// Set the query timeout with validation
    pub fn with_query_timeout(mut self, timeout: Duration) -> Result<Self, String> {
        check_timeout("Query timeout", timeout)?;
        self.query_timeout = timeout;
        Ok(self)
    }

    /// Set the position query timeout with validation
    pub fn with_position_timeout(mut self, timeout: Duration) -> Result<Self, String> {
        check_timeout("Position timeout", timeout)?;
        self.position_timeout = timeout;
        Ok(self)
    }

    /// Set the HTTP client timeout with validation
    pub fn with_http_timeout(mut self, timeout: Duration) -> Result<Self, String> {
        check_timeout("HTTP timeout", timeout)?;
        self.http_timeout = timeout;
        Ok(self)
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.readiness = ReadinessStrategy::FixedDelay(delay);
        self
    }

    /// Poll for readiness instead of sleeping
    pub fn with_readiness_polling(mut self, interval: Duration, max_wait: Duration) -> Result<Self, String> {
        if interval.is_zero() {
            return Err("Readiness poll interval must be greater than 0".to_string());
        }
        if max_wait < interval {
            return Err("Readiness max wait must be at least one poll interval".to_string());
        }
        self.readiness = ReadinessStrategy::PollTransportState { interval, max_wait };
        Ok(self)
    }

    pub fn with_refresh_after_action(mut self, refresh: bool) -> Self {
        self.refresh_after_action = refresh;
        self
    }

    pub fn with_online_probes(mut self, probes: Vec<OnlineProbe>) -> Result<Self, String> {
        if probes.is_empty() {
            return Err("At least one online probe is required".to_string());
        }
        self.online_probes = probes;
        Ok(self)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), String> {
        check_timeout("Action timeout", self.action_timeout)?;
        check_timeout("Query timeout", self.query_timeout)?;
        check_timeout("Position timeout", self.position_timeout)?;
        check_timeout("HTTP timeout", self.http_timeout)?;

        if let ReadinessStrategy::PollTransportState { interval, max_wait } = self.readiness {
            if interval.is_zero() || max_wait < interval {
                return Err("Invalid readiness polling configuration".to_string());
            }
        }

        if self.online_probes.is_empty() {
            return Err("At least one online probe is required".to_string());
        }

        Ok(())
    }
}

fn check_timeout(name: &str, timeout: Duration) -> Result<(), String> {
    if timeout.is_zero() {
        return Err(format!("{} must be greater than 0", name));
    }
    if timeout > MAX_TIMEOUT {
        return Err(format!("{} too long (max 5 minutes)", name));
    }
    Ok(())
}
