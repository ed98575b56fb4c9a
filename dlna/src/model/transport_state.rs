/// Transport state of a renderer's AVTransport instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Paused,
    Transitioning,
    NoMediaPresent,
}

impl TransportState {
    /// Maps the `CurrentTransportState` string reported by a device.
    ///
    /// Polling and eventing both go through this function. Unrecognized
    /// values map to `Stopped`.
    pub fn from_upnp(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "PLAYING" => TransportState::Playing,
            "PAUSED_PLAYBACK" | "PAUSED_RECORDING" => TransportState::Paused,
            "STOPPED" => TransportState::Stopped,
            "TRANSITIONING" => TransportState::Transitioning,
            "NO_MEDIA_PRESENT" => TransportState::NoMediaPresent,
            _ => TransportState::Stopped,
        }
    }

    pub fn as_upnp(&self) -> &'static str {
        match self {
            TransportState::Stopped => "STOPPED",
            TransportState::Playing => "PLAYING",
            TransportState::Paused => "PAUSED_PLAYBACK",
            TransportState::Transitioning => "TRANSITIONING",
            TransportState::NoMediaPresent => "NO_MEDIA_PRESENT",
        }
    }

    /// Whether the device has settled on a newly set URI
    pub fn is_settled(&self) -> bool {
        !matches!(self, TransportState::Transitioning | TransportState::NoMediaPresent)
    }
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_upnp())
    }
}
