use super::{MediaMetadata, TransportState};

/// Aggregate playback snapshot, assembled fresh for every request
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlaybackInfo {
    pub state: TransportState,
    /// Seconds since track start
    pub position: u64,
    /// Track duration in seconds
    pub duration: u64,
    pub track_uri: Option<String>,
    pub track_metadata: Option<MediaMetadata>,
}

/// Renderer volume on a 0..=100 scale and mute flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VolumeInfo {
    pub level: u8,
    pub muted: bool,
}

impl VolumeInfo {
    /// Clamps an arbitrary requested level into 0..=100
    pub fn clamp_level(level: i64) -> u8 {
        level.clamp(0, 100) as u8
    }

    /// Parses a reported volume, clamping it into range. Garbage reads as 0.
    pub fn parse_level(value: &str) -> u8 {
        value
            .trim()
            .parse::<i64>()
            .map(Self::clamp_level)
            .unwrap_or(0)
    }
}

/// UPnP boolean state variable (`0`/`1`, `true`/`false`, `yes`/`no`)
pub fn parse_upnp_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

/// Current media as reported by `GetMediaInfo`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaInfo {
    pub current_uri: Option<String>,
    pub current_uri_metadata: Option<String>,
    pub media_duration: u64,
    pub number_of_tracks: u32,
}

/// Result of a mutating media operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Applied,
    /// Precondition not met, no action was sent to the device
    Skipped(String),
}

impl ActionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ActionOutcome::Applied)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ActionOutcome::Skipped(_))
    }
}
