use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::config::{ControlConfig, ReadinessStrategy};
use crate::didl;
use crate::error::{ControlError, Result};
use crate::invoker::{ActionError, ActionInvoker, ActionResult};
use crate::model::{
    ActionOutcome, MediaInfo, MediaMetadata, PlaybackInfo, Service, ServiceKind, StateChange, SubtitleTrack,
    TransportState,
};
use crate::registry::DeviceRegistry;
use crate::state::StateCache;
use crate::time::{format_seconds, parse_time_string, try_parse_time_string, NOT_IMPLEMENTED};

const SET_SUBTITLE: &str = "SetCurrentSubtitle";
const GET_SUBTITLE: &str = "GetCurrentSubtitle";

/// UPnP fault codes meaning "this device cannot do that"
const INVALID_ACTION: u16 = 401;
const PLAY_SPEED_NOT_SUPPORTED: u16 = 717;

/// Cached transport view of one renderer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportStatus {
    pub state: TransportState,
    /// Seconds since track start, as last observed
    pub position: u64,
    pub track_uri: Option<String>,
    pub track_metadata: Option<MediaMetadata>,
}

/// Drives AVTransport on registered renderers.
///
/// Mutating actions update the cached [`TransportStatus`] optimistically and,
/// when `refresh_after_action` is set, re-query the device right after. Every
/// operation holds a ticket from the cache, so a response that arrives after a
/// newer operation started is never applied.
#[derive(Clone)]
pub struct MediaController {
    registry: DeviceRegistry,
    invoker: ActionInvoker,
    config: Arc<ControlConfig>,
    cache: StateCache<TransportStatus>,
}

impl MediaController {
    pub fn new(registry: DeviceRegistry, invoker: ActionInvoker, config: Arc<ControlConfig>) -> Self {
        Self {
            registry,
            invoker,
            config,
            cache: StateCache::new(),
        }
    }

    /// Last known transport state; `Stopped` for a device never queried
    pub fn cached_state(&self, udn: &str) -> TransportState {
        self.cache.get_or_default(udn).state
    }

    pub fn cached_status(&self, udn: &str) -> TransportStatus {
        self.cache.get_or_default(udn)
    }

    fn av_transport(&self, udn: &str) -> Result<Service> {
        self.registry.service(udn, ServiceKind::AVTransport)
    }

    async fn call(&self, service: &Service, action: &str, args: &[(&str, &str)], timeout: Duration) -> Result<ActionResult> {
        Ok(self.invoker.invoke(service, action, args, timeout).await?)
    }

    /// Re-read the transport state after a mutating action, if configured
    async fn refresh(&self, udn: &str) {
        if !self.config.refresh_after_action {
            return;
        }
        if let Err(e) = self.get_transport_state(udn).await {
            debug!("Post-action refresh of {} failed: {}", udn, e);
        }
    }

    /// Load a media URI with optional metadata
    pub async fn set_media_uri(&self, udn: &str, uri: &str, metadata: Option<&MediaMetadata>) -> Result<ActionOutcome> {
        self.load(udn, uri, metadata, &[]).await
    }

    /// Load a media URI with subtitle tracks attached as extra resources.
    /// With no tracks this is [`MediaController::set_media_uri`].
    pub async fn set_media_uri_with_subtitles(
        &self,
        udn: &str,
        uri: &str,
        metadata: Option<&MediaMetadata>,
        subtitles: &[SubtitleTrack],
    ) -> Result<ActionOutcome> {
        if !subtitles.is_empty() {
            self.require_subtitle_control(udn)?;
        }
        self.load(udn, uri, metadata, subtitles).await
    }

    async fn load(
        &self,
        udn: &str,
        uri: &str,
        metadata: Option<&MediaMetadata>,
        subtitles: &[SubtitleTrack],
    ) -> Result<ActionOutcome> {
        if uri.trim().is_empty() {
            return Err(ControlError::PreconditionFailed("media URI is empty".to_string()));
        }

        let service = self.av_transport(udn)?;
        let didl = didl::encode(metadata, uri, subtitles);
        if didl.is_empty() {
            warn!("Sending {} to {} without metadata", uri, udn);
        }

        let ticket = self.cache.begin(udn);
        self.call(
            &service,
            "SetAVTransportURI",
            &[("InstanceID", "0"), ("CurrentURI", uri), ("CurrentURIMetaData", didl.as_str())],
            self.config.action_timeout,
        )
        .await?;

        self.cache.commit(&ticket, |status| {
            status.state = TransportState::Stopped;
            status.position = 0;
            status.track_uri = Some(uri.to_string());
            status.track_metadata = metadata.cloned();
        });
        info!("Loaded {} on {}", uri, udn);

        self.refresh(udn).await;
        Ok(ActionOutcome::Applied)
    }

    /// Start playback
    pub async fn play(&self, udn: &str) -> Result<ActionOutcome> {
        let service = self.av_transport(udn)?;
        let ticket = self.cache.begin(udn);
        self.call(&service, "Play", &[("InstanceID", "0"), ("Speed", "1")], self.config.action_timeout)
            .await?;

        self.cache.commit(&ticket, |status| status.state = TransportState::Playing);
        self.refresh(udn).await;
        Ok(ActionOutcome::Applied)
    }

    /// Pause playback. Only sent when a fresh query says the device is playing.
    pub async fn pause(&self, udn: &str) -> Result<ActionOutcome> {
        let service = self.av_transport(udn)?;
        let current = self.get_transport_state(udn).await?;
        if current != TransportState::Playing {
            info!("Not pausing {}: device is {}", udn, current);
            return Ok(ActionOutcome::Skipped(format!("cannot pause while {}", current)));
        }

        let ticket = self.cache.begin(udn);
        self.call(&service, "Pause", &[("InstanceID", "0")], self.config.action_timeout)
            .await?;

        self.cache.commit(&ticket, |status| status.state = TransportState::Paused);
        self.refresh(udn).await;
        Ok(ActionOutcome::Applied)
    }

    /// Stop playback. A device already stopped is left alone; when its state
    /// cannot be read, Stop is sent anyway.
    pub async fn stop(&self, udn: &str) -> Result<ActionOutcome> {
        let service = self.av_transport(udn)?;
        match self.get_transport_state(udn).await {
            Ok(TransportState::Stopped) => {
                info!("Not stopping {}: already stopped", udn);
                return Ok(ActionOutcome::Skipped("already stopped".to_string()));
            }
            Ok(_) => {}
            Err(e) => debug!("State query before Stop on {} failed: {}", udn, e),
        }

        let ticket = self.cache.begin(udn);
        self.call(&service, "Stop", &[("InstanceID", "0")], self.config.action_timeout)
            .await?;

        self.cache.commit(&ticket, |status| {
            status.state = TransportState::Stopped;
            status.position = 0;
        });
        self.refresh(udn).await;
        Ok(ActionOutcome::Applied)
    }

    /// Seek to an absolute position in the current track
    pub async fn seek(&self, udn: &str, position_seconds: u64) -> Result<ActionOutcome> {
        let service = self.av_transport(udn)?;
        let target = format_seconds(position_seconds);

        let ticket = self.cache.begin(udn);
        self.call(
            &service,
            "Seek",
            &[("InstanceID", "0"), ("Unit", "REL_TIME"), ("Target", target.as_str())],
            self.config.action_timeout,
        )
        .await?;

        self.cache.commit(&ticket, |status| status.position = position_seconds);
        Ok(ActionOutcome::Applied)
    }

    /// Skip to the next track
    pub async fn next(&self, udn: &str) -> Result<ActionOutcome> {
        self.navigate(udn, "Next").await
    }

    /// Go back to the previous track
    pub async fn previous(&self, udn: &str) -> Result<ActionOutcome> {
        self.navigate(udn, "Previous").await
    }

    async fn navigate(&self, udn: &str, action: &str) -> Result<ActionOutcome> {
        let service = self.av_transport(udn)?;
        self.cache.begin(udn);
        self.invoker
            .invoke(&service, action, &[("InstanceID", "0")], self.config.action_timeout)
            .await
            .map_err(|e| unsupported_on_fault(e, &service, action, &[INVALID_ACTION]))?;

        self.refresh(udn).await;
        Ok(ActionOutcome::Applied)
    }

    /// Play at a non-unity speed. Devices that refuse surface `ActionUnsupported`.
    pub async fn set_playback_speed(&self, udn: &str, speed: f64) -> Result<ActionOutcome> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(ControlError::PreconditionFailed(format!("invalid playback speed {}", speed)));
        }

        let service = self.av_transport(udn)?;
        let speed = format_speed(speed);

        let ticket = self.cache.begin(udn);
        self.invoker
            .invoke(&service, "Play", &[("InstanceID", "0"), ("Speed", speed.as_str())], self.config.action_timeout)
            .await
            .map_err(|e| unsupported_on_fault(e, &service, "Play", &[INVALID_ACTION, PLAY_SPEED_NOT_SUPPORTED]))?;

        self.cache.commit(&ticket, |status| status.state = TransportState::Playing);
        self.refresh(udn).await;
        Ok(ActionOutcome::Applied)
    }

    /// Query the device's transport state; unknown values read as `Stopped`
    pub async fn get_transport_state(&self, udn: &str) -> Result<TransportState> {
        let service = self.av_transport(udn)?;
        let ticket = self.cache.begin(udn);
        let response = self
            .call(&service, "GetTransportInfo", &[("InstanceID", "0")], self.config.query_timeout)
            .await?;

        let state = TransportState::from_upnp(response.get_or_empty("CurrentTransportState"));
        self.cache.commit(&ticket, |status| status.state = state);
        Ok(state)
    }

    /// Current position in whole seconds, or -1 when the device cannot say
    pub async fn get_current_position(&self, udn: &str) -> Result<i64> {
        let service = self.av_transport(udn)?;
        let ticket = self.cache.begin(udn);
        let response = self
            .call(&service, "GetPositionInfo", &[("InstanceID", "0")], self.config.position_timeout)
            .await?;

        let parsed = try_parse_time_string(response.get_or_empty("RelTime"))
            .and_then(|position| Some((position, i64::try_from(position).ok()?)));
        match parsed {
            Some((position, signed)) => {
                self.cache.commit(&ticket, |status| status.position = position);
                Ok(signed)
            }
            None => Ok(-1),
        }
    }

    /// Status snapshot from concurrent position and transport queries.
    ///
    /// Never fails: any error yields the default snapshot (stopped, position
    /// 0, no track).
    pub async fn get_playback_info(&self, udn: &str) -> PlaybackInfo {
        match self.try_get_playback_info(udn).await {
            Ok(info) => info,
            Err(e) => {
                warn!("Playback info for {} unavailable: {}", udn, e);
                PlaybackInfo::default()
            }
        }
    }

    async fn try_get_playback_info(&self, udn: &str) -> Result<PlaybackInfo> {
        let service = self.av_transport(udn)?;
        let ticket = self.cache.begin(udn);

        let (position, transport) = tokio::join!(
            self.call(&service, "GetPositionInfo", &[("InstanceID", "0")], self.config.position_timeout),
            self.call(&service, "GetTransportInfo", &[("InstanceID", "0")], self.config.query_timeout),
        );
        let (position, transport) = (position?, transport?);

        let info = PlaybackInfo {
            state: TransportState::from_upnp(transport.get_or_empty("CurrentTransportState")),
            position: parse_time_string(position.get_or_empty("RelTime")),
            duration: parse_time_string(position.get_or_empty("TrackDuration")),
            track_uri: reported(position.get_or_empty("TrackURI")),
            track_metadata: didl::decode(position.get_or_empty("TrackMetaData")),
        };

        self.cache.commit(&ticket, |status| {
            status.state = info.state;
            status.position = info.position;
            status.track_uri = info.track_uri.clone();
            status.track_metadata = info.track_metadata.clone();
        });

        Ok(info)
    }

    /// Currently loaded media as reported by `GetMediaInfo`
    pub async fn get_media_info(&self, udn: &str) -> Result<MediaInfo> {
        let service = self.av_transport(udn)?;
        let response = self
            .call(&service, "GetMediaInfo", &[("InstanceID", "0")], self.config.query_timeout)
            .await?;

        Ok(MediaInfo {
            current_uri: reported(response.get_or_empty("CurrentURI")),
            current_uri_metadata: reported(response.get_or_empty("CurrentURIMetaData")),
            media_duration: parse_time_string(response.get_or_empty("MediaDuration")),
            number_of_tracks: response.get_or_empty("NrTracks").trim().parse().unwrap_or(0),
        })
    }

    /// Whether the renderer declares `SetCurrentSubtitle`
    pub fn supports_subtitle_control(&self, udn: &str) -> Result<bool> {
        Ok(self.av_transport(udn)?.supports(SET_SUBTITLE))
    }

    fn require_subtitle_control(&self, udn: &str) -> Result<Service> {
        let service = self.av_transport(udn)?;
        if !service.supports(SET_SUBTITLE) {
            return Err(ControlError::ActionUnsupported {
                service: service.short_id().to_string(),
                action: SET_SUBTITLE.to_string(),
            });
        }
        Ok(service)
    }

    /// Action names a device declares for one of its services
    pub fn device_actions(&self, udn: &str, kind: ServiceKind) -> Result<Vec<String>> {
        Ok(self.registry.service(udn, kind)?.action_names())
    }

    /// Select a subtitle track, or disable subtitles with `None`
    pub async fn set_subtitle_track(&self, udn: &str, track: Option<&SubtitleTrack>) -> Result<ActionOutcome> {
        let service = self.require_subtitle_control(udn)?;
        let uri = track.map(|t| t.uri.as_str()).unwrap_or("");

        self.call(
            &service,
            SET_SUBTITLE,
            &[("InstanceID", "0"), ("SubtitleURI", uri)],
            self.config.action_timeout,
        )
        .await?;

        match track {
            Some(track) => info!("Subtitle track {} selected on {}", track.id, udn),
            None => info!("Subtitles disabled on {}", udn),
        }
        Ok(ActionOutcome::Applied)
    }

    /// Subtitle resources listed in the current track's metadata
    pub async fn get_available_subtitle_tracks(&self, udn: &str) -> Result<Vec<SubtitleTrack>> {
        let service = self.require_subtitle_control(udn)?;
        let response = self
            .call(&service, "GetPositionInfo", &[("InstanceID", "0")], self.config.query_timeout)
            .await?;

        Ok(didl::decode_subtitle_tracks(response.get_or_empty("TrackMetaData")))
    }

    /// The active subtitle track, when the device can report it
    pub async fn get_current_subtitle_track(&self, udn: &str) -> Result<Option<SubtitleTrack>> {
        let service = self.require_subtitle_control(udn)?;
        if !service.supports(GET_SUBTITLE) {
            debug!("{} cannot report its current subtitle", udn);
            return Ok(None);
        }

        let response = self
            .call(&service, GET_SUBTITLE, &[("InstanceID", "0")], self.config.query_timeout)
            .await?;
        let current = response
            .get("CurrentSubtitleURI")
            .or_else(|| response.get("SubtitleURI"))
            .and_then(reported);
        let Some(current) = current else {
            return Ok(None);
        };

        let tracks = self.get_available_subtitle_tracks(udn).await?;
        Ok(tracks.into_iter().find(|track| track.uri == current))
    }

    /// Wait for a freshly loaded URI to settle before playing
    pub async fn wait_until_ready(&self, udn: &str) {
        match self.config.readiness {
            ReadinessStrategy::FixedDelay(delay) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            ReadinessStrategy::PollTransportState { interval, max_wait } => {
                let deadline = tokio::time::Instant::now() + max_wait;
                loop {
                    match self.get_transport_state(udn).await {
                        Ok(state) if state.is_settled() => return,
                        Ok(state) => debug!("{} not ready yet ({})", udn, state),
                        Err(e) => debug!("Readiness query on {} failed: {}", udn, e),
                    }
                    if tokio::time::Instant::now() + interval > deadline {
                        warn!("{} did not become ready within {:?}", udn, max_wait);
                        return;
                    }
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }

    /// Poll [`MediaController::get_playback_info`] every `interval` until the
    /// receiver is dropped
    pub fn watch(&self, udn: &str, interval: Duration) -> mpsc::Receiver<PlaybackInfo> {
        let (tx, rx) = mpsc::channel(16);
        let controller = self.clone();
        let udn = udn.to_string();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let info = controller.get_playback_info(&udn).await;
                if tx.send(info).await.is_err() {
                    debug!("Stopped watching {}", udn);
                    break;
                }
            }
        });

        rx
    }

    /// Apply an evented change through the same mapping polling uses
    pub fn apply_change(&self, udn: &str, change: &StateChange) {
        match change {
            StateChange::TransportState(state) => {
                let state = *state;
                self.cache.update(udn, |status| status.state = state);
            }
            StateChange::CurrentTrackUri(uri) => {
                let uri = reported(uri);
                self.cache.update(udn, |status| status.track_uri = uri);
            }
            StateChange::CurrentTrackMetadata(metadata) => {
                let metadata = metadata.clone();
                self.cache.update(udn, |status| status.track_metadata = metadata);
            }
            StateChange::Volume(_) | StateChange::Mute(_) => {}
        }
    }

    /// Drop cached state for a device that left
    pub fn forget(&self, udn: &str) {
        self.cache.remove(udn);
    }
}

/// Empty and `NOT_IMPLEMENTED` values mean "nothing reported"
fn reported(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case(NOT_IMPLEMENTED) {
        None
    } else {
        Some(value.to_string())
    }
}

fn format_speed(speed: f64) -> String {
    if speed.fract() == 0.0 {
        format!("{}", speed as u64)
    } else {
        format!("{}", speed)
    }
}

fn unsupported_on_fault(err: ActionError, service: &Service, action: &str, codes: &[u16]) -> ControlError {
    match err {
        ActionError::DeviceRejected { status, .. } if codes.contains(&status) => ControlError::ActionUnsupported {
            service: service.short_id().to_string(),
            action: action.to_string(),
        },
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reported() {
        assert_eq!(reported(" http://x/a.mp3 "), Some("http://x/a.mp3".to_string()));
        assert_eq!(reported("NOT_IMPLEMENTED"), None);
        assert_eq!(reported(""), None);
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(2.0), "2");
        assert_eq!(format_speed(1.5), "1.5");
        assert_eq!(format_speed(0.5), "0.5");
    }

    #[test]
    fn test_unsupported_on_fault() {
        let service = Service {
            service_type: ServiceKind::AVTransport.service_type_urn(),
            service_id: "urn:upnp-org:serviceId:AVTransport".to_string(),
            control_url: String::new(),
            event_sub_url: String::new(),
            scpd_url: String::new(),
            actions: None,
        };

        let rejected = ActionError::DeviceRejected {
            action: "Play".to_string(),
            status: 717,
            message: "Play speed not supported".to_string(),
        };
        assert!(matches!(
            unsupported_on_fault(rejected, &service, "Play", &[401, 717]),
            ControlError::ActionUnsupported { .. }
        ));

        let other = ActionError::DeviceRejected {
            action: "Play".to_string(),
            status: 501,
            message: "Action failed".to_string(),
        };
        assert!(matches!(
            unsupported_on_fault(other, &service, "Play", &[401, 717]),
            ControlError::DeviceRejected { status: 501, .. }
        ));
    }
}
