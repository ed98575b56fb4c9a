use super::{parse_upnp_bool, MediaMetadata, TransportState, Udn, VolumeInfo};
use crate::didl;
use crate::streaming::SubscriptionId;

/// A single state-variable change decoded from a device
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
  TransportState(TransportState),
  CurrentTrackUri(String),
  CurrentTrackMetadata(Option<MediaMetadata>),
  Volume(u8),
  Mute(bool),
}

impl StateChange {
  /// Maps an evented state variable onto the values polling produces.
  ///
  /// Variables this crate does not track yield `None`.
  pub fn from_variable(name: &str, value: &str) -> Option<StateChange> {
    match name {
      "TransportState" => Some(StateChange::TransportState(TransportState::from_upnp(value))),
      "CurrentTrackURI" | "AVTransportURI" => Some(StateChange::CurrentTrackUri(value.trim().to_string())),
      "CurrentTrackMetaData" | "AVTransportURIMetaData" => {
        Some(StateChange::CurrentTrackMetadata(didl::decode(value)))
      }
      "Volume" => Some(StateChange::Volume(VolumeInfo::parse_level(value))),
      "Mute" => Some(StateChange::Mute(parse_upnp_bool(value))),
      _ => None,
    }
  }
}

/// Events delivered to the host from the GENA path
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
  Established { udn: Udn, subscription_id: SubscriptionId },
  Changed { udn: Udn, change: StateChange },
  /// Sequence gap detected on a subscription; state may be stale.
  /// `missed` is the running total for the subscription.
  EventsMissed { udn: Udn, subscription_id: SubscriptionId, missed: u32 },
  Ended { udn: Udn, subscription_id: SubscriptionId },
}

impl DeviceEvent {
  pub fn udn(&self) -> &Udn {
    match self {
      DeviceEvent::Established { udn, .. }
      | DeviceEvent::Changed { udn, .. }
      | DeviceEvent::EventsMissed { udn, .. }
      | DeviceEvent::Ended { udn, .. } => udn,
    }
  }
}
