mod device;
mod event;
mod metadata;
mod playback;
mod transport_state;
mod udn;

pub use device::{Action, Argument, ArgumentDirection, Device, Icon, Service, ServiceKind};
pub use event::{DeviceEvent, StateChange};
pub use metadata::{AudioMetadata, ImageMetadata, MediaKind, MediaMetadata, SubtitleTrack, VideoMetadata};
pub use playback::{parse_upnp_bool, ActionOutcome, MediaInfo, PlaybackInfo, VolumeInfo};
pub use transport_state::TransportState;
pub use udn::Udn;
