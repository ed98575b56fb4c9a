pub mod config;
pub mod control_point;
pub mod controller;
pub mod didl;
pub mod error;
pub mod invoker;
pub mod model;
pub mod registry;
pub mod state;
pub mod streaming;
pub mod time;
pub mod transport;

// Re-export key types for easier access
pub use config::{ControlConfig, OnlineProbe, ReadinessStrategy};
pub use control_point::ControlPoint;
pub use controller::{MediaController, TransportStatus, VolumeController};
pub use error::{ControlError, Result};
pub use invoker::{ActionError, ActionInvoker, ActionResult};
pub use model::{
  ActionOutcome, Device, DeviceEvent, MediaInfo, MediaMetadata, PlaybackInfo, Service, ServiceKind, StateChange,
  SubtitleTrack, TransportState, Udn, VolumeInfo,
};
pub use registry::{Admission, Announcement, DeviceRegistry};
pub use state::StateCache;
pub use streaming::{EventSubscriber, SubscriptionConfig, SubscriptionError, SubscriptionId, SubscriptionInfo};
pub use transport::discovery::{discover_devices, discover_devices_with_timeout};
