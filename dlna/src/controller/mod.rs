mod media_controller;
mod volume_controller;

pub use media_controller::{MediaController, TransportStatus};
pub use volume_controller::VolumeController;
