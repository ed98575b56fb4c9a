use std::time::Duration;

use crate::streaming::SubscriptionError;

/// Errors surfaced by every control-point operation
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
  #[error("Device not found: {0}")]
  DeviceNotFound(String),

  #[error("Service {service} not found on device {udn}")]
  ServiceNotFound { udn: String, service: String },

  #[error("Action {action} is not supported by {service}")]
  ActionUnsupported { service: String, action: String },

  #[error("Device rejected action ({status}): {message}")]
  DeviceRejected { status: u16, message: String },

  #[error("Action {action} timed out after {after:?}")]
  Timeout { action: String, after: Duration },

  #[error("Precondition failed: {0}")]
  PreconditionFailed(String),

  #[error("Metadata encoding failed: {0}")]
  MetadataEncodingFailed(String),

  #[error("Metadata decoding failed: {0}")]
  MetadataDecodingFailed(String),

  #[error("Communication error: {0}")]
  CommunicationError(String),

  #[error("Parse error: {0}")]
  ParseError(String),

  #[error("Discovery failed: {0}")]
  DiscoveryFailed(String),

  #[error("Invalid configuration: {0}")]
  InvalidConfiguration(String),

  #[error(transparent)]
  Subscription(#[from] SubscriptionError),
}

impl ControlError {
  /// True for the errors a device or the network produced, as opposed to
  /// lookups that failed locally.
  pub fn is_remote(&self) -> bool {
    matches!(
      self,
      ControlError::DeviceRejected { .. } | ControlError::Timeout { .. } | ControlError::CommunicationError(_)
    )
  }
}

pub type Result<T> = std::result::Result<T, ControlError>;
