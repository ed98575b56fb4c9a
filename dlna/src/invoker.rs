use std::sync::Arc;
use std::time::Duration;

use crate::error::ControlError;
use crate::model::Service;
use crate::transport::soap::{SoapError, SoapRequest, SoapTransport};

/// Named output arguments of a successful action
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionResult {
  pub args: Vec<(String, String)>,
}

impl ActionResult {
  pub fn get(&self, name: &str) -> Option<&str> {
    self
      .args
      .iter()
      .find(|(k, _)| k == name)
      .map(|(_, v)| v.as_str())
  }

  /// The argument value, or an empty string when the device omitted it
  pub fn get_or_empty(&self, name: &str) -> &str {
    self.get(name).unwrap_or("")
  }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActionError {
  #[error("{action} timed out after {after:?}")]
  Timeout { action: String, after: Duration },

  #[error("Device rejected {action} ({status}): {message}")]
  DeviceRejected { action: String, status: u16, message: String },

  #[error("{action} is not supported by {service}")]
  Unsupported { service: String, action: String },

  #[error("Transport error during {action}: {message}")]
  Transport { action: String, message: String },
}

impl From<ActionError> for ControlError {
  fn from(err: ActionError) -> Self {
    match err {
      ActionError::Timeout { action, after } => ControlError::Timeout { action, after },
      ActionError::DeviceRejected { status, message, .. } => ControlError::DeviceRejected { status, message },
      ActionError::Unsupported { service, action } => ControlError::ActionUnsupported { service, action },
      ActionError::Transport { message, .. } => ControlError::CommunicationError(message),
    }
  }
}

/// Issues single SOAP actions with a deadline.
///
/// When the deadline passes, the in-flight transport future is dropped, so a
/// late response can never reach the caller or anything the caller would
/// have updated with it.
#[derive(Clone)]
pub struct ActionInvoker {
  transport: Arc<dyn SoapTransport>,
}

impl ActionInvoker {
  pub fn new(transport: Arc<dyn SoapTransport>) -> Self {
    Self { transport }
  }

  pub async fn invoke(
    &self,
    service: &Service,
    action: &str,
    args: &[(&str, &str)],
    timeout: Duration,
  ) -> Result<ActionResult, ActionError> {
    if service.declares_actions() && !service.supports(action) {
      return Err(ActionError::Unsupported {
        service: service.short_id().to_string(),
        action: action.to_string(),
      });
    }

    let request = args.iter().fold(
      SoapRequest::new(service.service_type.as_str(), action),
      |request, (name, value)| request.param(*name, *value),
    );

    log::debug!("Invoking {} on {}", action, service.control_url);

    let outcome = tokio::time::timeout(timeout, self.transport.call(&service.control_url, &request)).await;

    match outcome {
      Err(_) => {
        log::warn!("{} on {} timed out after {:?}", action, service.control_url, timeout);
        Err(ActionError::Timeout { action: action.to_string(), after: timeout })
      }
      Ok(Err(SoapError::Timeout)) => Err(ActionError::Timeout { action: action.to_string(), after: timeout }),
      Ok(Err(SoapError::Fault { code, description })) => Err(ActionError::DeviceRejected {
        action: action.to_string(),
        status: code,
        message: description,
      }),
      Ok(Err(SoapError::Http { status })) => Err(ActionError::DeviceRejected {
        action: action.to_string(),
        status,
        message: format!("HTTP status {}", status),
      }),
      Ok(Err(e)) => Err(ActionError::Transport { action: action.to_string(), message: e.to_string() }),
      Ok(Ok(response)) => Ok(ActionResult { args: response.args }),
    }
  }
}
