use super::Udn;

/// A discovered UPnP device and the services it exposes
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
  pub udn: Udn,
  pub friendly_name: String,
  pub device_type: String,
  pub manufacturer: String,
  pub model_name: String,
  pub model_description: Option<String>,
  pub model_number: Option<String>,
  pub serial_number: Option<String>,
  /// URL of the description document this device was built from
  pub location: String,
  pub host: String,
  pub port: u16,
  /// Base for resolving relative URLs (URLBase, or the location's origin)
  pub base_url: String,
  pub presentation_url: Option<String>,
  pub icons: Vec<Icon>,
  pub services: Vec<Service>,
}

impl Device {
  /// Finds a service by its well-known kind
  pub fn service(&self, kind: ServiceKind) -> Option<&Service> {
    self.services.iter().find(|s| kind.matches(s))
  }

  /// Finds a service by its short id ("AVTransport") or full serviceId
  pub fn find_service(&self, service_id: &str) -> Option<&Service> {
    self
      .services
      .iter()
      .find(|s| s.service_id == service_id || s.short_id().eq_ignore_ascii_case(service_id))
  }

  pub fn is_renderer(&self) -> bool {
    self.device_type.contains("MediaRenderer")
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icon {
  pub mime_type: String,
  pub width: u32,
  pub height: u32,
  pub depth: u32,
  pub url: String,
}

/// A UPnP service endpoint on a device
#[derive(Debug, Clone, PartialEq)]
pub struct Service {
  pub service_type: String,
  /// Full service id, e.g. `urn:upnp-org:serviceId:AVTransport`
  pub service_id: String,
  pub control_url: String,
  pub event_sub_url: String,
  pub scpd_url: String,
  /// Actions declared by the service's SCPD, `None` when it was never fetched
  pub actions: Option<Vec<Action>>,
}

impl Service {
  /// The part of the service id after the last colon
  pub fn short_id(&self) -> &str {
    self.service_id.rsplit(':').next().unwrap_or(&self.service_id)
  }

  pub fn kind(&self) -> Option<ServiceKind> {
    ServiceKind::ALL.iter().copied().find(|k| k.matches(self))
  }

  /// Whether the service's action list is known
  pub fn declares_actions(&self) -> bool {
    self.actions.is_some()
  }

  /// Strict capability check: true only if the action list is known and
  /// contains `name`
  pub fn supports(&self, name: &str) -> bool {
    self.action(name).is_some()
  }

  pub fn action(&self, name: &str) -> Option<&Action> {
    self.actions.as_ref()?.iter().find(|a| a.name == name)
  }

  pub fn action_names(&self) -> Vec<String> {
    self
      .actions
      .as_ref()
      .map(|actions| actions.iter().map(|a| a.name.clone()).collect())
      .unwrap_or_default()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
  pub name: String,
  pub arguments: Vec<Argument>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
  pub name: String,
  pub direction: ArgumentDirection,
  pub related_state_variable: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentDirection {
  In,
  Out,
}

/// Standard UPnP AV services the control point drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
  AVTransport,
  RenderingControl,
  ConnectionManager,
  ContentDirectory,
}

impl ServiceKind {
  pub const ALL: [ServiceKind; 4] = [
    ServiceKind::AVTransport,
    ServiceKind::RenderingControl,
    ServiceKind::ConnectionManager,
    ServiceKind::ContentDirectory,
  ];

  /// Short service id as used in `urn:upnp-org:serviceId:{id}`
  pub fn id(&self) -> &'static str {
    match self {
      ServiceKind::AVTransport => "AVTransport",
      ServiceKind::RenderingControl => "RenderingControl",
      ServiceKind::ConnectionManager => "ConnectionManager",
      ServiceKind::ContentDirectory => "ContentDirectory",
    }
  }

  /// Version 1 service type URN
  pub fn service_type_urn(&self) -> String {
    format!("urn:schemas-upnp-org:service:{}:1", self.id())
  }

  pub fn from_id(id: &str) -> Option<Self> {
    Self::ALL.iter().copied().find(|k| k.id().eq_ignore_ascii_case(id))
  }

  /// Matches on the service id first and falls back to the service type
  pub fn matches(&self, service: &Service) -> bool {
    service.short_id().eq_ignore_ascii_case(self.id())
      || service
        .service_type
        .contains(&format!(":service:{}:", self.id()))
  }
}

impl std::fmt::Display for ServiceKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.id())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn service(service_type: &str, service_id: &str) -> Service {
    Service {
      service_type: service_type.to_string(),
      service_id: service_id.to_string(),
      control_url: "http://10.0.0.2:49152/ctl".to_string(),
      event_sub_url: "http://10.0.0.2:49152/evt".to_string(),
      scpd_url: "http://10.0.0.2:49152/scpd.xml".to_string(),
      actions: None,
    }
  }

  #[test]
  fn test_short_id() {
    let svc = service("urn:schemas-upnp-org:service:AVTransport:1", "urn:upnp-org:serviceId:AVTransport");
    assert_eq!(svc.short_id(), "AVTransport");
    assert_eq!(svc.kind(), Some(ServiceKind::AVTransport));
  }

  #[test]
  fn test_kind_falls_back_to_service_type() {
    let svc = service("urn:schemas-upnp-org:service:RenderingControl:2", "urn:vendor:serviceId:RC0");
    assert_eq!(svc.kind(), Some(ServiceKind::RenderingControl));
  }

  #[test]
  fn test_supports_requires_declared_actions() {
    let mut svc = service("urn:schemas-upnp-org:service:AVTransport:1", "urn:upnp-org:serviceId:AVTransport");
    assert!(!svc.declares_actions());
    assert!(!svc.supports("Play"));

    svc.actions = Some(vec![Action { name: "Play".to_string(), arguments: vec![] }]);
    assert!(svc.supports("Play"));
    assert!(!svc.supports("Next"));
    assert_eq!(svc.action_names(), vec!["Play".to_string()]);
  }
}
