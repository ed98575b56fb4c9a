use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::error::{ControlError, Result};
use crate::model::{Action, Argument, ArgumentDirection, Device, Icon, Service, Udn};
use crate::registry::is_media_device_type;

/// UPnP device description root element
#[derive(Debug, Deserialize)]
struct Root {
  #[serde(rename = "URLBase", default)]
  url_base: Option<String>,
  device: DeviceXml,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceXml {
  device_type: String,
  #[serde(default)]
  friendly_name: Option<String>,
  #[serde(default)]
  manufacturer: Option<String>,
  #[serde(default)]
  model_name: Option<String>,
  #[serde(default)]
  model_description: Option<String>,
  #[serde(default)]
  model_number: Option<String>,
  #[serde(default)]
  serial_number: Option<String>,
  #[serde(rename = "UDN")]
  udn: String,
  #[serde(rename = "presentationURL", default)]
  presentation_url: Option<String>,
  #[serde(default)]
  icon_list: Option<IconList>,
  #[serde(default)]
  service_list: Option<ServiceList>,
  #[serde(default)]
  device_list: Option<DeviceList>,
}

#[derive(Debug, Deserialize)]
struct IconList {
  #[serde(rename = "icon", default)]
  icons: Vec<IconXml>,
}

#[derive(Debug, Deserialize)]
struct IconXml {
  #[serde(default)]
  mimetype: String,
  #[serde(default)]
  width: u32,
  #[serde(default)]
  height: u32,
  #[serde(default)]
  depth: u32,
  url: String,
}

#[derive(Debug, Deserialize)]
struct ServiceList {
  #[serde(rename = "service", default)]
  services: Vec<ServiceXml>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceXml {
  service_type: String,
  service_id: String,
  #[serde(rename = "SCPDURL", default)]
  scpd_url: String,
  #[serde(rename = "controlURL")]
  control_url: String,
  #[serde(rename = "eventSubURL", default)]
  event_sub_url: String,
}

#[derive(Debug, Deserialize)]
struct DeviceList {
  #[serde(rename = "device", default)]
  devices: Vec<DeviceXml>,
}

/// Service control protocol description, only the action list is kept
#[derive(Debug, Deserialize)]
struct Scpd {
  #[serde(rename = "actionList", default)]
  action_list: Option<ActionList>,
}

#[derive(Debug, Deserialize)]
struct ActionList {
  #[serde(rename = "action", default)]
  actions: Vec<ActionXml>,
}

#[derive(Debug, Deserialize)]
struct ActionXml {
  name: String,
  #[serde(rename = "argumentList", default)]
  argument_list: Option<ArgumentList>,
}

#[derive(Debug, Deserialize)]
struct ArgumentList {
  #[serde(rename = "argument", default)]
  arguments: Vec<ArgumentXml>,
}

#[derive(Debug, Deserialize)]
struct ArgumentXml {
  name: String,
  #[serde(default)]
  direction: String,
  #[serde(rename = "relatedStateVariable", default)]
  related_state_variable: Option<String>,
}

/// Parse a device description fetched from `location`.
///
/// When the root device is not a media device but embeds one, the embedded
/// media device is returned instead.
pub fn parse_device_description(xml: &str, location: &str) -> Result<Device> {
  let root: Root = quick_xml::de::from_str(xml)
    .map_err(|e| ControlError::ParseError(format!("Failed to parse device description: {}", e)))?;

  let base_url = root
    .url_base
    .as_deref()
    .map(str::trim)
    .filter(|b| !b.is_empty())
    .unwrap_or(location)
    .to_string();

  let device_xml = select_media_device(root.device);
  let (host, port) = split_host_port(&base_url)
    .ok_or_else(|| ControlError::ParseError(format!("Invalid base URL: {}", base_url)))?;

  let icons = device_xml
    .icon_list
    .map(|list| list.icons)
    .unwrap_or_default()
    .into_iter()
    .map(|icon| Icon {
      mime_type: icon.mimetype,
      width: icon.width,
      height: icon.height,
      depth: icon.depth,
      url: resolve_url(&base_url, &icon.url),
    })
    .collect();

  let services = device_xml
    .service_list
    .map(|list| list.services)
    .unwrap_or_default()
    .into_iter()
    .map(|svc| Service {
      service_type: svc.service_type.trim().to_string(),
      service_id: svc.service_id.trim().to_string(),
      control_url: resolve_url(&base_url, svc.control_url.trim()),
      event_sub_url: resolve_url(&base_url, svc.event_sub_url.trim()),
      scpd_url: resolve_url(&base_url, svc.scpd_url.trim()),
      actions: None,
    })
    .collect();

  Ok(Device {
    udn: Udn::new(device_xml.udn),
    friendly_name: non_empty(device_xml.friendly_name).unwrap_or_else(|| "Unknown Device".to_string()),
    device_type: device_xml.device_type.trim().to_string(),
    manufacturer: non_empty(device_xml.manufacturer).unwrap_or_else(|| "Unknown Manufacturer".to_string()),
    model_name: non_empty(device_xml.model_name).unwrap_or_else(|| "Unknown Model".to_string()),
    model_description: non_empty(device_xml.model_description),
    model_number: non_empty(device_xml.model_number),
    serial_number: non_empty(device_xml.serial_number),
    location: location.to_string(),
    host,
    port,
    base_url: origin(&base_url).unwrap_or_else(|| base_url.clone()),
    presentation_url: non_empty(device_xml.presentation_url).map(|p| resolve_url(&base_url, &p)),
    icons,
    services,
  })
}

fn select_media_device(root: DeviceXml) -> DeviceXml {
  if is_media_device_type(&root.device_type) {
    return root;
  }

  let embedded = root
    .device_list
    .as_ref()
    .map(|list| list.devices.iter().any(|d| is_media_device_type(&d.device_type)))
    .unwrap_or(false);

  if !embedded {
    return root;
  }

  let mut root = root;
  let devices = root.device_list.take().map(|l| l.devices).unwrap_or_default();
  devices
    .into_iter()
    .find(|d| is_media_device_type(&d.device_type))
    .unwrap_or(root)
}

/// Parse an SCPD document into its declared actions
pub fn parse_scpd(xml: &str) -> Result<Vec<Action>> {
  let scpd: Scpd = quick_xml::de::from_str(xml)
    .map_err(|e| ControlError::ParseError(format!("Failed to parse SCPD: {}", e)))?;

  Ok(
    scpd
      .action_list
      .map(|list| list.actions)
      .unwrap_or_default()
      .into_iter()
      .map(|action| Action {
        name: action.name.trim().to_string(),
        arguments: action
          .argument_list
          .map(|list| list.arguments)
          .unwrap_or_default()
          .into_iter()
          .map(|arg| Argument {
            name: arg.name.trim().to_string(),
            direction: if arg.direction.trim().eq_ignore_ascii_case("out") {
              ArgumentDirection::Out
            } else {
              ArgumentDirection::In
            },
            related_state_variable: arg.related_state_variable,
          })
          .collect(),
      })
      .collect(),
  )
}

/// Fetches device descriptions and their service SCPDs over HTTP
#[derive(Clone)]
pub struct DescriptionFetcher {
  http_client: reqwest::Client,
}

impl DescriptionFetcher {
  pub fn new(timeout: Duration) -> Result<Self> {
    let http_client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| ControlError::CommunicationError(e.to_string()))?;

    Ok(Self { http_client })
  }

  /// Fetch and parse the description at `location`, then fill in each
  /// service's action list. A failed SCPD fetch leaves that list undeclared.
  pub async fn fetch_device(&self, location: &str) -> Result<Device> {
    let xml = self.get_text(location).await?;
    let mut device = parse_device_description(&xml, location)?;

    for service in device.services.iter_mut() {
      if service.scpd_url.is_empty() {
        continue;
      }
      match self.get_text(&service.scpd_url).await.and_then(|scpd| parse_scpd(&scpd)) {
        Ok(actions) => service.actions = Some(actions),
        Err(e) => log::warn!("Could not load SCPD for {} on {}: {}", service.service_id, device.udn, e),
      }
    }

    Ok(device)
  }

  async fn get_text(&self, url: &str) -> Result<String> {
    let response = self
      .http_client
      .get(url)
      .send()
      .await
      .map_err(|e| ControlError::CommunicationError(e.to_string()))?;

    if !response.status().is_success() {
      return Err(ControlError::CommunicationError(format!(
        "GET {} returned {}",
        url,
        response.status()
      )));
    }

    response
      .text()
      .await
      .map_err(|e| ControlError::CommunicationError(e.to_string()))
  }
}

fn non_empty(value: Option<String>) -> Option<String> {
  value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// `scheme://host[:port]` of an absolute URL
pub fn origin(url: &str) -> Option<String> {
  let origin = Url::parse(url).ok()?.origin();
  origin.is_tuple().then(|| origin.ascii_serialization())
}

/// Host and port of an absolute URL, port defaulting by scheme
pub fn split_host_port(url: &str) -> Option<(String, u16)> {
  let parsed = Url::parse(url).ok()?;
  let host = parsed.host_str().filter(|h| !h.is_empty())?.to_string();
  Some((host, parsed.port_or_known_default()?))
}

/// Resolve a possibly relative URL from a description against its base
pub fn resolve_url(base: &str, path: &str) -> String {
  if path.is_empty() {
    return String::new();
  }

  match Url::parse(base).and_then(|base| base.join(path)) {
    Ok(resolved) => resolved.to_string(),
    Err(e) => {
      log::debug!("Cannot resolve {:?} against {:?}: {}", path, base, e);
      path.to_string()
    }
  }
}
