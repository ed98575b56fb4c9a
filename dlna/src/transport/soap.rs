use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;

/// A single UPnP action call
#[derive(Debug, Clone, PartialEq)]
pub struct SoapRequest {
  pub service_type: String,
  pub action: String,
  pub params: Vec<(String, String)>,
}

impl SoapRequest {
  pub fn new(service_type: impl Into<String>, action: impl Into<String>) -> Self {
    Self {
      service_type: service_type.into(),
      action: action.into(),
      params: Vec::new(),
    }
  }

  pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.params.push((name.into(), value.into()));
    self
  }
}

/// Output arguments of a successful action, in document order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SoapResponse {
  pub body: String,
  pub args: Vec<(String, String)>,
}

impl SoapResponse {
  pub fn from_body(body: String) -> Result<Self, SoapError> {
    let args = parse_action_response(&body)?;
    Ok(Self { body, args })
  }

  pub fn get(&self, name: &str) -> Option<&str> {
    self
      .args
      .iter()
      .find(|(k, _)| k == name)
      .map(|(_, v)| v.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SoapError {
  #[error("SOAP fault {code}: {description}")]
  Fault { code: u16, description: String },

  #[error("HTTP request failed with status {status}")]
  Http { status: u16 },

  #[error("Communication error: {0}")]
  Communication(String),

  #[error("Request timed out")]
  Timeout,

  #[error("Malformed SOAP response: {0}")]
  Malformed(String),
}

impl From<reqwest::Error> for SoapError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      SoapError::Timeout
    } else {
      SoapError::Communication(err.to_string())
    }
  }
}

/// Performs SOAP action calls against a control URL.
///
/// `SoapClient` is the HTTP implementation; tests substitute scripted ones.
#[async_trait]
pub trait SoapTransport: Send + Sync {
  async fn call(&self, control_url: &str, request: &SoapRequest) -> Result<SoapResponse, SoapError>;
}

pub struct SoapClient {
  http_client: reqwest::Client,
}

impl SoapClient {
  pub fn new(timeout: std::time::Duration) -> Result<Self, SoapError> {
    let http_client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| SoapError::Communication(e.to_string()))?;

    Ok(Self { http_client })
  }

  pub fn build_soap_envelope(request: &SoapRequest) -> String {
    let mut params_xml = String::new();
    for (key, value) in &request.params {
      params_xml.push_str(&format!(
        "<{}>{}</{}>\n",
        key,
        quick_xml::escape::escape(value.as_str()),
        key
      ));
    }

    format!(
      "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
        <s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\" \
        s:encodingStyle=\"http://schemas.xmlsoap.org/soap/encoding/\">\n\
        <s:Body>\n\
        <u:{} xmlns:u=\"{}\">\n\
        {}\
        </u:{}>\n\
        </s:Body>\n\
        </s:Envelope>",
      request.action, request.service_type, params_xml, request.action
    )
  }

  /// Reads `UPnPError` code and description, falling back to `faultstring`
  pub fn parse_fault(xml: &str) -> (u16, String) {
    let code = Self::element_text(xml, "errorCode")
      .and_then(|c| c.trim().parse::<u16>().ok())
      .unwrap_or(500);

    let description = Self::element_text(xml, "errorDescription")
      .or_else(|| Self::element_text(xml, "faultstring"))
      .map(|d| d.trim().to_string())
      .unwrap_or_else(|| "Unknown SOAP fault".to_string());

    (code, description)
  }

  /// Text between the first `<tag>` and the `</tag>` after it
  pub fn element_text(xml: &str, tag: &str) -> Option<String> {
    let (_, rest) = xml.split_once(&format!("<{}>", tag))?;
    let (text, _) = rest.split_once(&format!("</{}>", tag))?;
    Some(text.to_string())
  }

  fn is_fault(body: &str) -> bool {
    body.contains("Fault>") || body.contains("<UPnPError")
  }
}

#[async_trait]
impl SoapTransport for SoapClient {
  async fn call(&self, control_url: &str, request: &SoapRequest) -> Result<SoapResponse, SoapError> {
    let body = Self::build_soap_envelope(request);

    let response = self
      .http_client
      .post(control_url)
      .header("Content-Type", "text/xml; charset=\"utf-8\"")
      .header(
        "SOAPACTION",
        format!("\"{}#{}\"", request.service_type, request.action),
      )
      .body(body)
      .send()
      .await?;

    let status = response.status();
    let response_body = response.text().await?;

    if Self::is_fault(&response_body) {
      let (code, description) = Self::parse_fault(&response_body);
      log::debug!("{} rejected by {}: {} {}", request.action, control_url, code, description);
      return Err(SoapError::Fault { code, description });
    }

    if !status.is_success() {
      return Err(SoapError::Http { status: status.as_u16() });
    }

    SoapResponse::from_body(response_body)
  }
}

/// Collects the children of the `<u:{Action}Response>` element
pub fn parse_action_response(xml: &str) -> Result<Vec<(String, String)>, SoapError> {
  let mut reader = Reader::from_str(xml);
  reader.config_mut().trim_text(true);

  let mut args = Vec::new();
  let mut in_response = false;
  let mut current: Option<(String, String)> = None;
  let mut nested = 0usize;

  loop {
    match reader.read_event() {
      Ok(Event::Start(e)) => {
        let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
        if !in_response {
          in_response = name.ends_with("Response");
        } else if current.is_none() {
          current = Some((name, String::new()));
        } else {
          nested += 1;
        }
      }
      Ok(Event::Empty(e)) => {
        if in_response && current.is_none() {
          let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
          args.push((name, String::new()));
        }
      }
      Ok(Event::Text(t)) => {
        if let Some((_, value)) = current.as_mut() {
          let text = t
            .unescape()
            .map_err(|e| SoapError::Malformed(e.to_string()))?;
          value.push_str(&text);
        }
      }
      Ok(Event::CData(c)) => {
        if let Some((_, value)) = current.as_mut() {
          value.push_str(&String::from_utf8_lossy(&c.into_inner()));
        }
      }
      Ok(Event::End(_)) => {
        if nested > 0 {
          nested -= 1;
        } else if let Some(arg) = current.take() {
          args.push(arg);
        } else if in_response {
          break;
        }
      }
      Ok(Event::Eof) => break,
      Err(e) => return Err(SoapError::Malformed(e.to_string())),
      _ => {}
    }
  }

  if !in_response {
    return Err(SoapError::Malformed("no action response element".to_string()));
  }

  Ok(args)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_soap_request_builder() {
    let request = SoapRequest::new("urn:schemas-upnp-org:service:AVTransport:1", "Play")
      .param("InstanceID", "0")
      .param("Speed", "1");

    assert_eq!(request.action, "Play");
    assert_eq!(request.params.len(), 2);
    assert_eq!(request.params[1], ("Speed".to_string(), "1".to_string()));
  }

  #[test]
  fn test_build_soap_envelope() {
    let request = SoapRequest::new("urn:schemas-upnp-org:service:RenderingControl:1", "SetVolume")
      .param("InstanceID", "0")
      .param("Channel", "Master")
      .param("DesiredVolume", "50");

    let envelope = SoapClient::build_soap_envelope(&request);

    assert!(envelope.contains("<?xml version=\"1.0\""));
    assert!(envelope.contains("s:encodingStyle=\"http://schemas.xmlsoap.org/soap/encoding/\""));
    assert!(envelope.contains("<u:SetVolume xmlns:u=\"urn:schemas-upnp-org:service:RenderingControl:1\">"));
    assert!(envelope.contains("<InstanceID>0</InstanceID>"));
    assert!(envelope.contains("<Channel>Master</Channel>"));
    assert!(envelope.contains("<DesiredVolume>50</DesiredVolume>"));
    assert!(envelope.contains("</u:SetVolume>"));
  }

  #[test]
  fn test_envelope_escapes_parameter_values() {
    let request = SoapRequest::new("urn:schemas-upnp-org:service:AVTransport:1", "SetAVTransportURI")
      .param("CurrentURI", "http://host/a.mp3?x=1&y=2")
      .param("CurrentURIMetaData", "<DIDL-Lite>\"Tom's\"</DIDL-Lite>");

    let envelope = SoapClient::build_soap_envelope(&request);

    assert!(envelope.contains("<CurrentURI>http://host/a.mp3?x=1&amp;y=2</CurrentURI>"));
    assert!(envelope.contains("&lt;DIDL-Lite&gt;&quot;Tom&apos;s&quot;&lt;/DIDL-Lite&gt;"));
  }

  #[test]
  fn test_parse_fault_upnp_error() {
    let fault_response = r#"<?xml version="1.0"?>
      <s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
        <s:Body>
          <s:Fault>
            <faultcode>s:Client</faultcode>
            <faultstring>UPnPError</faultstring>
            <detail>
              <UPnPError xmlns="urn:schemas-upnp-org:control-1-0">
                <errorCode>701</errorCode>
                <errorDescription>Transition not available</errorDescription>
              </UPnPError>
            </detail>
          </s:Fault>
        </s:Body>
      </s:Envelope>"#;

    let (code, description) = SoapClient::parse_fault(fault_response);

    assert_eq!(code, 701);
    assert_eq!(description, "Transition not available");
  }

  #[test]
  fn test_parse_fault_without_upnp_error() {
    let fault_response = r#"<s:Fault><faultstring>Invalid Volume</faultstring></s:Fault>"#;
    assert_eq!(SoapClient::parse_fault(fault_response), (500, "Invalid Volume".to_string()));

    let unknown = r#"<response>No fault here</response>"#;
    assert_eq!(SoapClient::parse_fault(unknown), (500, "Unknown SOAP fault".to_string()));
  }

  #[test]
  fn test_element_text_lookup() {
    let xml = "<GetVolumeResponse><volume>75</volume><muted>1</muted></GetVolumeResponse>";

    assert_eq!(SoapClient::element_text(xml, "volume"), Some("75".to_string()));
    assert_eq!(SoapClient::element_text(xml, "muted"), Some("1".to_string()));
    assert_eq!(SoapClient::element_text(xml, "missing"), None);
  }

  #[test]
  fn test_parse_action_response() {
    let xml = r#"<?xml version="1.0"?>
      <s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
        <s:Body>
          <u:GetPositionInfoResponse xmlns:u="urn:schemas-upnp-org:service:AVTransport:1">
            <Track>1</Track>
            <TrackDuration>0:03:25</TrackDuration>
            <TrackMetaData>&lt;DIDL-Lite&gt;&lt;/DIDL-Lite&gt;</TrackMetaData>
            <TrackURI/>
            <RelTime>0:01:02</RelTime>
          </u:GetPositionInfoResponse>
        </s:Body>
      </s:Envelope>"#;

    let response = SoapResponse::from_body(xml.to_string()).unwrap();

    assert_eq!(response.get("Track"), Some("1"));
    assert_eq!(response.get("TrackDuration"), Some("0:03:25"));
    assert_eq!(response.get("TrackMetaData"), Some("<DIDL-Lite></DIDL-Lite>"));
    assert_eq!(response.get("TrackURI"), Some(""));
    assert_eq!(response.get("RelTime"), Some("0:01:02"));
    assert_eq!(response.get("Missing"), None);
  }

  #[test]
  fn test_parse_action_response_empty() {
    let xml = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body>
      <u:PlayResponse xmlns:u="urn:schemas-upnp-org:service:AVTransport:1"></u:PlayResponse>
      </s:Body></s:Envelope>"#;

    assert!(parse_action_response(xml).unwrap().is_empty());
  }

  #[test]
  fn test_parse_action_response_rejects_non_soap() {
    assert!(matches!(
      parse_action_response("<html>nope</html>"),
      Err(SoapError::Malformed(_))
    ));
  }
}
