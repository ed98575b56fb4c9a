use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::model::Udn;

const SSDP_ADDR: &str = "239.255.255.250:1900";

/// Used when an announcement carries no usable CACHE-CONTROL header
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(1800);

/// A device presence announcement, from a search response or NOTIFY alive
#[derive(Debug, Clone, PartialEq)]
pub struct SsdpAnnouncement {
  pub location: String,
  /// ST for search responses, NT for notifications
  pub target: String,
  pub usn: String,
  pub udn: Udn,
  pub server: Option<String>,
  pub max_age: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SsdpMessage {
  Alive(SsdpAnnouncement),
  ByeBye { udn: Udn, usn: String, target: String },
}

impl SsdpMessage {
  pub fn udn(&self) -> &Udn {
    match self {
      SsdpMessage::Alive(a) => &a.udn,
      SsdpMessage::ByeBye { udn, .. } => udn,
    }
  }
}

/// SSDP client for device discovery
pub struct SsdpClient {
  socket: UdpSocket,
  timeout: Duration,
}

impl SsdpClient {
  /// Create a new SSDP client that collects responses for `timeout`
  pub async fn new(timeout: Duration) -> std::io::Result<Self> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.set_multicast_loop_v4(true)?;

    Ok(Self { socket, timeout })
  }

  /// Send an M-SEARCH request and collect the responses until the timeout
  pub async fn search(&self, search_target: &str) -> std::io::Result<Vec<SsdpAnnouncement>> {
    let request = build_search_request(search_target);
    self.socket.send_to(request.as_bytes(), SSDP_ADDR).await?;

    let deadline = Instant::now() + self.timeout;
    let mut buffer = [0u8; 2048];
    let mut responses = Vec::new();

    loop {
      let received = tokio::time::timeout_at(deadline, self.socket.recv_from(&mut buffer)).await;
      let size = match received {
        Ok(Ok((size, _))) => size,
        Ok(Err(e)) => return Err(e),
        Err(_) => break,
      };

      let Ok(text) = std::str::from_utf8(&buffer[..size]) else {
        continue;
      };

      if let Some(SsdpMessage::Alive(announcement)) = parse_ssdp_message(text) {
        responses.push(announcement);
      }
    }

    Ok(responses)
  }
}

pub fn build_search_request(search_target: &str) -> String {
  format!(
    "M-SEARCH * HTTP/1.1\r\n\
      HOST: {}\r\n\
      MAN: \"ssdp:discover\"\r\n\
      MX: 2\r\n\
      ST: {}\r\n\
      USER-AGENT: dlna-rs/1.0 UPnP/1.0\r\n\
      \r\n",
    SSDP_ADDR, search_target
  )
}

/// Parse a search response or a NOTIFY datagram
pub fn parse_ssdp_message(message: &str) -> Option<SsdpMessage> {
  let mut lines = message.lines();
  let start_line = lines.next()?.trim();
  let is_notify = start_line.starts_with("NOTIFY");
  if !is_notify && !start_line.starts_with("HTTP/1.1 200") {
    return None;
  }

  let mut location = None;
  let mut target = None;
  let mut usn = None;
  let mut server = None;
  let mut nts = None;
  let mut max_age = None;

  for line in lines {
    let line = line.trim();

    if let Some(value) = extract_header_value(line, "LOCATION:") {
      location = Some(value);
    } else if let Some(value) = extract_header_value(line, "ST:") {
      target = Some(value);
    } else if let Some(value) = extract_header_value(line, "NTS:") {
      nts = Some(value);
    } else if let Some(value) = extract_header_value(line, "NT:") {
      target = Some(value);
    } else if let Some(value) = extract_header_value(line, "USN:") {
      usn = Some(value);
    } else if let Some(value) = extract_header_value(line, "SERVER:") {
      server = Some(value);
    } else if let Some(value) = extract_header_value(line, "CACHE-CONTROL:") {
      max_age = parse_max_age(&value);
    }
  }

  let usn = usn?;
  let target = target.unwrap_or_default();
  let udn = Udn::from_usn(&usn);

  if is_notify && nts.as_deref() == Some("ssdp:byebye") {
    return Some(SsdpMessage::ByeBye { udn, usn, target });
  }

  Some(SsdpMessage::Alive(SsdpAnnouncement {
    location: location?,
    target,
    usn,
    udn,
    server,
    max_age: max_age.unwrap_or(DEFAULT_MAX_AGE),
  }))
}

/// Reads `max-age=N` out of a CACHE-CONTROL value
fn parse_max_age(value: &str) -> Option<Duration> {
  value.split(',').find_map(|directive| {
    let (key, seconds) = directive.split_once('=')?;
    if !key.trim().eq_ignore_ascii_case("max-age") {
      return None;
    }
    seconds.trim().parse::<u64>().ok().map(Duration::from_secs)
  })
}

/// Extract header value from a line like "HEADER: value"
fn extract_header_value(line: &str, header: &str) -> Option<String> {
  let rest = line
    .get(..header.len())
    .filter(|name| name.eq_ignore_ascii_case(header))
    .and_then(|_| line.get(header.len()..))?;
  Some(rest.trim().to_string())
}
