use serde::{Deserialize, Serialize};
use std::borrow::Borrow;

/// Unique Device Name, stable across rediscovery of the same device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Udn(String);

impl<'de> Deserialize<'de> for Udn {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: serde::Deserializer<'de>,
  {
    let id = String::deserialize(deserializer)?;
    Ok(Self::new(id))
  }
}

impl Udn {
  /// Creates a new Udn, trimming surrounding whitespace
  pub fn new(id: impl Into<String>) -> Self {
    let id = id.into();
    Self(id.trim().to_string())
  }

  /// Extracts the UDN from an SSDP USN such as
  /// `uuid:1234::urn:schemas-upnp-org:device:MediaRenderer:1`
  pub fn from_usn(usn: &str) -> Self {
    Self::new(usn.split("::").next().unwrap_or(usn))
  }

  /// Returns the UDN as a string slice
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for Udn {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl AsRef<str> for Udn {
  fn as_ref(&self) -> &str {
    &self.0
  }
}

impl Borrow<str> for Udn {
  fn borrow(&self) -> &str {
    &self.0
  }
}

impl From<&str> for Udn {
  fn from(id: &str) -> Self {
    Self::new(id)
  }
}
